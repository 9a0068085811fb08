//! Host configuration.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use broadcaster_ipc::SessionConfig;
use broadcaster_transport::parse_server_url;

/// Overrides `session.server_url`.
pub const SERVER_URL_ENV: &str = "BROADCASTER_SERVER_URL";

/// Path of the TOML configuration file.
pub const CONFIG_PATH_ENV: &str = "BROADCASTER_CONFIG";

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "broadcaster.toml";

/// Wire protocol spoken by the signaling server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingProtocol {
    /// Socket.IO events with acknowledgements.
    #[default]
    #[serde(rename = "socketio")]
    SocketIo,

    /// Plain JSON text frames.
    #[serde(rename = "websocket")]
    WebSocket,
}

/// Host configuration, loaded from TOML.
///
/// ```toml
/// public_origin = "https://live.example"
/// signaling = "socketio"
///
/// [session]
/// server_url = "wss://sfu.example"
/// request_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Session settings handed to the engine.
    pub session: SessionConfig,

    /// Origin viewers open the share link on.
    pub public_origin: String,

    /// Protocol of the server at `session.server_url`.
    pub signaling: SignalingProtocol,

    /// Run against the in-process media server instead of `server_url`.
    pub offline: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            public_origin: "http://localhost:3000".to_string(),
            signaling: SignalingProtocol::default(),
            offline: false,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or [`DEFAULT_CONFIG_FILE`] if it exists) and apply
    /// the environment override.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::read(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("No configuration file, using defaults");
                Self::default()
            }
        };

        config.apply_server_url(std::env::var(SERVER_URL_ENV).ok());
        config.validate()?;

        info!(server = %config.session.server_url, offline = config.offline, "Configuration loaded");
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Replace the server address if one is given.
    pub fn apply_server_url(&mut self, server_url: Option<String>) {
        if let Some(url) = server_url.filter(|url| !url.trim().is_empty()) {
            debug!(%url, "Server URL overridden");
            self.session.server_url = url.trim().to_string();
        }
    }

    /// Check the server address and timeouts.
    pub fn validate(&self) -> Result<()> {
        parse_server_url(&self.session.server_url)
            .with_context(|| format!("Bad server_url {:?}", self.session.server_url))?;
        ensure!(
            self.session.request_timeout_ms > 0,
            "request_timeout_ms must be positive"
        );
        ensure!(
            self.session.connect_timeout_ms > 0,
            "connect_timeout_ms must be positive"
        );
        Ok(())
    }
}
