//! Broadcaster host library.

pub mod commands;
pub mod config;
pub mod route;

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broadcaster_capture::{MediaSource, SyntheticSource};
use broadcaster_engine::{create_engine, SessionServices};
use broadcaster_ipc::{
    command_channel, event_channel, ProducerInfo, SessionCommand, SessionEvent, SessionState,
    StreamSnapshot,
};
use broadcaster_transport::loopback::{LoopbackDeviceFactory, LoopbackServer};
use broadcaster_transport::{Connector, DeviceFactory, SocketIoConnector, WebSocketConnector};

use crate::config::{AppConfig, SignalingProtocol, CONFIG_PATH_ENV};
use crate::route::{Role, VIEWER_STATUS};

/// The page's picture of the session, rebuilt from events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    pub status: String,
    pub error: Option<String>,
    pub camera: bool,
    pub microphone: bool,
    pub producers: Vec<ProducerInfo>,
    pub preview: Option<StreamSnapshot>,
}

impl SessionView {
    fn viewer() -> Self {
        Self {
            status: VIEWER_STATUS.to_string(),
            ..Self::default()
        }
    }

    /// Fold one event into the view.
    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { current, .. } => {
                self.state = (**current).clone();
                self.status = current.status_message().to_string();
            }
            SessionEvent::Status(status) => self.status = status.clone(),
            SessionEvent::Error { message, .. } => self.error = Some(message.clone()),
            SessionEvent::PreviewChanged(preview) => self.preview = preview.clone(),
            SessionEvent::MediaChanged { camera, microphone } => {
                self.camera = *camera;
                self.microphone = *microphone;
            }
            SessionEvent::ProducersChanged(producers) => self.producers = producers.clone(),
            SessionEvent::TrackEnded { .. } | SessionEvent::Ready | SessionEvent::Shutdown => {}
        }
    }
}

/// Application state shared with the command handlers.
pub struct AppState {
    pub command_tx: Sender<SessionCommand>,
    pub event_rx: Mutex<Receiver<SessionEvent>>,
    pub view: Mutex<SessionView>,
    pub role: Role,
    pub public_origin: String,
}

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "broadcaster=debug,broadcaster_lib=debug,broadcaster_engine=debug,broadcaster_capture=debug,broadcaster_transport=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Services for this host.
///
/// Capture and WebRTC negotiation are not built into the host, so only the
/// offline mode is self-contained: the in-process server, the loopback device
/// and synthetic media. Against a real server the embedder supplies the
/// device and media source through [`online_services`].
pub fn default_services(config: &AppConfig) -> Result<SessionServices> {
    ensure!(
        config.offline,
        "No WebRTC device or capture backend is built into this host; \
         set offline = true or provide one to reach {}",
        config.session.server_url
    );

    Ok(SessionServices {
        connector: Arc::new(LoopbackServer::new()),
        devices: Arc::new(LoopbackDeviceFactory::new()),
        media: Arc::new(SyntheticSource::new()),
    })
}

/// Services for a real signaling server, with the embedder's device and
/// media source.
pub fn online_services(
    config: &AppConfig,
    devices: Arc<dyn DeviceFactory>,
    media: Arc<dyn MediaSource>,
) -> SessionServices {
    let connector: Arc<dyn Connector> = match config.signaling {
        SignalingProtocol::SocketIo => Arc::new(SocketIoConnector),
        SignalingProtocol::WebSocket => Arc::new(WebSocketConnector),
    };

    SessionServices {
        connector,
        devices,
        media,
    }
}

/// Start the engine thread for `role`.
///
/// The viewer role never starts an engine: it touches neither capture nor
/// signaling, and needs no services.
pub fn launch(
    config: &AppConfig,
    role: Role,
    services: Option<SessionServices>,
) -> Result<(AppState, Option<JoinHandle<()>>)> {
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let (view, handle) = match role {
        Role::Broadcaster => {
            let services = services.context("The broadcaster role needs session services")?;
            let mut engine =
                create_engine(config.session.clone(), services, command_rx, event_tx)
                    .context("Failed to create engine")?;

            let handle = thread::Builder::new()
                .name("broadcaster-engine".into())
                .spawn(move || engine.run())
                .context("Failed to spawn engine thread")?;

            (SessionView::default(), Some(handle))
        }
        Role::Viewer => {
            info!("Viewer role selected, waiting for stream");
            (SessionView::viewer(), None)
        }
    };

    let state = AppState {
        command_tx,
        event_rx: Mutex::new(event_rx),
        view: Mutex::new(view),
        role,
        public_origin: config.public_origin.clone(),
    };

    Ok((state, handle))
}

/// Console host: reads page actions from stdin and prints what the page
/// would show.
pub fn run() -> Result<()> {
    init_logging();
    info!("Broadcaster starting");

    let config_path = std::env::var_os(CONFIG_PATH_ENV);
    let config = AppConfig::load(config_path.as_deref().map(Path::new))?;
    let route = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/live?broadcaster=true".to_string());
    let role = Role::from_route(&route);

    let services = if role.is_broadcaster() {
        Some(default_services(&config)?)
    } else {
        None
    };
    let (state, engine) = launch(&config, role, services)?;

    if !role.is_broadcaster() {
        println!("{}", commands::view(&state).status);
        return Ok(());
    }

    println!("commands: camera, mic, live, state, quit");
    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read command")?;
        let result = match line.trim() {
            "camera" => commands::toggle_camera(&state),
            "mic" => commands::toggle_microphone(&state),
            "live" => commands::toggle_live(&state),
            "state" => commands::get_state(&state),
            "quit" | "exit" => break,
            "" => Ok(()),
            other => Err(format!("Unknown command {:?}", other)),
        };
        if let Err(e) = result {
            error!("{}", e);
        }

        thread::sleep(Duration::from_millis(300));
        print_view(&state)?;
    }

    let _ = state.command_tx.send(SessionCommand::Shutdown);
    if let Some(handle) = engine {
        let _ = handle.join();
    }

    info!("Broadcaster stopped");
    Ok(())
}

fn print_view(state: &AppState) -> Result<()> {
    commands::poll_events(state).map_err(anyhow::Error::msg)?;
    let view = commands::view(state);

    println!(
        "[{}] camera={} mic={} producers={}",
        view.status,
        view.camera,
        view.microphone,
        view.producers.len()
    );
    if let Some(error) = &view.error {
        println!("error: {}", error);
    }
    if let Some(link) = commands::share_link(state) {
        println!("Share this link with viewers: {}", link);
    }
    Ok(())
}
