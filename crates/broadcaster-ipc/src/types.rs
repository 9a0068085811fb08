//! Common types used across IPC messages.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default signaling server address.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3001";

/// Default time to wait for any signaling acknowledgement.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Configuration for a broadcast session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Signaling server URL (e.g., "ws://localhost:3001").
    pub server_url: String,

    /// How long to wait for each request acknowledgement.
    pub request_timeout_ms: u64,

    /// How long to wait for the channel to report connected.
    pub connect_timeout_ms: u64,
}

impl SessionConfig {
    /// Request acknowledgement timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Connection timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Wire name ("audio" / "video").
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Name of the capture device for this kind, for user-facing messages.
    pub fn device_name(self) -> &'static str {
        match self {
            Self::Audio => "microphone",
            Self::Video => "camera",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackReadyState {
    /// Delivering media.
    Live,

    /// Stopped by us.
    Stopped,

    /// Ended by the device (unplugged, permission revoked).
    Ended,
}

/// A local track as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
    pub state: TrackReadyState,
}

/// The local stream as seen by the preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    /// Stream identity; stays the same while tracks are merged in and out.
    pub stream_id: String,

    /// Tracks currently attached to the stream.
    pub tracks: Vec<TrackInfo>,
}

/// A live producer as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerInfo {
    /// Server-assigned producer id.
    pub id: String,

    /// Media kind sent by this producer.
    pub kind: MediaKind,

    /// Local track this producer serializes.
    pub track_id: String,
}
