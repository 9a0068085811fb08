//! Error types for the transport module.

use broadcaster_ipc::MediaKind;
use thiserror::Error;

/// Errors that can occur while talking to the media server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The signaling connection could not be established.
    #[error("Could not connect to the server: {0}")]
    SignalingConnect(String),

    /// No acknowledgement arrived in time.
    #[error("Timeout waiting for {method} after {timeout_ms} ms")]
    SignalingTimeout { method: String, timeout_ms: u64 },

    /// The server answered with `{error}` or something unusable.
    #[error("{0}")]
    ServerNegotiation(String),

    /// A single track could not be produced.
    #[error("Error producing {kind}: {message}")]
    Produce { kind: MediaKind, message: String },

    /// Another request for the same method is still waiting for its ack.
    #[error("Request {0} is already in flight")]
    RequestInFlight(String),

    /// Invalid signaling URL.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// The channel was disconnected locally.
    #[error("Not connected")]
    NotConnected,

    /// The server side went away while waiting.
    #[error("Signaling channel disconnected")]
    ChannelDisconnected,

    /// Payload could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The send transport is closed.
    #[error("Transport closed")]
    TransportClosed,
}

impl TransportError {
    /// Check if the error is a signaling timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::SignalingTimeout { .. })
    }
}
