//! Error types for the session engine.

use broadcaster_capture::CaptureError;
use broadcaster_ipc::InvalidTransition;
use broadcaster_transport::TransportError;
use thiserror::Error;

/// Shown when going live with neither camera nor microphone enabled.
pub const NO_MEDIA_MESSAGE: &str = "Please enable camera or microphone before going live";

/// Errors that can end a session step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A precondition of the requested operation does not hold.
    #[error("{0}")]
    Validation(String),

    /// Camera or microphone could not be captured.
    #[error(transparent)]
    MediaAccess(#[from] CaptureError),

    /// Signaling, negotiation or production failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The state machine refused a step.
    #[error(transparent)]
    State(#[from] InvalidTransition),

    /// The engine runtime could not be created.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl SessionError {
    /// Message for the status banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(TransportError::Produce { .. }) => self.to_string(),
            Self::Transport(e) => format!("Connection error: {}", e),
            _ => self.to_string(),
        }
    }
}
