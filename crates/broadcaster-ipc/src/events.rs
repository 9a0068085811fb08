//! Events sent from the engine to the UI.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::{MediaKind, ProducerInfo, StreamSnapshot};

/// Events that the engine can send to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// Human-readable progress line for the status banner.
    Status(String),

    /// Error occurred.
    Error {
        /// Whether the session can be retried by going live again.
        recoverable: bool,

        /// Error message.
        message: String,
    },

    /// The preview must now show this stream (`None` clears it).
    PreviewChanged(Option<StreamSnapshot>),

    /// Camera and microphone flags after a toggle.
    MediaChanged {
        camera: bool,
        microphone: bool,
    },

    /// The set of live producers changed.
    ProducersChanged(Vec<ProducerInfo>),

    /// A local track ended on its own (device unplugged, revoked permission).
    TrackEnded {
        kind: MediaKind,
        producer_id: String,
    },

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
