//! Session orchestrator for the broadcaster.
//!
//! This crate ties local media, signaling and the send transport together
//! into one broadcast session, driven from its own engine thread.

mod error;
mod orchestrator;
mod session;
mod state;

pub use error::{SessionError, NO_MEDIA_MESSAGE};
pub use orchestrator::Engine;
pub use session::{SessionController, SessionServices};
pub use state::SessionResources;

use broadcaster_ipc::{SessionCommand, SessionConfig, SessionEvent};
use crossbeam_channel::{Receiver, Sender};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Create an engine instance with IPC channels.
pub fn create_engine(
    config: SessionConfig,
    services: SessionServices,
    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,
) -> SessionResult<Engine> {
    Engine::new(config, services, command_rx, event_tx)
}
