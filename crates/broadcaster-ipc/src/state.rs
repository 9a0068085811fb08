//! Session state machine types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The current state of the broadcast session.
///
/// Setup states advance strictly in order. `Stopped` and `Failed` can be
/// entered from any state that is not already one of them, and a new go-live
/// attempt may start from either.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing has been attempted yet.
    #[default]
    Idle,

    /// Opening the signaling channel.
    Connecting,

    /// Loading the local device with the router capabilities.
    Negotiating,

    /// Creating the send transport and wiring its bridges.
    CreatingTransport,

    /// Creating one producer per local track.
    Producing,

    /// At least one producer is live.
    Broadcasting,

    /// Torn down on request.
    Stopped {
        /// Why the session stopped.
        reason: StopReason,
    },

    /// A setup step failed.
    Failed {
        /// User-facing error message.
        message: String,
    },
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

impl SessionState {
    /// Returns true if the session is in the Idle state.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the session is broadcasting.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Broadcasting)
    }

    /// Returns true while a go-live attempt is in progress.
    pub fn is_starting(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Negotiating | Self::CreatingTransport | Self::Producing
        )
    }

    /// Returns true if the session ended (stopped or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped { .. } | Self::Failed { .. })
    }

    /// Returns true if the session failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true if a fresh go-live attempt may start from here.
    pub fn can_go_live(&self) -> bool {
        self.is_idle() || self.is_terminal()
    }

    /// Returns the next setup state, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::Negotiating),
            Self::Negotiating => Some(Self::CreatingTransport),
            Self::CreatingTransport => Some(Self::Producing),
            Self::Producing => Some(Self::Broadcasting),
            _ => None,
        }
    }

    /// Returns the previous setup state, if any (for rollback).
    pub fn previous(&self) -> Option<Self> {
        match self {
            Self::Broadcasting => Some(Self::Producing),
            Self::Producing => Some(Self::CreatingTransport),
            Self::CreatingTransport => Some(Self::Negotiating),
            Self::Negotiating => Some(Self::Connecting),
            _ => None,
        }
    }

    /// Checks that `to` is reachable from this state.
    pub fn check_transition(&self, to: &SessionState) -> Result<(), InvalidTransition> {
        let allowed = match to {
            Self::Connecting => self.can_go_live(),
            Self::Stopped { .. } | Self::Failed { .. } => !self.is_terminal(),
            Self::Idle => false,
            other => self.next().as_ref() == Some(other),
        };

        if allowed {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.name(),
                to: to.name(),
            })
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Negotiating => "Negotiating",
            Self::CreatingTransport => "CreatingTransport",
            Self::Producing => "Producing",
            Self::Broadcasting => "Broadcasting",
            Self::Stopped { .. } => "Stopped",
            Self::Failed { .. } => "Failed",
        }
    }

    /// Returns the status banner text for this state.
    pub fn status_message(&self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::Connecting => "Connecting to server...",
            Self::Negotiating => "Initializing WebRTC...",
            Self::CreatingTransport => "Creating transport...",
            Self::Producing => "Starting broadcast...",
            Self::Broadcasting => "Broadcasting",
            Self::Stopped { .. } => "Stopped",
            Self::Failed { .. } => "Connection failed",
        }
    }
}

/// Reason for stopping the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// User ended the stream.
    UserRequested,

    /// The host is going away (navigation, window close).
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Stream stopped by user".to_string(),
            Self::Shutdown => "Broadcaster closed".to_string(),
        }
    }
}
