//! Signaling connection state.

use serde::{Deserialize, Serialize};

/// Where the signaling socket stands.
///
/// A channel is only built once its socket is open, so it starts out
/// `Connected`. Either side can end it; nothing reconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Closed by us, or never opened.
    #[default]
    Disconnected,

    /// Open and able to carry requests.
    Connected,

    /// The server side went away.
    Lost,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Check if the server closed the socket.
    pub fn is_lost(self) -> bool {
        self == Self::Lost
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
            Self::Lost => "Connection lost",
        }
    }
}
