//! Error types for the capture module.

use broadcaster_ipc::MediaKind;
use thiserror::Error;

/// Errors that can occur while acquiring local media.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user or the platform refused access.
    #[error("Could not access {}: permission denied", .kind.device_name())]
    PermissionDenied { kind: MediaKind },

    /// No device of this kind is present.
    #[error("Could not access {}: no device found", .kind.device_name())]
    DeviceNotFound { kind: MediaKind },

    /// The device exists but could not be opened.
    #[error("Could not access {}: {message}", .kind.device_name())]
    Device { kind: MediaKind, message: String },
}

impl CaptureError {
    /// The media kind whose capture failed.
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::PermissionDenied { kind }
            | Self::DeviceNotFound { kind }
            | Self::Device { kind, .. } => *kind,
        }
    }
}
