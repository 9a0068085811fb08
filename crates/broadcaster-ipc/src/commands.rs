//! Commands sent from the UI to the engine.

use serde::{Deserialize, Serialize};

/// Commands that the UI can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionCommand {
    /// Enable (`true`) or disable (`false`) the camera.
    SetCamera(bool),

    /// Enable (`true`) or disable (`false`) the microphone.
    SetMicrophone(bool),

    /// Flip the camera on or off.
    ToggleCamera,

    /// Flip the microphone on or off.
    ToggleMicrophone,

    /// Start broadcasting the enabled local media.
    GoLive,

    /// End the current broadcast and release local media.
    EndStream,

    /// Request current session state.
    GetState,

    /// Tear everything down and stop the engine.
    Shutdown,
}
