//! Host command handlers.
//!
//! These mirror what the live page can do. They only queue commands; results
//! arrive as events through [`poll_events`].

use tracing::{debug, instrument};

use broadcaster_ipc::{SessionCommand, SessionEvent, SessionState};

use crate::route::share_link as link_for;
use crate::{AppState, SessionView};

fn send(state: &AppState, command: SessionCommand) -> Result<(), String> {
    if !state.role.is_broadcaster() {
        return Err("Only the broadcaster can control the stream".to_string());
    }

    state
        .command_tx
        .send(command)
        .map_err(|e| format!("Failed to send command: {}", e))
}

/// Start broadcasting.
#[instrument(skip(state))]
pub fn go_live(state: &AppState) -> Result<(), String> {
    debug!("go_live command");
    send(state, SessionCommand::GoLive)
}

/// End the broadcast.
#[instrument(skip(state))]
pub fn end_stream(state: &AppState) -> Result<(), String> {
    debug!("end_stream command");
    send(state, SessionCommand::EndStream)
}

/// The live button: go live, or end the stream when already live.
pub fn toggle_live(state: &AppState) -> Result<(), String> {
    if state.view.lock().state.is_live() {
        end_stream(state)
    } else {
        go_live(state)
    }
}

pub fn set_camera(state: &AppState, enabled: bool) -> Result<(), String> {
    send(state, SessionCommand::SetCamera(enabled))
}

pub fn set_microphone(state: &AppState, enabled: bool) -> Result<(), String> {
    send(state, SessionCommand::SetMicrophone(enabled))
}

pub fn toggle_camera(state: &AppState) -> Result<(), String> {
    send(state, SessionCommand::ToggleCamera)
}

pub fn toggle_microphone(state: &AppState) -> Result<(), String> {
    send(state, SessionCommand::ToggleMicrophone)
}

/// Ask the engine to re-send its state.
pub fn get_state(state: &AppState) -> Result<(), String> {
    send(state, SessionCommand::GetState)
}

/// Drain pending events (non-blocking) and fold them into the view.
pub fn poll_events(state: &AppState) -> Result<Vec<SessionEvent>, String> {
    let rx = state.event_rx.lock();
    let mut events = Vec::new();

    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(crossbeam_channel::TryRecvError::Empty) => break,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                if events.is_empty() && state.role.is_broadcaster() {
                    return Err("Event channel disconnected".to_string());
                }
                break;
            }
        }
    }

    let mut view = state.view.lock();
    for event in &events {
        view.apply(event);
    }

    Ok(events)
}

/// What the page currently shows.
pub fn view(state: &AppState) -> SessionView {
    state.view.lock().clone()
}

pub fn current_state(state: &AppState) -> SessionState {
    state.view.lock().state.clone()
}

/// Link for viewers, only while live.
pub fn share_link(state: &AppState) -> Option<String> {
    state
        .view
        .lock()
        .state
        .is_live()
        .then(|| link_for(&state.public_origin))
}
