//! Engine thread: command loop around the session controller.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, instrument, warn};

use broadcaster_ipc::{SessionCommand, SessionConfig, SessionEvent, StopReason};

use crate::error::SessionError;
use crate::session::{SessionController, SessionServices};
use crate::SessionResult;

/// How long the loop waits for a command before running its idle tick.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// The session engine.
///
/// Owns the session and the single-threaded runtime its async steps run on.
/// Commands are handled one at a time, so a command sent while going live
/// waits until that attempt has finished.
pub struct Engine {
    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,
    session: SessionController,
    runtime: Runtime,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        config: SessionConfig,
        services: SessionServices,
        command_rx: Receiver<SessionCommand>,
        event_tx: Sender<SessionEvent>,
    ) -> SessionResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SessionError::Runtime(e.to_string()))?;

        Ok(Self {
            command_rx,
            session: SessionController::new(config, services, event_tx.clone()),
            event_tx,
            runtime,
        })
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!(server = %self.session.config().server_url, "Engine starting");
        self.send_event(SessionEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(TICK_INTERVAL) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                    // A busy command stream must not starve ended-track handling.
                    self.tick();
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => self.tick(),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.session.stop(StopReason::Shutdown);
                    break;
                }
            }
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if the engine should stop.
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        debug!(?command, "Handling command");

        // Failures are already reported to the UI by the session.
        let result = match command {
            SessionCommand::SetCamera(enabled) => {
                self.runtime.block_on(self.session.set_camera(enabled))
            }
            SessionCommand::SetMicrophone(enabled) => {
                self.runtime.block_on(self.session.set_microphone(enabled))
            }
            SessionCommand::ToggleCamera => self
                .runtime
                .block_on(self.session.toggle_camera())
                .map(drop),
            SessionCommand::ToggleMicrophone => self
                .runtime
                .block_on(self.session.toggle_microphone())
                .map(drop),
            SessionCommand::GoLive => self.runtime.block_on(self.session.go_live()),
            SessionCommand::EndStream => {
                self.session.stop(StopReason::UserRequested);
                Ok(())
            }
            SessionCommand::GetState => {
                self.session.send_state();
                Ok(())
            }
            SessionCommand::Shutdown => {
                self.session.stop(StopReason::Shutdown);
                self.send_event(SessionEvent::Shutdown);
                return false;
            }
        };

        if let Err(e) = result {
            debug!("Command failed: {}", e);
        }

        true
    }

    /// Let background tasks make progress and pick up ended tracks. Runs
    /// after every command and whenever the loop is idle.
    fn tick(&mut self) {
        self.runtime.block_on(tokio::task::yield_now());

        if self.session.is_live() {
            let reaped = self.session.reap_ended_tracks();
            if !reaped.is_empty() {
                debug!(count = reaped.len(), "Reaped ended tracks");
            }
        }
    }

    fn send_event(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.session.teardown();
    }
}
