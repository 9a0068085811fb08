//! Per-session resources and their release.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use broadcaster_ipc::SessionState;
use broadcaster_transport::{LoadedDevice, ProducerRegistry, SignalingChannel, TransportHandle};

/// Everything a go-live attempt builds.
///
/// None of it survives a failed attempt or a stop; a retry starts from an
/// empty set.
#[derive(Default)]
pub struct SessionResources {
    /// Signaling channel.
    pub channel: Option<Arc<SignalingChannel>>,

    /// Device loaded with the router capabilities.
    pub device: Option<LoadedDevice>,

    /// Send transport.
    pub transport: Option<TransportHandle>,

    /// One producer per local track.
    pub producers: ProducerRegistry,
}

impl SessionResources {
    /// Create empty resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.channel.is_none()
            && self.device.is_none()
            && self.transport.is_none()
            && self.producers.is_empty()
    }

    pub fn transport_id(&self) -> Option<&str> {
        self.transport.as_ref().map(TransportHandle::id)
    }

    /// Release from the last setup step backwards: producers, transport,
    /// channel. The device holds nothing remote and goes last. Safe to call
    /// repeatedly.
    #[instrument(name = "release_resources", skip(self))]
    pub fn release(&mut self) {
        if self.is_empty() {
            return;
        }

        let mut phase = SessionState::Broadcasting;
        loop {
            self.release_phase(&phase);

            match phase.previous() {
                Some(prev) => phase = prev,
                None => break,
            }
        }

        if self.device.take().is_some() {
            debug!("Device discarded");
        }

        info!("Session resources released");
    }

    fn release_phase(&mut self, phase: &SessionState) {
        match phase {
            SessionState::Producing => {
                if !self.producers.is_empty() {
                    debug!(count = self.producers.len(), "Closing producers");
                    self.producers.close_all();
                }
            }
            SessionState::CreatingTransport => {
                if let Some(mut transport) = self.transport.take() {
                    transport.close();
                }
            }
            SessionState::Connecting => {
                if let Some(channel) = self.channel.take() {
                    channel.disconnect();
                }
            }
            _ => {}
        }
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        self.release();
    }
}
