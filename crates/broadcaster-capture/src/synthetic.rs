//! Synthetic capture source.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use broadcaster_ipc::MediaKind;

use crate::acquisition::MediaSource;
use crate::error::CaptureError;
use crate::track::LocalTrack;
use crate::CaptureResult;

/// A capture source that hands out test-pattern tracks.
///
/// Devices can be denied or unplugged at runtime, which makes it usable for
/// headless runs as well as for exercising failure paths.
#[derive(Debug, Default)]
pub struct SyntheticSource {
    state: Mutex<SourceState>,
}

#[derive(Debug, Default)]
struct SourceState {
    denied: HashSet<MediaKind>,
    unplugged: HashSet<MediaKind>,
    issued: Vec<LocalTrack>,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse permission for `kind` on future captures.
    pub fn deny(&self, kind: MediaKind) {
        self.state.lock().denied.insert(kind);
    }

    /// Grant permission for `kind` again.
    pub fn allow(&self, kind: MediaKind) {
        self.state.lock().denied.remove(&kind);
    }

    /// Disconnect the `kind` device: every live track of that kind ends.
    pub fn unplug(&self, kind: MediaKind) {
        let mut state = self.state.lock();
        state.unplugged.insert(kind);

        let mut ended = 0;
        for track in state.issued.iter().filter(|t| t.kind() == kind && t.is_live()) {
            track.end();
            ended += 1;
        }
        info!(%kind, ended, "Synthetic device unplugged");
    }

    /// Reconnect the `kind` device.
    pub fn plug(&self, kind: MediaKind) {
        self.state.lock().unplugged.remove(&kind);
    }

    /// Every track this source has handed out, live or not.
    pub fn issued(&self) -> Vec<LocalTrack> {
        self.state.lock().issued.clone()
    }
}

#[async_trait]
impl MediaSource for SyntheticSource {
    async fn capture(&self, kind: MediaKind) -> CaptureResult<Vec<LocalTrack>> {
        let mut state = self.state.lock();

        if state.denied.contains(&kind) {
            return Err(CaptureError::PermissionDenied { kind });
        }
        if state.unplugged.contains(&kind) {
            return Err(CaptureError::DeviceNotFound { kind });
        }

        let track = LocalTrack::new(kind, format!("Synthetic {}", kind.device_name()));
        debug!(track = %track.id(), %kind, "Synthetic capture");
        state.issued.push(track.clone());

        Ok(vec![track])
    }
}
