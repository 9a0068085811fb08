//! Local media tracks.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use broadcaster_ipc::{MediaKind, TrackInfo, TrackReadyState};

/// A captured camera or microphone track.
///
/// Clones are handles to the same track: stopping one stops all of them.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: String,
    kind: MediaKind,
    label: String,
    state: watch::Sender<TrackReadyState>,
}

impl LocalTrack {
    /// Create a new live track.
    pub fn new(kind: MediaKind, label: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TrackReadyState::Live);

        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                kind,
                label: label.into(),
                state,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Current lifecycle state.
    pub fn ready_state(&self) -> TrackReadyState {
        *self.inner.state.borrow()
    }

    /// Check if the track still delivers media.
    pub fn is_live(&self) -> bool {
        self.ready_state() == TrackReadyState::Live
    }

    /// Stop the track. Does not notify ended listeners.
    pub fn stop(&self) {
        if self.finish(TrackReadyState::Stopped) {
            debug!(track = %self.id(), kind = %self.kind(), "Track stopped");
        }
    }

    /// Mark the track as ended by its device and notify listeners.
    pub fn end(&self) {
        if self.finish(TrackReadyState::Ended) {
            debug!(track = %self.id(), kind = %self.kind(), "Track ended");
        }
    }

    fn finish(&self, to: TrackReadyState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == TrackReadyState::Live {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Subscribe to this track ending on its own.
    pub fn on_ended(&self) -> TrackEndedListener {
        TrackEndedListener {
            rx: self.inner.state.subscribe(),
        }
    }

    /// Snapshot for the UI.
    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id().to_string(),
            kind: self.kind(),
            label: self.label().to_string(),
            state: self.ready_state(),
        }
    }

    /// Check if both handles refer to the same track.
    pub fn same_track(&self, other: &LocalTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &self.ready_state())
            .finish()
    }
}

/// Listener for a track ending on its own.
///
/// A track stopped by us never counts as ended.
#[derive(Debug)]
pub struct TrackEndedListener {
    rx: watch::Receiver<TrackReadyState>,
}

impl TrackEndedListener {
    /// Check without waiting.
    pub fn has_ended(&self) -> bool {
        *self.rx.borrow() == TrackReadyState::Ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_not_an_end() {
        let track = LocalTrack::new(MediaKind::Video, "cam");
        let listener = track.on_ended();

        track.stop();
        track.end();

        assert_eq!(track.ready_state(), TrackReadyState::Stopped);
        assert!(!listener.has_ended());
    }

    #[test]
    fn test_end_notifies_all_handles() {
        let track = LocalTrack::new(MediaKind::Audio, "mic");
        let clone = track.clone();
        let listener = track.on_ended();

        clone.end();

        assert!(listener.has_ended());
        assert!(!track.is_live());
        assert!(track.same_track(&clone));
    }
}
