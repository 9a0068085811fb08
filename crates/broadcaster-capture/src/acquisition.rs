//! Camera/microphone acquisition.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use broadcaster_ipc::MediaKind;

use crate::error::CaptureError;
use crate::stream::LocalStream;
use crate::track::LocalTrack;
use crate::CaptureResult;

/// Something that can open capture devices.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Capture tracks of exactly one kind.
    async fn capture(&self, kind: MediaKind) -> CaptureResult<Vec<LocalTrack>>;
}

/// Anything that renders the local stream (a preview element).
///
/// The sink only borrows the stream for the duration of the call.
pub trait PreviewSink: Send + Sync {
    /// Point the preview at `stream`, or clear it.
    fn show(&self, stream: Option<&LocalStream>);
}

/// Owns the local stream and the camera/microphone flags.
pub struct MediaAcquisition {
    source: Arc<dyn MediaSource>,
    preview: Option<Arc<dyn PreviewSink>>,
    stream: Option<LocalStream>,
    camera_enabled: bool,
    microphone_enabled: bool,
}

impl MediaAcquisition {
    /// Create an acquisition with no media.
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            preview: None,
            stream: None,
            camera_enabled: false,
            microphone_enabled: false,
        }
    }

    /// Attach a preview sink and point it at the current stream.
    pub fn set_preview(&mut self, preview: Arc<dyn PreviewSink>) {
        self.preview = Some(preview);
        self.refresh_preview();
    }

    pub async fn enable_camera(&mut self) -> CaptureResult<()> {
        self.enable(MediaKind::Video).await
    }

    pub fn disable_camera(&mut self) {
        self.disable(MediaKind::Video)
    }

    pub async fn enable_microphone(&mut self) -> CaptureResult<()> {
        self.enable(MediaKind::Audio).await
    }

    pub fn disable_microphone(&mut self) {
        self.disable(MediaKind::Audio)
    }

    /// Flip `kind` and return the new flag.
    pub async fn toggle(&mut self, kind: MediaKind) -> CaptureResult<bool> {
        if self.is_enabled(kind) {
            self.disable(kind);
            Ok(false)
        } else {
            self.enable(kind).await.map(|()| true)
        }
    }

    /// Capture `kind` and merge it into the stream.
    ///
    /// On failure nothing changes and the flag stays false.
    #[instrument(name = "enable_media", skip(self))]
    pub async fn enable(&mut self, kind: MediaKind) -> CaptureResult<()> {
        if self.is_enabled(kind) {
            debug!("Already enabled");
            return Ok(());
        }

        let captured = self.source.capture(kind).await.map_err(|e| {
            warn!("Capture failed: {}", e);
            e
        })?;

        let (tracks, stray): (Vec<_>, Vec<_>) =
            captured.into_iter().partition(|t| t.kind() == kind);
        for track in stray {
            track.stop();
        }

        if tracks.is_empty() {
            return Err(CaptureError::DeviceNotFound { kind });
        }

        match self.stream.as_mut() {
            Some(stream) => {
                for track in tracks {
                    stream.add_track(track);
                }
            }
            None => self.stream = Some(LocalStream::new(tracks)),
        }

        self.set_enabled(kind, true);
        self.refresh_preview();

        info!("Enabled {}", kind.device_name());
        Ok(())
    }

    /// Stop and detach the tracks of `kind`.
    #[instrument(name = "disable_media", skip(self))]
    pub fn disable(&mut self, kind: MediaKind) {
        if let Some(stream) = self.stream.as_mut() {
            for track in stream.remove_kind(kind) {
                track.stop();
            }
            if stream.is_empty() {
                self.stream = None;
            }
        }

        self.set_enabled(kind, false);
        self.refresh_preview();
    }

    /// Stop every track and clear the stream. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let tracks = stream.take_tracks();
            debug!(count = tracks.len(), "Releasing local media");
            for track in tracks {
                track.stop();
            }
        }

        self.camera_enabled = false;
        self.microphone_enabled = false;
        self.refresh_preview();
    }

    pub fn is_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.camera_enabled,
            MediaKind::Audio => self.microphone_enabled,
        }
    }

    pub fn is_camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    pub fn is_microphone_enabled(&self) -> bool {
        self.microphone_enabled
    }

    /// Check if there is anything to broadcast.
    pub fn has_media(&self) -> bool {
        self.stream.is_some() && (self.camera_enabled || self.microphone_enabled)
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    /// Handles to the current tracks, for producing.
    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.stream
            .as_ref()
            .map(|s| s.tracks().to_vec())
            .unwrap_or_default()
    }

    fn set_enabled(&mut self, kind: MediaKind, enabled: bool) {
        match kind {
            MediaKind::Video => self.camera_enabled = enabled,
            MediaKind::Audio => self.microphone_enabled = enabled,
        }
    }

    fn refresh_preview(&self) {
        if let Some(ref preview) = self.preview {
            preview.show(self.stream.as_ref());
        }
    }
}

impl Drop for MediaAcquisition {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyntheticSource;
    use broadcaster_ipc::{StreamSnapshot, TrackReadyState};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    #[derive(Default)]
    struct RecordingPreview {
        shown: Mutex<Vec<Option<StreamSnapshot>>>,
    }

    impl PreviewSink for RecordingPreview {
        fn show(&self, stream: Option<&LocalStream>) {
            self.shown.lock().push(stream.map(LocalStream::snapshot));
        }
    }

    impl RecordingPreview {
        fn last(&self) -> Option<StreamSnapshot> {
            self.shown.lock().last().cloned().flatten()
        }
    }

    fn setup() -> (Arc<SyntheticSource>, Arc<RecordingPreview>, MediaAcquisition) {
        let source = Arc::new(SyntheticSource::new());
        let preview = Arc::new(RecordingPreview::default());
        let mut media = MediaAcquisition::new(source.clone());
        media.set_preview(preview.clone());
        (source, preview, media)
    }

    #[tokio::test]
    async fn test_second_kind_merges_into_same_stream() {
        let (_source, preview, mut media) = setup();

        media.enable_camera().await.unwrap();
        let stream_id = media.stream().unwrap().id().to_string();

        media.enable_microphone().await.unwrap();
        let stream = media.stream().unwrap();

        assert_eq!(stream.id(), stream_id);
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(stream.tracks_of(MediaKind::Audio).count(), 1);

        let shown = preview.last().unwrap();
        assert_eq!(shown.stream_id, stream_id);
        assert_eq!(shown.tracks.len(), 2);
    }

    #[tokio::test]
    async fn test_disable_detaches_only_that_kind() {
        let (source, preview, mut media) = setup();
        media.enable_camera().await.unwrap();
        media.enable_microphone().await.unwrap();

        media.disable_camera();

        let stream = media.stream().unwrap();
        assert_eq!(stream.tracks().len(), 1);
        assert_eq!(stream.tracks()[0].kind(), MediaKind::Audio);
        assert!(!media.is_camera_enabled());

        let camera = source
            .issued()
            .into_iter()
            .find(|t| t.kind() == MediaKind::Video)
            .unwrap();
        assert_eq!(camera.ready_state(), TrackReadyState::Stopped);
        assert_eq!(preview.last().unwrap().tracks.len(), 1);
    }

    #[tokio::test]
    async fn test_removing_last_track_clears_stream_and_preview() {
        let (_source, preview, mut media) = setup();
        media.enable_microphone().await.unwrap();

        media.disable_microphone();

        assert!(media.stream().is_none());
        assert!(!media.has_media());
        assert_eq!(preview.shown.lock().last(), Some(&None));
    }

    #[tokio::test]
    async fn test_denied_capture_commits_nothing() {
        let (source, _preview, mut media) = setup();
        media.enable_microphone().await.unwrap();
        source.deny(MediaKind::Video);

        let err = media.enable_camera().await.unwrap_err();

        assert_eq!(err, CaptureError::PermissionDenied { kind: MediaKind::Video });
        assert_eq!(err.kind(), MediaKind::Video);
        assert!(!media.is_camera_enabled());
        assert_eq!(media.stream().unwrap().tracks().len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_flips_flag() {
        let (_source, _preview, mut media) = setup();

        assert!(media.toggle(MediaKind::Video).await.unwrap());
        assert!(media.is_camera_enabled());
        assert!(!media.toggle(MediaKind::Video).await.unwrap());
        assert!(media.stream().is_none());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (source, _preview, mut media) = setup();
        media.enable_camera().await.unwrap();
        media.enable_microphone().await.unwrap();

        media.release();
        media.release();

        assert!(media.stream().is_none());
        assert!(!media.is_camera_enabled() && !media.is_microphone_enabled());
        assert!(source.issued().iter().all(|t| !t.is_live()));
    }

    proptest! {
        #[test]
        fn prop_stream_holds_exactly_enabled_tracks(
            ops in prop::collection::vec((any::<bool>(), any::<bool>()), 1..24)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let source = Arc::new(SyntheticSource::new());
            let mut media = MediaAcquisition::new(source.clone());

            for (video, enable) in ops {
                let kind = if video { MediaKind::Video } else { MediaKind::Audio };
                let before = media.stream().map(|s| s.id().to_string());

                if enable {
                    rt.block_on(media.enable(kind)).unwrap();
                } else {
                    media.disable(kind);
                }

                let enabled: Vec<MediaKind> = [MediaKind::Video, MediaKind::Audio]
                    .into_iter()
                    .filter(|k| media.is_enabled(*k))
                    .collect();

                match media.stream() {
                    None => prop_assert!(enabled.is_empty()),
                    Some(stream) => {
                        prop_assert_eq!(stream.tracks().len(), enabled.len());
                        for kind in &enabled {
                            prop_assert_eq!(stream.tracks_of(*kind).count(), 1);
                        }
                        prop_assert!(stream.tracks().iter().all(LocalTrack::is_live));
                        if let Some(before) = before {
                            prop_assert_eq!(stream.id(), before.as_str());
                        }
                    }
                }

                let live = source.issued().iter().filter(|t| t.is_live()).count();
                prop_assert_eq!(live, enabled.len());
            }
        }
    }
}
