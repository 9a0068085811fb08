//! The single local media stream.

use uuid::Uuid;

use broadcaster_ipc::{MediaKind, StreamSnapshot};

use crate::track::LocalTrack;

/// The stream holding every enabled local track.
///
/// Only [`MediaAcquisition`](crate::MediaAcquisition) adds or removes tracks.
#[derive(Debug)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub(crate) fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Tracks of one kind.
    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub(crate) fn add_track(&mut self, track: LocalTrack) {
        if !self.tracks.iter().any(|t| t.same_track(&track)) {
            self.tracks.push(track);
        }
    }

    /// Detach all tracks of `kind` and hand them back.
    pub(crate) fn remove_kind(&mut self, kind: MediaKind) -> Vec<LocalTrack> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.tracks.drain(..).partition(|t| t.kind() == kind);
        self.tracks = kept;
        removed
    }

    /// Detach every track.
    pub(crate) fn take_tracks(&mut self) -> Vec<LocalTrack> {
        std::mem::take(&mut self.tracks)
    }

    /// Snapshot for the UI.
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            stream_id: self.id.clone(),
            tracks: self.tracks.iter().map(LocalTrack::info).collect(),
        }
    }
}
