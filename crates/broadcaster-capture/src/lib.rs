//! Local camera/microphone acquisition.
//!
//! This crate owns the captured media of a broadcast session: it asks a
//! [`MediaSource`] for tracks one kind at a time, keeps them merged in a
//! single [`LocalStream`], and keeps the preview pointed at that stream.

mod acquisition;
mod error;
mod stream;
mod synthetic;
mod track;

pub use acquisition::{MediaAcquisition, MediaSource, PreviewSink};
pub use error::CaptureError;
pub use stream::LocalStream;
pub use synthetic::SyntheticSource;
pub use track::{LocalTrack, TrackEndedListener};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
