//! Contract between the streaming engine and the thing that plays audio.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SinkError;

/// Notifications emitted by a [`MediaSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// The last append finished; the sink accepts the next buffer.
    UpdateEnd,
    /// The last append failed. The sink is ready again.
    Error(SinkError),
    /// Playback ran out of data.
    Waiting,
}

/// Append-only byte sink of a media pipeline.
///
/// After a successful [`append`](MediaSink::append) the sink is busy until it
/// reports [`SinkEvent::UpdateEnd`] (or [`SinkEvent::Error`]) on the
/// pipeline's event channel.
pub trait MediaSink: Send {
    fn append(&mut self, data: Bytes) -> Result<(), SinkError>;

    fn is_updating(&self) -> bool;

    /// Set the perceived media length. Only valid while not updating.
    fn set_duration(&mut self, seconds: f64) -> Result<(), SinkError>;

    /// Tear the pipeline down. Further appends fail with [`SinkError::Closed`].
    fn close(&mut self);
}

/// A freshly constructed media pipeline: its sink and the sink's notifications.
pub struct MediaPipeline {
    pub sink: Box<dyn MediaSink>,
    pub events: mpsc::UnboundedReceiver<SinkEvent>,
}

impl std::fmt::Debug for MediaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPipeline")
            .field("sink", &"Box<dyn MediaSink>")
            .finish()
    }
}

/// The playback surface a controller drives.
pub trait PlaybackSurface: Send + Sync {
    /// Build a new, empty pipeline for one session.
    fn open_pipeline(&self) -> Result<MediaPipeline, SinkError>;

    fn pause(&self);

    fn resume(&self);

    fn is_paused(&self) -> bool;

    /// Duration last set on the active pipeline, `0.0` before the first one.
    fn duration(&self) -> f64;
}
