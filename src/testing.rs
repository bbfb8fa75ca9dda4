//! Test doubles for the streaming engine.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::api::ChunkFetcher;
use crate::duration::DurationEstimator;
use crate::error::{DecodeError, FetchError, SinkError};
use crate::surface::{MediaPipeline, MediaSink, PlaybackSurface, SinkEvent};

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Everything observable that happened, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Fetch { track: String, index: u64 },
    Append { pipeline: usize, tag: u8, len: usize },
    Duration { pipeline: usize, seconds: f64 },
    Close { pipeline: usize },
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Entry>>>);

impl Journal {
    pub fn record(&self, entry: Entry) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &Entry) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn fetches(&self, track: &str) -> Vec<u64> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Fetch { track: t, index } if t == track => Some(index),
                _ => None,
            })
            .collect()
    }

    /// `(tag, len)` of every buffer appended to `pipeline`.
    pub fn appends(&self, pipeline: usize) -> Vec<(u8, usize)> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Append { pipeline: p, tag, len } if p == pipeline => Some((tag, len)),
                _ => None,
            })
            .collect()
    }

    pub fn durations(&self, pipeline: usize) -> Vec<f64> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Duration { pipeline: p, seconds } if p == pipeline => Some(seconds),
                _ => None,
            })
            .collect()
    }
}

/// Holds one fetch in flight until released.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    /// Resolves once the gated fetch has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Serves chunks from a table of per-track chunk sizes. Every byte of chunk
/// `i` equals `i as u8`, so appended buffers can be traced back to their index.
#[derive(Default)]
pub struct ScriptedFetcher {
    tracks: Mutex<HashMap<String, Vec<usize>>>,
    failures: Mutex<HashMap<(String, u64), u16>>,
    gates: Mutex<HashMap<(String, u64), Gate>>,
    journal: Journal,
}

impl ScriptedFetcher {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn add_track(&self, track: &str, sizes: Vec<usize>) {
        self.tracks.lock().unwrap().insert(track.to_string(), sizes);
    }

    /// Make chunk `index` of `track` answer with HTTP `status`.
    pub fn fail_at(&self, track: &str, index: u64, status: u16) {
        self.failures
            .lock()
            .unwrap()
            .insert((track.to_string(), index), status);
    }

    pub fn gate(&self, track: &str, index: u64) -> Gate {
        let gate = Gate::default();
        self.gates
            .lock()
            .unwrap()
            .insert((track.to_string(), index), gate.clone());
        gate
    }
}

#[async_trait]
impl ChunkFetcher for ScriptedFetcher {
    async fn fetch(&self, track: &str, index: u64) -> Result<Bytes, FetchError> {
        self.journal.record(Entry::Fetch {
            track: track.to_string(),
            index,
        });

        let key = (track.to_string(), index);
        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if let Some(status) = self.failures.lock().unwrap().get(&key).copied() {
            return Err(FetchError::Status {
                track: track.to_string(),
                index,
                status,
            });
        }

        let size = self
            .tracks
            .lock()
            .unwrap()
            .get(track)
            .and_then(|sizes| sizes.get(index as usize).copied());

        match size {
            Some(size) => Ok(Bytes::from(vec![index as u8; size])),
            None => Err(FetchError::Status {
                track: track.to_string(),
                index,
                status: 416,
            }),
        }
    }
}

/// Duration of a chunk looked up by its tag byte; missing entries fail to decode.
#[derive(Debug, Default)]
pub struct TableEstimator {
    seconds: Vec<Option<f64>>,
}

impl TableEstimator {
    pub fn new(seconds: Vec<Option<f64>>) -> Self {
        Self { seconds }
    }

    pub fn uniform(seconds: f64, chunks: usize) -> Self {
        Self::new(vec![Some(seconds); chunks])
    }
}

impl DurationEstimator for TableEstimator {
    fn decode_duration(&self, data: Bytes) -> Result<f64, DecodeError> {
        let tag = *data.first().ok_or(DecodeError::Empty)? as usize;
        self.seconds
            .get(tag)
            .copied()
            .flatten()
            .ok_or(DecodeError::NoTrack)
    }
}

struct RecordingSink {
    pipeline: usize,
    journal: Journal,
    events: mpsc::UnboundedSender<SinkEvent>,
    duration: Arc<AtomicU64>,
    hold_acks: bool,
    updating: bool,
    closed: bool,
}

impl MediaSink for RecordingSink {
    fn append(&mut self, data: Bytes) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.journal.record(Entry::Append {
            pipeline: self.pipeline,
            tag: data.first().copied().unwrap_or(0),
            len: data.len(),
        });
        if self.hold_acks {
            self.updating = true;
        } else {
            let _ = self.events.send(SinkEvent::UpdateEnd);
        }
        Ok(())
    }

    fn is_updating(&self) -> bool {
        self.updating
    }

    fn set_duration(&mut self, seconds: f64) -> Result<(), SinkError> {
        self.duration.store(seconds.to_bits(), Ordering::SeqCst);
        self.journal.record(Entry::Duration {
            pipeline: self.pipeline,
            seconds,
        });
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.journal.record(Entry::Close {
                pipeline: self.pipeline,
            });
        }
    }
}

/// Surface whose sinks acknowledge every append at once and record into the
/// shared journal. Pipelines are numbered from 0 in opening order.
#[derive(Default)]
pub struct RecordingSurface {
    journal: Journal,
    opened: AtomicUsize,
    senders: Mutex<Vec<mpsc::UnboundedSender<SinkEvent>>>,
    paused: AtomicBool,
    duration: Arc<AtomicU64>,
    hold_acks: AtomicBool,
}

impl RecordingSurface {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sinks opened from now on never acknowledge an append.
    pub fn hold_acks(&self) {
        self.hold_acks.store(true, Ordering::SeqCst);
    }

    /// Report that playback of `pipeline` ran dry.
    pub fn starve(&self, pipeline: usize) {
        if let Some(tx) = self.senders.lock().unwrap().get(pipeline) {
            let _ = tx.send(SinkEvent::Waiting);
        }
    }
}

impl PlaybackSurface for RecordingSurface {
    fn open_pipeline(&self) -> Result<MediaPipeline, SinkError> {
        let pipeline = self.opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx.clone());
        self.paused.store(false, Ordering::SeqCst);
        self.duration.store(0f64.to_bits(), Ordering::SeqCst);

        Ok(MediaPipeline {
            sink: Box::new(RecordingSink {
                pipeline,
                journal: self.journal.clone(),
                events: tx,
                duration: self.duration.clone(),
                hold_acks: self.hold_acks.load(Ordering::SeqCst),
                updating: false,
                closed: false,
            }),
            events: rx,
        })
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn duration(&self) -> f64 {
        f64::from_bits(self.duration.load(Ordering::SeqCst))
    }
}
