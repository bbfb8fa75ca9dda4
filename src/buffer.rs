//! Serialised appends into a media sink that is intermittently busy.
//!
//! [`BufferQueue`] is a handle to a worker task that owns the sink. Buffers
//! are submitted one at a time, in enqueue order; while the sink is updating
//! they wait in the pending queue and the next one goes out on the sink's
//! ready notification. No polling is involved.

use bytes::Bytes;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SinkError;
use crate::session::{PlaybackEvent, SessionId};
use crate::surface::{MediaPipeline, MediaSink, SinkEvent};

enum QueueCommand {
    Append(Bytes),
    Duration(f64),
    EndOfStream,
}

#[derive(Debug, Default)]
struct QueueStats {
    queued: AtomicUsize,
    submitted: AtomicU64,
}

/// Handle to a session's pending append queue. Cloning shares the queue;
/// dropping every handle drains what is already queued and closes the sink.
#[derive(Debug, Clone)]
pub struct BufferQueue {
    commands: mpsc::UnboundedSender<QueueCommand>,
    stats: Arc<QueueStats>,
}

impl std::fmt::Debug for QueueCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueCommand::Append(data) => write!(f, "Append({} bytes)", data.len()),
            QueueCommand::Duration(seconds) => write!(f, "Duration({seconds})"),
            QueueCommand::EndOfStream => write!(f, "EndOfStream"),
        }
    }
}

impl BufferQueue {
    /// Start the worker for `pipeline`. Starvation reported by the sink is
    /// forwarded on `events`, tagged with `session`.
    pub fn spawn(
        session: SessionId,
        pipeline: MediaPipeline,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(QueueStats::default());

        let worker = QueueWorker {
            session,
            sink: pipeline.sink,
            sink_events: pipeline.events,
            commands: command_rx,
            pending: VecDeque::new(),
            busy: false,
            starved: false,
            closed: false,
            duration: None,
            events,
            stats: stats.clone(),
        };
        let handle = tokio::spawn(worker.run());

        (Self { commands, stats }, handle)
    }

    pub fn enqueue(&self, data: Bytes) -> Result<(), SinkError> {
        self.stats.queued.fetch_add(1, Ordering::SeqCst);
        self.commands.send(QueueCommand::Append(data)).map_err(|_| {
            self.stats.queued.fetch_sub(1, Ordering::SeqCst);
            SinkError::Closed
        })
    }

    /// Publish a new total duration. It reaches the sink the next time the
    /// sink is not updating; only the latest value is kept.
    pub fn publish_duration(&self, seconds: f64) -> Result<(), SinkError> {
        self.commands
            .send(QueueCommand::Duration(seconds))
            .map_err(|_| SinkError::Closed)
    }

    /// Mark that nothing more will be enqueued. If playback already ran dry
    /// since the last append, starvation is reported again so the end of the
    /// stream is not missed.
    pub fn end_of_stream(&self) -> Result<(), SinkError> {
        self.commands
            .send(QueueCommand::EndOfStream)
            .map_err(|_| SinkError::Closed)
    }

    /// Buffers enqueued but not yet handed to the sink.
    pub fn pending_len(&self) -> usize {
        self.stats.queued.load(Ordering::SeqCst)
    }

    /// Buffers the sink has accepted.
    pub fn submitted(&self) -> u64 {
        self.stats.submitted.load(Ordering::SeqCst)
    }
}

struct QueueWorker {
    session: SessionId,
    sink: Box<dyn MediaSink>,
    sink_events: mpsc::UnboundedReceiver<SinkEvent>,
    commands: mpsc::UnboundedReceiver<QueueCommand>,
    pending: VecDeque<Bytes>,
    busy: bool,
    // Playback ran dry after the most recent append.
    starved: bool,
    closed: bool,
    duration: Option<f64>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    stats: Arc<QueueStats>,
}

impl QueueWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                event = self.sink_events.recv() => match event {
                    Some(event) => self.on_sink_event(event),
                    None => {
                        debug!("Sink of session {} stopped reporting", self.session);
                        break;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(QueueCommand::Append(data)) => self.push(data),
                    Some(QueueCommand::Duration(seconds)) => {
                        self.duration = Some(seconds);
                        self.apply_duration();
                    }
                    Some(QueueCommand::EndOfStream) => {
                        if self.starved {
                            debug!("Session {} ran dry before its last chunk", self.session);
                            self.report_starved();
                        }
                    }
                    None => {
                        self.drain().await;
                        break;
                    }
                },
            }
        }

        self.close_sink();
    }

    fn close_sink(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.commands.close();
        let mut dropped = self.pending.len();
        self.pending.clear();
        while let Ok(command) = self.commands.try_recv() {
            if let QueueCommand::Append(_) = command {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(
                "Dropping {} unsubmitted buffers of session {}",
                dropped, self.session
            );
            self.stats.queued.fetch_sub(dropped, Ordering::SeqCst);
        }
        debug!(
            "Closing sink of session {} ({} buffers appended)",
            self.session,
            self.stats.submitted.load(Ordering::SeqCst)
        );
        self.sink.close();
    }

    fn is_busy(&self) -> bool {
        self.busy || self.sink.is_updating()
    }

    fn push(&mut self, data: Bytes) {
        if self.is_busy() || !self.pending.is_empty() {
            self.pending.push_back(data);
        } else {
            self.submit(data);
        }
    }

    fn submit(&mut self, data: Bytes) {
        self.stats.queued.fetch_sub(1, Ordering::SeqCst);
        let len = data.len();

        match self.sink.append(data) {
            Ok(()) => {
                self.busy = true;
                self.starved = false;
                self.stats.submitted.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(
                    "Sink of session {} rejected a {} byte buffer: {}",
                    self.session, len, e
                );
            }
        }
    }

    fn submit_next(&mut self) {
        while !self.is_busy() {
            match self.pending.pop_front() {
                Some(data) => self.submit(data),
                None => break,
            }
        }
    }

    fn on_sink_event(&mut self, event: SinkEvent) {
        match event {
            SinkEvent::UpdateEnd => {
                self.busy = false;
                self.apply_duration();
                self.submit_next();
            }
            SinkEvent::Error(e) => {
                warn!("Sink of session {} failed an append: {}", self.session, e);
                self.busy = false;
                self.apply_duration();
                self.submit_next();
            }
            SinkEvent::Waiting => {
                if !self.is_busy() && self.pending.is_empty() {
                    self.starved = true;
                    self.report_starved();
                }
            }
        }
    }

    fn report_starved(&self) {
        let _ = self.events.send(PlaybackEvent::Starved {
            session: self.session,
        });
    }

    fn apply_duration(&mut self) {
        if self.is_busy() {
            return;
        }
        if let Some(seconds) = self.duration.take() {
            if let Err(e) = self.sink.set_duration(seconds) {
                warn!("Could not set duration on session {}: {}", self.session, e);
            }
        }
    }

    /// Hand everything already queued to the sink before it is closed.
    async fn drain(&mut self) {
        while !self.pending.is_empty() {
            if !self.is_busy() {
                self.submit_next();
                continue;
            }
            match self.sink_events.recv().await {
                Some(event) => self.on_sink_event(event),
                None => break,
            }
        }
    }
}

// An aborted worker still releases its pipeline.
impl Drop for QueueWorker {
    fn drop(&mut self) {
        self.close_sink();
    }
}
