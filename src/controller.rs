//! The chunked-stream playback engine.
//!
//! A [`StreamController`] owns at most one active [`StreamSession`]. Each
//! session runs a sequential chunk chain (fetch, enqueue, estimate duration,
//! next) on its own task and appends into its own [`BufferQueue`]. Starting a
//! new session first retires the old one: the chain is told to stop, the
//! fetch in flight is awaited (or aborted after the reset timeout), and only
//! then is the old pipeline torn down.

use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::ChunkFetcher;
use crate::buffer::BufferQueue;
use crate::config::PlayerConfig;
use crate::duration::DurationEstimator;
use crate::error::SinkError;
use crate::playlist::PlaylistCursor;
use crate::session::{PlaybackEvent, SessionId, SessionState, StreamSession, Termination};
use crate::surface::PlaybackSurface;

struct ActiveSession {
    session: Arc<StreamSession>,
    queue: BufferQueue,
    fetch_task: JoinHandle<()>,
    queue_task: JoinHandle<()>,
}

pub struct StreamController {
    config: PlayerConfig,
    fetcher: Arc<dyn ChunkFetcher>,
    estimator: Arc<dyn DurationEstimator>,
    surface: Arc<dyn PlaybackSurface>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    // Held across a whole reset so that session switches never interleave.
    slot: tokio::sync::Mutex<Option<ActiveSession>>,
    current: RwLock<Option<Arc<StreamSession>>>,
    playlist: Mutex<PlaylistCursor>,
    next_id: AtomicU64,
}

impl StreamController {
    /// Build a controller and the receiving end of its playback events.
    pub fn new(
        config: PlayerConfig,
        fetcher: Arc<dyn ChunkFetcher>,
        estimator: Arc<dyn DurationEstimator>,
        surface: Arc<dyn PlaybackSurface>,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let controller = Self {
            config,
            fetcher,
            estimator,
            surface,
            events,
            slot: tokio::sync::Mutex::new(None),
            current: RwLock::new(None),
            playlist: Mutex::new(PlaylistCursor::default()),
            next_id: AtomicU64::new(0),
        };
        (controller, event_rx)
    }

    /// Retire the current session (if any) and start streaming `track` from
    /// chunk 0 into a fresh pipeline.
    pub async fn start_session(&self, track: &str) -> Result<SessionId, SinkError> {
        let mut slot = self.slot.lock().await;
        if let Some(active) = slot.take() {
            self.retire(active).await;
        }
        self.set_current(None);

        let pipeline = self.surface.open_pipeline()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(StreamSession::new(id, track));
        let (queue, queue_task) = BufferQueue::spawn(id, pipeline, self.events.clone());

        info!("Playing {:?} (session {})", track, id);
        let _ = self.events.send(PlaybackEvent::Started {
            session: id,
            track: track.to_string(),
        });

        session.set_state(SessionState::Fetching(0));
        let chain = ChunkChain {
            session: session.clone(),
            fetcher: self.fetcher.clone(),
            estimator: self.estimator.clone(),
            queue: queue.clone(),
            chunk_size: self.config.chunk_size,
            events: self.events.clone(),
        };
        let fetch_task = tokio::spawn(chain.run());

        self.set_current(Some(session.clone()));
        *slot = Some(ActiveSession {
            session,
            queue,
            fetch_task,
            queue_task,
        });
        self.surface.resume();

        Ok(id)
    }

    /// Stop the current session and tear its pipeline down. Resolves only
    /// once nothing from that session can reach a buffer any more.
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(active) = slot.take() {
            self.retire(active).await;
        }
        self.set_current(None);
    }

    async fn retire(&self, active: ActiveSession) {
        let ActiveSession {
            session,
            queue,
            mut fetch_task,
            mut queue_task,
        } = active;
        let id = session.id();

        debug!("Retiring session {} in state {:?}", id, session.state());
        session.cancel();

        // One budget covers both the fetch in flight and the queue drain.
        let deadline = self
            .config
            .reset_timeout()
            .map(|limit| tokio::time::Instant::now() + limit);

        let finished = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut fetch_task)
                .await
                .is_ok(),
            None => {
                let _ = (&mut fetch_task).await;
                true
            }
        };
        if !finished {
            warn!(
                "Session {} still fetching after {:?}, aborting it",
                id,
                self.config.reset_timeout()
            );
            fetch_task.abort();
            let _ = fetch_task.await;
        }
        if !session.state().is_terminal() {
            session.set_state(SessionState::Cancelled);
        }

        // The chain is gone, so this is the last handle: the queue drains
        // what it already holds and closes the old pipeline.
        drop(queue);
        let drained = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut queue_task).await,
            None => Ok((&mut queue_task).await),
        };
        match drained {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Buffer queue of session {} ended abnormally: {}", id, e),
            Err(_) => {
                // The worker closes its sink when dropped.
                warn!("Sink of session {} never became ready, closing it", id);
                queue_task.abort();
                let _ = queue_task.await;
            }
        }
        debug!("Session {} retired", id);
    }

    /// Start `tracks` as the playlist, rotated so that `tracks[start]` plays
    /// first. An empty list just resets.
    pub async fn play_from(
        &self,
        tracks: &[String],
        start: usize,
    ) -> Result<Option<SessionId>, SinkError> {
        let first = {
            let mut playlist = self.lock_playlist();
            *playlist = PlaylistCursor::rotated(tracks, start);
            playlist.current().map(str::to_string)
        };

        match first {
            Some(track) => self.start_session(&track).await.map(Some),
            None => {
                self.reset().await;
                Ok(None)
            }
        }
    }

    /// Advance the playlist. When it is exhausted playback stops and the
    /// controller returns to idle.
    pub async fn next_track(&self) -> Result<Option<SessionId>, SinkError> {
        let next = self.lock_playlist().advance().map(str::to_string);

        match next {
            Some(track) => self.start_session(&track).await.map(Some),
            None => {
                info!("Playlist finished");
                self.reset().await;
                Ok(None)
            }
        }
    }

    /// React to a playback event. Starvation of the current session after its
    /// last chunk is the natural end of the track; with autoplay on, the
    /// playlist advances. Returns the session started, if any.
    pub async fn handle_event(
        &self,
        event: &PlaybackEvent,
    ) -> Result<Option<SessionId>, SinkError> {
        let PlaybackEvent::Starved { session } = event else {
            return Ok(None);
        };
        if !self.config.autoplay {
            return Ok(None);
        }

        let ended = match self.current() {
            Some(current) if current.id() == *session => {
                matches!(current.state(), SessionState::Drained(_))
            }
            _ => false,
        };
        if !ended {
            debug!("Ignoring starvation of session {}", session);
            return Ok(None);
        }

        debug!("Session {} played out, advancing", session);
        self.next_track().await
    }

    pub fn pause(&self) {
        self.surface.pause();
    }

    pub fn resume(&self) {
        self.surface.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.surface.is_paused()
    }

    pub fn state(&self) -> SessionState {
        self.current()
            .map(|s| s.state())
            .unwrap_or(SessionState::Idle)
    }

    pub fn total_duration(&self) -> f64 {
        self.current().map(|s| s.total_duration()).unwrap_or(0.0)
    }

    /// Duration the playback surface has applied, which trails
    /// [`total_duration`](Self::total_duration) until the sink is idle.
    pub fn published_duration(&self) -> f64 {
        if self.current().is_some() {
            self.surface.duration()
        } else {
            0.0
        }
    }

    pub fn current_track(&self) -> Option<String> {
        self.current().map(|s| s.track().to_string())
    }

    /// State updates of the current session, if one is active.
    pub fn watch_state(&self) -> Option<watch::Receiver<SessionState>> {
        self.current().map(|s| s.subscribe_state())
    }

    pub fn playlist(&self) -> PlaylistCursor {
        self.lock_playlist().clone()
    }

    fn current(&self) -> Option<Arc<StreamSession>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current(&self, session: Option<Arc<StreamSession>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn lock_playlist(&self) -> MutexGuard<'_, PlaylistCursor> {
        self.playlist.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The sequential fetch chain of one session.
struct ChunkChain {
    session: Arc<StreamSession>,
    fetcher: Arc<dyn ChunkFetcher>,
    estimator: Arc<dyn DurationEstimator>,
    queue: BufferQueue,
    chunk_size: usize,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl ChunkChain {
    async fn run(self) {
        let mut index = 0;

        loop {
            if self.session.is_cancelled() {
                debug!(
                    "Session {} cancelled before chunk {}",
                    self.session.id(),
                    index
                );
                self.session.set_state(SessionState::Cancelled);
                return;
            }

            self.session.set_state(SessionState::Fetching(index));
            let data = match self.fetcher.fetch(self.session.track(), index).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        "Stopping {:?} after {} chunks: {}",
                        self.session.track(),
                        index,
                        e
                    );
                    self.finish(Termination::FetchFailed);
                    return;
                }
            };

            self.session.set_state(SessionState::Enqueuing(index));
            let is_last = data.len() < self.chunk_size;
            let copy = data.clone();

            if let Err(e) = self.queue.enqueue(data) {
                warn!(
                    "Chunk {} of session {} not buffered: {}",
                    index,
                    self.session.id(),
                    e
                );
            }

            let seconds = self.estimate(copy).await;
            let total = self.session.add_duration(seconds);
            let _ = self.queue.publish_duration(total);
            let _ = self.events.send(PlaybackEvent::DurationChanged {
                session: self.session.id(),
                seconds: total,
            });

            if is_last {
                debug!(
                    "Chunk {} of {:?} is short, track fully fetched",
                    index,
                    self.session.track()
                );
                self.finish(Termination::EndOfTrack);
                return;
            }
            index += 1;
        }
    }

    async fn estimate(&self, data: Bytes) -> f64 {
        let estimator = self.estimator.clone();
        match tokio::task::spawn_blocking(move || estimator.estimate(data)).await {
            Ok(seconds) => seconds,
            Err(e) => {
                warn!("Duration estimate task failed: {}", e);
                0.0
            }
        }
    }

    fn finish(&self, termination: Termination) {
        let _ = self.events.send(PlaybackEvent::Ended {
            session: self.session.id(),
            termination,
        });
        self.session.set_state(SessionState::Drained(termination));
        // Starvation seen while still fetching was ignored; the queue repeats it.
        let _ = self.queue.end_of_stream();
    }
}
