use log::debug;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub type SessionId = u64;

/// Why a session stopped fetching on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The short chunk arrived.
    EndOfTrack,
    /// A fetch failed; chunks already buffered keep playing.
    FetchFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Fetching(u64),
    Enqueuing(u64),
    Drained(Termination),
    Cancelled,
}

impl SessionState {
    /// A chunk is being fetched or processed.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionState::Fetching(_) | SessionState::Enqueuing(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Drained(_) | SessionState::Cancelled)
    }
}

/// Events published by the controller. Each names the session it belongs to
/// so that late events from a superseded session can be told apart.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started { session: SessionId, track: String },
    DurationChanged { session: SessionId, seconds: f64 },
    Ended { session: SessionId, termination: Termination },
    Starved { session: SessionId },
}

impl PlaybackEvent {
    pub fn session(&self) -> SessionId {
        match self {
            PlaybackEvent::Started { session, .. }
            | PlaybackEvent::DurationChanged { session, .. }
            | PlaybackEvent::Ended { session, .. }
            | PlaybackEvent::Starved { session } => *session,
        }
    }
}

/// One attempt to stream one track. A new value is built for every session;
/// nothing here is reused once the session is retired.
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    track: String,
    should_fetch: CancellationToken,
    state: watch::Sender<SessionState>,
    total_duration: watch::Sender<f64>,
}

impl StreamSession {
    pub fn new(id: SessionId, track: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (total_duration, _) = watch::channel(0.0);
        Self {
            id,
            track: track.into(),
            should_fetch: CancellationToken::new(),
            state,
            total_duration,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn track(&self) -> &str {
        &self.track
    }

    /// Stop the chunk chain from scheduling its next hop. The hop in flight
    /// still completes.
    pub fn cancel(&self) {
        self.should_fetch.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.should_fetch.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn set_state(&self, state: SessionState) {
        debug!("Session {} state -> {:?}", self.id, state);
        self.state.send_replace(state);
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn total_duration(&self) -> f64 {
        *self.total_duration.borrow()
    }

    /// Add one chunk's estimate. Negative or non-finite estimates count as
    /// zero so the total never decreases.
    pub fn add_duration(&self, seconds: f64) -> f64 {
        let seconds = if seconds.is_finite() && seconds > 0.0 { seconds } else { 0.0 };
        self.total_duration.send_modify(|total| *total += seconds);
        self.total_duration()
    }
}
