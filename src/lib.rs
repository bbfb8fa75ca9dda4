//! Chunked-stream audio playback engine.
//!
//! Tracks are fetched from the music server in fixed-size chunks, appended to
//! a media sink in order, and their playable duration is accumulated as they
//! arrive. A short chunk marks the end of a track.

pub mod api;
pub mod audio;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod duration;
pub mod error;
pub mod playlist;
pub mod session;
pub mod surface;

#[cfg(test)]
mod testing;

pub use api::{ChunkFetcher, MusicClient};
pub use config::PlayerConfig;
pub use controller::StreamController;
pub use session::{PlaybackEvent, SessionId, SessionState, Termination};
