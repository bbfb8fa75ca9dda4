//! Error types for the streaming engine.
//!
//! None of these cross a session boundary: the controller turns each of them
//! into a local outcome (halted chunk chain, zero duration, skipped buffer).

use thiserror::Error;

/// Failure to retrieve one chunk of a track.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for chunk {index} of {track:?} failed: {source}")]
    Request {
        track: String,
        index: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("chunk {index} of {track:?} answered with HTTP {status}")]
    Status { track: String, index: u64, status: u16 },
}

/// Failure to estimate the playable duration of a chunk.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("chunk is empty")]
    Empty,

    #[error("no audio track found in chunk")]
    NoTrack,

    #[error("track has no sample rate")]
    Unsupported,

    #[error("symphonia: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),
}

/// Failure reported by, or while talking to, the downstream media sink.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SinkError {
    #[error("sink is still updating")]
    Busy,

    #[error("sink is closed")]
    Closed,

    #[error("append rejected: {0}")]
    Rejected(String),

    #[error("audio output error: {0}")]
    Output(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("endpoint {0:?} is not an http(s) url")]
    Endpoint(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
