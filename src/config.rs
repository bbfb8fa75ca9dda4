use std::path::Path;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:6969/api/v1/music";
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024; // 128 KiB, must match the server
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RESET_TIMEOUT_MS: u64 = 10_000;

/// Player settings. Every field falls back to its default when absent from a
/// config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Base URL of the music API, e.g. `http://host:6969/api/v1/music`.
    pub endpoint: String,
    /// Maximum chunk size `C` in bytes. A shorter chunk ends the track.
    pub chunk_size: usize,
    /// Advance to the next track when playback starves after the last chunk.
    pub autoplay: bool,
    pub request_timeout_secs: u64,
    /// Upper bound on how long a reset waits for the in-flight fetch.
    /// `0` waits indefinitely.
    pub reset_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            autoplay: true,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
        }
    }
}

impl PlayerConfig {
    /// Load a JSON config file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config: PlayerConfig = serde_json::from_str(&content)?;
        config.validated()
    }

    /// Normalise the endpoint and check the invariants the engine relies on.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }

        let endpoint = self.endpoint.trim().trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Endpoint(self.endpoint));
        }
        self.endpoint = endpoint;
        Ok(self)
    }

    pub fn catalog_url(&self) -> String {
        format!("{}/all", self.endpoint)
    }

    /// Chunk requests go here with `name` and `chunk` query parameters.
    pub fn chunk_url(&self) -> String {
        format!("{}/get", self.endpoint)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reset_timeout(&self) -> Option<Duration> {
        match self.reset_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
