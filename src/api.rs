use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;

use crate::config::PlayerConfig;
use crate::error::FetchError;

/// Source of track chunks.
///
/// One call retrieves one chunk. Failures are returned to the caller and
/// never retried here.
#[async_trait]
pub trait ChunkFetcher: Send + Sync {
    async fn fetch(&self, track: &str, index: u64) -> Result<Bytes, FetchError>;
}

/// HTTP client for the Zest music API.
#[derive(Clone)]
pub struct MusicClient {
    client: reqwest::Client,
    catalog_url: String,
    chunk_url: String,
}

impl MusicClient {
    pub fn new(config: &PlayerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            catalog_url: config.catalog_url(),
            chunk_url: config.chunk_url(),
        })
    }

    /// Fetch the names of every track the server knows about.
    pub async fn get_catalog(&self) -> Result<Vec<String>> {
        let response = self.client.get(&self.catalog_url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("HTTP error: {}", response.status()));
        }

        let tracks: Vec<String> = response.json().await?;
        debug!("Fetched catalog of {} tracks", tracks.len());
        Ok(tracks)
    }
}

#[async_trait]
impl ChunkFetcher for MusicClient {
    async fn fetch(&self, track: &str, index: u64) -> Result<Bytes, FetchError> {
        let request_error = |source| FetchError::Request {
            track: track.to_string(),
            index,
            source,
        };

        let index_param = index.to_string();
        let response = self
            .client
            .get(&self.chunk_url)
            .query(&[("name", track), ("chunk", index_param.as_str())])
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                track: track.to_string(),
                index,
                status: status.as_u16(),
            });
        }

        let data = response.bytes().await.map_err(request_error)?;
        debug!("Fetched chunk {} of {:?} ({} bytes)", index, track, data.len());
        Ok(data)
    }
}
