//! Adapter interfaces for external systems.
//!
//! The only external dependency of a job is where its source image comes
//! from; everything after that happens inside the workspace.

pub mod http;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{PipelineError, PipelineResult};

pub use http::HttpFetcher;

/// Retrieves the raw bytes of a source image
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `url`, failing with [`PipelineError::Fetch`] on a non-success
    /// response, a transport error, or a body larger than `max_bytes`.
    async fn fetch(&self, url: &str, max_bytes: u64) -> PipelineResult<Vec<u8>>;
}

/// In-memory fetcher serving fixed blobs by URL.
///
/// Useful for local runs and tests where no network is available.
#[derive(Default)]
pub struct StaticFetcher {
    sources: Mutex<HashMap<String, Vec<u8>>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` for `url`
    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut sources) = self.sources.lock() {
            sources.insert(url.into(), bytes);
        }
    }

    pub fn with_source(self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(url, bytes);
        self
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch(&self, url: &str, max_bytes: u64) -> PipelineResult<Vec<u8>> {
        let bytes = self
            .sources
            .lock()
            .map_err(|_| PipelineError::Fetch {
                url: url.to_string(),
                message: "source table poisoned".to_string(),
            })?
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::Fetch {
                url: url.to_string(),
                message: "server responded with 404 Not Found".to_string(),
            })?;

        if bytes.len() as u64 > max_bytes {
            return Err(PipelineError::Fetch {
                url: url.to_string(),
                message: format!("source is {} bytes, limit is {}", bytes.len(), max_bytes),
            });
        }

        Ok(bytes)
    }
}
