//! HTTP source fetcher.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{PipelineError, PipelineResult};

use super::SourceFetcher;

/// Downloads source images over HTTP(S) with `reqwest`
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn fetch_error(url: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::Fetch {
        url: url.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, max_bytes: u64) -> PipelineResult<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(url, format!("server responded with {}", status)));
        }

        if let Some(length) = response.content_length() {
            if length > max_bytes {
                return Err(fetch_error(
                    url,
                    format!("source is {} bytes, limit is {}", length, max_bytes),
                ));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_error(url, e.to_string()))?
        {
            if body.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(fetch_error(
                    url,
                    format!("source exceeds the {} byte limit", max_bytes),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url, size = body.len(), "Source fetched");
        Ok(body)
    }
}
