//! Error taxonomy shared by activities, workers and the orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Any failure that can end a pipeline job.
///
/// Activity errors cross the task queue unchanged and end up in the job
/// history, so the type is `Clone` and serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum PipelineError {
    #[error("Failed to fetch source image from {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Failed to decode source image: {0}")]
    Decode(String),

    #[error("Transform of frame {frame} failed: {message}")]
    Transform { frame: usize, message: String },

    #[error("Failed to reassemble output image: {0}")]
    Encode(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid arguments for operation '{operation}': {message}")]
    InvalidArguments { operation: String, message: String },

    #[error("Activity '{activity}' timed out after {timeout_secs}s")]
    Timeout { activity: String, timeout_secs: u64 },

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Worker lost while running '{activity}' after {deliveries} deliveries")]
    WorkerLost { activity: String, deliveries: u32 },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Job history error: {0}")]
    History(String),
}

impl PipelineError {
    /// Whether a new attempt could plausibly change the outcome.
    ///
    /// Deterministic failures (bad bytes, bad arguments, missing artifacts)
    /// are never retried regardless of the configured retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. }
                | Self::Transform { .. }
                | Self::Timeout { .. }
                | Self::WorkerLost { .. }
                | Self::Io(_)
        )
    }

    pub fn timeout(activity: &str, timeout: Duration) -> Self {
        Self::Timeout {
            activity: activity.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Attach the frame index to an operation failure
    pub fn for_frame(self, frame: usize) -> Self {
        match self {
            Self::Transform { message, .. } => Self::Transform { frame, message },
            other => other,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::History(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
