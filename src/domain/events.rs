//! Job history events.
//!
//! Every state change of a job and every activity outcome is appended to the
//! job's history. Replaying the history reconstructs the job and lets a
//! resumed orchestrator skip activities that already completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::JobId;
use super::error::PipelineError;

/// A single entry in a job's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The job this event belongs to
    pub job_id: JobId,

    /// Activity name (load_source, split, transform, join)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,

    /// Frame index for per-frame transform events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<usize>,

    /// Type of event
    pub event_type: EventType,

    /// Idempotency key format: "{job_id}:{activity}:{call_hash}"
    pub idempotency_key: String,

    /// Human-readable summary (handles only, never payload bytes)
    pub payload_summary: String,

    /// Structured payload: the request, an activity result or a state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Time taken in milliseconds (for finished activities)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error if the activity or job failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        job_id: JobId,
        event_type: EventType,
        idempotency_key: String,
        payload_summary: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            job_id,
            activity: None,
            frame: None,
            event_type,
            idempotency_key,
            payload_summary,
            data: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_activity(mut self, activity: &str, frame: Option<usize>) -> Self {
        self.activity = Some(activity.to_string());
        self.frame = frame;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: PipelineError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Types of events recorded in a job history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A job was accepted; `data` holds the request
    JobStarted,

    /// The orchestrator moved to a new state; `data` holds the state
    StateChanged,

    /// An activity was put on the task queue
    ActivityScheduled,

    /// An activity finished; `data` holds its result
    ActivityCompleted,

    /// An activity failed and will be attempted again
    ActivityRetrying,

    /// An activity failed permanently
    ActivityFailed,

    /// The job produced its final artifact; `data` holds the result
    JobCompleted,

    /// The job ended without a result
    JobFailed,
}
