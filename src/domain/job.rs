//! Job state and reconstruction from history.
//!
//! A Job is one execution of the frame pipeline for one request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workspace::Workspace;

use super::artifact::{Artifact, JobId, OutputFormat};
use super::error::PipelineError;
use super::events::{Event, EventType};

/// What the caller asked for. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Registered operation name (e.g. "identity", "huecycle")
    pub operation: String,

    /// Where to fetch the source image from
    pub source_url: String,

    /// Operation parameters; forwarded to the operation untouched
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            source_url: source_url.into(),
            args: empty_args(),
        }
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }
}

/// Final output of a completed job.
///
/// The caller reads the bytes through `workspace`, forwards them, and then
/// calls [`Workspace::cleanup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub artifact: Artifact,
    pub format: OutputFormat,
    pub frame_count: usize,
    pub workspace: Workspace,
}

/// Orchestrator state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobState {
    /// Accepted; fetching the source
    Started,

    /// Decoding the source into frames
    Splitting,

    /// Per-frame transforms scheduled and awaited
    FanningOut,

    /// Reassembling the output
    Joining,

    /// Final artifact produced
    Completed,

    /// Ended without a result
    Failed { error: PipelineError },
}

impl Default for JobState {
    fn default() -> Self {
        Self::Started
    }
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// Whether the orchestrator may move from `self` to `next`
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        match (self, next) {
            (from, Self::Failed { .. }) => !from.is_terminal(),
            (Self::Started, Self::Splitting)
            | (Self::Splitting, Self::FanningOut)
            | (Self::FanningOut, Self::Joining)
            | (Self::Joining, Self::Completed) => true,
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Splitting => "splitting",
            Self::FanningOut => "fanning-out",
            Self::Joining => "joining",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// A pipeline job as reconstructed from its history
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,

    /// The original request (from the JobStarted event)
    pub request: Option<OperationRequest>,

    pub state: JobState,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Frame count once the split has completed
    pub frame_count: Option<usize>,

    /// Transform activities that have completed
    pub frames_transformed: usize,

    /// Final result (completed jobs only)
    pub result: Option<JobResult>,
}

impl Job {
    /// Reconstruct job state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut job = Self {
            id: first_event.job_id,
            request: None,
            state: JobState::Started,
            started_at: first_event.timestamp,
            completed_at: None,
            frame_count: None,
            frames_transformed: 0,
            result: None,
        };

        for event in events {
            job.apply_event(event);
        }

        Some(job)
    }

    /// Apply a single event to update job state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::JobStarted => {
                self.state = JobState::Started;
                self.started_at = event.timestamp;
                self.request = event
                    .data
                    .clone()
                    .and_then(|data| serde_json::from_value(data).ok());
            }
            EventType::StateChanged => {
                if let Some(state) = event
                    .data
                    .clone()
                    .and_then(|data| serde_json::from_value::<JobState>(data).ok())
                {
                    // A resumed job leaves its earlier failure behind
                    if !state.is_terminal() {
                        self.completed_at = None;
                    }
                    self.state = state;
                }
            }
            EventType::ActivityCompleted => match event.activity.as_deref() {
                Some("split") => {
                    self.frame_count = event
                        .data
                        .as_ref()
                        .and_then(|data| data.get("frames"))
                        .and_then(|frames| frames.as_array())
                        .map(|frames| frames.len());
                }
                Some("transform") => self.frames_transformed += 1,
                _ => {}
            },
            EventType::ActivityScheduled
            | EventType::ActivityRetrying
            | EventType::ActivityFailed => {}
            EventType::JobCompleted => {
                self.state = JobState::Completed;
                self.completed_at = Some(event.timestamp);
                self.result = event
                    .data
                    .clone()
                    .and_then(|data| serde_json::from_value(data).ok());
            }
            EventType::JobFailed => {
                self.state = JobState::Failed {
                    error: event
                        .error
                        .clone()
                        .unwrap_or_else(|| PipelineError::History(event.payload_summary.clone())),
                };
                self.completed_at = Some(event.timestamp);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}
