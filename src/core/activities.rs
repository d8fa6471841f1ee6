//! Activities: the side-effecting units the orchestrator schedules.
//!
//! Calls and outputs carry artifact handles only, never image bytes, so they
//! can travel through the task queue and be recorded in job history.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::SourceFetcher;
use crate::domain::{Artifact, PipelineError, PipelineResult};
use crate::frames::{self, JoinedImage};
use crate::operations::{self, OperationRegistry};
use crate::workspace::Workspace;

/// One activity invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "activity")]
pub enum ActivityCall {
    /// Download the source image and persist it
    LoadSource { url: String },

    /// Split the source into frames
    Split { source: Artifact },

    /// Apply an operation to one frame
    Transform {
        operation: String,
        frame_index: usize,
        frame: Artifact,
        args: serde_json::Value,
    },

    /// Reassemble the ordered outputs
    Join { frames: Vec<Artifact> },
}

impl ActivityCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoadSource { .. } => "load_source",
            Self::Split { .. } => "split",
            Self::Transform { .. } => "transform",
            Self::Join { .. } => "join",
        }
    }

    /// Frame index, for per-frame activities
    pub fn frame_index(&self) -> Option<usize> {
        match self {
            Self::Transform { frame_index, .. } => Some(*frame_index),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::LoadSource { url } => format!("load source {}", url),
            Self::Split { source } => format!("split {}", source),
            Self::Transform {
                operation,
                frame_index,
                ..
            } => format!("{} frame {}", operation, frame_index),
            Self::Join { frames } => format!("join {} frames", frames.len()),
        }
    }
}

/// Result of an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityOutput {
    Source(Artifact),
    Frames(Vec<Artifact>),
    Joined(JoinedImage),
}

impl ActivityOutput {
    pub fn into_source(self) -> PipelineResult<Artifact> {
        match self {
            Self::Source(artifact) => Ok(artifact),
            other => Err(unexpected("source", &other)),
        }
    }

    pub fn into_frames(self) -> PipelineResult<Vec<Artifact>> {
        match self {
            Self::Frames(frames) => Ok(frames),
            other => Err(unexpected("frames", &other)),
        }
    }

    pub fn into_joined(self) -> PipelineResult<JoinedImage> {
        match self {
            Self::Joined(joined) => Ok(joined),
            other => Err(unexpected("joined", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &ActivityOutput) -> PipelineError {
    PipelineError::History(format!("expected {} output, got {:?}", expected, got))
}

/// Everything an activity worker needs to execute calls
pub struct ActivityContext {
    pub registry: OperationRegistry,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub max_source_bytes: u64,
    pub frame_delay: Duration,
}

/// Execute one activity call against `workspace`
pub async fn execute(
    ctx: &ActivityContext,
    workspace: &Workspace,
    call: &ActivityCall,
) -> PipelineResult<ActivityOutput> {
    match call {
        ActivityCall::LoadSource { url } => {
            let bytes = ctx.fetcher.fetch(url, ctx.max_source_bytes).await?;
            let artifact = workspace.persist(&bytes).await?;
            Ok(ActivityOutput::Source(artifact))
        }
        ActivityCall::Split { source } => {
            let frames = frames::split(workspace, source).await?;
            Ok(ActivityOutput::Frames(frames))
        }
        ActivityCall::Transform {
            operation,
            frame_index,
            frame,
            args,
        } => {
            let outputs = operations::transform(
                &ctx.registry,
                workspace,
                operation,
                *frame_index,
                frame,
                args,
            )
            .await?;
            Ok(ActivityOutput::Frames(outputs))
        }
        ActivityCall::Join { frames } => {
            let joined = frames::join(workspace, frames, ctx.frame_delay).await?;
            Ok(ActivityOutput::Joined(joined))
        }
    }
}
