//! Frame joiner: ordered frame artifacts in, one output artifact out.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Artifact, OutputFormat, PipelineError, PipelineResult};
use crate::workspace::Workspace;

use super::codec;

/// The assembled output of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedImage {
    pub artifact: Artifact,
    pub format: OutputFormat,
    pub frame_count: usize,
}

/// Assemble `frames` (in the given order) into the final artifact.
///
/// A single frame is stored as PNG; several become a looping GIF with
/// `frame_delay` between frames.
pub async fn join(
    workspace: &Workspace,
    frames: &[Artifact],
    frame_delay: Duration,
) -> PipelineResult<JoinedImage> {
    let mut blobs = Vec::with_capacity(frames.len());
    for frame in frames {
        blobs.push(workspace.retrieve(frame).await?);
    }

    let frame_count = blobs.len();
    let (bytes, format) = tokio::task::spawn_blocking(move || {
        let decoded = blobs
            .iter()
            .enumerate()
            .map(|(index, blob)| {
                codec::decode_frame(blob).map_err(|e| {
                    PipelineError::Encode(format!("frame {} is not a valid image: {}", index, e))
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        codec::encode_output(decoded, frame_delay)
    })
    .await
    .map_err(|e| PipelineError::Encode(format!("encoder task failed: {}", e)))??;

    let artifact = workspace.persist(&bytes).await?;

    debug!(
        job_id = %workspace.job_id(),
        %artifact,
        %format,
        frame_count,
        size = bytes.len(),
        "Frames joined"
    );

    Ok(JoinedImage {
        artifact,
        format,
        frame_count,
    })
}
