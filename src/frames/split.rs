//! Frame splitter: one source blob in, an ordered list of frame artifacts out.

use tracing::debug;

use crate::domain::{Artifact, PipelineError, PipelineResult};
use crate::workspace::Workspace;

use super::codec;

/// Decode `source` and persist each of its frames as a PNG artifact.
///
/// The returned list follows source frame order. A still image yields exactly
/// one frame.
pub async fn split(workspace: &Workspace, source: &Artifact) -> PipelineResult<Vec<Artifact>> {
    let bytes = workspace.retrieve(source).await?;

    let encoded = tokio::task::spawn_blocking(move || -> PipelineResult<Vec<Vec<u8>>> {
        codec::decode_frames(&bytes)?
            .into_iter()
            .map(|frame| {
                codec::encode_png(&image::DynamicImage::ImageRgba8(frame))
                    .map_err(|e| PipelineError::Decode(e.to_string()))
            })
            .collect()
    })
    .await
    .map_err(|e| PipelineError::Decode(format!("decoder task failed: {}", e)))??;

    let mut frames = Vec::with_capacity(encoded.len());
    for png in encoded {
        frames.push(workspace.persist(&png).await?);
    }

    debug!(job_id = %workspace.job_id(), %source, frames = frames.len(), "Source split");
    Ok(frames)
}
