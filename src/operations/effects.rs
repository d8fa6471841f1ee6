//! Simple one-frame-in, one-frame-out effects.

use async_trait::async_trait;
use image::imageops::FilterType;
use serde::Deserialize;

use crate::domain::{Artifact, PipelineError, PipelineResult};
use crate::workspace::Workspace;

use super::{decode_args, load_frame, run_effect, save_frames, Operation};

/// Largest edge `resize` will produce
const MAX_DIMENSION: u32 = 8192;

/// Passes the frame through untouched
pub struct Identity;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct IdentityArgs {}

#[async_trait]
impl Operation for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn description(&self) -> &str {
        "Return every frame unchanged"
    }

    async fn execute(
        &self,
        _workspace: &Workspace,
        frame: &Artifact,
        args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        let _: IdentityArgs = decode_args(self.name(), args)?;
        Ok(vec![frame.clone()])
    }
}

/// Negates the colour channels, keeping alpha
pub struct Invert;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct InvertArgs {}

#[async_trait]
impl Operation for Invert {
    fn name(&self) -> &str {
        "invert"
    }

    fn description(&self) -> &str {
        "Invert the colours of every frame"
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        frame: &Artifact,
        args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        let _: InvertArgs = decode_args(self.name(), args)?;
        let mut image = load_frame(workspace, frame).await?;

        let outputs = run_effect(move || {
            image.invert();
            vec![image]
        })
        .await?;

        save_frames(workspace, outputs).await
    }
}

/// Quarter-turn rotation
pub struct Rotate;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RotateArgs {
    /// Clockwise; one of 90, 180, 270
    degrees: u32,
}

impl Default for RotateArgs {
    fn default() -> Self {
        Self { degrees: 90 }
    }
}

#[async_trait]
impl Operation for Rotate {
    fn name(&self) -> &str {
        "rotate"
    }

    fn description(&self) -> &str {
        "Rotate every frame clockwise by 90, 180 or 270 degrees (default 90)"
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        frame: &Artifact,
        args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        let args: RotateArgs = decode_args(self.name(), args)?;
        if !matches!(args.degrees, 90 | 180 | 270) {
            return Err(PipelineError::InvalidArguments {
                operation: self.name().to_string(),
                message: format!("degrees must be 90, 180 or 270, got {}", args.degrees),
            });
        }

        let image = load_frame(workspace, frame).await?;
        let outputs = run_effect(move || {
            let rotated = match args.degrees {
                90 => image.rotate90(),
                180 => image.rotate180(),
                _ => image.rotate270(),
            };
            vec![rotated]
        })
        .await?;

        save_frames(workspace, outputs).await
    }
}

/// Scale to an exact size
pub struct Resize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ResizeArgs {
    width: u32,
    height: u32,
}

#[async_trait]
impl Operation for Resize {
    fn name(&self) -> &str {
        "resize"
    }

    fn description(&self) -> &str {
        "Scale every frame to exactly width x height pixels"
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        frame: &Artifact,
        args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        let args: ResizeArgs = decode_args(self.name(), args)?;
        let in_range = 1..=MAX_DIMENSION;
        if !in_range.contains(&args.width) || !in_range.contains(&args.height) {
            return Err(PipelineError::InvalidArguments {
                operation: self.name().to_string(),
                message: format!(
                    "width and height must be between 1 and {}, got {}x{}",
                    MAX_DIMENSION, args.width, args.height
                ),
            });
        }

        let image = load_frame(workspace, frame).await?;
        let outputs = run_effect(move || {
            vec![image.resize_exact(args.width, args.height, FilterType::Triangle)]
        })
        .await?;

        save_frames(workspace, outputs).await
    }
}
