//! Hue cycling: expands each frame into a full turn around the colour wheel.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{Artifact, PipelineError, PipelineResult};
use crate::workspace::Workspace;

use super::{decode_args, load_frame, run_effect, save_frames, Operation};

const MAX_STEPS: u32 = 360;

pub struct HueCycle;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct HueCycleArgs {
    /// Number of hue shifts; the frame itself is emitted first
    steps: u32,
}

impl Default for HueCycleArgs {
    fn default() -> Self {
        Self { steps: 20 }
    }
}

/// Hue rotation (degrees) of output `index` out of `steps`
fn hue_offset(index: u32, steps: u32) -> i32 {
    (index * 360 / steps) as i32
}

#[async_trait]
impl Operation for HueCycle {
    fn name(&self) -> &str {
        "huecycle"
    }

    fn description(&self) -> &str {
        "Expand each frame into steps+1 frames rotating through the hue wheel (default 20 steps)"
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        frame: &Artifact,
        args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>> {
        let args: HueCycleArgs = decode_args(self.name(), args)?;
        if args.steps > MAX_STEPS {
            return Err(PipelineError::InvalidArguments {
                operation: self.name().to_string(),
                message: format!("steps must be at most {}, got {}", MAX_STEPS, args.steps),
            });
        }

        let image = load_frame(workspace, frame).await?;
        let steps = args.steps;

        let outputs = run_effect(move || {
            let mut frames = Vec::with_capacity(steps as usize + 1);
            frames.push(image.clone());
            for index in 1..=steps {
                frames.push(image.huerotate(hue_offset(index, steps)));
            }
            frames
        })
        .await?;

        save_frames(workspace, outputs).await
    }
}
