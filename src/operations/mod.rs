//! Named per-frame operations and the transform activity that invokes them.
//!
//! An operation maps one frame artifact plus a JSON parameter bag to zero or
//! more output artifacts. New effects are added by registering another
//! [`Operation`] with the [`OperationRegistry`]; nothing else changes.

pub mod effects;
pub mod huecycle;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::domain::{Artifact, PipelineError, PipelineResult};
use crate::frames::codec;
use crate::workspace::Workspace;

pub use effects::{Identity, Invert, Resize, Rotate};
pub use huecycle::HueCycle;

/// A named transformation applied independently to each frame
#[async_trait]
pub trait Operation: Send + Sync {
    /// Registry name (e.g. "invert")
    fn name(&self) -> &str;

    /// One-line summary for `framepipe operations`
    fn description(&self) -> &str;

    /// Transform one frame. Errors should use [`PipelineError::Transform`]
    /// for effect failures and [`PipelineError::InvalidArguments`] for bad
    /// parameters; the frame index is filled in by the caller.
    async fn execute(
        &self,
        workspace: &Workspace,
        frame: &Artifact,
        args: &serde_json::Value,
    ) -> PipelineResult<Vec<Artifact>>;
}

/// Name -> operation lookup shared by all workers
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in operation
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Identity);
        registry.register(Invert);
        registry.register(Rotate);
        registry.register(Resize);
        registry.register(HueCycle);
        registry
    }

    /// Register an operation, replacing any previous one with the same name
    pub fn register(&mut self, operation: impl Operation + 'static) -> &mut Self {
        self.register_arc(Arc::new(operation))
    }

    pub fn register_arc(&mut self, operation: Arc<dyn Operation>) -> &mut Self {
        self.operations
            .insert(operation.name().to_string(), operation);
        self
    }

    pub fn get(&self, name: &str) -> PipelineResult<Arc<dyn Operation>> {
        self.operations
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownOperation(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Registered operations, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Operation>> {
        self.operations.values()
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.operations.keys()).finish()
    }
}

/// Transform activity: apply `operation` to the frame at `frame_index`.
///
/// Any failure is attributed to `frame_index`.
pub async fn transform(
    registry: &OperationRegistry,
    workspace: &Workspace,
    operation: &str,
    frame_index: usize,
    frame: &Artifact,
    args: &serde_json::Value,
) -> PipelineResult<Vec<Artifact>> {
    let op = registry.get(operation)?;

    let outputs = op
        .execute(workspace, frame, args)
        .await
        .map_err(|e| e.for_frame(frame_index))?;

    debug!(
        job_id = %workspace.job_id(),
        operation,
        frame = frame_index,
        outputs = outputs.len(),
        "Frame transformed"
    );
    Ok(outputs)
}

/// Decode the parameter bag into an operation's typed arguments.
///
/// Argument structs use `#[serde(default, deny_unknown_fields)]`, so missing
/// keys take defaults while unknown keys and wrong types are rejected.
pub fn decode_args<T: DeserializeOwned>(operation: &str, args: &serde_json::Value) -> PipelineResult<T> {
    let args = if args.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        args.clone()
    };

    serde_json::from_value(args).map_err(|e| PipelineError::InvalidArguments {
        operation: operation.to_string(),
        message: e.to_string(),
    })
}

/// Load and decode one frame
pub async fn load_frame(workspace: &Workspace, frame: &Artifact) -> PipelineResult<DynamicImage> {
    let bytes = workspace.retrieve(frame).await?;

    tokio::task::spawn_blocking(move || codec::decode_frame(&bytes))
        .await
        .map_err(|e| transform_error(format!("decoder task failed: {}", e)))?
        .map_err(|e| transform_error(format!("frame is not a valid image: {}", e)))
}

/// Encode each image as PNG and persist it, preserving order
pub async fn save_frames(
    workspace: &Workspace,
    images: Vec<DynamicImage>,
) -> PipelineResult<Vec<Artifact>> {
    let encoded = tokio::task::spawn_blocking(move || {
        images
            .iter()
            .map(codec::encode_png)
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| transform_error(format!("encoder task failed: {}", e)))?
    .map_err(|e| transform_error(format!("failed to encode frame: {}", e)))?;

    let mut artifacts = Vec::with_capacity(encoded.len());
    for png in encoded {
        artifacts.push(workspace.persist(&png).await?);
    }
    Ok(artifacts)
}

/// Run a CPU-bound effect on the blocking pool
pub async fn run_effect<F>(effect: F) -> PipelineResult<Vec<DynamicImage>>
where
    F: FnOnce() -> Vec<DynamicImage> + Send + 'static,
{
    tokio::task::spawn_blocking(effect)
        .await
        .map_err(|e| transform_error(format!("effect task failed: {}", e)))
}

/// Effect failure; the frame index is rewritten by [`transform`]
pub fn transform_error(message: impl Into<String>) -> PipelineError {
    PipelineError::Transform {
        frame: 0,
        message: message.into(),
    }
}
