//! framepipe - durable fan-out/fan-in image frame pipeline
//!
//! Applies a named operation to every frame of one source image and
//! reassembles the results, in frame order, into a single PNG or GIF.
//!
//! # Architecture
//!
//! - A job gets its own workspace; only opaque artifact handles travel
//!   through task messages, never image bytes
//! - An orchestrator routine sequences Load -> Split -> fan-out Transform ->
//!   Join by scheduling activities on a task queue
//! - Every step is recorded in an append-only job history, so an interrupted
//!   job can be resumed without redoing completed activities
//!
//! # Modules
//!
//! - `adapters`: Source image fetching (HTTP)
//! - `config`: Layered configuration
//! - `core`: Activities, policy and the orchestrator
//! - `domain`: Data structures (Artifact, Event, Job, PipelineError)
//! - `frames`: Splitting and joining frames
//! - `operations`: Per-frame operations and their registry
//! - `runtime`: Broker, task queues, worker pools and the client
//! - `workspace`: Per-job blob store and history
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Invert every frame of a GIF
//! framepipe run https://example.com/cat.gif invert
//!
//! # Hue-cycle a still image into a 10-step animation
//! framepipe run https://example.com/logo.png huecycle --arg steps=10
//!
//! # Check and resume a job
//! framepipe status <job-id>
//! framepipe resume <job-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod frames;
pub mod operations;
pub mod runtime;
pub mod workspace;

// Re-export main types at crate root for convenience
pub use core::Orchestrator;
pub use domain::{
    Artifact, Event, EventType, Job, JobId, JobResult, JobState, OperationRequest, OutputFormat,
    PipelineError, PipelineResult,
};
pub use operations::{Operation, OperationRegistry};
pub use runtime::{Broker, JobHandle, PipelineClient, WorkerOptions, WorkerPool};
pub use workspace::Workspace;
