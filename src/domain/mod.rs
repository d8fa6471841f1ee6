//! Domain types for the frame pipeline.
//!
//! This module contains the core data structures:
//! - Artifact: Handles to immutable blobs in a job workspace
//! - Events: Immutable records of job history
//! - Job: Orchestrator state, requests and results
//! - Error: The failure taxonomy shared by every component

pub mod artifact;
pub mod error;
pub mod events;
pub mod job;

// Re-export commonly used types
pub use artifact::{Artifact, JobId, OutputFormat};
pub use error::{PipelineError, PipelineResult};
pub use events::{Event, EventType};
pub use job::{Job, JobResult, JobState, OperationRequest};
