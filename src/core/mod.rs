//! Core orchestration logic.
//!
//! This module contains:
//! - Activities: the units of work and their dispatch
//! - Policy: activity timeouts and retries
//! - Orchestrator: the durable per-job routine

pub mod activities;
pub mod orchestrator;
pub mod policy;

// Re-export commonly used types
pub use activities::{ActivityCall, ActivityContext, ActivityOutput};
pub use orchestrator::Orchestrator;
pub use policy::{ActivityOptions, RetryPolicy};
