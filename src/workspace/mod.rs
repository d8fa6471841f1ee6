//! Per-job storage.
//!
//! - **Store**: immutable blobs addressed by opaque artifact handles
//! - **History**: the append-only event log that makes a job replayable
//!
//! ```text
//! <workspace_root>/
//!   <job_id>/
//!     artifacts/<uuid>...
//!     events.jsonl
//! ```

pub mod history;
pub mod store;

pub use history::{generate_idempotency_key, hash_input, JobHistory};
pub use store::Workspace;
