//! In-process execution substrate.
//!
//! - **Broker**: task queues keyed by `(namespace, queue)`
//! - **TaskQueue**: multi-consumer workflow and activity channels
//! - **WorkerPool**: activity workers plus a workflow poller
//! - **PipelineClient**: submits jobs and hands back a [`JobHandle`]
//!
//! Activities are delivered at least once: a worker that panics mid-activity
//! puts the task back on the queue for another worker.

pub mod broker;
pub mod client;
pub mod queue;
pub mod worker;

pub use broker::Broker;
pub use client::{JobCanceller, JobHandle, PipelineClient};
pub use queue::{ActivityTask, TaskQueue, WorkflowTask};
pub use worker::{WorkerOptions, WorkerPool};
