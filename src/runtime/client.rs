//! Client side: submit jobs, await results, cancel, resume, inspect.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tracing::info;

use crate::domain::{Job, JobId, JobResult, OperationRequest, PipelineError, PipelineResult};
use crate::workspace::{JobHistory, Workspace};

use super::broker::Broker;
use super::queue::{TaskQueue, WorkflowTask};

/// Submits jobs to a task queue
#[derive(Debug, Clone)]
pub struct PipelineClient {
    queue: TaskQueue,
    workspace_root: PathBuf,
}

impl PipelineClient {
    pub fn new(
        broker: &Broker,
        namespace: &str,
        queue: &str,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue: broker.queue(namespace, queue),
            workspace_root: workspace_root.into(),
        }
    }

    /// Schedule the orchestrator routine of a new job
    pub async fn submit(&self, request: OperationRequest) -> PipelineResult<JobHandle> {
        let job_id = JobId::new();

        info!(%job_id, operation = %request.operation, "Job submitted");
        self.start(job_id, request)
    }

    /// Re-run the orchestrator routine of an unfinished (or failed) job.
    ///
    /// Activities already completed in its history are not executed again.
    pub async fn resume(&self, job_id: JobId) -> PipelineResult<JobHandle> {
        let job = self.status(job_id).await?;
        let request = job.request.ok_or_else(|| {
            PipelineError::History(format!("Job {} has no recorded request", job_id))
        })?;

        info!(%job_id, state = job.state.label(), "Job resumed");
        self.start(job_id, request)
    }

    /// Reconstruct a job's current state from its history
    pub async fn status(&self, job_id: JobId) -> PipelineResult<Job> {
        let workspace = Workspace::open(&self.workspace_root, job_id);
        let events = JobHistory::open(&workspace).replay().await?;

        Job::from_events(&events)
            .ok_or_else(|| PipelineError::History(format!("No history for job {}", job_id)))
    }

    /// Every job with a workspace under this client's root
    pub async fn list_jobs(&self) -> PipelineResult<Vec<JobId>> {
        JobHistory::list_jobs(&self.workspace_root).await
    }

    fn start(&self, job_id: JobId, request: OperationRequest) -> PipelineResult<JobHandle> {
        let (cancel_tx, cancel) = watch::channel(false);
        let (reply, result) = oneshot::channel();

        self.queue.enqueue_workflow(WorkflowTask {
            job_id,
            request,
            cancel,
            reply,
        })?;

        Ok(JobHandle {
            job_id,
            workspace: Workspace::open(&self.workspace_root, job_id),
            cancel: JobCanceller(Arc::new(cancel_tx)),
            result,
        })
    }
}

/// Cancels one job; cheap to clone and safe to use from any task
#[derive(Debug, Clone)]
pub struct JobCanceller(Arc<watch::Sender<bool>>);

impl JobCanceller {
    /// Cancel every pending activity of the job. The job ends `Failed` with
    /// [`PipelineError::Cancelled`].
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// A submitted job
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    workspace: Workspace,
    cancel: JobCanceller,
    result: oneshot::Receiver<PipelineResult<JobResult>>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The job's workspace, set up by the orchestrator routine; call
    /// [`Workspace::cleanup`] once the output has been handed off
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn canceller(&self) -> JobCanceller {
        self.cancel.clone()
    }

    /// Wait for the job to finish
    pub async fn result(self) -> PipelineResult<JobResult> {
        self.result.await.unwrap_or_else(|_| {
            Err(PipelineError::WorkerLost {
                activity: "orchestrator".to_string(),
                deliveries: 1,
            })
        })
    }

    /// Wait for the job, cancelling it once `signal` resolves. Returns only
    /// after the orchestrator has recorded the outcome.
    pub async fn result_or_cancel_on<F: Future>(self, signal: F) -> PipelineResult<JobResult> {
        let canceller = self.canceller();
        let result = self.result();
        tokio::pin!(result);

        tokio::select! {
            result = &mut result => result,
            _ = signal => {
                canceller.cancel();
                result.await
            }
        }
    }
}
