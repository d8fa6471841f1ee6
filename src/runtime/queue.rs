//! Task queue shared by clients, orchestrators and workers.
//!
//! A queue carries two kinds of tasks: workflow tasks (run a job's
//! orchestrator routine) and activity tasks (run one activity call). Both
//! channels are multi-consumer, so every worker polling the same queue
//! competes for the same work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::core::activities::{ActivityCall, ActivityOutput};
use crate::domain::{JobId, JobResult, OperationRequest, PipelineError, PipelineResult};
use crate::workspace::Workspace;

/// Request to run (or resume) one job's orchestrator routine
pub struct WorkflowTask {
    pub job_id: JobId,
    pub request: OperationRequest,
    pub cancel: watch::Receiver<bool>,
    pub reply: oneshot::Sender<PipelineResult<JobResult>>,
}

/// Request to execute one activity call
pub struct ActivityTask {
    pub job_id: JobId,
    pub workspace: Workspace,
    pub call: ActivityCall,

    /// Start-to-close timeout
    pub timeout: Duration,

    /// How many times this task has been handed to a worker
    pub deliveries: u32,

    /// Job-level cancellation
    pub cancel: watch::Receiver<bool>,

    pub reply: oneshot::Sender<PipelineResult<ActivityOutput>>,
}

impl ActivityTask {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// A named task queue within a namespace
#[derive(Clone)]
pub struct TaskQueue {
    namespace: Arc<str>,
    name: Arc<str>,
    workflows_tx: mpsc::UnboundedSender<WorkflowTask>,
    workflows_rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkflowTask>>>,
    activities_tx: mpsc::UnboundedSender<ActivityTask>,
    activities_rx: Arc<Mutex<mpsc::UnboundedReceiver<ActivityTask>>>,
}

impl TaskQueue {
    pub fn new(namespace: &str, name: &str) -> Self {
        let (workflows_tx, workflows_rx) = mpsc::unbounded_channel();
        let (activities_tx, activities_rx) = mpsc::unbounded_channel();

        Self {
            namespace: Arc::from(namespace),
            name: Arc::from(name),
            workflows_tx,
            workflows_rx: Arc::new(Mutex::new(workflows_rx)),
            activities_tx,
            activities_rx: Arc::new(Mutex::new(activities_rx)),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enqueue_workflow(&self, task: WorkflowTask) -> PipelineResult<()> {
        self.workflows_tx
            .send(task)
            .map_err(|_| PipelineError::WorkerLost {
                activity: "orchestrator".to_string(),
                deliveries: 0,
            })
    }

    pub fn enqueue_activity(&self, task: ActivityTask) -> PipelineResult<()> {
        self.activities_tx.send(task).map_err(|e| PipelineError::WorkerLost {
            activity: e.0.call.name().to_string(),
            deliveries: e.0.deliveries,
        })
    }

    /// Wait for the next workflow task
    pub async fn next_workflow(&self) -> Option<WorkflowTask> {
        self.workflows_rx.lock().await.recv().await
    }

    /// Wait for the next activity task
    pub async fn next_activity(&self) -> Option<ActivityTask> {
        self.activities_rx.lock().await.recv().await
    }
}

/// Resolves once `signal` is raised; never resolves if its sender is gone
pub async fn cancelled(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Artifact;

    fn activity_task(frame_index: usize) -> (ActivityTask, oneshot::Receiver<PipelineResult<ActivityOutput>>) {
        let (_cancel_tx, cancel) = watch::channel(false);
        let (reply, rx) = oneshot::channel();
        let task = ActivityTask {
            job_id: JobId::new(),
            workspace: Workspace::open("/tmp/unused", JobId::new()),
            call: ActivityCall::Transform {
                operation: "identity".to_string(),
                frame_index,
                frame: Artifact::generate(),
                args: serde_json::json!({}),
            },
            timeout: Duration::from_secs(1),
            deliveries: 0,
            cancel,
            reply,
        };
        (task, rx)
    }

    #[tokio::test]
    async fn test_activities_are_fifo() {
        let queue = TaskQueue::new("default", "frames");

        for i in 0..3 {
            let (task, _rx) = activity_task(i);
            queue.enqueue_activity(task).unwrap();
        }

        for i in 0..3 {
            let task = queue.next_activity().await.unwrap();
            assert_eq!(task.call.frame_index(), Some(i));
        }
    }

    #[tokio::test]
    async fn test_clones_share_one_queue() {
        let producer = TaskQueue::new("default", "frames");
        let consumer = producer.clone();

        let (task, _rx) = activity_task(9);
        producer.enqueue_activity(task).unwrap();

        let received = consumer.next_activity().await.unwrap();
        assert_eq!(received.call.frame_index(), Some(9));
        assert_eq!(consumer.name(), "frames");
    }
}
