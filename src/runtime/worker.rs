//! Worker pool: activity workers plus a workflow poller on one task queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::adapters::{HttpFetcher, SourceFetcher};
use crate::config::ResolvedConfig;
use crate::core::activities::{self, ActivityContext};
use crate::core::{ActivityOptions, Orchestrator};
use crate::domain::PipelineError;
use crate::operations::OperationRegistry;

use super::broker::Broker;
use super::queue::{cancelled, ActivityTask, TaskQueue, WorkflowTask};

/// Settings for one worker pool
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub namespace: String,
    pub queue: String,

    /// Root under which the orchestrator creates job workspaces
    pub workspace_root: PathBuf,

    /// Number of activity workers
    pub concurrency: usize,

    /// Redeliveries of a task whose worker crashed before giving up
    pub max_redeliveries: u32,

    /// Applied by the orchestrator routines this pool runs
    pub activity: ActivityOptions,

    pub max_source_bytes: u64,
    pub frame_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_config(&ResolvedConfig::default())
    }
}

impl WorkerOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            queue: config.queue.clone(),
            workspace_root: config.workspace_root.clone(),
            concurrency: config.concurrency,
            max_redeliveries: config.max_redeliveries,
            activity: config.activity.clone(),
            max_source_bytes: config.max_source_bytes,
            frame_delay: config.frame_delay(),
        }
    }
}

/// A running set of workers polling one `(namespace, queue)` pair.
///
/// Start several pools on the same broker and queue to scale out; they
/// compete for the same tasks.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start a pool that fetches sources over HTTP
    pub fn start(broker: &Broker, options: WorkerOptions, registry: OperationRegistry) -> Self {
        Self::start_with_fetcher(broker, options, registry, Arc::new(HttpFetcher::new()))
    }

    pub fn start_with_fetcher(
        broker: &Broker,
        options: WorkerOptions,
        registry: OperationRegistry,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        let queue = broker.queue(&options.namespace, &options.queue);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let ctx = Arc::new(ActivityContext {
            registry,
            fetcher,
            max_source_bytes: options.max_source_bytes,
            frame_delay: options.frame_delay,
        });
        let orchestrator = Arc::new(Orchestrator::new(
            queue.clone(),
            options.activity.clone(),
            options.workspace_root.clone(),
        ));

        let concurrency = options.concurrency.max(1);
        let mut workers = Vec::with_capacity(concurrency + 1);

        for worker_id in 0..concurrency {
            workers.push(tokio::spawn(activity_worker(
                worker_id,
                queue.clone(),
                Arc::clone(&ctx),
                options.max_redeliveries,
                shutdown_rx.clone(),
            )));
        }
        workers.push(tokio::spawn(workflow_poller(
            queue.clone(),
            orchestrator,
            shutdown_rx,
        )));

        info!(
            namespace = %options.namespace,
            queue = %options.queue,
            concurrency,
            "Worker pool started"
        );

        Self { shutdown, workers }
    }

    /// Stop polling and wait for every worker to finish its current task.
    ///
    /// Jobs whose orchestrator routine was running on this pool are abandoned
    /// and can be continued with `PipelineClient::resume`.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);

        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker exited abnormally");
            }
        }

        info!("Worker pool stopped");
    }
}

async fn activity_worker(
    worker_id: usize,
    queue: TaskQueue,
    ctx: Arc<ActivityContext>,
    max_redeliveries: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "Activity worker started");

    loop {
        let task = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            task = queue.next_activity() => match task {
                Some(task) => task,
                None => break,
            },
        };

        run_activity(worker_id, &queue, &ctx, task, max_redeliveries).await;
    }

    debug!(worker_id, "Activity worker stopped");
}

/// Execute one delivery of `task`.
///
/// The call runs in its own task so that a panic is contained: it counts as
/// a crashed worker and the task goes back on the queue.
async fn run_activity(
    worker_id: usize,
    queue: &TaskQueue,
    ctx: &Arc<ActivityContext>,
    mut task: ActivityTask,
    max_redeliveries: u32,
) {
    let activity = task.call.name();
    let frame = task.call.frame_index();
    let job_id = task.job_id;

    if task.is_cancelled() {
        debug!(%job_id, activity, ?frame, "Skipping activity of cancelled job");
        let _ = task.reply.send(Err(PipelineError::Cancelled));
        return;
    }

    task.deliveries += 1;
    debug!(%job_id, worker_id, activity, ?frame, delivery = task.deliveries, "Activity started");

    let execution = {
        let ctx = Arc::clone(ctx);
        let workspace = task.workspace.clone();
        let call = task.call.clone();
        tokio::spawn(async move { activities::execute(&ctx, &workspace, &call).await })
    };
    let abort = execution.abort_handle();
    let timeout = task.timeout;
    let mut cancel = task.cancel.clone();

    let outcome = tokio::select! {
        joined = tokio::time::timeout(timeout, execution) => match joined {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) if e.is_panic() => None,
            Ok(Err(_)) => Some(Err(PipelineError::Cancelled)),
            Err(_) => {
                abort.abort();
                Some(Err(PipelineError::timeout(activity, timeout)))
            }
        },
        _ = cancelled(&mut cancel) => {
            abort.abort();
            Some(Err(PipelineError::Cancelled))
        }
    };

    match outcome {
        Some(result) => {
            if let Err(ref e) = result {
                debug!(%job_id, activity, ?frame, error = %e, "Activity returned an error");
            }
            let _ = task.reply.send(result);
        }
        None if task.deliveries > max_redeliveries => {
            error!(
                %job_id,
                activity,
                ?frame,
                deliveries = task.deliveries,
                "Activity crashed its worker too many times"
            );
            let deliveries = task.deliveries;
            let _ = task.reply.send(Err(PipelineError::WorkerLost {
                activity: activity.to_string(),
                deliveries,
            }));
        }
        None => {
            warn!(
                %job_id,
                worker_id,
                activity,
                ?frame,
                delivery = task.deliveries,
                "Worker crashed during activity, redelivering"
            );
            if let Err(e) = queue.enqueue_activity(task) {
                error!(%job_id, activity, error = %e, "Failed to redeliver activity");
            }
        }
    }
}

async fn workflow_poller(
    queue: TaskQueue,
    orchestrator: Arc<Orchestrator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut routines = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            Some(finished) = routines.join_next(), if !routines.is_empty() => {
                if let Err(e) = finished {
                    error!(error = %e, "Orchestrator routine crashed");
                }
            }
            task = queue.next_workflow() => match task {
                Some(task) => {
                    let orchestrator = Arc::clone(&orchestrator);
                    routines.spawn(async move {
                        let WorkflowTask {
                            job_id,
                            request,
                            cancel,
                            reply,
                        } = task;
                        let result = orchestrator.run(job_id, &request, cancel).await;
                        let _ = reply.send(result);
                    });
                }
                None => break,
            },
        }
    }

    if !routines.is_empty() {
        warn!(in_flight = routines.len(), "Abandoning in-flight jobs");
    }
    routines.shutdown().await;
}
