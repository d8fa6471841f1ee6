//! The orchestrator routine for one job.
//!
//! Sequences Load -> Split -> fan-out Transform -> Join by scheduling
//! activities on the task queue and awaiting their replies. Every step is
//! recorded in the job history; on resume, activities with a recorded
//! completion return that result instead of running again, so the routine
//! replays deterministically up to where it stopped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    Artifact, Event, EventType, Job, JobId, JobResult, JobState, OperationRequest, PipelineError,
    PipelineResult,
};
use crate::runtime::queue::{cancelled, ActivityTask, TaskQueue};
use crate::workspace::{generate_idempotency_key, JobHistory, Workspace};

use super::activities::{ActivityCall, ActivityOutput};
use super::policy::ActivityOptions;

/// Orchestrator shared by every job a worker pool runs
pub struct Orchestrator {
    queue: TaskQueue,
    options: ActivityOptions,

    /// Job workspaces live under `<workspace_root>/<job_id>/`
    workspace_root: PathBuf,
}

/// Per-run state
struct JobRun<'a> {
    workspace: &'a Workspace,
    history: JobHistory,

    /// Results already recorded in history, by idempotency key
    completed: HashMap<String, serde_json::Value>,

    cancel: watch::Receiver<bool>,
}

impl JobRun<'_> {
    fn job_id(&self) -> JobId {
        self.workspace.job_id()
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

impl Orchestrator {
    pub fn new(
        queue: TaskQueue,
        options: ActivityOptions,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue,
            options,
            workspace_root: workspace_root.into(),
        }
    }

    /// Run a job to completion, or continue one from its history.
    ///
    /// Sets up (or reopens) the job's workspace first. The job either fully
    /// succeeds or fully fails; the first error is recorded and returned
    /// unchanged.
    #[instrument(skip_all, fields(%job_id, operation = %request.operation))]
    pub async fn run(
        &self,
        job_id: JobId,
        request: &OperationRequest,
        cancel: watch::Receiver<bool>,
    ) -> PipelineResult<JobResult> {
        let workspace = Workspace::init(&self.workspace_root, job_id).await?;
        let history = JobHistory::open(&workspace);
        let events = history.replay().await?;
        let resumed = !events.is_empty();

        if resumed {
            if let Some(result) = Job::from_events(&events).and_then(|job| job.result) {
                info!("Job already completed, returning recorded result");
                return Ok(result);
            }
            info!(events = events.len(), "Resuming job");
        } else {
            info!(source_url = %request.source_url, "Starting job");
            let start_event = Event::new(
                job_id,
                EventType::JobStarted,
                format!("{}:start", job_id),
                format!("Job started: {} on {}", request.operation, request.source_url),
            )
            .with_data(serde_json::to_value(request)?);
            history.append(&start_event).await?;
        }

        let job = JobRun {
            workspace: &workspace,
            completed: history.completed_results().await?,
            history,
            cancel,
        };

        let mut state = JobState::Started;
        let start = Instant::now();

        match self.execute(&job, &mut state, request).await {
            Ok(result) => {
                self.transition(&job, &mut state, JobState::Completed).await?;

                let event = Event::new(
                    job.job_id(),
                    EventType::JobCompleted,
                    format!("{}:complete", job.job_id()),
                    format!(
                        "Job completed: {} {} with {} frames",
                        result.artifact, result.format, result.frame_count
                    ),
                )
                .with_data(serde_json::to_value(&result)?)
                .with_duration(start.elapsed().as_millis() as u64);
                job.history.append(&event).await?;

                info!(
                    artifact = %result.artifact,
                    format = %result.format,
                    frames = result.frame_count,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                Ok(result)
            }
            Err(e) => {
                self.fail(&job, &mut state, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job: &JobRun<'_>,
        state: &mut JobState,
        request: &OperationRequest,
    ) -> PipelineResult<JobResult> {
        let source = self
            .call_activity(
                job,
                ActivityCall::LoadSource {
                    url: request.source_url.clone(),
                },
            )
            .await?
            .into_source()?;

        self.transition(job, state, JobState::Splitting).await?;
        let frames = self
            .call_activity(job, ActivityCall::Split { source })
            .await?
            .into_frames()?;
        debug!(frames = frames.len(), "Source split");

        self.transition(job, state, JobState::FanningOut).await?;
        let outputs = self.fan_out(job, request, frames).await?;

        self.transition(job, state, JobState::Joining).await?;
        let joined = self
            .call_activity(job, ActivityCall::Join { frames: outputs })
            .await?
            .into_joined()?;

        Ok(JobResult {
            job_id: job.job_id(),
            artifact: joined.artifact,
            format: joined.format,
            frame_count: joined.frame_count,
            workspace: job.workspace.clone(),
        })
    }

    /// Schedule one transform per frame and wait for all of them.
    ///
    /// Outputs are concatenated in frame order, then sub-output order. If any
    /// frame failed, the error of the lowest failing frame index is returned.
    async fn fan_out(
        &self,
        job: &JobRun<'_>,
        request: &OperationRequest,
        frames: Vec<Artifact>,
    ) -> PipelineResult<Vec<Artifact>> {
        let calls = frames
            .into_iter()
            .enumerate()
            .map(|(frame_index, frame)| ActivityCall::Transform {
                operation: request.operation.clone(),
                frame_index,
                frame,
                args: request.args.clone(),
            });

        let results = join_all(calls.map(|call| self.call_activity(job, call))).await;

        let mut outputs = Vec::new();
        for result in results {
            outputs.extend(result?.into_frames()?);
        }
        Ok(outputs)
    }

    /// Run one activity with idempotent replay and the retry policy
    async fn call_activity(
        &self,
        job: &JobRun<'_>,
        call: ActivityCall,
    ) -> PipelineResult<ActivityOutput> {
        let activity = call.name();
        let frame = call.frame_index();
        let idem_key = generate_idempotency_key(job.job_id(), activity, &call)?;

        if let Some(recorded) = job.completed.get(&idem_key) {
            debug!(activity, ?frame, "Activity already completed, replaying result");
            return serde_json::from_value(recorded.clone()).map_err(|e| {
                PipelineError::History(format!("Unreadable result for {}: {}", idem_key, e))
            });
        }

        let policy = &self.options.retry_policy;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if job.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let scheduled = Event::new(
                job.job_id(),
                EventType::ActivityScheduled,
                idem_key.clone(),
                format!("{} (attempt {})", call.describe(), attempt),
            )
            .with_activity(activity, frame);
            job.history.append(&scheduled).await?;
            debug!(activity, ?frame, attempt, "Activity scheduled");

            let started = Instant::now();
            let result = self.dispatch(job, call.clone()).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    let completed = Event::new(
                        job.job_id(),
                        EventType::ActivityCompleted,
                        idem_key.clone(),
                        format!("{} completed in {}ms", call.describe(), duration_ms),
                    )
                    .with_activity(activity, frame)
                    .with_data(serde_json::to_value(&output)?)
                    .with_duration(duration_ms);
                    job.history.append(&completed).await?;

                    return Ok(output);
                }
                Err(e) if e.is_retryable() && policy.should_retry(attempt) && !job.is_cancelled() => {
                    let delay = policy.delay_for_attempt(attempt);

                    let retrying = Event::new(
                        job.job_id(),
                        EventType::ActivityRetrying,
                        format!("{}:retry:{}", idem_key, attempt),
                        format!("{} failed, retrying in {:?}", call.describe(), delay),
                    )
                    .with_activity(activity, frame)
                    .with_duration(duration_ms)
                    .with_error(e.clone());
                    job.history.append(&retrying).await?;

                    warn!(
                        activity,
                        ?frame,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Activity failed, retrying"
                    );

                    let mut cancel = job.cancel.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancelled(&mut cancel) => return Err(PipelineError::Cancelled),
                    }
                }
                Err(e) => {
                    let failed = Event::new(
                        job.job_id(),
                        EventType::ActivityFailed,
                        idem_key.clone(),
                        format!(
                            "{} failed after {} attempts: {}",
                            call.describe(),
                            attempt,
                            e
                        ),
                    )
                    .with_activity(activity, frame)
                    .with_duration(duration_ms)
                    .with_error(e.clone());
                    job.history.append(&failed).await?;

                    warn!(activity, ?frame, attempt, error = %e, "Activity failed");
                    return Err(e);
                }
            }
        }
    }

    /// Hand one call to the task queue and wait for a worker's reply
    async fn dispatch(&self, job: &JobRun<'_>, call: ActivityCall) -> PipelineResult<ActivityOutput> {
        let activity = call.name();
        let (reply, response) = oneshot::channel();

        self.queue.enqueue_activity(ActivityTask {
            job_id: job.job_id(),
            workspace: job.workspace.clone(),
            call,
            timeout: self.options.timeout(),
            deliveries: 0,
            cancel: job.cancel.clone(),
            reply,
        })?;

        let mut cancel = job.cancel.clone();
        tokio::select! {
            reply = response => reply.unwrap_or_else(|_| {
                Err(PipelineError::WorkerLost {
                    activity: activity.to_string(),
                    deliveries: 0,
                })
            }),
            _ = cancelled(&mut cancel) => Err(PipelineError::Cancelled),
        }
    }

    async fn transition(
        &self,
        job: &JobRun<'_>,
        state: &mut JobState,
        next: JobState,
    ) -> PipelineResult<()> {
        if !state.can_transition_to(&next) {
            return Err(PipelineError::History(format!(
                "Illegal job transition {} -> {}",
                state.label(),
                next.label()
            )));
        }

        let event = Event::new(
            job.job_id(),
            EventType::StateChanged,
            format!("{}:state:{}", job.job_id(), next.label()),
            format!("{} -> {}", state.label(), next.label()),
        )
        .with_data(serde_json::to_value(&next)?);
        job.history.append(&event).await?;

        debug!(from = state.label(), to = next.label(), "Job state changed");
        *state = next;
        Ok(())
    }

    /// Record a terminal failure. History errors here are logged, not
    /// returned, so the caller still sees the original error.
    async fn fail(&self, job: &JobRun<'_>, state: &mut JobState, error: &PipelineError) {
        error!(state = state.label(), error = %error, "Job failed");

        let failed = JobState::Failed {
            error: error.clone(),
        };
        if let Err(e) = self.transition(job, state, failed).await {
            warn!(error = %e, "Failed to record job failure state");
        }

        let event = Event::new(
            job.job_id(),
            EventType::JobFailed,
            format!("{}:complete", job.job_id()),
            format!("Job failed: {}", error),
        )
        .with_error(error.clone());
        if let Err(e) = job.history.append(&event).await {
            warn!(error = %e, "Failed to record job failure");
        }
    }
}
