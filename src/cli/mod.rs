//! Command-line interface for framepipe.
//!
//! Runs jobs against a local worker pool, inspects and resumes jobs from
//! their history, and shows operations and configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{load_config, ResolvedConfig};
use crate::domain::{JobId, JobResult, JobState, OperationRequest};
use crate::operations::OperationRegistry;
use crate::runtime::{Broker, JobHandle, PipelineClient, WorkerOptions, WorkerPool};

/// framepipe - durable fan-out/fan-in image frame pipeline
#[derive(Parser, Debug)]
#[command(name = "framepipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply an operation to every frame of an image
    Run {
        /// URL of the source image
        url: String,

        /// Operation name (see `framepipe operations`)
        operation: String,

        /// Operation argument as key=value (value parsed as JSON when possible)
        #[arg(short, long = "arg", value_parser = parse_key_value)]
        args: Vec<(String, serde_json::Value)>,

        /// Where to write the result (default: output.<format>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the job workspace after writing the result
        #[arg(long)]
        keep: bool,
    },

    /// Continue an unfinished or failed job from its history
    Resume {
        /// Job ID (UUID)
        job_id: String,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        keep: bool,
    },

    /// Check the status of a job
    Status {
        /// Job ID (UUID)
        job_id: String,
    },

    /// List jobs with a workspace
    Jobs,

    /// List registered operations
    Operations,

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                url,
                operation,
                args,
                output,
                keep,
            } => run_job(&url, &operation, args, output, keep).await,
            Commands::Resume {
                job_id,
                output,
                keep,
            } => resume_job(&job_id, output, keep).await,
            Commands::Status { job_id } => show_status(&job_id).await,
            Commands::Jobs => list_jobs().await,
            Commands::Operations => list_operations(),
            Commands::Config => show_config(),
        }
    }
}

/// Parse `key=value`; the value is JSON if it parses, a string otherwise
fn parse_key_value(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;

    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn client_for(config: &ResolvedConfig, broker: &Broker) -> PipelineClient {
    PipelineClient::new(
        broker,
        &config.namespace,
        &config.queue,
        &config.workspace_root,
    )
}

/// Run a job on a local worker pool
async fn run_job(
    url: &str,
    operation: &str,
    args: Vec<(String, serde_json::Value)>,
    output: Option<PathBuf>,
    keep: bool,
) -> Result<()> {
    let config = load_config()?;
    let registry = OperationRegistry::with_builtins();
    if !registry.contains(operation) {
        anyhow::bail!(
            "Unknown operation '{}'. Run `framepipe operations` to list them.",
            operation
        );
    }

    let broker = Broker::new();
    let pool = WorkerPool::start(&broker, WorkerOptions::from_config(&config), registry);
    let client = client_for(&config, &broker);

    let request = OperationRequest::new(operation, url)
        .with_args(serde_json::Value::Object(args.into_iter().collect()));
    let handle = client.submit(request).await?;
    eprintln!("[Job {} submitted]", handle.job_id());

    let outcome = finish(handle, output, keep).await;
    pool.shutdown().await;
    outcome
}

/// Resume a job on a local worker pool
async fn resume_job(job_id_str: &str, output: Option<PathBuf>, keep: bool) -> Result<()> {
    let job_id = JobId::parse(job_id_str)
        .with_context(|| format!("Invalid job ID: {}", job_id_str))?;

    let config = load_config()?;
    let broker = Broker::new();
    let pool = WorkerPool::start(
        &broker,
        WorkerOptions::from_config(&config),
        OperationRegistry::with_builtins(),
    );
    let client = client_for(&config, &broker);

    let handle = client.resume(job_id).await?;
    eprintln!("[Job {} resumed]", job_id);

    let outcome = finish(handle, output, keep).await;
    pool.shutdown().await;
    outcome
}

/// Await a job (cancelling it on Ctrl-C), write its output, clean up
async fn finish(handle: JobHandle, output: Option<PathBuf>, keep: bool) -> Result<()> {
    let job_id = handle.job_id();
    let workspace = handle.workspace().clone();

    let result = handle
        .result_or_cancel_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => eprintln!("\n[Cancelling job {}]", job_id),
                Err(_) => std::future::pending::<()>().await,
            }
        })
        .await;

    let outcome = match result {
        Ok(result) => write_output(&result, output).await.map(|path| {
            eprintln!(
                "[Job {} completed: {} frames -> {}]",
                job_id,
                result.frame_count,
                path.display()
            );
        }),
        Err(e) => {
            if keep {
                eprintln!("[Resume with: framepipe resume {}]", job_id);
            }
            Err(anyhow::Error::new(e).context(format!("Job {} failed", job_id)))
        }
    };

    if keep {
        eprintln!("[Workspace kept at {}]", workspace.dir().display());
    } else {
        workspace.cleanup().await?;
    }

    outcome
}

async fn write_output(result: &JobResult, output: Option<PathBuf>) -> Result<PathBuf> {
    let bytes = result
        .workspace
        .retrieve(&result.artifact)
        .await
        .context("Failed to read job output")?;

    let path =
        output.unwrap_or_else(|| PathBuf::from(format!("output.{}", result.format.extension())));
    write_file(&path, &bytes).await?;
    Ok(path)
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Show the reconstructed state of a job
async fn show_status(job_id_str: &str) -> Result<()> {
    let job_id = JobId::parse(job_id_str)
        .with_context(|| format!("Invalid job ID: {}", job_id_str))?;

    let config = load_config()?;
    let client = client_for(&config, &Broker::new());
    let job = client.status(job_id).await?;

    println!("Job ID: {}", job.id);
    if let Some(ref request) = job.request {
        println!("Operation: {}", request.operation);
        println!("Source: {}", request.source_url);
        println!("Args: {}", request.args);
    }
    println!("State: {}", job.state.label());
    if let JobState::Failed { ref error } = job.state {
        println!("Error: {}", error);
        println!("Resume with: framepipe resume {}", job.id);
    }
    println!("Started: {}", job.started_at);
    if let Some(completed) = job.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(frames) = job.frame_count {
        println!("Frames transformed: {}/{}", job.frames_transformed, frames);
    }
    if let Some(ref result) = job.result {
        println!("Output: {} ({}, {} frames)", result.artifact, result.format, result.frame_count);
    }
    if !job.is_finished() {
        println!("Interrupted? Resume with: framepipe resume {}", job.id);
    }

    Ok(())
}

/// List jobs under the workspace root
async fn list_jobs() -> Result<()> {
    let config = load_config()?;
    let client = client_for(&config, &Broker::new());
    let jobs = client.list_jobs().await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<15}", "JOB ID", "OPERATION", "STATE");
    println!("{}", "-".repeat(65));

    for job_id in jobs {
        match client.status(job_id).await {
            Ok(job) => {
                let operation = job
                    .request
                    .as_ref()
                    .map(|r| r.operation.as_str())
                    .unwrap_or("-");
                println!("{:<38} {:<12} {:<15}", job.id, operation, job.state.label());
            }
            Err(_) => println!("{:<38} {:<12} {:<15}", job_id, "-", "no history"),
        }
    }

    Ok(())
}

fn list_operations() -> Result<()> {
    let registry = OperationRegistry::with_builtins();

    for operation in registry.iter() {
        println!("{:<12} {}", operation.name(), operation.description());
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let config = load_config()?;

    match config.config_file {
        Some(ref path) => println!("# Config file: {}", path.display()),
        None => println!("# Config file: (none, using defaults)"),
    }
    print!(
        "{}",
        serde_yaml::to_string(&config).context("Failed to render configuration")?
    );

    Ok(())
}
