//! Append-only job history with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) next to the job's
//! artifacts. The history is what makes the orchestrator replayable: an
//! activity whose idempotency key already has a completion event is not
//! executed again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::domain::{Event, EventType, JobId, PipelineError, PipelineResult};

use super::store::Workspace;

/// File-based job history using JSONL format
pub struct JobHistory {
    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Serializes appends from concurrently completing activities
    write_lock: Mutex<()>,
}

impl JobHistory {
    /// Open the history of the job owning `workspace`
    pub fn open(workspace: &Workspace) -> Self {
        Self::at(workspace.events_path())
    }

    /// Open a history file at an explicit path
    pub fn at(events_path: impl Into<PathBuf>) -> Self {
        Self {
            events_path: events_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> PipelineResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .map_err(|e| {
                PipelineError::History(format!(
                    "Failed to open history {}: {}",
                    self.events_path.display(),
                    e
                ))
            })?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> PipelineResult<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line).map_err(|e| {
                PipelineError::History(format!("Failed to parse event '{}': {}", line, e))
            })?;
            events.push(event);
        }

        Ok(events)
    }

    /// Recorded results of every completed activity, keyed by idempotency key
    pub async fn completed_results(&self) -> PipelineResult<HashMap<String, serde_json::Value>> {
        let events = self.replay().await?;

        Ok(events
            .into_iter()
            .filter(|e| matches!(e.event_type, EventType::ActivityCompleted))
            .map(|e| (e.idempotency_key, e.data.unwrap_or(serde_json::Value::Null)))
            .collect())
    }

    /// List the ids of every job with a workspace under `root`
    pub async fn list_jobs(root: &Path) -> PipelineResult<Vec<JobId>> {
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(job_id) = JobId::parse(name) {
                        jobs.push(job_id);
                    }
                }
            }
        }

        Ok(jobs)
    }
}

/// Generate the idempotency key for one activity call
pub fn generate_idempotency_key<T: Serialize>(
    job_id: JobId,
    activity: &str,
    call: &T,
) -> PipelineResult<String> {
    let encoded = serde_json::to_vec(call)?;
    Ok(format!("{}:{}:{}", job_id, activity, hash_input(&encoded)))
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_history() -> (JobHistory, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let history = JobHistory::at(temp_dir.path().join("events.jsonl"));
        (history, temp_dir)
    }

    #[tokio::test]
    async fn test_event_append_and_replay() {
        let (history, _temp) = create_test_history();
        let job_id = JobId::new();

        for i in 0..5 {
            let event = Event::new(
                job_id,
                EventType::ActivityScheduled,
                format!("{}:transform:{}", job_id, i),
                format!("Transform frame {}", i),
            )
            .with_activity("transform", Some(i));
            history.append(&event).await.unwrap();
        }

        let events = history.replay().await.unwrap();
        assert_eq!(events.len(), 5);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.frame, Some(i));
        }
    }

    #[tokio::test]
    async fn test_completed_result_lookup() {
        let (history, _temp) = create_test_history();
        let job_id = JobId::new();
        let key = format!("{}:split:abc", job_id);

        assert!(history.completed_results().await.unwrap().is_empty());

        history
            .append(
                &Event::new(job_id, EventType::ActivityScheduled, key.clone(), "s".into())
                    .with_activity("split", None),
            )
            .await
            .unwrap();
        assert!(!history.completed_results().await.unwrap().contains_key(&key));

        history
            .append(
                &Event::new(job_id, EventType::ActivityCompleted, key.clone(), "c".into())
                    .with_activity("split", None)
                    .with_data(serde_json::json!({ "frames": ["x"] })),
            )
            .await
            .unwrap();

        let results = history.completed_results().await.unwrap();
        assert_eq!(results[&key]["frames"][0], "x");
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_lines_intact() {
        let (history, _temp) = create_test_history();
        let history = std::sync::Arc::new(history);
        let job_id = JobId::new();

        let mut handles = Vec::new();
        for i in 0..20 {
            let history = history.clone();
            handles.push(tokio::spawn(async move {
                let event = Event::new(
                    job_id,
                    EventType::ActivityCompleted,
                    format!("k{}", i),
                    "done".to_string(),
                );
                history.append(&event).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(history.replay().await.unwrap().len(), 20);
    }

    #[test]
    fn test_idempotency_key_format() {
        let job_id = JobId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = generate_idempotency_key(job_id, "transform", &("identity", 3)).unwrap();

        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(parts[1], "transform");
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_input_hash_consistency() {
        assert_eq!(hash_input(b"frame"), hash_input(b"frame"));
        assert_ne!(hash_input(b"frame"), hash_input(b"other"));
    }
}
