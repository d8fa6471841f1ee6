//! Job-scoped blob store.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/<job_id>/artifacts/<uuid>   one immutable blob per artifact
//! <root>/<job_id>/events.jsonl       job history (see `history`)
//! ```
//!
//! Every write allocates a fresh handle, so concurrent activities never
//! touch the same file and no locking is needed.

use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::domain::{Artifact, JobId, PipelineError, PipelineResult};

const ARTIFACTS_DIR: &str = "artifacts";
const EVENTS_FILE: &str = "events.jsonl";

/// Handle to one job's workspace.
///
/// Cheap to clone and serializable: only the root and job id travel through
/// task messages, never the blobs themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    root: PathBuf,
    job_id: JobId,
}

impl Workspace {
    /// Create (or reopen) the workspace for a job under `root`
    pub async fn init(root: impl Into<PathBuf>, job_id: JobId) -> PipelineResult<Self> {
        let workspace = Self::open(root, job_id);
        let artifacts_dir = workspace.artifacts_dir();

        fs::create_dir_all(&artifacts_dir).await.map_err(|e| {
            PipelineError::Io(format!(
                "Failed to create workspace {}: {}",
                artifacts_dir.display(),
                e
            ))
        })?;

        debug!(%job_id, path = %workspace.dir().display(), "Workspace initialized");
        Ok(workspace)
    }

    /// Refer to an existing workspace without touching the filesystem
    pub fn open(root: impl Into<PathBuf>, job_id: JobId) -> Self {
        Self {
            root: root.into(),
            job_id,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Directory owned by this job
    pub fn dir(&self) -> PathBuf {
        self.root.join(self.job_id.to_string())
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir().join(ARTIFACTS_DIR)
    }

    /// Path of the job history file
    pub fn events_path(&self) -> PathBuf {
        self.dir().join(EVENTS_FILE)
    }

    fn artifact_path(&self, artifact: &Artifact) -> PathBuf {
        self.artifacts_dir().join(artifact.as_str())
    }

    /// Whether the workspace has been reclaimed (or never created)
    pub fn is_reclaimed(&self) -> bool {
        !self.artifacts_dir().is_dir()
    }

    /// Store an immutable blob and return its fresh handle
    pub async fn persist(&self, bytes: &[u8]) -> PipelineResult<Artifact> {
        if self.is_reclaimed() {
            return Err(PipelineError::ArtifactNotFound(format!(
                "workspace {} has been reclaimed",
                self.job_id
            )));
        }

        let artifact = Artifact::generate();
        let final_path = self.artifact_path(&artifact);
        let temp_path = self.artifacts_dir().join(format!(".{}.tmp", artifact));

        fs::write(&temp_path, bytes).await.map_err(|e| {
            PipelineError::Io(format!(
                "Failed to write artifact {}: {}",
                temp_path.display(),
                e
            ))
        })?;
        fs::rename(&temp_path, &final_path).await.map_err(|e| {
            PipelineError::Io(format!(
                "Failed to publish artifact {}: {}",
                final_path.display(),
                e
            ))
        })?;

        debug!(job_id = %self.job_id, %artifact, size = bytes.len(), "Artifact persisted");
        Ok(artifact)
    }

    /// Read back exactly the bytes stored under `artifact`
    pub async fn retrieve(&self, artifact: &Artifact) -> PipelineResult<Vec<u8>> {
        if !artifact.is_well_formed() {
            return Err(PipelineError::ArtifactNotFound(artifact.to_string()));
        }

        match fs::read(self.artifact_path(artifact)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(PipelineError::ArtifactNotFound(artifact.to_string()))
            }
            Err(e) => Err(PipelineError::Io(format!(
                "Failed to read artifact {}: {}",
                artifact, e
            ))),
        }
    }

    /// Whether `artifact` currently exists in this workspace
    pub async fn contains(&self, artifact: &Artifact) -> bool {
        artifact.is_well_formed() && fs::metadata(self.artifact_path(artifact)).await.is_ok()
    }

    /// List all artifacts in this workspace (unordered)
    pub async fn list(&self) -> PipelineResult<Vec<Artifact>> {
        let mut artifacts = Vec::new();

        let mut entries = match fs::read_dir(self.artifacts_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(artifacts),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                let artifact = Artifact::from_handle(name);
                if artifact.is_well_formed() {
                    artifacts.push(artifact);
                }
            }
        }

        Ok(artifacts)
    }

    /// Total size in bytes of all artifacts in this workspace
    pub async fn total_bytes(&self) -> PipelineResult<u64> {
        let mut total = 0;
        for artifact in self.list().await? {
            if let Ok(metadata) = fs::metadata(self.artifact_path(&artifact)).await {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    /// Remove every artifact (and the history) of this job. Idempotent.
    pub async fn cleanup(&self) -> PipelineResult<()> {
        match fs::remove_dir_all(self.dir()).await {
            Ok(()) => {
                debug!(job_id = %self.job_id, "Workspace reclaimed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Io(format!(
                "Failed to reclaim workspace {}: {}",
                self.dir().display(),
                e
            ))),
        }
    }
}
