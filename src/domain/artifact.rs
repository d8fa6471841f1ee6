//! Artifact handles and the identifiers that scope them.
//!
//! An artifact is an opaque handle naming one immutable blob inside a job
//! workspace. Handles are small and serializable so they can travel through
//! task messages and job history while the bytes stay on disk.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle to one immutable blob in a [`Workspace`](crate::workspace::Workspace)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifact(String);

impl Artifact {
    /// Allocate a fresh, never-before-used handle
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing handle string (e.g. one read back from history)
    pub fn from_handle(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The raw handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the handle has the shape of one issued by `generate`
    pub fn is_well_formed(&self) -> bool {
        Uuid::parse_str(&self.0).is_ok()
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one pipeline job; also names its workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Encoding of a job's final artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Single still image
    Png,

    /// Animated, multi-frame image
    Gif,
}

impl OutputFormat {
    /// File extension / format tag handed to the caller
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Gif => "gif",
        }
    }

    /// Pick the encoding for a given number of output frames
    pub fn for_frame_count(count: usize) -> Self {
        if count == 1 {
            Self::Png
        } else {
            Self::Gif
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
