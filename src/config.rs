//! Configuration for framepipe workers and clients.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FRAMEPIPE_WORKSPACE_ROOT, FRAMEPIPE_NAMESPACE,
//!    FRAMEPIPE_QUEUE, FRAMEPIPE_CONCURRENCY)
//! 2. Config file (.framepipe/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .framepipe/config.yaml
//! - `workspace_root` in the config file is relative to the project root
//!   (the directory containing .framepipe/)
//!
//! The resolved config is loaded once by the binary and passed down; there is
//! no process-wide instance.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::ActivityOptions;

const CONFIG_DIR: &str = ".framepipe";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    pub workspace_root: Option<String>,
    pub namespace: Option<String>,
    pub queue: Option<String>,
    pub concurrency: Option<usize>,
    pub activity: Option<ActivityOptions>,
    pub max_source_bytes: Option<u64>,
    pub frame_delay_ms: Option<u64>,
    pub max_redeliveries: Option<u32>,
}

/// Resolved configuration
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Directory holding one workspace per job
    pub workspace_root: PathBuf,

    /// Task queue namespace
    pub namespace: String,

    /// Task queue name
    pub queue: String,

    /// Activity workers per pool
    pub concurrency: usize,

    /// Timeout and retry policy for every activity
    pub activity: ActivityOptions,

    /// Largest source image accepted, in bytes
    pub max_source_bytes: u64,

    /// Delay between frames of animated output
    pub frame_delay_ms: u64,

    /// How often a crashed activity is handed to another worker
    pub max_redeliveries: u32,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            namespace: "default".to_string(),
            queue: "framepipe".to_string(),
            concurrency: 4,
            activity: ActivityOptions::default(),
            max_source_bytes: 50 * 1024 * 1024, // 50MB
            frame_delay_ms: 100,
            max_redeliveries: 3,
            config_file: None,
        }
    }
}

impl ResolvedConfig {
    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }
}

fn default_workspace_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("framepipe")
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources, discovering the config file from the
/// current directory
pub fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    load_config_from(&cwd, |key| std::env::var(key).ok())
}

/// Load configuration starting discovery at `start`, reading environment
/// variables through `env`
pub fn load_config_from<F>(start: &Path, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ResolvedConfig::default();

    if let Some(config_path) = find_config_file(start) {
        let file = load_config_file(&config_path)?;

        // Base directory is the parent of .framepipe/ (i.e., grandparent of config.yaml)
        let base_dir = config_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        if let Some(ref root) = file.workspace_root {
            config.workspace_root = resolve_path(base_dir, root);
        }
        if let Some(namespace) = file.namespace {
            config.namespace = namespace;
        }
        if let Some(queue) = file.queue {
            config.queue = queue;
        }
        if let Some(concurrency) = file.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(activity) = file.activity {
            config.activity = activity;
        }
        if let Some(max_source_bytes) = file.max_source_bytes {
            config.max_source_bytes = max_source_bytes;
        }
        if let Some(frame_delay_ms) = file.frame_delay_ms {
            config.frame_delay_ms = frame_delay_ms;
        }
        if let Some(max_redeliveries) = file.max_redeliveries {
            config.max_redeliveries = max_redeliveries;
        }

        config.config_file = Some(config_path);
    }

    if let Some(root) = env("FRAMEPIPE_WORKSPACE_ROOT") {
        config.workspace_root = PathBuf::from(root);
    }
    if let Some(namespace) = env("FRAMEPIPE_NAMESPACE") {
        config.namespace = namespace;
    }
    if let Some(queue) = env("FRAMEPIPE_QUEUE") {
        config.queue = queue;
    }
    if let Some(concurrency) = env("FRAMEPIPE_CONCURRENCY") {
        config.concurrency = concurrency
            .trim()
            .parse()
            .with_context(|| format!("Invalid FRAMEPIPE_CONCURRENCY: {}", concurrency))?;
    }

    if config.concurrency == 0 {
        anyhow::bail!("concurrency must be at least 1");
    }

    Ok(config)
}
