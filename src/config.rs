//! Centralized configuration and builder for backup runs.
//!
//! Layers (later wins):
//! 1. `BackupConfig::default()`
//! 2. optional TOML file (`BackupConfig::from_toml_file`)
//! 3. environment (`SS_*`, `apply_env`)
//! 4. explicit CLI flags / builder setters (`with_*`)
//!
//! Env:
//! - SS_CLUSTER_DIR        cluster state directory (file-backed control plane)
//! - SS_NAMESPACE          namespace of the workload (default "default")
//! - SS_SNAPSHOT_CLASS     VolumeSnapshotClass name
//! - SS_REPLICAS           primary|all|<n> (default primary)
//! - SS_POLL_INTERVAL_MS   readiness poll cadence (default 2000)
//! - SS_TIMEOUT_SECS       run-level readiness budget (default 1800)
//! - SS_MAX_PARALLEL       concurrent workers per phase, 0 = one per target (default 0)
//! - SS_OUTPUT_DIR         directory for output.json
//! - SS_FREEZE_CMD / SS_RESUME_CMD  fence hook command lines
//! - SS_PAUSE_SECS         pause of the fallback pause fence (default 0)

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::topology::ReplicaScope;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupConfig {
    /// Cluster state directory. Env: SS_CLUSTER_DIR
    pub cluster_dir: Option<PathBuf>,

    /// Env: SS_NAMESPACE (default "default")
    pub namespace: String,

    /// Env: SS_SNAPSHOT_CLASS (required by the time a run starts)
    pub snapshot_class: Option<String>,

    /// Env: SS_REPLICAS = primary|all|<n> (default primary)
    pub replicas: ReplicaScope,

    /// Env: SS_POLL_INTERVAL_MS (default 2000)
    pub poll_interval_ms: u64,

    /// Env: SS_TIMEOUT_SECS (default 1800)
    pub timeout_secs: u64,

    /// Env: SS_MAX_PARALLEL (default 0 = unbounded)
    pub max_parallel: usize,

    /// Env: SS_OUTPUT_DIR. If None, no output.json is written.
    pub output_dir: Option<PathBuf>,

    // ---------- write fence ----------
    /// Env: SS_FREEZE_CMD
    pub freeze_cmd: Option<String>,

    /// Env: SS_RESUME_CMD
    pub resume_cmd: Option<String>,

    /// Pause of the fallback fence when no hook commands are set. Env: SS_PAUSE_SECS
    pub pause_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            cluster_dir: None,
            namespace: "default".to_string(),
            snapshot_class: None,
            replicas: ReplicaScope::Primary,
            poll_interval_ms: 2_000,
            timeout_secs: 1_800,
            max_parallel: 0,
            output_dir: None,
            freeze_cmd: None,
            resume_cmd: None,
            pause_secs: 0,
        }
    }
}

// TOML file layout: every key optional, names match the struct fields.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    cluster_dir: Option<PathBuf>,
    namespace: Option<String>,
    snapshot_class: Option<String>,
    replicas: Option<String>,
    poll_interval_ms: Option<u64>,
    timeout_secs: Option<u64>,
    max_parallel: Option<usize>,
    output_dir: Option<PathBuf>,
    freeze_cmd: Option<String>,
    resume_cmd: Option<String>,
    pause_secs: Option<u64>,
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

impl BackupConfig {
    /// Defaults overridden by `SS_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Defaults, then TOML file (if any), then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::default(),
        };
        Ok(base.apply_env())
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let fc: FileConfig = toml::from_str(text)?;
        let mut cfg = Self::default();
        if let Some(v) = fc.cluster_dir {
            cfg.cluster_dir = Some(v);
        }
        if let Some(v) = fc.namespace.as_deref().and_then(non_empty) {
            cfg.namespace = v;
        }
        if let Some(v) = fc.snapshot_class.as_deref().and_then(non_empty) {
            cfg.snapshot_class = Some(v);
        }
        if let Some(v) = fc.replicas {
            cfg.replicas = v.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Some(v) = fc.poll_interval_ms {
            cfg.poll_interval_ms = v;
        }
        if let Some(v) = fc.timeout_secs {
            cfg.timeout_secs = v;
        }
        if let Some(v) = fc.max_parallel {
            cfg.max_parallel = v;
        }
        if let Some(v) = fc.output_dir {
            cfg.output_dir = Some(v);
        }
        if let Some(v) = fc.freeze_cmd.as_deref().and_then(non_empty) {
            cfg.freeze_cmd = Some(v);
        }
        if let Some(v) = fc.resume_cmd.as_deref().and_then(non_empty) {
            cfg.resume_cmd = Some(v);
        }
        if let Some(v) = fc.pause_secs {
            cfg.pause_secs = v;
        }
        Ok(cfg)
    }

    /// Override fields from `SS_*` env vars. Unparsable numbers are ignored.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("SS_CLUSTER_DIR") {
            if let Some(s) = non_empty(&v) {
                self.cluster_dir = Some(PathBuf::from(s));
            }
        }
        if let Ok(v) = std::env::var("SS_NAMESPACE") {
            if let Some(s) = non_empty(&v) {
                self.namespace = s;
            }
        }
        if let Ok(v) = std::env::var("SS_SNAPSHOT_CLASS") {
            if let Some(s) = non_empty(&v) {
                self.snapshot_class = Some(s);
            }
        }
        if let Ok(v) = std::env::var("SS_REPLICAS") {
            if let Ok(scope) = v.parse::<ReplicaScope>() {
                self.replicas = scope;
            }
        }
        if let Ok(v) = std::env::var("SS_POLL_INTERVAL_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                self.poll_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("SS_TIMEOUT_SECS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                self.timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SS_MAX_PARALLEL") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.max_parallel = n;
            }
        }
        if let Ok(v) = std::env::var("SS_OUTPUT_DIR") {
            if let Some(s) = non_empty(&v) {
                self.output_dir = Some(PathBuf::from(s));
            }
        }
        if let Ok(v) = std::env::var("SS_FREEZE_CMD") {
            if let Some(s) = non_empty(&v) {
                self.freeze_cmd = Some(s);
            }
        }
        if let Ok(v) = std::env::var("SS_RESUME_CMD") {
            if let Some(s) = non_empty(&v) {
                self.resume_cmd = Some(s);
            }
        }
        if let Ok(v) = std::env::var("SS_PAUSE_SECS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                self.pause_secs = n;
            }
        }
        self
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_cluster_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.cluster_dir = dir.map(Into::into);
        self
    }

    pub fn with_namespace<S: Into<String>>(mut self, ns: S) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_snapshot_class<S: Into<String>>(mut self, class: Option<S>) -> Self {
        self.snapshot_class = class.map(Into::into);
        self
    }

    pub fn with_replicas(mut self, scope: ReplicaScope) -> Self {
        self.replicas = scope;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n;
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.output_dir = dir.map(Into::into);
        self
    }

    pub fn with_fence_commands<S: Into<String>>(mut self, freeze: Option<S>, resume: Option<S>) -> Self {
        self.freeze_cmd = freeze.map(Into::into);
        self.resume_cmd = resume.map(Into::into);
        self
    }

    pub fn with_pause_secs(mut self, secs: u64) -> Self {
        self.pause_secs = secs;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> Self {
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }

    /// `<output_dir>/output.json`, if an output directory is configured.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|d| d.join(crate::report::DEFAULT_OUTPUT_FILE_NAME))
    }
}

impl fmt::Display for BackupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BackupConfig {{ \
             cluster_dir: {}, \
             namespace: {}, \
             snapshot_class: {}, \
             replicas: {}, \
             poll_interval_ms: {}, \
             timeout_secs: {}, \
             max_parallel: {}, \
             output_dir: {}, \
             freeze_cmd: {}, \
             resume_cmd: {}, \
             pause_secs: {} \
             }}",
            self.cluster_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(unset)".to_string()),
            self.namespace,
            self.snapshot_class.as_deref().unwrap_or("(unset)"),
            self.replicas,
            self.poll_interval_ms,
            self.timeout_secs,
            if self.max_parallel == 0 {
                "unbounded".to_string()
            } else {
                self.max_parallel.to_string()
            },
            self.output_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string()),
            self.freeze_cmd.as_deref().unwrap_or("(none)"),
            self.resume_cmd.as_deref().unwrap_or("(none)"),
            self.pause_secs,
        )
    }
}
