//! Error taxonomy of a backup run.
//!
//! Разделение по "радиусу поражения":
//! - TopologyError / BackupError::Freeze: прерывают весь прогон (до мутаций кластера);
//! - SubmissionError / WaitError: локальны для одной цели, превращаются в Failed outcome;
//! - FenceError на resume: всегда всплывает, но не стирает уже собранные outcomes.

use std::time::Duration;

use thiserror::Error;

use crate::util::go_duration;

/// Errors returned by the control-plane collaborators (workload reader / snapshot store).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("malformed object {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

impl From<std::io::Error> for ClusterError {
    fn from(e: std::io::Error) -> Self {
        ClusterError::Io(e.to_string())
    }
}

/// Shard topology could not be turned into volume targets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("no shards given")]
    NoShards,

    #[error("blank shard name at position {0}")]
    BlankShard(usize),

    #[error("read workload spec of shard '{shard}': {cause}")]
    Unreadable { shard: String, cause: ClusterError },

    #[error("shard '{shard}' has no storage templates")]
    NoStorageTemplates { shard: String },

    #[error("shard '{shard}' declares no replicas")]
    NoReplicas { shard: String },

    #[error("shard '{shard}': {requested} replica(s) requested, workload declares {declared}")]
    ReplicaBoundExceeded {
        shard: String,
        requested: u32,
        declared: u32,
    },
}

/// Which side of the write fence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStage {
    Freeze,
    Resume,
}

impl std::fmt::Display for FenceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FenceStage::Freeze => f.write_str("freeze"),
            FenceStage::Resume => f.write_str("resume"),
        }
    }
}

/// Freeze/resume hook failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FenceError {
    #[error("{stage} hook `{program}` could not be started: {reason}")]
    Spawn {
        stage: FenceStage,
        program: String,
        reason: String,
    },

    #[error("{stage} hook `{program}` exited with {status}")]
    Exit {
        stage: FenceStage,
        program: String,
        status: String,
    },

    #[error("{stage} failed: {message}")]
    Other { stage: FenceStage, message: String },
}

impl FenceError {
    pub fn stage(&self) -> FenceStage {
        match self {
            FenceError::Spawn { stage, .. }
            | FenceError::Exit { stage, .. }
            | FenceError::Other { stage, .. } => *stage,
        }
    }
}

/// A snapshot request could not be submitted for one target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("snapshot name '{name}' is {len} characters long (limit {limit})")]
    NameTooLong {
        name: String,
        len: usize,
        limit: usize,
    },

    #[error("create volumesnapshot {namespace}/{name}: {cause}")]
    Rejected {
        namespace: String,
        name: String,
        cause: ClusterError,
    },
}

/// A submitted snapshot did not become ready.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("volumesnapshot {name} not ready within {}{}", timeout_text(.timeout), last_error_suffix(.last_error))]
    TimedOut {
        name: String,
        timeout: Duration,
        last_error: Option<String>,
    },

    #[error("volumesnapshot {name} failed: {message}")]
    DriverReported { name: String, message: String },

    #[error("volumesnapshot {name} disappeared while waiting")]
    Disappeared { name: String },
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::TimedOut { .. })
    }
}

fn timeout_text(timeout: &Duration) -> String {
    go_duration(*timeout)
}

fn last_error_suffix(last: &Option<String>) -> String {
    match last {
        Some(e) => format!(" (last read error: {e})"),
        None => String::new(),
    }
}

/// Errors that abort a run before any snapshot object is created.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("invalid backup request: {0}")]
    InvalidRequest(String),

    #[error("topology resolution failed")]
    Topology(#[from] TopologyError),

    #[error("freeze failed")]
    Freeze(#[source] FenceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_mentions_last_read_error() {
        let e = WaitError::TimedOut {
            name: "data-shard0-0-1700000000".into(),
            timeout: Duration::from_secs(90),
            last_error: Some("I/O error: connection reset".into()),
        };
        assert_eq!(
            e.to_string(),
            "volumesnapshot data-shard0-0-1700000000 not ready within 1m30s (last read error: I/O error: connection reset)"
        );
        assert!(e.is_timeout());
    }

    #[test]
    fn fence_error_keeps_stage() {
        let e = FenceError::Exit {
            stage: FenceStage::Resume,
            program: "sh -c unfreeze".into(),
            status: "exit status: 3".into(),
        };
        assert_eq!(e.stage(), FenceStage::Resume);
        assert_eq!(e.to_string(), "resume hook `sh -c unfreeze` exited with exit status: 3");
    }

    #[test]
    fn submission_error_wraps_cluster_cause() {
        let e = SubmissionError::Rejected {
            namespace: "db".into(),
            name: "data-shard1-0-42".into(),
            cause: ClusterError::AlreadyExists {
                kind: "volumesnapshot",
                namespace: "db".into(),
                name: "data-shard1-0-42".into(),
            },
        };
        assert_eq!(
            e.to_string(),
            "create volumesnapshot db/data-shard1-0-42: volumesnapshot db/data-shard1-0-42 already exists"
        );
    }
}
