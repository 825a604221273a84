//! Backup report: per-target outcomes + overall phase, and the output.json writer.
//!
//! Формат output.json (camelCase, совместим с потребителями hostBackupStats):
//!
//! ```json
//! {
//!   "hostBackupStats": [
//!     {"hostname": "data-shard0-0", "shard": "shard0", "phase": "Succeeded", "duration": "12.5s"},
//!     {"hostname": "data-shard1-0", "shard": "shard1", "phase": "Failed", "duration": "0.2s",
//!      "error": "create volumesnapshot ...: ... already exists"}
//!   ],
//!   "phase": "Failed",
//!   "totalDuration": "14.1s",
//!   "runToken": "1700000000",
//!   "namespace": "db",
//!   "resumeError": null
//! }
//! ```
//!
//! Файл пишется через tmp + rename, только если прогон дошёл до сборки отчёта.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::cluster::ObjectRef;
use crate::topology::VolumeTarget;
use crate::util::go_duration;

/// File name used inside `--output-dir`.
pub const DEFAULT_OUTPUT_FILE_NAME: &str = "output.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Succeeded,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Succeeded => f.write_str("Succeeded"),
            Phase::Failed => f.write_str("Failed"),
        }
    }
}

/// Terminal result for one target. `reason` is present iff `phase == Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub target: VolumeTarget,
    /// None when the request was never accepted by the store.
    pub snapshot: Option<ObjectRef>,
    pub phase: Phase,
    /// Run start -> terminal observation.
    pub duration: Duration,
    pub reason: Option<String>,
}

impl SnapshotOutcome {
    pub fn succeeded(target: VolumeTarget, snapshot: ObjectRef, duration: Duration) -> Self {
        Self {
            target,
            snapshot: Some(snapshot),
            phase: Phase::Succeeded,
            duration,
            reason: None,
        }
    }

    pub fn failed(
        target: VolumeTarget,
        snapshot: Option<ObjectRef>,
        duration: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            target,
            snapshot,
            phase: Phase::Failed,
            duration,
            reason: Some(reason.into()),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.phase == Phase::Succeeded
    }
}

/// Aggregate result of one run; immutable once returned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub run_token: String,
    pub namespace: String,
    /// One entry per attempted target, in target order.
    pub outcomes: Vec<SnapshotOutcome>,
    pub total_duration: Duration,
    pub resume_error: Option<String>,
}

impl BackupReport {
    /// Succeeded iff every outcome succeeded and resume did not fail.
    pub fn phase(&self) -> Phase {
        if self.resume_error.is_none() && self.outcomes.iter().all(SnapshotOutcome::is_succeeded) {
            Phase::Succeeded
        } else {
            Phase::Failed
        }
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_succeeded()).count()
    }

    pub fn to_output(&self) -> BackupOutput {
        BackupOutput {
            host_backup_stats: self
                .outcomes
                .iter()
                .map(|o| HostBackupStats {
                    hostname: o.target.volume_name.clone(),
                    shard: o.target.shard.clone(),
                    snapshot: o.snapshot.as_ref().map(|s| s.name.clone()),
                    phase: o.phase,
                    duration: go_duration(o.duration),
                    error: o.reason.clone(),
                })
                .collect(),
            phase: self.phase(),
            total_duration: go_duration(self.total_duration),
            run_token: self.run_token.clone(),
            namespace: self.namespace.clone(),
            resume_error: self.resume_error.clone(),
        }
    }

    /// Serialize to `path` (pretty JSON), creating parent directories.
    pub fn write_output(&self, path: &Path) -> Result<()> {
        write_output(path, &self.to_output())
    }
}

/// Serialized report (output.json).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutput {
    pub host_backup_stats: Vec<HostBackupStats>,
    pub phase: Phase,
    pub total_duration: String,
    pub run_token: String,
    pub namespace: String,
    #[serde(default)]
    pub resume_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostBackupStats {
    pub hostname: String,
    pub shard: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    pub phase: Phase,
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn write_output(path: &Path, out: &BackupOutput) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("create output dir {}", dir.display()))?;
        }
    }
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(out).context("serialize backup output")?;
    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("open tmp output {}", tmp.display()))?;
        f.write_all(json.as_bytes())?;
        f.write_all(b"\n")?;
        f.flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

pub fn read_output(path: &Path) -> Result<BackupOutput> {
    let buf = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let out: BackupOutput = serde_json::from_str(&buf)
        .with_context(|| format!("parse backup output {}", path.display()))?;
    Ok(out)
}

/// Human-readable summary (CLI text mode).
pub fn render_text(out: &BackupOutput) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "Backup run {} (namespace {})", out.run_token, out.namespace);
    let _ = writeln!(s, "  phase          = {}", out.phase);
    let _ = writeln!(s, "  total_duration = {}", out.total_duration);
    if let Some(e) = out.resume_error.as_deref() {
        let _ = writeln!(s, "  resume_error   = {e}");
    }
    let _ = writeln!(s, "Targets: {}", out.host_backup_stats.len());
    for h in &out.host_backup_stats {
        let _ = write!(
            s,
            "  - {:<32} shard={:<12} {:<9} {}",
            h.hostname, h.shard, h.phase.to_string(), h.duration
        );
        if let Some(e) = h.error.as_deref() {
            let _ = write!(s, "  ({e})");
        }
        s.push('\n');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(v: &str, shard: &str) -> VolumeTarget {
        VolumeTarget {
            volume_name: v.into(),
            shard: shard.into(),
            ordinal: 0,
            template: "data".into(),
        }
    }

    fn report(outcomes: Vec<SnapshotOutcome>, resume_error: Option<&str>) -> BackupReport {
        BackupReport {
            run_token: "1700000000".into(),
            namespace: "db".into(),
            outcomes,
            total_duration: Duration::from_millis(14_100),
            resume_error: resume_error.map(str::to_string),
        }
    }

    #[test]
    fn phase_requires_all_outcomes_and_resume() {
        let ok = SnapshotOutcome::succeeded(
            target("data-s0-0", "s0"),
            ObjectRef::new("db", "data-s0-0-1700000000"),
            Duration::from_secs(2),
        );
        let bad = SnapshotOutcome::failed(target("data-s1-0", "s1"), None, Duration::from_millis(200), "boom");

        assert_eq!(report(vec![ok.clone()], None).phase(), Phase::Succeeded);
        assert_eq!(report(vec![ok.clone(), bad.clone()], None).phase(), Phase::Failed);
        assert_eq!(report(vec![ok.clone()], Some("resume hook exited with 1")).phase(), Phase::Failed);
        assert_eq!(report(vec![ok, bad], None).failed_count(), 1);
    }

    #[test]
    fn output_json_layout() {
        let r = report(
            vec![
                SnapshotOutcome::succeeded(
                    target("data-s0-0", "s0"),
                    ObjectRef::new("db", "data-s0-0-1700000000"),
                    Duration::from_millis(12_500),
                ),
                SnapshotOutcome::failed(target("data-s1-0", "s1"), None, Duration::from_millis(200), "dup"),
            ],
            None,
        );
        let v = serde_json::to_value(r.to_output()).unwrap();
        assert_eq!(v["phase"], "Failed");
        assert_eq!(v["totalDuration"], "14.1s");
        assert_eq!(v["runToken"], "1700000000");
        assert_eq!(v["hostBackupStats"][0]["hostname"], "data-s0-0");
        assert_eq!(v["hostBackupStats"][0]["phase"], "Succeeded");
        assert_eq!(v["hostBackupStats"][0]["duration"], "12.5s");
        assert!(v["hostBackupStats"][0].get("error").is_none());
        assert_eq!(v["hostBackupStats"][1]["error"], "dup");
        assert!(v["hostBackupStats"][1].get("snapshot").is_none());
    }

    #[test]
    fn render_text_lists_failures() {
        let r = report(
            vec![SnapshotOutcome::failed(target("data-s1-0", "s1"), None, Duration::ZERO, "dup")],
            Some("resume failed: x"),
        );
        let text = render_text(&r.to_output());
        assert!(text.contains("phase          = Failed"));
        assert!(text.contains("resume_error   = resume failed: x"));
        assert!(text.contains("(dup)"));
    }
}
