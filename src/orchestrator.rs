//! Backup orchestrator: resolve -> freeze -> submit -> wait -> resume -> report.
//!
//! Порядок и композиция ошибок:
//! 1. Топология резолвится до freeze (никаких мутаций кластера); ошибка = abort без freeze.
//! 2. Ошибка freeze = abort; resume не вызывается, объекты не создаются.
//! 3. После успешного freeze resume вызывается ровно один раз на любом пути выхода
//!    (включая панику воркера или самого оркестратора: см. ResumeGuard).
//! 4. Сабмиты идут параллельно, строго после freeze; отказ одной цели -> Failed outcome.
//! 5. Ожидания идут параллельно, у всех общий дедлайн от старта прогона.
//! 6. Resume только после того, как все ожидания завершились.
//! 7. Отчёт: Succeeded только если все цели Succeeded и resume успешен.
//!
//! Targets and handles are immutable sequences keyed by position: the i-th outcome in
//! the report always belongs to the i-th resolved target.

use log::{error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Instant, SystemTime};

use crate::cluster::{SnapshotStore, WorkloadSpecReader};
use crate::config::BackupConfig;
use crate::error::{BackupError, FenceError};
use crate::fence::WriteFence;
use crate::metrics::{
    record_freeze, record_resume, record_run_aborted, record_run_finished, record_run_started,
};
use crate::report::{BackupReport, Phase, SnapshotOutcome};
use crate::request::{request, SnapshotHandle};
use crate::topology::{resolve, ReplicaScope, VolumeTarget};
use crate::util::{go_duration, run_token};
use crate::waiter::{await_outcome, WaitPolicy};

/// Parameters of one backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    pub shards: Vec<String>,
    pub namespace: String,
    pub snapshot_class: String,
    pub replicas: ReplicaScope,
    pub wait: WaitPolicy,
    /// Concurrent workers per phase; 0 = one per target.
    pub max_parallel: usize,
    /// Where to write output.json once the report is assembled.
    pub output_path: Option<PathBuf>,
}

impl BackupRequest {
    /// Request with default replica scope, wait policy and parallelism.
    pub fn new(
        shards: Vec<String>,
        namespace: impl Into<String>,
        snapshot_class: impl Into<String>,
    ) -> Self {
        let d = BackupConfig::default();
        Self {
            shards,
            namespace: namespace.into(),
            snapshot_class: snapshot_class.into(),
            replicas: d.replicas,
            wait: WaitPolicy::new(d.poll_interval(), d.timeout()),
            max_parallel: d.max_parallel,
            output_path: None,
        }
    }

    pub fn from_config(cfg: &BackupConfig, shards: Vec<String>) -> Result<Self, BackupError> {
        let class = cfg
            .snapshot_class
            .clone()
            .ok_or_else(|| BackupError::InvalidRequest("snapshot class is not set".to_string()))?;
        Ok(Self {
            shards,
            namespace: cfg.namespace.clone(),
            snapshot_class: class,
            replicas: cfg.replicas,
            wait: WaitPolicy::new(cfg.poll_interval(), cfg.timeout()),
            max_parallel: cfg.max_parallel,
            output_path: cfg.output_path(),
        })
    }

    pub fn with_replicas(mut self, scope: ReplicaScope) -> Self {
        self.replicas = scope;
        self
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n;
        self
    }

    pub fn with_output_path<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.output_path = path.map(Into::into);
        self
    }

    fn validate(&self) -> Result<(), BackupError> {
        if self.namespace.trim().is_empty() {
            return Err(BackupError::InvalidRequest("namespace is empty".to_string()));
        }
        if self.snapshot_class.trim().is_empty() {
            return Err(BackupError::InvalidRequest("snapshot class is empty".to_string()));
        }
        if self.wait.poll_interval.is_zero() {
            return Err(BackupError::InvalidRequest(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a run that got past freeze.
#[derive(Debug)]
pub struct BackupRun {
    pub report: BackupReport,
    /// Resume failure, reported next to (never instead of) the collected outcomes.
    pub resume_error: Option<FenceError>,
    pub output_path: Option<PathBuf>,
    pub output_error: Option<anyhow::Error>,
}

impl BackupRun {
    pub fn is_success(&self) -> bool {
        self.report.phase() == Phase::Succeeded
            && self.resume_error.is_none()
            && self.output_error.is_none()
    }
}

pub struct Orchestrator<'a> {
    workloads: &'a dyn WorkloadSpecReader,
    snapshots: &'a dyn SnapshotStore,
    fence: &'a dyn WriteFence,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        workloads: &'a dyn WorkloadSpecReader,
        snapshots: &'a dyn SnapshotStore,
        fence: &'a dyn WriteFence,
    ) -> Self {
        Self {
            workloads,
            snapshots,
            fence,
        }
    }

    /// Execute one backup run.
    ///
    /// Returns Err only when nothing was frozen: invalid request, topology failure
    /// or freeze failure. Everything after a successful freeze ends up in [`BackupRun`].
    pub fn run(&self, req: &BackupRequest) -> Result<BackupRun, BackupError> {
        req.validate()?;

        // start clock: all durations and wait deadlines are measured from here
        let started_at = SystemTime::now();
        let run_start = Instant::now();
        let token = run_token(started_at);
        record_run_started();

        info!(
            "backup: start token={} namespace={} shards={} class={} replicas={}",
            token,
            req.namespace,
            req.shards.join(","),
            req.snapshot_class,
            req.replicas
        );

        let targets = match resolve(self.workloads, &req.namespace, &req.shards, req.replicas) {
            Ok(t) => t,
            Err(e) => {
                record_run_aborted();
                error!("backup: topology: {}", e);
                return Err(e.into());
            }
        };
        info!("backup: {} target volume(s) resolved", targets.len());

        if let Err(e) = self.fence.freeze() {
            record_freeze(false);
            record_run_aborted();
            error!("backup: {}", e);
            return Err(BackupError::Freeze(e));
        }
        record_freeze(true);

        let guard = ResumeGuard::arm(self.fence);
        let outcomes = self.snapshot_all(&targets, &token, req, run_start);
        let resume_error = guard.resume().err();

        let report = BackupReport {
            run_token: token,
            namespace: req.namespace.clone(),
            outcomes,
            total_duration: run_start.elapsed(),
            resume_error: resume_error.as_ref().map(|e| e.to_string()),
        };

        let output_error = match &req.output_path {
            Some(path) => match report.write_output(path) {
                Ok(()) => {
                    info!("backup: output written to {}", path.display());
                    None
                }
                Err(e) => {
                    error!("backup: write output {}: {:#}", path.display(), e);
                    Some(e)
                }
            },
            None => None,
        };

        let run = BackupRun {
            report,
            resume_error,
            output_path: req.output_path.clone(),
            output_error,
        };
        record_run_finished(run.is_success());
        info!(
            "backup: done phase={} targets={} failed={} total={}",
            run.report.phase(),
            run.report.outcomes.len(),
            run.report.failed_count(),
            go_duration(run.report.total_duration)
        );
        Ok(run)
    }

    // Submit all, then wait for all submitted. One outcome per target, in target order.
    fn snapshot_all(
        &self,
        targets: &[VolumeTarget],
        token: &str,
        req: &BackupRequest,
        run_start: Instant,
    ) -> Vec<SnapshotOutcome> {
        let store = self.snapshots;

        let submitted: Vec<Result<SnapshotHandle, SnapshotOutcome>> =
            fan_out(targets, req.max_parallel, |t| {
                request(store, t, token, &req.namespace, &req.snapshot_class).map_err(|e| {
                    SnapshotOutcome::failed(t.clone(), None, run_start.elapsed(), e.to_string())
                })
            })
            .into_iter()
            .zip(targets)
            .map(|(res, t)| match res {
                Ok(r) => r,
                Err(payload) => Err(SnapshotOutcome::failed(
                    t.clone(),
                    None,
                    run_start.elapsed(),
                    format!("submission worker panicked: {}", panic_message(payload.as_ref())),
                )),
            })
            .collect();

        let accepted = submitted.iter().filter(|r| r.is_ok()).count();
        if accepted < targets.len() {
            warn!(
                "backup: {} of {} snapshot request(s) rejected",
                targets.len() - accepted,
                targets.len()
            );
        }

        let handles: Vec<&SnapshotHandle> = submitted.iter().filter_map(|r| r.as_ref().ok()).collect();
        let waited = fan_out(&handles, req.max_parallel, |h| {
            await_outcome(store, h, req.wait, run_start)
        });

        let mut waited = waited.into_iter();
        submitted
            .into_iter()
            .map(|r| match r {
                Err(outcome) => outcome,
                Ok(h) => match waited.next() {
                    Some(Ok(outcome)) => outcome,
                    Some(Err(payload)) => SnapshotOutcome::failed(
                        h.target,
                        Some(h.id),
                        run_start.elapsed(),
                        format!("wait worker panicked: {}", panic_message(payload.as_ref())),
                    ),
                    None => SnapshotOutcome::failed(
                        h.target,
                        Some(h.id),
                        run_start.elapsed(),
                        "no wait result collected",
                    ),
                },
            })
            .collect()
    }
}

/// Resumes the workload exactly once: explicitly via [`ResumeGuard::resume`],
/// or on drop if the run unwinds before that.
struct ResumeGuard<'f> {
    fence: &'f dyn WriteFence,
    armed: bool,
}

impl<'f> ResumeGuard<'f> {
    fn arm(fence: &'f dyn WriteFence) -> Self {
        Self { fence, armed: true }
    }

    fn resume(mut self) -> Result<(), FenceError> {
        self.armed = false;
        resume_once(self.fence)
    }
}

impl Drop for ResumeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            error!("backup: run unwinding with the workload frozen, resuming");
            let _ = resume_once(self.fence);
        }
    }
}

fn resume_once(fence: &dyn WriteFence) -> Result<(), FenceError> {
    let res = fence.resume();
    record_resume(res.is_ok());
    if let Err(e) = &res {
        error!("backup: {}", e);
    }
    res
}

/// Run `f` over `items` on at most `max_parallel` scoped worker threads (0 = one per item).
/// Results come back through a channel tagged with the item position; a panicking item
/// yields `Err(payload)` in its own slot and does not affect the others.
fn fan_out<T, R, F>(items: &[T], max_parallel: usize, f: F) -> Vec<thread::Result<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = match max_parallel {
        0 => items.len(),
        n => n.min(items.len()),
    };

    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, thread::Result<R>)>();
    thread::scope(|s| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let f = &f;
            s.spawn(move || loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(idx) else { break };
                let res = panic::catch_unwind(AssertUnwindSafe(|| f(item)));
                if tx.send((idx, res)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<thread::Result<R>>> = (0..items.len()).map(|_| None).collect();
    for (idx, res) in rx {
        slots[idx] = Some(res);
    }
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                let payload: Box<dyn Any + Send> = Box::new("worker exited without a result");
                Err(payload)
            })
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fan_out_keeps_positions_and_isolates_panics() {
        let items: Vec<u32> = (0..10).collect();
        let res = fan_out(&items, 3, |&i| {
            if i == 4 {
                panic!("item four");
            }
            thread::sleep(Duration::from_millis(u64::from(10 - i)));
            i * 10
        });
        assert_eq!(res.len(), 10);
        for (i, r) in res.iter().enumerate() {
            match r {
                Ok(v) => assert_eq!(*v, i as u32 * 10),
                Err(p) => {
                    assert_eq!(i, 4);
                    assert_eq!(panic_message(p.as_ref()), "item four");
                }
            }
        }
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let literal = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(literal.as_ref()), "boom");
        let formatted = std::panic::catch_unwind(|| panic!("volume {} lost", 3)).unwrap_err();
        assert_eq!(panic_message(&*formatted), "volume 3 lost");
        let opaque = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(opaque.as_ref()), "unknown panic payload");
    }

    #[test]
    fn fan_out_respects_max_parallel() {
        let live = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<u32> = (0..12).collect();
        let _ = fan_out(&items, 2, |_| {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            live.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn fan_out_empty() {
        let items: Vec<u8> = Vec::new();
        assert!(fan_out(&items, 0, |x| *x).is_empty());
    }

    #[test]
    fn request_validation() {
        let ok = BackupRequest::new(vec!["s0".into()], "db", "cls");
        assert!(ok.validate().is_ok());
        assert!(BackupRequest::new(vec![], " ", "cls").validate().is_err());
        assert!(BackupRequest::new(vec![], "db", "").validate().is_err());
        let zero_poll = ok.with_wait_policy(WaitPolicy::new(Duration::ZERO, Duration::from_secs(1)));
        assert!(matches!(zero_poll.validate(), Err(BackupError::InvalidRequest(_))));
    }

    #[test]
    fn from_config_requires_snapshot_class() {
        let cfg = BackupConfig::default();
        assert!(BackupRequest::from_config(&cfg, vec!["s0".into()]).is_err());

        let cfg = cfg
            .with_snapshot_class(Some("csi"))
            .with_output_dir(Some("/tmp/out"))
            .with_max_parallel(4);
        let req = BackupRequest::from_config(&cfg, vec!["s0".into()]).unwrap();
        assert_eq!(req.snapshot_class, "csi");
        assert_eq!(req.max_parallel, 4);
        assert_eq!(req.output_path, Some(PathBuf::from("/tmp/out/output.json")));
    }
}
