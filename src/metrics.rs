//! Lightweight global metrics for backup runs.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Runs (started/succeeded/failed/aborted)
//! - Write fence (freeze/resume calls and failures)
//! - Submission (snapshot objects created / rejected)
//! - Readiness (polls, ready, driver errors, timeouts)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Runs -----
static RUNS_STARTED: AtomicU64 = AtomicU64::new(0);
static RUNS_SUCCEEDED: AtomicU64 = AtomicU64::new(0);
static RUNS_FAILED: AtomicU64 = AtomicU64::new(0);
static RUNS_ABORTED: AtomicU64 = AtomicU64::new(0);

// ----- Write fence -----
static FREEZE_CALLS: AtomicU64 = AtomicU64::new(0);
static FREEZE_FAILURES: AtomicU64 = AtomicU64::new(0);
static RESUME_CALLS: AtomicU64 = AtomicU64::new(0);
static RESUME_FAILURES: AtomicU64 = AtomicU64::new(0);

// ----- Submission -----
static SNAPSHOTS_SUBMITTED: AtomicU64 = AtomicU64::new(0);
static SUBMISSION_FAILURES: AtomicU64 = AtomicU64::new(0);

// ----- Readiness -----
static READINESS_POLLS: AtomicU64 = AtomicU64::new(0);
static READINESS_POLL_ERRORS: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_READY: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_DRIVER_ERRORS: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_TIMED_OUT: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Runs
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub runs_aborted: u64,

    // Write fence
    pub freeze_calls: u64,
    pub freeze_failures: u64,
    pub resume_calls: u64,
    pub resume_failures: u64,

    // Submission
    pub snapshots_submitted: u64,
    pub submission_failures: u64,

    // Readiness
    pub readiness_polls: u64,
    pub readiness_poll_errors: u64,
    pub snapshots_ready: u64,
    pub snapshots_driver_errors: u64,
    pub snapshots_timed_out: u64,
}

impl MetricsSnapshot {
    /// Average number of polls per snapshot that reached a terminal state.
    pub fn avg_polls_per_snapshot(&self) -> f64 {
        let terminal = self.snapshots_ready + self.snapshots_driver_errors + self.snapshots_timed_out;
        if terminal == 0 {
            0.0
        } else {
            self.readiness_polls as f64 / terminal as f64
        }
    }

    pub fn submission_failure_ratio(&self) -> f64 {
        let total = self.snapshots_submitted + self.submission_failures;
        if total == 0 {
            0.0
        } else {
            self.submission_failures as f64 / total as f64
        }
    }
}

// ----- Recorders (Runs) -----
pub fn record_run_started() {
    RUNS_STARTED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_run_finished(succeeded: bool) {
    if succeeded {
        RUNS_SUCCEEDED.fetch_add(1, Ordering::Relaxed);
    } else {
        RUNS_FAILED.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_run_aborted() {
    RUNS_ABORTED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Write fence) -----
pub fn record_freeze(ok: bool) {
    FREEZE_CALLS.fetch_add(1, Ordering::Relaxed);
    if !ok {
        FREEZE_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_resume(ok: bool) {
    RESUME_CALLS.fetch_add(1, Ordering::Relaxed);
    if !ok {
        RESUME_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
}

// ----- Recorders (Submission) -----
pub fn record_submission(ok: bool) {
    if ok {
        SNAPSHOTS_SUBMITTED.fetch_add(1, Ordering::Relaxed);
    } else {
        SUBMISSION_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
}

// ----- Recorders (Readiness) -----
pub fn record_poll(read_ok: bool) {
    READINESS_POLLS.fetch_add(1, Ordering::Relaxed);
    if !read_ok {
        READINESS_POLL_ERRORS.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_snapshot_ready() {
    SNAPSHOTS_READY.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_driver_error() {
    SNAPSHOTS_DRIVER_ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_timed_out() {
    SNAPSHOTS_TIMED_OUT.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        runs_started: RUNS_STARTED.load(Ordering::Relaxed),
        runs_succeeded: RUNS_SUCCEEDED.load(Ordering::Relaxed),
        runs_failed: RUNS_FAILED.load(Ordering::Relaxed),
        runs_aborted: RUNS_ABORTED.load(Ordering::Relaxed),

        freeze_calls: FREEZE_CALLS.load(Ordering::Relaxed),
        freeze_failures: FREEZE_FAILURES.load(Ordering::Relaxed),
        resume_calls: RESUME_CALLS.load(Ordering::Relaxed),
        resume_failures: RESUME_FAILURES.load(Ordering::Relaxed),

        snapshots_submitted: SNAPSHOTS_SUBMITTED.load(Ordering::Relaxed),
        submission_failures: SUBMISSION_FAILURES.load(Ordering::Relaxed),

        readiness_polls: READINESS_POLLS.load(Ordering::Relaxed),
        readiness_poll_errors: READINESS_POLL_ERRORS.load(Ordering::Relaxed),
        snapshots_ready: SNAPSHOTS_READY.load(Ordering::Relaxed),
        snapshots_driver_errors: SNAPSHOTS_DRIVER_ERRORS.load(Ordering::Relaxed),
        snapshots_timed_out: SNAPSHOTS_TIMED_OUT.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // counters are process-wide and other tests run concurrently: compare deltas
    #[test]
    fn recorders_bump_their_counters() {
        let before = snapshot();
        record_submission(true);
        record_submission(false);
        record_poll(true);
        record_poll(false);
        record_resume(false);
        let after = snapshot();

        assert!(after.snapshots_submitted >= before.snapshots_submitted + 1);
        assert!(after.submission_failures >= before.submission_failures + 1);
        assert!(after.readiness_polls >= before.readiness_polls + 2);
        assert!(after.readiness_poll_errors >= before.readiness_poll_errors + 1);
        assert!(after.resume_failures >= before.resume_failures + 1);
    }

    #[test]
    fn ratios_are_zero_without_data() {
        let m = MetricsSnapshot::default();
        assert_eq!(m.avg_polls_per_snapshot(), 0.0);
        assert_eq!(m.submission_failure_ratio(), 0.0);
    }
}
