//! Readiness waiter: polls one submitted snapshot until a terminal state.
//!
//! Pending -> Ready | Error | TimedOut.
//!
//! The deadline is `run_start + timeout` (a shared run budget), not measured from the
//! start of this wait. The first poll happens immediately; after that the waiter sleeps
//! `min(poll_interval, time left)` between polls, so it never busy-polls and never
//! sleeps past the deadline.
//!
//! Ошибки чтения статуса:
//! - NotFound -> терминально (объект удалён извне);
//! - прочие -> логируем и продолжаем в пределах того же дедлайна; при таймауте
//!   последняя ошибка попадает в причину.

use log::{debug, warn};
use std::thread;
use std::time::{Duration, Instant};

use crate::cluster::{SnapshotPhase, SnapshotStore};
use crate::error::WaitError;
use crate::metrics::{
    record_poll, record_snapshot_driver_error, record_snapshot_ready, record_snapshot_timed_out,
};
use crate::report::SnapshotOutcome;
use crate::request::SnapshotHandle;

/// Polling cadence and run-level timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl WaitPolicy {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// `run_start + timeout`; None when the sum is past what `Instant` can represent,
    /// which means the budget never runs out.
    pub fn deadline(&self, run_start: Instant) -> Option<Instant> {
        run_start.checked_add(self.timeout)
    }
}

/// Block until `handle` is ready, failed, or the run deadline passes.
pub fn await_ready(
    store: &dyn SnapshotStore,
    handle: &SnapshotHandle,
    policy: WaitPolicy,
    run_start: Instant,
) -> Result<(), WaitError> {
    let deadline = policy.deadline(run_start);
    let name = handle.id.name.clone();
    let mut last_error: Option<String> = None;
    let mut polls: u64 = 0;

    loop {
        polls += 1;
        match store.get(&handle.id) {
            Ok(status) => {
                record_poll(true);
                last_error = None;
                match status.phase() {
                    SnapshotPhase::Ready => {
                        record_snapshot_ready();
                        debug!("waiter: {} ready after {} poll(s)", handle.id, polls);
                        return Ok(());
                    }
                    SnapshotPhase::Error(message) => {
                        record_snapshot_driver_error();
                        return Err(WaitError::DriverReported { name, message });
                    }
                    SnapshotPhase::Pending => {}
                }
            }
            Err(e) if e.is_not_found() => {
                record_poll(false);
                record_snapshot_driver_error();
                return Err(WaitError::Disappeared { name });
            }
            Err(e) => {
                record_poll(false);
                warn!("waiter: read {} failed (poll {}): {}", handle.id, polls, e);
                last_error = Some(e.to_string());
            }
        }

        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    record_snapshot_timed_out();
                    return Err(WaitError::TimedOut {
                        name,
                        timeout: policy.timeout,
                        last_error,
                    });
                }
                policy.poll_interval.min(deadline - now)
            }
            None => policy.poll_interval,
        };
        thread::sleep(pause);
    }
}

/// [`await_ready`] folded into the per-target outcome.
pub fn await_outcome(
    store: &dyn SnapshotStore,
    handle: &SnapshotHandle,
    policy: WaitPolicy,
    run_start: Instant,
) -> SnapshotOutcome {
    let res = await_ready(store, handle, policy, run_start);
    let elapsed = run_start.elapsed();
    match res {
        Ok(()) => SnapshotOutcome::succeeded(handle.target.clone(), handle.id.clone(), elapsed),
        Err(e) => {
            warn!("waiter: {}: {}", handle.target.volume_name, e);
            SnapshotOutcome::failed(
                handle.target.clone(),
                Some(handle.id.clone()),
                elapsed,
                e.to_string(),
            )
        }
    }
}
