//! Periodic conference housekeeping.
//!
//! Each tick the monitor walks a snapshot of the registry. For every
//! conference it runs one bounded check on the blocking pool:
//!
//! - empty for longer than the grace period: the conference is removed
//!   (re-checked for emptiness under the registry lock, still on the
//!   blocking pool so registry contention never stalls the runtime);
//! - occupied: the recorder collaborator gets its periodic tick.
//!
//! A check that outlives `monitor_check_timeout` is abandoned and counted as
//! stalled. The conference keeps its housekeeping slot until that check
//! actually returns, so later sweeps skip it instead of piling up work.

use crate::conference::Conference;
use crate::manager::{ConferenceManager, RemovalReason};
use crate::observability::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub removed: usize,
    /// Previous check still running.
    pub skipped: usize,
    /// Check exceeded the timeout.
    pub stalled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    /// Empty past the grace period, but repopulated before removal.
    Idle,
    Removed,
    Active,
    /// Membership mutex not available; try again next tick.
    Busy,
}

pub struct ConferenceMonitor {
    manager: Arc<ConferenceManager>,
    interval: Duration,
    grace: Duration,
    check_timeout: Duration,
}

impl ConferenceMonitor {
    #[must_use]
    pub fn new(manager: Arc<ConferenceManager>) -> Self {
        let config = manager.config();
        let interval = config.monitor_interval;
        let grace = config.empty_conference_grace;
        let check_timeout = config.monitor_check_timeout;
        Self {
            manager,
            interval,
            grace,
            check_timeout,
        }
    }

    /// Spawn the monitor loop onto the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            target: "mcu.monitor",
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            grace_secs = self.grace.as_secs(),
            "Conference monitor started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(target: "mcu.monitor", "Conference monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let report = self.sweep().await;
                    metrics::record_monitor_sweep(started.elapsed());
                    if report.removed > 0 || report.stalled > 0 {
                        debug!(
                            target: "mcu.monitor",
                            checked = report.checked,
                            removed = report.removed,
                            skipped = report.skipped,
                            stalled = report.stalled,
                            "Sweep complete"
                        );
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// Sweep as if the current time were `now`.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for conference in self.manager.conference_list() {
            if !conference.begin_housekeeping() {
                trace!(
                    target: "mcu.monitor",
                    room = %conference.number(),
                    "Previous check still running, skipping"
                );
                report.skipped += 1;
                continue;
            }
            report.checked += 1;

            let grace = self.grace;
            let manager = Arc::clone(&self.manager);
            let checked = Arc::clone(&conference);
            let check = tokio::task::spawn_blocking(move || {
                let outcome = match check_conference(&checked, now, grace) {
                    CheckOutcome::Idle
                        if manager.remove_conference_if_empty(checked.number(), RemovalReason::Idle) =>
                    {
                        CheckOutcome::Removed
                    }
                    outcome => outcome,
                };
                checked.end_housekeeping();
                outcome
            });

            match tokio::time::timeout(self.check_timeout, check).await {
                Ok(Ok(CheckOutcome::Removed)) => report.removed += 1,
                Ok(Ok(CheckOutcome::Idle | CheckOutcome::Active | CheckOutcome::Busy)) => {}
                Ok(Err(e)) => {
                    // The task panicked; its slot was never released.
                    conference.end_housekeeping();
                    warn!(
                        target: "mcu.monitor",
                        room = %conference.number(),
                        error = %e,
                        "Conference check failed"
                    );
                }
                Err(_) => {
                    report.stalled += 1;
                    metrics::record_monitor_check_stalled();
                    warn!(
                        target: "mcu.monitor",
                        room = %conference.number(),
                        timeout_ms = u64::try_from(self.check_timeout.as_millis()).unwrap_or(u64::MAX),
                        "Conference check timed out"
                    );
                }
            }
        }

        report
    }
}

fn check_conference(conference: &Conference, now: Instant, grace: Duration) -> CheckOutcome {
    let Some((members, empty_since)) = conference.try_occupancy() else {
        return CheckOutcome::Busy;
    };
    if members == 0 {
        let idle = empty_since.is_some_and(|since| now.saturating_duration_since(since) >= grace);
        return if idle {
            CheckOutcome::Idle
        } else {
            CheckOutcome::Active
        };
    }
    conference.recorder_tick();
    CheckOutcome::Active
}

impl std::fmt::Debug for ConferenceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceMonitor")
            .field("interval", &self.interval)
            .field("grace", &self.grace)
            .field("check_timeout", &self.check_timeout)
            .finish_non_exhaustive()
    }
}
