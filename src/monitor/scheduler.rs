//! Cadenced cycle driver with cooperative cancellation

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::cycle::{Cycle, CycleDeps};
use crate::config::defaults::SLEEP_CHUNK_SECS;
use crate::types::MonitorRun;

/// Drives the pipeline at the configured cadence.
///
/// Sleeps in chunks of at most 60 seconds so a cancellation signal is
/// observed within a minute. Cycles never overlap: the loop awaits each
/// cycle, and any ticks that elapsed while it ran are skipped and logged.
pub struct Scheduler {
    deps: CycleDeps,
    interval: Duration,
}

impl Scheduler {
    pub fn new(deps: CycleDeps) -> Self {
        let interval = Duration::from_secs(deps.config.check_interval_hours * 3600);
        Self { deps, interval }
    }

    /// Run exactly one cycle and return its record
    pub async fn run_once(&self, cancel: &CancellationToken) -> MonitorRun {
        Cycle::run(&self.deps, cancel).await
    }

    /// Loop until cancelled. An in-flight cycle finishes its persistence
    /// before the loop exits.
    pub async fn run_continuous(&self, cancel: CancellationToken) {
        info!(
            interval_hours = self.deps.config.check_interval_hours,
            "scheduler started"
        );

        loop {
            let cycle_started = std::time::Instant::now();
            let run = Cycle::run(&self.deps, &cancel).await;
            info!(status = %run.status, "scheduled cycle finished");

            if cancel.is_cancelled() {
                info!("scheduler stopping on cancellation");
                return;
            }

            // Ticks that fired while the cycle ran are skipped, not queued
            let elapsed = cycle_started.elapsed();
            let missed = elapsed.as_secs() / self.interval.as_secs().max(1);
            if missed > 0 {
                warn!(
                    skipped_ticks = missed,
                    cycle_seconds = elapsed.as_secs(),
                    "cycle outlasted its interval, skipping elapsed ticks"
                );
            }
            let until_next = self
                .interval
                .saturating_sub(Duration::from_secs(elapsed.as_secs() % self.interval.as_secs().max(1)));

            if !sleep_cancellable(until_next, &cancel).await {
                info!("scheduler stopping on cancellation during sleep");
                return;
            }
        }
    }
}

/// Sleep in <= 60 s chunks, returning false if cancelled first
async fn sleep_cancellable(total: Duration, cancel: &CancellationToken) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        let chunk = remaining.min(Duration::from_secs(SLEEP_CHUNK_SECS));
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(chunk) => {}
        }
        remaining = remaining.saturating_sub(chunk);
    }
    true
}
