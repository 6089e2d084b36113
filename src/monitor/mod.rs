//! Monitoring pipeline: scheduler and per-cycle state machine
//!
//! One cycle walks `fetching -> detecting -> persisting -> alerting ->
//! summarizing`. Cycles are strictly serial; the scheduler never overlaps
//! them, and a tick arriving while a cycle is still running is skipped
//! and logged. Cancellation is observed at state boundaries and inside
//! sleep chunks.

mod cycle;
mod scheduler;

pub use cycle::{Cycle, CycleDeps};
pub use scheduler::Scheduler;

use chrono::{DateTime, Utc};

use crate::types::{MonitorRun, Outbreak};

/// Mutable state shared between the cycle, the query engine, and the API.
///
/// The only cross-cycle in-memory state in the system (besides the query
/// cache): the current outbreak set, refreshed each cycle, which the
/// convergence recomputation reads on demand.
#[derive(Debug, Default)]
pub struct AppState {
    /// Outbreaks from the most recent successful surveillance fetch
    pub current_outbreaks: Vec<Outbreak>,
    /// Most recent run record
    pub last_run: Option<MonitorRun>,
    /// Set while a cycle is in flight; the scheduler skips ticks when set
    pub cycle_active: bool,
    /// When the active set last changed
    pub last_updated: Option<DateTime<Utc>>,
    /// Which source adapters are currently configured
    pub sources_available: Vec<String>,
}
