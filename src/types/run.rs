//! Cycle bookkeeping: monitor runs, validation events, aggregate stats

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of a monitoring cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

/// Record of one full pipeline cycle.
///
/// Every cycle invocation produces exactly one of these, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRun {
    pub run_time: DateTime<Utc>,
    /// Source adapters consulted this cycle
    pub data_sources: Vec<String>,
    pub detections_count: u32,
    pub alerts_sent: u32,
    pub duration_seconds: f64,
    pub status: RunStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Ground-truth event reconciled against a previously sent alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationEvent {
    pub alert_id: String,
    /// e.g. "landfall", "flood_peak", "outbreak_surge"
    pub event_type: String,
    pub event_date: DateTime<Utc>,
    #[serde(default)]
    pub actual_impact: Option<String>,
    /// Hours between the alert's sent_at and the event
    #[serde(default)]
    pub lead_time_hours: Option<f64>,
}

/// Aggregate alert/validation counters published by the ledger
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationStats {
    pub total_alerts: u64,
    pub opened_alerts: u64,
    pub validated_alerts: u64,
    /// Mean lead time over validated alerts, hours
    pub mean_lead_time_hours: Option<f64>,
}

impl ValidationStats {
    pub fn open_rate(&self) -> f64 {
        if self.total_alerts == 0 {
            0.0
        } else {
            self.opened_alerts as f64 / self.total_alerts as f64
        }
    }

    pub fn validated_rate(&self) -> f64 {
        if self.total_alerts == 0 {
            0.0
        } else {
            self.validated_alerts as f64 / self.total_alerts as f64
        }
    }
}
