//! Validation ledger: reconciling alerts with ground-truth outcomes
//!
//! Every dispatched alert is born as a pending validation stub (its
//! `sent_alerts` row with `validated = false`). Reconciliation - manual
//! or from a ground-truth adapter - attaches a `ValidationEvent` and
//! computes the achieved lead time. Aggregate statistics (open rate,
//! validated rate, mean lead time) back the public record that warnings
//! went out ahead of impact.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::store::{HazardStore, StoreError};
use crate::types::{ValidationEvent, ValidationStats};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("unknown alert: {0}")]
    UnknownAlert(String),
}

/// Attach a ground-truth event to an alert and compute the lead time.
///
/// `lead_time_hours` is the span from the alert's `sent_at` to the event;
/// a negative value means the event preceded the alert and is kept as-is
/// for honest reporting.
pub fn record_event(
    store: &HazardStore,
    alert_id: &str,
    event_type: &str,
    event_date: DateTime<Utc>,
    actual_impact: Option<String>,
) -> Result<ValidationEvent, ValidationError> {
    let alert = store
        .get_alert(alert_id)?
        .ok_or_else(|| ValidationError::UnknownAlert(alert_id.to_string()))?;

    let lead_time_hours = (event_date - alert.sent_at).num_milliseconds() as f64 / 3_600_000.0;

    let event = ValidationEvent {
        alert_id: alert_id.to_string(),
        event_type: event_type.to_string(),
        event_date,
        actual_impact,
        lead_time_hours: Some(lead_time_hours),
    };
    store.record_validation(alert_id, &event)?;

    info!(
        alert_id,
        event_type,
        lead_time_hours = format!("{:.1}", lead_time_hours),
        "alert reconciled with ground truth"
    );

    Ok(event)
}

/// Aggregate ledger statistics
pub fn stats(store: &HazardStore) -> Result<ValidationStats, ValidationError> {
    Ok(store.stats()?)
}
