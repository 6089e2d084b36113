//! Canonical data model for the hazard-intelligence pipeline
//!
//! Types flowing between pipeline stages:
//! - Ingestion: source adapters produce raw observations (see `sources`)
//! - Detection: detectors emit `Hazard` variants (Cyclone, Flood, LandslideRisk)
//! - Convergence: cyclone x outbreak pairs become `Convergence` records
//! - Alerting: `Alert` with per-recipient delivery outcomes
//! - Bookkeeping: `MonitorRun` per cycle, `ValidationEvent` on reconciliation

mod hazard;
mod alert;
mod run;

pub use hazard::*;
pub use alert::*;
pub use run::*;
