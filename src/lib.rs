//! AFROSTORM: continental hazard-intelligence engine
//!
//! Fuses tropical-cyclone forecasts, satellite flood extents, slope and
//! rainfall landslide risk, and disease-outbreak surveillance into one
//! queryable hazard feed with multilingual institutional alerting.
//!
//! ## Architecture
//!
//! - **Sources**: provider adapters normalized behind one async trait
//! - **Detectors**: cyclone, flood and landslide detection over raw
//!   observations
//! - **Convergence**: cyclone x outbreak pairing by geodesic distance
//! - **Store**: durable sled persistence for detections, alerts, runs
//!   and validations
//! - **Alerts**: country routing, dedup, multi-channel dispatch with
//!   open tracking
//! - **Monitor**: the 6-hourly cycle state machine and scheduler
//! - **Query**: the cached unified hazard feed
//! - **API**: the HTTP facade over query, alerts and validation

pub mod alerts;
pub mod api;
pub mod config;
pub mod convergence;
pub mod detectors;
pub mod geo;
pub mod monitor;
pub mod query;
pub mod sources;
pub mod store;
pub mod types;
pub mod validation;
