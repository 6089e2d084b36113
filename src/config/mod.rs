//! Pipeline configuration
//!
//! All tunables come from the environment (see `PipelineConfig::from_env`),
//! with defaults matching the deployed monitoring cadence. The loaded
//! config is an explicit collaborator: it is built once in `main` and
//! handed to each subsystem, never read from a global.
//!
//! Static geography (country bounding boxes, recipient registry, named
//! query regions) lives in [`regions`] and is immutable after first use.

pub mod defaults;
pub mod regions;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::BoundingBox;

/// Configuration errors are fatal at startup: refuse to run, exit non-zero
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
    #[error("basin bounding box is inverted or out of range")]
    BadBasin,
}

/// SMTP credentials for the email channel.
///
/// Absent credentials downgrade email delivery to `no_provider` rather
/// than failing the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

/// HTTP SMS gateway settings (optional channel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    pub api_url: String,
    pub api_key: String,
}

/// Base URLs for the source adapters. An unset URL disables that adapter
/// for the cycle; the run log records the gap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceEndpoints {
    pub cyclone_forecast_url: Option<String>,
    pub reanalysis_url: Option<String>,
    pub flood_api_url: Option<String>,
    pub terrain_api_url: Option<String>,
    pub outbreak_api_url: Option<String>,
}

/// Top-level pipeline configuration, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Scheduler cadence in hours
    pub check_interval_hours: u64,
    /// Cyclone detection basin
    pub basin: BoundingBox,
    /// Reject pressure minima at or above this (hPa)
    pub min_pressure_hpa: f64,
    /// Reject wind maxima below this (m/s)
    pub min_wind_ms: f64,
    /// Cyclone-outbreak pairing threshold (km)
    pub convergence_distance_km: f64,
    /// HTTP bind address for the API facade
    pub server_addr: String,
    /// sled database path
    pub db_path: PathBuf,
    /// Unified-query cache TTL (seconds)
    pub cache_ttl_seconds: u64,
    /// URL base for the 1x1 tracking pixel embedded in HTML alerts
    pub tracking_pixel_base: String,
    /// Sliding dedup window for (hazard, country) alerts (hours)
    pub alert_dedup_hours: i64,
    /// Per-adapter network call budget (seconds)
    pub adapter_timeout_secs: u64,
    /// Budget for bulk archive downloads (seconds)
    pub bulk_timeout_secs: u64,
    pub smtp_timeout_secs: u64,
    pub webhook_timeout_secs: u64,
    pub smtp: Option<SmtpConfig>,
    pub sms: Option<SmsConfig>,
    pub sources: SourceEndpoints,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            check_interval_hours: 6,
            basin: BoundingBox::new(
                defaults::BASIN_SOUTH,
                defaults::BASIN_NORTH,
                defaults::BASIN_WEST,
                defaults::BASIN_EAST,
            ),
            min_pressure_hpa: 1005.0,
            min_wind_ms: 17.0,
            convergence_distance_km: 500.0,
            server_addr: "0.0.0.0:8080".to_string(),
            db_path: PathBuf::from("./data/hazards.db"),
            cache_ttl_seconds: 300,
            tracking_pixel_base: "http://localhost:8080/track".to_string(),
            alert_dedup_hours: 6,
            adapter_timeout_secs: 30,
            bulk_timeout_secs: 300,
            smtp_timeout_secs: 15,
            webhook_timeout_secs: 10,
            smtp: None,
            sms: None,
            sources: SourceEndpoints::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the environment.
    ///
    /// Unset optional variables fall back to defaults; malformed values
    /// and an inverted basin are startup errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();

        let basin = BoundingBox::new(
            env_f64("BASIN_S", d.basin.min_lat)?,
            env_f64("BASIN_N", d.basin.max_lat)?,
            env_f64("BASIN_W", d.basin.min_lon)?,
            env_f64("BASIN_E", d.basin.max_lon)?,
        );
        if !basin.is_valid() {
            return Err(ConfigError::BadBasin);
        }

        let smtp = match (
            std::env::var("SMTP_HOST").ok(),
            std::env::var("SMTP_USER").ok(),
            std::env::var("SMTP_PASSWORD").ok(),
        ) {
            (Some(host), Some(user), Some(password)) => Some(SmtpConfig {
                port: env_u64("SMTP_PORT", 587)? as u16,
                from: std::env::var("SMTP_FROM").unwrap_or_else(|_| user.clone()),
                host,
                user,
                password,
            }),
            _ => None,
        };

        let sms = match (
            std::env::var("SMS_API_URL").ok(),
            std::env::var("SMS_API_KEY").ok(),
        ) {
            (Some(api_url), Some(api_key)) => Some(SmsConfig { api_url, api_key }),
            _ => None,
        };

        Ok(Self {
            check_interval_hours: env_u64("CHECK_INTERVAL_HOURS", d.check_interval_hours)?.max(1),
            basin,
            min_pressure_hpa: env_f64("MIN_PRESSURE_HPA", d.min_pressure_hpa)?,
            min_wind_ms: env_f64("MIN_WIND_MS", d.min_wind_ms)?,
            convergence_distance_km: env_f64("CONVERGENCE_DISTANCE_KM", d.convergence_distance_km)?,
            server_addr: std::env::var("SERVER_ADDR").unwrap_or(d.server_addr),
            db_path: std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.db_path),
            cache_ttl_seconds: env_u64("CACHE_TTL_SECONDS", d.cache_ttl_seconds)?,
            tracking_pixel_base: std::env::var("TRACKING_PIXEL_BASE")
                .unwrap_or(d.tracking_pixel_base),
            alert_dedup_hours: env_u64("ALERT_DEDUP_HOURS", d.alert_dedup_hours as u64)? as i64,
            adapter_timeout_secs: env_u64("ADAPTER_TIMEOUT_SECS", d.adapter_timeout_secs)?,
            bulk_timeout_secs: env_u64("BULK_TIMEOUT_SECS", d.bulk_timeout_secs)?,
            smtp_timeout_secs: env_u64("SMTP_TIMEOUT_SECS", d.smtp_timeout_secs)?,
            webhook_timeout_secs: env_u64("WEBHOOK_TIMEOUT_SECS", d.webhook_timeout_secs)?,
            smtp,
            sms,
            sources: SourceEndpoints {
                cyclone_forecast_url: std::env::var("CYCLONE_FORECAST_URL").ok(),
                reanalysis_url: std::env::var("REANALYSIS_URL").ok(),
                flood_api_url: std::env::var("FLOOD_API_URL").ok(),
                terrain_api_url: std::env::var("TERRAIN_API_URL").ok(),
                outbreak_api_url: std::env::var("OUTBREAK_API_URL").ok(),
            },
        })
    }
}

fn env_f64(var: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(var) {
        Ok(v) => v.trim().parse::<f64>().map_err(|e| ConfigError::Invalid {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_u64(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(v) => v.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployed_cadence() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.check_interval_hours, 6);
        assert_eq!(cfg.min_pressure_hpa, 1005.0);
        assert_eq!(cfg.min_wind_ms, 17.0);
        assert_eq!(cfg.convergence_distance_km, 500.0);
        assert_eq!(cfg.cache_ttl_seconds, 300);
        assert!(cfg.basin.is_valid());
        assert!(cfg.smtp.is_none());
    }

    #[test]
    fn test_default_basin_is_african_cyclone_basin() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.basin.min_lat, -35.0);
        assert_eq!(cfg.basin.max_lat, 0.0);
        assert_eq!(cfg.basin.min_lon, 20.0);
        assert_eq!(cfg.basin.max_lon, 80.0);
    }
}
