//! Source adapters: normalize external providers into canonical observations
//!
//! Each adapter implements [`HazardSource`] and is responsible for:
//! - applying its own network timeout budget
//! - swallowing transient provider failures (empty result + note for the
//!   run log) instead of raising into the cycle
//! - producing canonical observation ids that are stable for a given
//!   fetch window, so re-fetching a window is idempotent
//!
//! Provider payloads cross this boundary as structured records only;
//! no raw JSON value escapes an adapter.

mod cyclone_forecast;
mod dem_rainfall;
mod outbreaks;
mod reanalysis;
mod sar_flood;

pub use cyclone_forecast::CycloneForecastSource;
pub use dem_rainfall::TerrainRainfallSource;
pub use outbreaks::OutbreakSurveillanceSource;
pub use reanalysis::ReanalysisSource;
pub use sar_flood::SarFloodSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{GeoPoint, OutbreakSeverity, TrackPoint};

/// Observation window an adapter is asked to cover
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Window ending now and reaching back `hours`
    pub fn last_hours(now: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: now - chrono::Duration::hours(hours),
            end: now,
        }
    }

    /// Stable id prefix for observations in this window
    pub fn id_stamp(&self) -> String {
        self.start.format("%Y%m%d%H").to_string()
    }
}

/// Adapter errors. Transient errors are handled inside the adapter;
/// anything surfacing here is annotated into the run log by the cycle,
/// which continues with the remaining sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed provider payload: {0}")]
    Payload(String),
}

/// Result of one adapter fetch: observations plus a note for the run log
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub observations: Vec<RawObservation>,
    /// Present when the adapter degraded (outage, partial data)
    pub note: Option<String>,
}

impl SourceBatch {
    pub fn of(observations: Vec<RawObservation>) -> Self {
        Self {
            observations,
            note: None,
        }
    }

    pub fn degraded(note: impl Into<String>) -> Self {
        Self {
            observations: Vec::new(),
            note: Some(note.into()),
        }
    }
}

/// Contract every source adapter conforms to
#[async_trait]
pub trait HazardSource: Send + Sync {
    /// Provider tag recorded on hazards and in the run log
    fn name(&self) -> &'static str;

    /// How far back this provider's window should reach. Met products
    /// refresh each cycle; surveillance reporting trails by weeks.
    fn lookback_hours(&self) -> i64 {
        6
    }

    /// Fetch observations for the window. Transient failures come back as
    /// an empty batch with a note; `Err` is reserved for conditions the
    /// cycle should log as a source outage.
    async fn fetch(&self, window: FetchWindow) -> Result<SourceBatch, SourceError>;
}

// ============================================================================
// Canonical observations
// ============================================================================

/// Tagged union of everything the adapters can produce
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawObservation {
    CycloneTrack(CycloneTrackObs),
    PressureWindField(GridField),
    FloodFeature(FloodFeatureObs),
    TerrainCell(TerrainCellObs),
    OutbreakReport(OutbreakObs),
}

/// Real-time track/probability product from the cyclone forecast provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycloneTrackObs {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub points: Vec<TrackPoint>,
    /// Ensemble track probability in [0, 1]
    pub track_probability: f64,
}

/// Gridded mean-sea-level pressure and 10 m wind field.
///
/// Values are row-major over (lat, lon); `msl_pa` is in pascals, winds in
/// m/s, matching the reanalysis provider's native units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridField {
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
    pub msl_pa: Vec<f64>,
    pub u10_ms: Vec<f64>,
    pub v10_ms: Vec<f64>,
    pub valid_time: DateTime<Utc>,
    pub source: String,
}

impl GridField {
    pub fn shape(&self) -> (usize, usize) {
        (self.lats.len(), self.lons.len())
    }

    fn idx(&self, i: usize, j: usize) -> usize {
        i * self.lons.len() + j
    }

    pub fn msl_at(&self, i: usize, j: usize) -> f64 {
        self.msl_pa[self.idx(i, j)]
    }

    pub fn wind_speed_at(&self, i: usize, j: usize) -> f64 {
        let u = self.u10_ms[self.idx(i, j)];
        let v = self.v10_ms[self.idx(i, j)];
        (u * u + v * v).sqrt()
    }

    /// Whether the three value planes agree with the coordinate axes
    pub fn is_consistent(&self) -> bool {
        let n = self.lats.len() * self.lons.len();
        n > 0 && self.msl_pa.len() == n && self.u10_ms.len() == n && self.v10_ms.len() == n
    }
}

/// Flood polygon feature from the SAR/optical provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodFeatureObs {
    pub id: String,
    /// Polygon ring as (lon, lat) pairs
    pub polygon: Vec<(f64, f64)>,
    /// Provider-reported area, if any; recomputed when absent
    #[serde(default)]
    pub area_km2: Option<f64>,
    #[serde(default)]
    pub water_fraction: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

/// Per-cell slope and 24 h rainfall from the DEM+rainfall provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TerrainCellObs {
    pub location: GeoPoint,
    pub slope_deg: f64,
    pub rainfall_mm_24h: f64,
}

/// Normalized outbreak record from surveillance reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutbreakObs {
    pub id: String,
    pub disease: String,
    pub country: String,
    pub location: GeoPoint,
    pub cases: u32,
    pub deaths: u32,
    /// Provider severity when reported; derived from counts otherwise
    #[serde(default)]
    pub severity: Option<OutbreakSeverity>,
    pub date: DateTime<Utc>,
}
