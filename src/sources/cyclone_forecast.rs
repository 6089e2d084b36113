//! Cyclone forecast provider adapter (real-time track/probability product)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::{CycloneTrackObs, FetchWindow, HazardSource, RawObservation, SourceBatch, SourceError};
use crate::types::TrackPoint;

/// Fetches active tropical systems with ensemble track probabilities.
///
/// The provider publishes a JSON product updated on each forecast cycle
/// (00/06/12/18 UTC).
pub struct CycloneForecastSource {
    client: reqwest::Client,
    base_url: String,
}

impl CycloneForecastSource {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[derive(Debug, Deserialize)]
struct ForecastPayload {
    #[serde(default)]
    systems: Vec<SystemRecord>,
}

#[derive(Debug, Deserialize)]
struct SystemRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    track_probability: f64,
    #[serde(default)]
    points: Vec<PointRecord>,
}

#[derive(Debug, Deserialize)]
struct PointRecord {
    time: DateTime<Utc>,
    lat: f64,
    lon: f64,
    #[serde(default)]
    wind_kt: f64,
    #[serde(default = "default_pressure")]
    pressure_hpa: f64,
}

fn default_pressure() -> f64 {
    1013.0
}

/// Map the provider payload to canonical observations.
///
/// Systems without a provider id get a deterministic id from the window
/// stamp and their position, so re-fetching a window reproduces them.
fn map_payload(payload: ForecastPayload, window: &FetchWindow) -> Vec<RawObservation> {
    payload
        .systems
        .into_iter()
        .enumerate()
        .filter_map(|(idx, sys)| {
            if sys.points.is_empty() {
                warn!(system = idx, "dropping forecast system without track points");
                return None;
            }
            let id = sys
                .id
                .unwrap_or_else(|| format!("ctf-{}-{:03}", window.id_stamp(), idx));
            let points = sys
                .points
                .into_iter()
                .map(|p| TrackPoint {
                    time: p.time,
                    lat: p.lat,
                    lon: p.lon,
                    wind_kt: p.wind_kt,
                    pressure_hpa: p.pressure_hpa,
                })
                .collect();
            Some(RawObservation::CycloneTrack(CycloneTrackObs {
                id,
                name: sys.name,
                points,
                track_probability: sys.track_probability.clamp(0.0, 1.0),
            }))
        })
        .collect()
}

#[async_trait]
impl HazardSource for CycloneForecastSource {
    fn name(&self) -> &'static str {
        "cyclone-forecast"
    }

    async fn fetch(&self, window: FetchWindow) -> Result<SourceBatch, SourceError> {
        let url = format!("{}/forecasts/active", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[
                ("start", window.start.to_rfc3339()),
                ("end", window.end.to_rfc3339()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(source = self.name(), error = %e, "forecast provider unreachable");
                return Ok(SourceBatch::degraded(format!("cyclone-forecast: {}", e)));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!(source = self.name(), %status, "forecast provider returned error status");
            return Ok(SourceBatch::degraded(format!(
                "cyclone-forecast: HTTP {}",
                status
            )));
        }

        match response.json::<ForecastPayload>().await {
            Ok(payload) => Ok(SourceBatch::of(map_payload(payload, &window))),
            Err(e) => Ok(SourceBatch::degraded(format!(
                "cyclone-forecast: bad payload: {}",
                e
            ))),
        }
    }
}
