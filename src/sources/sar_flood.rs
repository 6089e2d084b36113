//! SAR/optical flood provider adapter (polygon features with water fraction)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::{FetchWindow, FloodFeatureObs, HazardSource, RawObservation, SourceBatch, SourceError};

/// Fetches flood extent polygons derived from SAR backscatter analysis.
pub struct SarFloodSource {
    client: reqwest::Client,
    base_url: String,
}

impl SarFloodSource {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[derive(Debug, Deserialize)]
struct FloodPayload {
    #[serde(default)]
    features: Vec<FeatureRecord>,
}

#[derive(Debug, Deserialize)]
struct FeatureRecord {
    #[serde(default)]
    id: Option<String>,
    /// Exterior ring as [lon, lat] pairs
    polygon: Vec<(f64, f64)>,
    #[serde(default)]
    area_km2: Option<f64>,
    #[serde(default)]
    water_fraction: Option<f64>,
    observed_at: DateTime<Utc>,
}

/// Map features, dropping malformed rings one at a time (a single bad
/// record never sinks the batch).
fn map_payload(payload: FloodPayload, window: &FetchWindow) -> Vec<RawObservation> {
    payload
        .features
        .into_iter()
        .enumerate()
        .filter_map(|(idx, feat)| {
            if feat.polygon.len() < 3 {
                warn!(feature = idx, "dropping flood feature with degenerate ring");
                return None;
            }
            let id = feat
                .id
                .unwrap_or_else(|| format!("sar-{}-{:04}", window.id_stamp(), idx));
            Some(RawObservation::FloodFeature(FloodFeatureObs {
                id,
                polygon: feat.polygon,
                area_km2: feat.area_km2,
                water_fraction: feat.water_fraction.map(|w| w.clamp(0.0, 1.0)),
                observed_at: feat.observed_at,
            }))
        })
        .collect()
}

#[async_trait]
impl HazardSource for SarFloodSource {
    fn name(&self) -> &'static str {
        "sar-flood"
    }

    /// SAR revisit time over the basin is about two days
    fn lookback_hours(&self) -> i64 {
        48
    }

    async fn fetch(&self, window: FetchWindow) -> Result<SourceBatch, SourceError> {
        let url = format!("{}/floods", self.base_url);
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
                warn!(source = self.name(), error = %e, "flood provider unreachable");
                return Ok(SourceBatch::degraded(format!("sar-flood: {}", e)));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            return Ok(SourceBatch::degraded(format!("sar-flood: HTTP {}", status)));
        }

        match response.json::<FloodPayload>().await {
            Ok(payload) => Ok(SourceBatch::of(map_payload(payload, &window))),
            Err(e) => Ok(SourceBatch::degraded(format!(
                "sar-flood: bad payload: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_payload_drops_degenerate_rings() {
        let json = r#"{
            "features": [
                {
                    "polygon": [[39.2, -19.8], [39.4, -19.8], [39.4, -20.0], [39.2, -20.0], [39.2, -19.8]],
                    "water_fraction": 0.92,
                    "observed_at": "2024-01-15T03:00:00Z"
                },
                {
                    "polygon": [[39.2, -19.8], [39.4, -19.8]],
                    "observed_at": "2024-01-15T03:00:00Z"
                }
            ]
        }"#;
        let payload: FloodPayload = serde_json::from_str(json).unwrap();
        let now: DateTime<Utc> = "2024-01-15T06:00:00Z".parse().unwrap();
        let obs = map_payload(payload, &FetchWindow::last_hours(now, 48));
        assert_eq!(obs.len(), 1);
        match &obs[0] {
            RawObservation::FloodFeature(f) => {
                assert_eq!(f.water_fraction, Some(0.92));
                assert!(f.id.starts_with("sar-"));
            }
            other => panic!("unexpected observation: {:?}", other),
        }
    }
}
