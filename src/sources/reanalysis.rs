//! Reanalysis grid provider adapter (retrospective MSL pressure + 10 m wind)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::{FetchWindow, GridField, HazardSource, RawObservation, SourceBatch, SourceError};
use crate::geo::BoundingBox;

/// Downloads a gridded field of mean-sea-level pressure and 10 m wind
/// vectors over the configured basin.
///
/// Field downloads are bulk transfers, so this adapter uses the bulk
/// timeout budget rather than the per-call default.
pub struct ReanalysisSource {
    client: reqwest::Client,
    base_url: String,
    basin: BoundingBox,
}

impl ReanalysisSource {
    pub fn new(
        base_url: String,
        basin: BoundingBox,
        bulk_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(bulk_timeout).build()?;
        Ok(Self {
            client,
            base_url,
            basin,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FieldPayload {
    valid_time: DateTime<Utc>,
    lats: Vec<f64>,
    lons: Vec<f64>,
    msl_pa: Vec<f64>,
    u10_ms: Vec<f64>,
    v10_ms: Vec<f64>,
}

fn map_payload(payload: FieldPayload, source: &str) -> Result<GridField, SourceError> {
    let field = GridField {
        lats: payload.lats,
        lons: payload.lons,
        msl_pa: payload.msl_pa,
        u10_ms: payload.u10_ms,
        v10_ms: payload.v10_ms,
        valid_time: payload.valid_time,
        source: source.to_string(),
    };
    if !field.is_consistent() {
        return Err(SourceError::Payload(format!(
            "field planes do not match axes: {} x {} axes, {} msl values",
            field.lats.len(),
            field.lons.len(),
            field.msl_pa.len()
        )));
    }
    Ok(field)
}

#[async_trait]
impl HazardSource for ReanalysisSource {
    fn name(&self) -> &'static str {
        "reanalysis"
    }

    async fn fetch(&self, _window: FetchWindow) -> Result<SourceBatch, SourceError> {
        let url = format!("{}/fields/latest", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[
                ("n", self.basin.max_lat),
                ("s", self.basin.min_lat),
                ("w", self.basin.min_lon),
                ("e", self.basin.max_lon),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(source = self.name(), error = %e, "reanalysis provider unreachable");
                return Ok(SourceBatch::degraded(format!("reanalysis: {}", e)));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            return Ok(SourceBatch::degraded(format!("reanalysis: HTTP {}", status)));
        }

        let payload = match response.json::<FieldPayload>().await {
            Ok(p) => p,
            Err(e) => {
                return Ok(SourceBatch::degraded(format!(
                    "reanalysis: bad payload: {}",
                    e
                )))
            }
        };

        match map_payload(payload, self.name()) {
            Ok(field) => Ok(SourceBatch::of(vec![RawObservation::PressureWindField(
                field,
            )])),
            Err(e) => Ok(SourceBatch::degraded(format!("reanalysis: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_payload_rejects_mismatched_planes() {
        let json = r#"{
            "valid_time": "2024-01-15T00:00:00Z",
            "lats": [-20.0, -19.0],
            "lons": [34.0, 35.0],
            "msl_pa": [101000.0, 101000.0, 101000.0],
            "u10_ms": [5.0, 5.0, 5.0, 5.0],
            "v10_ms": [5.0, 5.0, 5.0, 5.0]
        }"#;
        let payload: FieldPayload = serde_json::from_str(json).unwrap();
        assert!(map_payload(payload, "reanalysis").is_err());
    }

    #[test]
    fn test_map_payload_accepts_consistent_field() {
        let json = r#"{
            "valid_time": "2024-01-15T00:00:00Z",
            "lats": [-20.0, -19.0],
            "lons": [34.0, 35.0],
            "msl_pa": [101000.0, 100800.0, 100500.0, 95500.0],
            "u10_ms": [5.0, 8.0, 12.0, 30.0],
            "v10_ms": [5.0, 6.0, 10.0, 33.0]
        }"#;
        let payload: FieldPayload = serde_json::from_str(json).unwrap();
        let field = map_payload(payload, "reanalysis").unwrap();
        assert_eq!(field.shape(), (2, 2));
        assert_eq!(field.msl_at(1, 1), 95500.0);
    }
}
