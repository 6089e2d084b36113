//! DEM + rainfall provider adapter (per-cell slope and 24 h accumulation)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::{FetchWindow, HazardSource, RawObservation, SourceBatch, SourceError, TerrainCellObs};
use crate::geo::BoundingBox;
use crate::types::GeoPoint;

/// Fetches slope (SRTM-derived) and 24 h rainfall accumulation over the
/// configured bounding box. Grids can be large, so the bulk timeout
/// applies.
pub struct TerrainRainfallSource {
    client: reqwest::Client,
    base_url: String,
    bbox: BoundingBox,
}

impl TerrainRainfallSource {
    pub fn new(
        base_url: String,
        bbox: BoundingBox,
        bulk_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(bulk_timeout).build()?;
        Ok(Self {
            client,
            base_url,
            bbox,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TerrainPayload {
    #[serde(default)]
    cells: Vec<CellRecord>,
}

#[derive(Debug, Deserialize)]
struct CellRecord {
    lat: f64,
    lon: f64,
    slope_deg: f64,
    rainfall_mm_24h: f64,
}

/// Map cells, dropping physically impossible values record by record.
fn map_payload(payload: TerrainPayload) -> Vec<RawObservation> {
    payload
        .cells
        .into_iter()
        .filter_map(|cell| {
            if cell.slope_deg < 0.0 || cell.rainfall_mm_24h < 0.0 {
                warn!(
                    lat = cell.lat,
                    lon = cell.lon,
                    "dropping terrain cell with negative slope or rainfall"
                );
                return None;
            }
            Some(RawObservation::TerrainCell(TerrainCellObs {
                location: GeoPoint::new(cell.lat, cell.lon),
                slope_deg: cell.slope_deg,
                rainfall_mm_24h: cell.rainfall_mm_24h,
            }))
        })
        .collect()
}

#[async_trait]
impl HazardSource for TerrainRainfallSource {
    fn name(&self) -> &'static str {
        "dem-rainfall"
    }

    async fn fetch(&self, _window: FetchWindow) -> Result<SourceBatch, SourceError> {
        let url = format!("{}/terrain", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[
                ("n", self.bbox.max_lat),
                ("s", self.bbox.min_lat),
                ("w", self.bbox.min_lon),
                ("e", self.bbox.max_lon),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(source = self.name(), error = %e, "terrain provider unreachable");
                return Ok(SourceBatch::degraded(format!("dem-rainfall: {}", e)));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            return Ok(SourceBatch::degraded(format!(
                "dem-rainfall: HTTP {}",
                status
            )));
        }

        match response.json::<TerrainPayload>().await {
            Ok(payload) => Ok(SourceBatch::of(map_payload(payload))),
            Err(e) => Ok(SourceBatch::degraded(format!(
                "dem-rainfall: bad payload: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_payload_filters_negative_values() {
        let json = r#"{
            "cells": [
                {"lat": -19.5, "lon": 34.2, "slope_deg": 35.0, "rainfall_mm_24h": 180.0},
                {"lat": -19.6, "lon": 34.3, "slope_deg": -1.0, "rainfall_mm_24h": 120.0},
                {"lat": -19.7, "lon": 34.4, "slope_deg": 28.0, "rainfall_mm_24h": -5.0}
            ]
        }"#;
        let payload: TerrainPayload = serde_json::from_str(json).unwrap();
        let obs = map_payload(payload);
        assert_eq!(obs.len(), 1);
        match &obs[0] {
            RawObservation::TerrainCell(c) => {
                assert_eq!(c.slope_deg, 35.0);
                assert_eq!(c.rainfall_mm_24h, 180.0);
            }
            other => panic!("unexpected observation: {:?}", other),
        }
    }
}
