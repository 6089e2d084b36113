//! Flood polygon aggregation and severity classification

use tracing::{debug, warn};

use super::Detector;
use crate::geo::{polygon_area_km2, polygon_centroid};
use crate::sources::{FetchWindow, FloodFeatureObs, RawObservation};
use crate::types::{Flood, FloodSeverity, Hazard};

/// SAR flood products carry per-scene classification confidence; the
/// provider's published figure for threshold-based water masks.
const SAR_CONFIDENCE: f64 = 0.75;

/// Aggregates provider flood polygons, rejecting those below the minimum
/// area, and classifies severity from extent and water fraction.
pub struct FloodDetector {
    min_area_km2: f64,
}

impl FloodDetector {
    pub fn new(min_area_km2: f64) -> Self {
        Self { min_area_km2 }
    }

    fn canonicalize(&self, obs: &FloodFeatureObs) -> Option<Flood> {
        let area_km2 = obs
            .area_km2
            .unwrap_or_else(|| polygon_area_km2(&obs.polygon));
        if area_km2 < self.min_area_km2 {
            debug!(id = %obs.id, area_km2, "flood polygon below minimum area");
            return None;
        }

        let location = match polygon_centroid(&obs.polygon) {
            Some(c) => c,
            None => {
                warn!(id = %obs.id, "flood polygon has no vertices");
                return None;
            }
        };

        // Store a closed ring regardless of what the provider sent
        let mut polygon = obs.polygon.clone();
        if polygon.first() != polygon.last() {
            if let Some(&first) = polygon.first() {
                polygon.push(first);
            }
        }

        Some(Flood {
            id: obs.id.clone(),
            polygon,
            location,
            area_km2,
            severity: severity_for(area_km2, obs.water_fraction),
            water_fraction: obs.water_fraction,
            detection_time: obs.observed_at,
            source: "sar-flood".to_string(),
            confidence: SAR_CONFIDENCE,
        })
    }
}

/// Severity is the worse of the area class and the water-fraction class.
fn severity_for(area_km2: f64, water_fraction: Option<f64>) -> FloodSeverity {
    let by_area = if area_km2 >= 500.0 {
        FloodSeverity::Catastrophic
    } else if area_km2 >= 100.0 {
        FloodSeverity::Major
    } else if area_km2 >= 10.0 {
        FloodSeverity::Moderate
    } else {
        FloodSeverity::Minor
    };

    let by_fraction = match water_fraction {
        Some(w) if w >= 0.9 => FloodSeverity::Catastrophic,
        Some(w) if w >= 0.7 => FloodSeverity::Major,
        Some(w) if w >= 0.5 => FloodSeverity::Moderate,
        _ => FloodSeverity::Minor,
    };

    by_area.max(by_fraction)
}

impl Detector for FloodDetector {
    fn name(&self) -> &'static str {
        "flood"
    }

    fn detect(&self, observations: &[RawObservation], _window: FetchWindow) -> Vec<Hazard> {
        observations
            .iter()
            .filter_map(|obs| match obs {
                RawObservation::FloodFeature(feat) => {
                    self.canonicalize(feat).map(Hazard::Flood)
                }
                _ => None,
            })
            .collect()
    }
}
