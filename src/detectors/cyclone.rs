//! Cyclone detection from gridded pressure/wind fields and forecast tracks

use tracing::{debug, info, warn};

use super::Detector;
use crate::config::defaults::MS_TO_KT;
use crate::geo::BoundingBox;
use crate::sources::{CycloneTrackObs, FetchWindow, GridField, RawObservation};
use crate::types::{Cyclone, GeoPoint, Hazard, ThreatLevel};

/// Detects tropical cyclones two ways:
/// - pressure-minimum search over reanalysis grid fields
/// - pass-through of the forecast provider's track product
pub struct CycloneDetector {
    basin: BoundingBox,
    /// Reject pressure minima at or above this (hPa)
    min_pressure_hpa: f64,
    /// Reject wind maxima below this (m/s)
    min_wind_ms: f64,
}

impl CycloneDetector {
    pub fn new(basin: BoundingBox, min_pressure_hpa: f64, min_wind_ms: f64) -> Self {
        Self {
            basin,
            min_pressure_hpa,
            min_wind_ms,
        }
    }

    /// Pressure-minimum detection over one grid field.
    ///
    /// Returns None when the field shows no system meeting the pressure,
    /// wind, and basin criteria. The id derives from the field's valid
    /// time, so an unchanged upstream field re-detects as the same hazard.
    fn detect_from_field(&self, field: &GridField) -> Option<Cyclone> {
        if !field.is_consistent() {
            warn!(source = %field.source, "skipping inconsistent grid field");
            return None;
        }

        let (nlat, nlon) = field.shape();

        // Global pressure minimum and wind maximum over the field
        let mut min_pressure_hpa = f64::INFINITY;
        let mut min_cell = (0usize, 0usize);
        let mut max_wind_ms: f64 = 0.0;

        for i in 0..nlat {
            for j in 0..nlon {
                let p_hpa = field.msl_at(i, j) / 100.0;
                if p_hpa < min_pressure_hpa {
                    min_pressure_hpa = p_hpa;
                    min_cell = (i, j);
                }
                max_wind_ms = max_wind_ms.max(field.wind_speed_at(i, j));
            }
        }

        if min_pressure_hpa >= self.min_pressure_hpa {
            debug!(
                min_pressure_hpa,
                threshold = self.min_pressure_hpa,
                "no closed low below pressure threshold"
            );
            return None;
        }
        if max_wind_ms < self.min_wind_ms {
            debug!(
                max_wind_ms,
                threshold = self.min_wind_ms,
                "wind maximum below gale threshold"
            );
            return None;
        }

        let center = GeoPoint::new(field.lats[min_cell.0], field.lons[min_cell.1]);
        if !self.basin.contains(center) {
            debug!(%center, "pressure minimum outside configured basin");
            return None;
        }

        let max_wind_kt = max_wind_ms * MS_TO_KT;
        let confidence = Self::confidence(min_pressure_hpa, max_wind_ms);

        info!(
            %center,
            pressure_hpa = min_pressure_hpa,
            wind_kt = max_wind_kt,
            "cyclone detected in grid field"
        );

        Some(Cyclone {
            id: format!("cyclone-{}-000", field.valid_time.format("%Y%m%d%H")),
            name: None,
            location: center,
            detection_time: field.valid_time,
            source: field.source.clone(),
            confidence,
            threat_level: ThreatLevel::from_wind_kt(max_wind_kt),
            max_wind_kt: Some(max_wind_kt),
            min_pressure_hpa: Some(min_pressure_hpa),
            track_probability: None,
            track: Vec::new(),
        })
    }

    /// Score detection confidence from pressure depth and wind strength
    fn confidence(pressure_hpa: f64, wind_ms: f64) -> f64 {
        let pressure_term = ((1010.0 - pressure_hpa) / 30.0).clamp(0.0, 1.0);
        let wind_term = (wind_ms / 33.0).clamp(0.0, 1.0);
        pressure_term * 0.5 + wind_term * 0.5
    }

    /// Canonicalize one system from the forecast track product
    fn detect_from_track(&self, obs: &CycloneTrackObs) -> Option<Cyclone> {
        let mut track = obs.points.clone();
        track.sort_by_key(|p| p.time);
        // Strictly increasing times are an invariant of the canonical record
        track.dedup_by_key(|p| p.time);
        if track.is_empty() {
            return None;
        }

        let max_wind_kt = track.iter().map(|p| p.wind_kt).fold(0.0, f64::max);
        let min_pressure_hpa = track
            .iter()
            .map(|p| p.pressure_hpa)
            .fold(f64::INFINITY, f64::min);
        let (current_lat, current_lon, current_time) = {
            let current = track.last()?;
            (current.lat, current.lon, current.time)
        };

        // Longer tracks are better constrained by the ensemble
        let confidence = if track.len() >= 5 { 0.85 } else { 0.65 };

        Some(Cyclone {
            id: obs.id.clone(),
            name: obs.name.clone(),
            location: GeoPoint::new(current_lat, current_lon),
            detection_time: current_time,
            source: "cyclone-forecast".to_string(),
            confidence,
            threat_level: ThreatLevel::from_wind_kt(max_wind_kt),
            max_wind_kt: Some(max_wind_kt),
            min_pressure_hpa: Some(min_pressure_hpa),
            track_probability: Some(obs.track_probability),
            track,
        })
    }
}

impl Detector for CycloneDetector {
    fn name(&self) -> &'static str {
        "cyclone"
    }

    fn detect(&self, observations: &[RawObservation], _window: FetchWindow) -> Vec<Hazard> {
        let mut hazards = Vec::new();

        for obs in observations {
            match obs {
                RawObservation::PressureWindField(field) => {
                    if let Some(cyclone) = self.detect_from_field(field) {
                        hazards.push(Hazard::Cyclone(cyclone));
                    }
                }
                RawObservation::CycloneTrack(track) => {
                    if let Some(cyclone) = self.detect_from_track(track) {
                        hazards.push(Hazard::Cyclone(cyclone));
                    }
                }
                _ => {}
            }
        }

        hazards
    }
}
