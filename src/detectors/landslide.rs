//! Landslide risk scoring from slope and 24 h rainfall

use super::Detector;
use crate::config::defaults::{LANDSLIDE_CLUSTER_DEG, LANDSLIDE_TOP_N};
use crate::sources::{FetchWindow, RawObservation, TerrainCellObs};
use crate::types::{Hazard, LandslideRisk, RiskLevel};

/// Scores terrain cells with the slope x rainfall geometric-mean model
/// and emits only HIGH and EXTREME zones, clustered and capped.
pub struct LandslideDetector {
    cluster_deg: f64,
    top_n: usize,
}

impl Default for LandslideDetector {
    fn default() -> Self {
        Self {
            cluster_deg: LANDSLIDE_CLUSTER_DEG,
            top_n: LANDSLIDE_TOP_N,
        }
    }
}

impl LandslideDetector {
    pub fn new(cluster_deg: f64, top_n: usize) -> Self {
        Self { cluster_deg, top_n }
    }
}

/// Slope contribution by terrain steepness band
fn slope_factor(slope_deg: f64) -> f64 {
    if slope_deg >= 35.0 {
        1.0
    } else if slope_deg >= 25.0 {
        0.8
    } else if slope_deg >= 15.0 {
        0.5
    } else if slope_deg >= 10.0 {
        0.2
    } else {
        0.0
    }
}

/// Rainfall contribution by 24 h accumulation band
fn rain_factor(rainfall_mm: f64) -> f64 {
    if rainfall_mm >= 400.0 {
        1.0
    } else if rainfall_mm >= 200.0 {
        0.8
    } else if rainfall_mm >= 100.0 {
        0.5
    } else if rainfall_mm >= 50.0 {
        0.2
    } else {
        0.0
    }
}

/// Geometric mean amplifies jointly high slope and rainfall
pub fn risk_score(slope_deg: f64, rainfall_mm: f64) -> f64 {
    (slope_factor(slope_deg) * rain_factor(rainfall_mm)).sqrt()
}

fn describe(cell: &TerrainCellObs) -> (String, String) {
    let rain_desc = if cell.rainfall_mm_24h >= 400.0 {
        "extreme rainfall"
    } else if cell.rainfall_mm_24h >= 200.0 {
        "very heavy rainfall"
    } else if cell.rainfall_mm_24h >= 100.0 {
        "heavy rainfall"
    } else {
        "rainfall"
    };
    let slope_desc = if cell.slope_deg >= 35.0 {
        "very steep slope"
    } else if cell.slope_deg >= 25.0 {
        "steep slope"
    } else {
        "moderate slope"
    };
    let reason = format!(
        "{} ({:.0} mm/24h) on {} ({:.0} deg)",
        rain_desc, cell.rainfall_mm_24h, slope_desc, cell.slope_deg
    );
    let action = if risk_score(cell.slope_deg, cell.rainfall_mm_24h) >= 0.8 {
        "Evacuate slope-adjacent settlements; close hillside roads".to_string()
    } else {
        "Alert communities below the slope; monitor for ground movement".to_string()
    };
    (reason, action)
}

impl Detector for LandslideDetector {
    fn name(&self) -> &'static str {
        "landslide"
    }

    fn detect(&self, observations: &[RawObservation], window: FetchWindow) -> Vec<Hazard> {
        // Score every cell, keeping the input index for stable ids
        let mut scored: Vec<(usize, &TerrainCellObs, f64)> = observations
            .iter()
            .enumerate()
            .filter_map(|(idx, obs)| match obs {
                RawObservation::TerrainCell(cell) => {
                    let score = risk_score(cell.slope_deg, cell.rainfall_mm_24h);
                    if RiskLevel::from_score(score) >= RiskLevel::High {
                        Some((idx, cell, score))
                    } else {
                        None
                    }
                }
                _ => None,
            })
            .collect();

        // Highest scores first; ties broken by smaller input index, which
        // is the lexicographically smaller id
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        // Collapse nearby cells to their highest-score representative
        let mut representatives: Vec<(usize, &TerrainCellObs, f64)> = Vec::new();
        for (idx, cell, score) in scored {
            let nearby = representatives.iter().any(|(_, kept, _)| {
                (kept.location.lat - cell.location.lat).abs() <= self.cluster_deg
                    && (kept.location.lon - cell.location.lon).abs() <= self.cluster_deg
            });
            if !nearby {
                representatives.push((idx, cell, score));
            }
            if representatives.len() >= self.top_n {
                break;
            }
        }

        let stamp = window.id_stamp();
        representatives
            .into_iter()
            .map(|(idx, cell, score)| {
                let (reason, recommended_action) = describe(cell);
                Hazard::Landslide(LandslideRisk {
                    id: format!("landslide-{}-{:04}", stamp, idx),
                    location: cell.location,
                    risk_level: RiskLevel::from_score(score),
                    risk_score: score,
                    slope_deg: cell.slope_deg,
                    rainfall_mm: cell.rainfall_mm_24h,
                    reason,
                    recommended_action,
                    detection_time: window.end,
                    source: "dem-rainfall".to_string(),
                    confidence: score,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;
    use chrono::{DateTime, Utc};

    fn window() -> FetchWindow {
        let now: DateTime<Utc> = "2024-01-15T06:00:00Z".parse().unwrap();
        FetchWindow::last_hours(now, 24)
    }

    fn cell(lat: f64, lon: f64, slope: f64, rain: f64) -> RawObservation {
        RawObservation::TerrainCell(TerrainCellObs {
            location: GeoPoint::new(lat, lon),
            slope_deg: slope,
            rainfall_mm_24h: rain,
        })
    }

    #[test]
    fn test_factor_tables() {
        assert_eq!(slope_factor(9.9), 0.0);
        assert_eq!(slope_factor(10.0), 0.2);
        assert_eq!(slope_factor(15.0), 0.5);
        assert_eq!(slope_factor(25.0), 0.8);
        assert_eq!(slope_factor(35.0), 1.0);

        assert_eq!(rain_factor(49.9), 0.0);
        assert_eq!(rain_factor(50.0), 0.2);
        assert_eq!(rain_factor(100.0), 0.5);
        assert_eq!(rain_factor(200.0), 0.8);
        assert_eq!(rain_factor(400.0), 1.0);
    }

    #[test]
    fn test_boundary_cell_scores_high() {
        // Exactly 15 deg / 100 mm: sqrt(0.5 * 0.5) = 0.5 -> HIGH
        let score = risk_score(15.0, 100.0);
        assert!((score - 0.5).abs() < 1e-9);
        assert_eq!(RiskLevel::from_score(score), RiskLevel::High);
    }

    #[test]
    fn test_only_high_and_extreme_emitted() {
        let detector = LandslideDetector::default();
        let obs = vec![
            cell(-19.5, 34.2, 36.0, 420.0), // extreme
            cell(-17.0, 35.5, 15.0, 100.0), // high
            cell(-16.0, 36.5, 12.0, 60.0),  // sqrt(0.2*0.2)=0.2 -> low, dropped
            cell(-15.0, 37.5, 5.0, 500.0),  // flat terrain, dropped
        ];
        let hazards = detector.detect(&obs, window());
        assert_eq!(hazards.len(), 2);
        match &hazards[0] {
            Hazard::Landslide(l) => {
                assert_eq!(l.risk_level, RiskLevel::Extreme);
                assert_eq!(l.risk_score, 1.0);
            }
            other => panic!("unexpected hazard: {:?}", other),
        }
    }

    #[test]
    fn test_clustering_keeps_highest_score() {
        let detector = LandslideDetector::default();
        let obs = vec![
            cell(-19.50, 34.20, 30.0, 250.0), // sqrt(0.8*0.8)=0.8
            cell(-19.60, 34.30, 36.0, 420.0), // 1.0, same cluster
            cell(-17.00, 35.50, 15.0, 100.0), // separate cluster
        ];
        let hazards = detector.detect(&obs, window());
        assert_eq!(hazards.len(), 2);
        match &hazards[0] {
            Hazard::Landslide(l) => {
                // The 1.0-score cell represents the cluster
                assert_eq!(l.slope_deg, 36.0);
                assert_eq!(l.location.lat, -19.6);
            }
            other => panic!("unexpected hazard: {:?}", other),
        }
    }

    #[test]
    fn test_top_n_cap_and_stable_ids() {
        let detector = LandslideDetector::new(0.01, 3);
        let obs: Vec<RawObservation> = (0..10)
            .map(|i| cell(-19.0 - i as f64, 34.0, 36.0, 420.0))
            .collect();
        let hazards = detector.detect(&obs, window());
        assert_eq!(hazards.len(), 3);
        // Equal scores tie-break by input index; window stamp is the start hour
        assert_eq!(hazards[0].id(), "landslide-2024011406-0000");
        assert_eq!(hazards[1].id(), "landslide-2024011406-0001");
    }
}
