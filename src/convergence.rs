//! Convergence engine: joins active cyclones with outbreaks by distance
//!
//! A convergence is a cyclone-outbreak pair closer than the configured
//! geodesic threshold. Risk blends proximity, outbreak severity, track
//! probability, and outbreak size. Convergences are content-addressed by
//! the participating ids, so recomputation never duplicates a pair.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::geo::haversine_km;
use crate::types::{AlertPriority, Convergence, Cyclone, Outbreak};

/// Distance below which a convergence escalates from MEDIUM to HIGH (km)
const HIGH_PRIORITY_DISTANCE_KM: f64 = 200.0;

/// Pairwise convergence detection over the current active sets.
pub fn detect_convergences(
    cyclones: &[Cyclone],
    outbreaks: &[Outbreak],
    distance_threshold_km: f64,
    now: DateTime<Utc>,
) -> Vec<Convergence> {
    let mut found = Vec::new();

    for cyclone in cyclones {
        for outbreak in outbreaks {
            let distance_km = haversine_km(cyclone.location, outbreak.location);
            if distance_km >= distance_threshold_km {
                continue;
            }

            let risk_score = convergence_risk(cyclone, outbreak, distance_km);
            let alert_priority = if distance_km < HIGH_PRIORITY_DISTANCE_KM {
                AlertPriority::High
            } else {
                AlertPriority::Medium
            };

            warn!(
                disease = %outbreak.disease,
                country = %outbreak.country,
                threat = %cyclone.threat_level,
                distance_km = format!("{:.0}", distance_km),
                "climate-health convergence detected"
            );

            found.push(Convergence {
                id: Convergence::content_id(&cyclone.id, &outbreak.id),
                cyclone: cyclone.clone(),
                outbreak: outbreak.clone(),
                distance_km,
                risk_score,
                alert_priority,
                detection_time: now,
                location: outbreak.location,
            });
        }
    }

    found
}

/// Composite risk score in [0, 1]:
/// 30% proximity, 30% outbreak severity, 20% track probability,
/// 20% outbreak size (saturating at 200 cases).
fn convergence_risk(cyclone: &Cyclone, outbreak: &Outbreak, distance_km: f64) -> f64 {
    let distance_factor = (1.0 - distance_km / 500.0).max(0.0);
    let severity_factor = outbreak.severity.score();
    let probability = cyclone.track_probability.unwrap_or(0.0);
    let cases_factor = (outbreak.cases as f64 / 200.0).min(1.0);

    0.3 * distance_factor + 0.3 * severity_factor + 0.2 * probability + 0.2 * cases_factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoPoint, OutbreakSeverity, ThreatLevel};

    fn cyclone_at(lat: f64, lon: f64, probability: f64) -> Cyclone {
        Cyclone {
            id: "cyclone-2024011500-000".to_string(),
            name: None,
            location: GeoPoint::new(lat, lon),
            detection_time: Utc::now(),
            source: "test".to_string(),
            confidence: 0.8,
            threat_level: ThreatLevel::TropicalStorm,
            max_wind_kt: Some(45.0),
            min_pressure_hpa: Some(995.0),
            track_probability: Some(probability),
            track: Vec::new(),
        }
    }

    fn outbreak_at(lat: f64, lon: f64, cases: u32, severity: OutbreakSeverity) -> Outbreak {
        Outbreak {
            id: "who-2024011500-000".to_string(),
            disease: "Cholera".to_string(),
            country: "Madagascar".to_string(),
            location: GeoPoint::new(lat, lon),
            cases,
            deaths: 22,
            severity,
            date: Utc::now(),
            source: "outbreak-surveillance".to_string(),
        }
    }

    #[test]
    fn test_madagascar_cholera_scenario() {
        let cyclones = vec![cyclone_at(-19.5, 47.25, 1.0)];
        let outbreaks = vec![outbreak_at(-18.9, 47.5, 156, OutbreakSeverity::High)];

        let found = detect_convergences(&cyclones, &outbreaks, 500.0, Utc::now());
        assert_eq!(found.len(), 1);
        let conv = &found[0];

        assert!((conv.distance_km - 71.4).abs() < 0.5, "got {:.2}", conv.distance_km);
        // 0.3*(1 - 71.4/500) + 0.3*0.8 + 0.2*1.0 + 0.2*(156/200) ~= 0.853
        assert!((conv.risk_score - 0.853).abs() < 0.005, "got {:.4}", conv.risk_score);
        assert_eq!(conv.alert_priority, AlertPriority::High);
    }

    #[test]
    fn test_priority_boundary_at_200_km() {
        // ~1 degree of longitude at the equator is ~111.2 km, so build the
        // boundary cases from an exact-distance helper instead: place the
        // outbreak due east and scan for the target distances.
        let cyclone = cyclone_at(-20.0, 40.0, 0.5);

        let at_distance = |target_km: f64| {
            // Longitude degrees spanning target_km at this latitude
            let km_per_deg = haversine_km(
                GeoPoint::new(-20.0, 40.0),
                GeoPoint::new(-20.0, 41.0),
            );
            outbreak_at(-20.0, 40.0 + target_km / km_per_deg, 50, OutbreakSeverity::Medium)
        };

        // Margins absorb the small curvature error of the linear placement
        let medium = detect_convergences(
            &[cyclone.clone()],
            &[at_distance(205.0)],
            500.0,
            Utc::now(),
        );
        assert!(medium[0].distance_km >= 200.0);
        assert_eq!(medium[0].alert_priority, AlertPriority::Medium);

        let high = detect_convergences(&[cyclone], &[at_distance(195.0)], 500.0, Utc::now());
        assert!(high[0].distance_km < 200.0);
        assert_eq!(high[0].alert_priority, AlertPriority::High);
    }

    #[test]
    fn test_distant_pair_not_a_convergence() {
        let cyclones = vec![cyclone_at(-19.5, 47.25, 1.0)];
        // Ondo State, Nigeria: thousands of km from the cyclone
        let outbreaks = vec![outbreak_at(7.25, 5.195, 45, OutbreakSeverity::High)];
        assert!(detect_convergences(&cyclones, &outbreaks, 500.0, Utc::now()).is_empty());
    }

    #[test]
    fn test_content_addressed_ids() {
        let cyclones = vec![cyclone_at(-19.5, 47.25, 1.0)];
        let outbreaks = vec![outbreak_at(-18.9, 47.5, 156, OutbreakSeverity::High)];

        let first = detect_convergences(&cyclones, &outbreaks, 500.0, Utc::now());
        let second = detect_convergences(&cyclones, &outbreaks, 500.0, Utc::now());
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].id, "conv-cyclone-2024011500-000-who-2024011500-000");
    }

    #[test]
    fn test_missing_track_probability_scores_zero_term() {
        let mut cyclone = cyclone_at(-19.5, 47.25, 0.0);
        cyclone.track_probability = None;
        let outbreaks = vec![outbreak_at(-18.9, 47.5, 156, OutbreakSeverity::High)];
        let found = detect_convergences(&[cyclone], &outbreaks, 500.0, Utc::now());
        // Same as the scenario score minus the 0.2 probability term
        assert!((found[0].risk_score - 0.653).abs() < 0.005);
    }
}
