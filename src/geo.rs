//! Geodesic helpers: haversine distance, bounding boxes, polygon geometry

use serde::{Deserialize, Serialize};

use crate::types::GeoPoint;

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometers per degree of latitude, used for approximate polygon areas
const KM_PER_DEGREE: f64 = 111.0;

/// Great-circle distance between two points via the haversine formula (km)
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Rectangular lat/lon bounding box (inclusive on all edges)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat >= self.min_lat
            && p.lat <= self.max_lat
            && p.lon >= self.min_lon
            && p.lon <= self.max_lon
    }

    /// Whether the box is geometrically sensible
    pub fn is_valid(&self) -> bool {
        self.min_lat < self.max_lat
            && self.min_lon < self.max_lon
            && self.min_lat >= -90.0
            && self.max_lat <= 90.0
            && self.min_lon >= -180.0
            && self.max_lon <= 180.0
    }

    /// Parse "minLon,minLat,maxLon,maxLat" (the GeoJSON bbox order used on
    /// the query string).
    pub fn parse_query(s: &str) -> Result<Self, String> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid bbox value: {}", e))?;
        if parts.len() != 4 {
            return Err(format!("bbox needs 4 values, got {}", parts.len()));
        }
        let bbox = Self::new(parts[1], parts[3], parts[0], parts[2]);
        if !bbox.is_valid() {
            return Err("bbox bounds are inverted or out of range".to_string());
        }
        Ok(bbox)
    }
}

/// Approximate area of a polygon ring in km^2 via the shoelace formula.
///
/// Vertices are (lon, lat) pairs; the closing vertex may or may not be
/// repeated. Degrees-squared are converted at the equatorial scale, which
/// is adequate for the threshold tests the detectors apply.
pub fn polygon_area_km2(ring: &[(f64, f64)]) -> f64 {
    let ring = open_ring(ring);
    if ring.len() < 3 {
        return 0.0;
    }

    let mut area = 0.0;
    for i in 0..ring.len() {
        let j = (i + 1) % ring.len();
        area += ring[i].0 * ring[j].1;
        area -= ring[j].0 * ring[i].1;
    }

    (area.abs() / 2.0) * KM_PER_DEGREE * KM_PER_DEGREE
}

/// Arithmetic-mean centroid of a polygon ring's vertices
pub fn polygon_centroid(ring: &[(f64, f64)]) -> Option<GeoPoint> {
    let ring = open_ring(ring);
    if ring.is_empty() {
        return None;
    }
    let n = ring.len() as f64;
    let lon: f64 = ring.iter().map(|(lon, _)| lon).sum::<f64>() / n;
    let lat: f64 = ring.iter().map(|(_, lat)| lat).sum::<f64>() / n;
    Some(GeoPoint::new(lat, lon))
}

/// Whether two hazards are near-duplicates: within 0.5 degrees on both axes
pub fn within_dedup_window(a: GeoPoint, b: GeoPoint) -> bool {
    (a.lat - b.lat).abs() <= 0.5 && (a.lon - b.lon).abs() <= 0.5
}

/// Drop the repeated closing vertex if present
fn open_ring(ring: &[(f64, f64)]) -> &[(f64, f64)] {
    if ring.len() >= 2 && ring.first() == ring.last() {
        &ring[..ring.len() - 1]
    } else {
        ring
    }
}
