//! Hazard types: cyclones, floods, landslide risks, outbreaks, convergences

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Geography
// ============================================================================

/// WGS84 point location in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether the point is a valid WGS84 coordinate
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.lon)
    }
}

// ============================================================================
// Hazard kinds and severity scales
// ============================================================================

/// Kind discriminant for persisted hazard records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HazardKind {
    Cyclone,
    Flood,
    Landslide,
    Convergence,
    Waterlogged,
}

impl std::fmt::Display for HazardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HazardKind::Cyclone => write!(f, "cyclone"),
            HazardKind::Flood => write!(f, "flood"),
            HazardKind::Landslide => write!(f, "landslide"),
            HazardKind::Convergence => write!(f, "convergence"),
            HazardKind::Waterlogged => write!(f, "waterlogged"),
        }
    }
}

/// Saffir-Simpson threat classification (wind-speed classes TD through CAT5)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreatLevel {
    #[serde(rename = "TD")]
    TropicalDepression,
    #[serde(rename = "TS")]
    TropicalStorm,
    #[serde(rename = "CAT1")]
    Cat1,
    #[serde(rename = "CAT2")]
    Cat2,
    #[serde(rename = "CAT3")]
    Cat3,
    #[serde(rename = "CAT4")]
    Cat4,
    #[serde(rename = "CAT5")]
    Cat5,
}

impl ThreatLevel {
    /// Classify maximum sustained wind (knots) on the Saffir-Simpson scale
    pub fn from_wind_kt(wind_kt: f64) -> Self {
        if wind_kt >= 137.0 {
            ThreatLevel::Cat5
        } else if wind_kt >= 113.0 {
            ThreatLevel::Cat4
        } else if wind_kt >= 96.0 {
            ThreatLevel::Cat3
        } else if wind_kt >= 83.0 {
            ThreatLevel::Cat2
        } else if wind_kt >= 64.0 {
            ThreatLevel::Cat1
        } else if wind_kt >= 34.0 {
            ThreatLevel::TropicalStorm
        } else {
            ThreatLevel::TropicalDepression
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreatLevel::TropicalDepression => write!(f, "TD"),
            ThreatLevel::TropicalStorm => write!(f, "TS"),
            ThreatLevel::Cat1 => write!(f, "CAT1"),
            ThreatLevel::Cat2 => write!(f, "CAT2"),
            ThreatLevel::Cat3 => write!(f, "CAT3"),
            ThreatLevel::Cat4 => write!(f, "CAT4"),
            ThreatLevel::Cat5 => write!(f, "CAT5"),
        }
    }
}

/// Flood severity classes derived from area / water fraction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FloodSeverity {
    Minor,
    Moderate,
    Major,
    Catastrophic,
}

impl std::fmt::Display for FloodSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FloodSeverity::Minor => write!(f, "minor"),
            FloodSeverity::Moderate => write!(f, "moderate"),
            FloodSeverity::Major => write!(f, "major"),
            FloodSeverity::Catastrophic => write!(f, "catastrophic"),
        }
    }
}

/// Landslide risk classes (score bands from the slope x rainfall model)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Extreme,
}

impl RiskLevel {
    /// Classify a combined risk score in [0, 1]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            RiskLevel::Extreme
        } else if score >= 0.5 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else if score >= 0.1 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Minimal => write!(f, "MINIMAL"),
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Outbreak severity from surveillance reporting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OutbreakSeverity {
    Low,
    Medium,
    High,
}

impl OutbreakSeverity {
    /// Weight used in convergence risk scoring
    pub fn score(&self) -> f64 {
        match self {
            OutbreakSeverity::Low => 0.2,
            OutbreakSeverity::Medium => 0.5,
            OutbreakSeverity::High => 0.8,
        }
    }

    /// Derive severity from case counts and case fatality ratio when the
    /// surveillance provider omits it.
    pub fn from_counts(cases: u32, deaths: u32) -> Self {
        if cases == 0 {
            return OutbreakSeverity::Low;
        }
        let cfr = deaths as f64 / cases as f64;
        if cfr > 0.15 || cases > 100 {
            OutbreakSeverity::High
        } else if cfr > 0.05 || cases > 50 {
            OutbreakSeverity::Medium
        } else {
            OutbreakSeverity::Low
        }
    }
}

impl std::fmt::Display for OutbreakSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutbreakSeverity::Low => write!(f, "low"),
            OutbreakSeverity::Medium => write!(f, "medium"),
            OutbreakSeverity::High => write!(f, "high"),
        }
    }
}

// ============================================================================
// Hazard records
// ============================================================================

/// One point of a cyclone track (times strictly increasing within a track)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPoint {
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Sustained wind at this point (knots)
    pub wind_kt: f64,
    /// Central pressure at this point (hPa)
    pub pressure_hpa: f64,
}

/// Detected or forecast tropical cyclone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cyclone {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub location: GeoPoint,
    pub detection_time: DateTime<Utc>,
    pub source: String,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
    pub threat_level: ThreatLevel,
    #[serde(default)]
    pub max_wind_kt: Option<f64>,
    #[serde(default)]
    pub min_pressure_hpa: Option<f64>,
    /// Ensemble track probability in [0, 1]
    #[serde(default)]
    pub track_probability: Option<f64>,
    #[serde(default)]
    pub track: Vec<TrackPoint>,
}

/// Satellite-derived flood extent (closed polygon ring, first == last vertex)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flood {
    pub id: String,
    /// Polygon ring as (lon, lat) pairs, first vertex repeated at the end
    pub polygon: Vec<(f64, f64)>,
    /// Arithmetic-mean centroid of the ring, stored as the hazard location
    pub location: GeoPoint,
    pub area_km2: f64,
    pub severity: FloodSeverity,
    /// Fraction of the polygon classified as standing water, in [0, 1]
    #[serde(default)]
    pub water_fraction: Option<f64>,
    pub detection_time: DateTime<Utc>,
    pub source: String,
    pub confidence: f64,
}

/// Landslide risk assessment for a terrain cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandslideRisk {
    pub id: String,
    pub location: GeoPoint,
    pub risk_level: RiskLevel,
    /// Combined slope x rainfall score in [0, 1]
    pub risk_score: f64,
    pub slope_deg: f64,
    /// 24 h rainfall accumulation (mm)
    pub rainfall_mm: f64,
    pub reason: String,
    pub recommended_action: String,
    pub detection_time: DateTime<Utc>,
    pub source: String,
    pub confidence: f64,
}

/// Disease outbreak record from surveillance reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outbreak {
    pub id: String,
    pub disease: String,
    pub country: String,
    pub location: GeoPoint,
    pub cases: u32,
    pub deaths: u32,
    pub severity: OutbreakSeverity,
    pub date: DateTime<Utc>,
    pub source: String,
}

/// Alert priority for convergence events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertPriority::Low => write!(f, "LOW"),
            AlertPriority::Medium => write!(f, "MEDIUM"),
            AlertPriority::High => write!(f, "HIGH"),
            AlertPriority::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Climate-health convergence: a cyclone and an outbreak within the
/// configured geodesic distance of each other.
///
/// Content-addressed: two convergences with the same cyclone id and
/// outbreak id are the same record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Convergence {
    pub id: String,
    pub cyclone: Cyclone,
    pub outbreak: Outbreak,
    pub distance_km: f64,
    pub risk_score: f64,
    pub alert_priority: AlertPriority,
    pub detection_time: DateTime<Utc>,
    pub location: GeoPoint,
}

impl Convergence {
    /// Stable content address from the participating hazard ids
    pub fn content_id(cyclone_id: &str, outbreak_id: &str) -> String {
        format!("conv-{}-{}", cyclone_id, outbreak_id)
    }
}

// ============================================================================
// Tagged hazard
// ============================================================================

/// Tagged union over all detectable hazard variants.
///
/// Hazards are immutable after creation; corrections are new records
/// with new ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Hazard {
    Cyclone(Cyclone),
    Flood(Flood),
    Landslide(LandslideRisk),
    Convergence(Convergence),
}

impl Hazard {
    pub fn kind(&self) -> HazardKind {
        match self {
            Hazard::Cyclone(_) => HazardKind::Cyclone,
            Hazard::Flood(_) => HazardKind::Flood,
            Hazard::Landslide(_) => HazardKind::Landslide,
            Hazard::Convergence(_) => HazardKind::Convergence,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Hazard::Cyclone(c) => &c.id,
            Hazard::Flood(f) => &f.id,
            Hazard::Landslide(l) => &l.id,
            Hazard::Convergence(c) => &c.id,
        }
    }

    pub fn location(&self) -> GeoPoint {
        match self {
            Hazard::Cyclone(c) => c.location,
            Hazard::Flood(f) => f.location,
            Hazard::Landslide(l) => l.location,
            Hazard::Convergence(c) => c.location,
        }
    }

    pub fn detection_time(&self) -> DateTime<Utc> {
        match self {
            Hazard::Cyclone(c) => c.detection_time,
            Hazard::Flood(f) => f.detection_time,
            Hazard::Landslide(l) => l.detection_time,
            Hazard::Convergence(c) => c.detection_time,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Hazard::Cyclone(c) => c.confidence,
            Hazard::Flood(f) => f.confidence,
            Hazard::Landslide(l) => l.risk_score,
            Hazard::Convergence(c) => c.risk_score,
        }
    }

    /// Validate the record's basic invariants before persistence.
    ///
    /// Invalid records are dropped with a reason, never stored.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), String> {
        let loc = self.location();
        if !loc.is_valid() {
            return Err(format!("location out of range: {}", loc));
        }
        if self.detection_time() > now {
            return Err(format!(
                "detection_time {} is in the future",
                self.detection_time()
            ));
        }
        if let Hazard::Cyclone(c) = self {
            for pair in c.track.windows(2) {
                if pair[1].time <= pair[0].time {
                    return Err("track times not strictly increasing".to_string());
                }
            }
        }
        Ok(())
    }
}
