//! Unified hazards query: aggregates the current active sets with caching
//!
//! One composite response over configurable lookback windows, with
//! near-duplicate suppression and waterlogged zones derived from flood
//! water fractions. Convergences are recomputed on demand from active
//! cyclones and the current outbreak set rather than persisted.
//!
//! A time-based cache (default TTL 300 s) keys on the query shape. Stale
//! entries are served only after the underlying query fails; on failure
//! with no cache the caller gets the error (the API maps it to 503).
//! There is no fabricated fallback data anywhere in this path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::defaults::{
    LOOKBACK_CYCLONES_HOURS, LOOKBACK_FLOODS_HOURS, LOOKBACK_LANDSLIDES_HOURS,
    LOOKBACK_WATERLOGGED_HOURS, WATERLOGGED_FRACTION,
};
use crate::config::PipelineConfig;
use crate::convergence::detect_convergences;
use crate::geo::{within_dedup_window, BoundingBox};
use crate::monitor::AppState;
use crate::store::HazardStore;
use crate::types::{
    Convergence, Cyclone, Flood, GeoPoint, Hazard, HazardKind, LandslideRisk, ThreatLevel,
};

/// Query-path errors
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Waterlogged zone derived from a high-water-fraction flood
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waterlogged {
    pub id: String,
    pub polygon: Vec<(f64, f64)>,
    pub location: GeoPoint,
    pub area_km2: f64,
    pub water_fraction: f64,
    pub detection_time: DateTime<Utc>,
}

/// Counts snapshot included in the unified response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryCounts {
    pub cyclones: usize,
    pub floods: usize,
    pub landslides: usize,
    pub waterlogged: usize,
    pub convergences: usize,
    #[serde(rename = "totalActive")]
    pub total_active: usize,
    #[serde(default)]
    pub highest_threat: Option<ThreatLevel>,
}

/// The composite `/hazards/realtime` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub success: bool,
    pub source: String,
    pub region: String,
    pub cyclones: Vec<Cyclone>,
    pub floods: Vec<Flood>,
    pub landslides: Vec<LandslideRisk>,
    pub waterlogged: Vec<Waterlogged>,
    pub convergences: Vec<Convergence>,
    pub summary: SummaryCounts,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

struct CacheEntry {
    at: Instant,
    body: String,
}

/// Read-side engine over the store and the shared pipeline state
pub struct QueryEngine {
    store: HazardStore,
    config: Arc<PipelineConfig>,
    state: Arc<RwLock<AppState>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl QueryEngine {
    pub fn new(
        store: HazardStore,
        config: Arc<PipelineConfig>,
        state: Arc<RwLock<AppState>>,
    ) -> Self {
        Self {
            store,
            config,
            state,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Unified feed. `hours` overrides the cyclone/landslide lookback.
    pub async fn realtime(
        &self,
        hours: Option<i64>,
        bbox: Option<BoundingBox>,
        region: &str,
    ) -> Result<String, QueryError> {
        let key = format!("realtime:{:?}:{:?}:{}", hours, bbox, region);
        self.cached(key, || self.build_realtime(hours, bbox, region))
            .await
    }

    /// Cyclones only: `{count, cyclones, lastUpdated}`
    pub async fn cyclones(&self, hours: Option<i64>) -> Result<String, QueryError> {
        let key = format!("cyclones:{:?}", hours);
        self.cached(key, || async move {
            let cyclones = self.active_cyclones(hours)?;
            Ok(serde_json::to_string(&serde_json::json!({
                "success": true,
                "count": cyclones.len(),
                "cyclones": cyclones,
                "lastUpdated": Utc::now(),
            }))?)
        })
        .await
    }

    /// Floods only: `{count, floods, lastUpdated}`
    pub async fn floods(
        &self,
        days: Option<i64>,
        bbox: Option<BoundingBox>,
    ) -> Result<String, QueryError> {
        let key = format!("floods:{:?}:{:?}", days, bbox);
        self.cached(key, || async move {
            let hours = days.map(|d| d * 24);
            let mut floods = self.active_floods(hours)?;
            if let Some(bbox) = bbox {
                floods.retain(|f| bbox.contains(f.location));
            }
            Ok(serde_json::to_string(&serde_json::json!({
                "success": true,
                "count": floods.len(),
                "floods": floods,
                "lastUpdated": Utc::now(),
            }))?)
        })
        .await
    }

    /// Landslide risks: `{count, landslides, lastUpdated}`
    pub async fn landslides(&self, bbox: Option<BoundingBox>) -> Result<String, QueryError> {
        let key = format!("landslides:{:?}", bbox);
        self.cached(key, || async move {
            let mut landslides = self.active_landslides(None)?;
            if let Some(bbox) = bbox {
                landslides.retain(|l| bbox.contains(l.location));
            }
            Ok(serde_json::to_string(&serde_json::json!({
                "success": true,
                "count": landslides.len(),
                "landslides": landslides,
                "lastUpdated": Utc::now(),
            }))?)
        })
        .await
    }

    /// Convergences recomputed on demand: `{convergences}`
    pub async fn convergences(&self, hours: Option<i64>) -> Result<String, QueryError> {
        let key = format!("convergences:{:?}", hours);
        let body = self
            .cached(key, || async move {
                let convergences = self.active_convergences(hours).await?;
                Ok(serde_json::to_string(&serde_json::json!({
                    "success": true,
                    "convergences": convergences,
                    "lastUpdated": Utc::now(),
                }))?)
            })
            .await?;
        Ok(body)
    }

    /// Counts snapshot for `/hazards/summary`
    pub async fn summary(&self) -> Result<String, QueryError> {
        let key = "summary".to_string();
        self.cached(key, || async move {
            let cyclones = self.active_cyclones(None)?;
            let floods = self.active_floods(None)?;
            let landslides = self.active_landslides(None)?;
            let waterlogged = self.derive_waterlogged()?;
            let highest_threat = cyclones.iter().map(|c| c.threat_level).max();
            let total =
                cyclones.len() + floods.len() + landslides.len() + waterlogged.len();
            Ok(serde_json::to_string(&serde_json::json!({
                "cyclones": cyclones.len(),
                "floods": floods.len(),
                "landslides": landslides.len(),
                "waterlogged": waterlogged.len(),
                "totalActive": total,
                "highest_threat": highest_threat,
                "lastUpdated": Utc::now(),
            }))?)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Building blocks
    // ------------------------------------------------------------------

    async fn build_realtime(
        &self,
        hours: Option<i64>,
        bbox: Option<BoundingBox>,
        region: &str,
    ) -> Result<String, QueryError> {
        let mut cyclones = self.active_cyclones(hours)?;
        let mut floods = self.active_floods(None)?;
        let mut landslides = self.active_landslides(hours)?;
        let mut waterlogged = self.derive_waterlogged()?;
        let mut convergences = self.active_convergences(hours).await?;

        if let Some(bbox) = bbox {
            cyclones.retain(|c| bbox.contains(c.location));
            floods.retain(|f| bbox.contains(f.location));
            landslides.retain(|l| bbox.contains(l.location));
            waterlogged.retain(|w| bbox.contains(w.location));
            convergences.retain(|v| bbox.contains(v.location));
        }

        let highest_threat = cyclones.iter().map(|c| c.threat_level).max();
        let summary = SummaryCounts {
            cyclones: cyclones.len(),
            floods: floods.len(),
            landslides: landslides.len(),
            waterlogged: waterlogged.len(),
            convergences: convergences.len(),
            total_active: cyclones.len()
                + floods.len()
                + landslides.len()
                + waterlogged.len()
                + convergences.len(),
            highest_threat,
        };

        let response = UnifiedResponse {
            success: true,
            source: "detection".to_string(),
            region: region.to_string(),
            cyclones,
            floods,
            landslides,
            waterlogged,
            convergences,
            summary,
            last_updated: Utc::now(),
        };
        Ok(serde_json::to_string(&response)?)
    }

    fn active_cyclones(&self, hours: Option<i64>) -> Result<Vec<Cyclone>, QueryError> {
        let since = Utc::now()
            - ChronoDuration::hours(hours.unwrap_or(LOOKBACK_CYCLONES_HOURS).clamp(1, 24 * 30));
        let cyclones: Vec<Cyclone> = self
            .store
            .list_detections(HazardKind::Cyclone, since)?
            .into_iter()
            .filter_map(|h| match h {
                Hazard::Cyclone(c) => Some(c),
                _ => None,
            })
            .collect();
        Ok(dedup_by_location(cyclones, |c| c.location))
    }

    fn active_floods(&self, hours: Option<i64>) -> Result<Vec<Flood>, QueryError> {
        let since = Utc::now()
            - ChronoDuration::hours(hours.unwrap_or(LOOKBACK_FLOODS_HOURS).clamp(1, 24 * 30));
        let floods: Vec<Flood> = self
            .store
            .list_detections(HazardKind::Flood, since)?
            .into_iter()
            .filter_map(|h| match h {
                Hazard::Flood(f) => Some(f),
                _ => None,
            })
            .collect();
        Ok(dedup_by_location(floods, |f| f.location))
    }

    fn active_landslides(&self, hours: Option<i64>) -> Result<Vec<LandslideRisk>, QueryError> {
        let since = Utc::now()
            - ChronoDuration::hours(hours.unwrap_or(LOOKBACK_LANDSLIDES_HOURS).clamp(1, 24 * 30));
        let landslides: Vec<LandslideRisk> = self
            .store
            .list_detections(HazardKind::Landslide, since)?
            .into_iter()
            .filter_map(|h| match h {
                Hazard::Landslide(l) => Some(l),
                _ => None,
            })
            .collect();
        Ok(dedup_by_location(landslides, |l| l.location))
    }

    /// Waterlogged zones: floods over the longer window whose standing
    /// water fraction stayed above the threshold.
    fn derive_waterlogged(&self) -> Result<Vec<Waterlogged>, QueryError> {
        let zones: Vec<Waterlogged> = self
            .active_floods(Some(LOOKBACK_WATERLOGGED_HOURS))?
            .into_iter()
            .filter_map(|f| {
                let fraction = f.water_fraction?;
                if fraction > WATERLOGGED_FRACTION {
                    Some(Waterlogged {
                        id: format!("water-{}", f.id),
                        polygon: f.polygon,
                        location: f.location,
                        area_km2: f.area_km2,
                        water_fraction: fraction,
                        detection_time: f.detection_time,
                    })
                } else {
                    None
                }
            })
            .collect();
        Ok(dedup_by_location(zones, |w| w.location))
    }

    async fn active_convergences(
        &self,
        hours: Option<i64>,
    ) -> Result<Vec<Convergence>, QueryError> {
        let cyclones = self.active_cyclones(hours)?;
        let outbreaks = {
            let state = self.state.read().await;
            state.current_outbreaks.clone()
        };
        let mut convergences = detect_convergences(
            &cyclones,
            &outbreaks,
            self.config.convergence_distance_km,
            Utc::now(),
        );
        // Content addressing: one record per (cyclone, outbreak) pair
        convergences.sort_by(|a, b| a.id.cmp(&b.id));
        convergences.dedup_by(|a, b| a.id == b.id);
        Ok(convergences)
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    async fn cached<F, Fut>(&self, key: String, compute: F) -> Result<String, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<String, QueryError>>,
    {
        let ttl = std::time::Duration::from_secs(self.config.cache_ttl_seconds);

        if let Ok(cache) = self.cache.lock() {
            if let Some(entry) = cache.get(&key) {
                if entry.at.elapsed() < ttl {
                    return Ok(entry.body.clone());
                }
            }
        }

        match compute().await {
            Ok(body) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(
                        key,
                        CacheEntry {
                            at: Instant::now(),
                            body: body.clone(),
                        },
                    );
                }
                Ok(body)
            }
            Err(e) => {
                // Serve stale only when the fresh query failed
                if let Ok(cache) = self.cache.lock() {
                    if let Some(entry) = cache.get(&key) {
                        warn!(error = %e, "query failed, serving stale cache entry");
                        return Ok(entry.body.clone());
                    }
                }
                Err(e)
            }
        }
    }

    /// Drop every cached entry (used by tests and admin triggers)
    pub fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            let dropped = cache.len();
            cache.clear();
            if dropped > 0 {
                info!(entries = dropped, "query cache invalidated");
            }
        }
    }
}

/// Collapse hazards of one kind whose locations fall within 0.5 degrees
/// on both axes; the first occurrence (newest, lists are DESC) wins.
fn dedup_by_location<T>(items: Vec<T>, location: impl Fn(&T) -> GeoPoint) -> Vec<T> {
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let duplicate = kept
            .iter()
            .any(|k| within_dedup_window(location(k), location(&item)));
        if !duplicate {
            kept.push(item);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Outbreak, OutbreakSeverity};

    fn engine_with_store() -> (tempfile::TempDir, QueryEngine, HazardStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HazardStore::open(dir.path().join("hazards.db")).unwrap();
        let engine = QueryEngine::new(
            store.clone(),
            Arc::new(PipelineConfig::default()),
            Arc::new(RwLock::new(AppState::default())),
        );
        (dir, engine, store)
    }

    fn cyclone(id: &str, lat: f64, lon: f64, minutes_ago: i64) -> Hazard {
        Hazard::Cyclone(Cyclone {
            id: id.to_string(),
            name: None,
            location: GeoPoint::new(lat, lon),
            detection_time: Utc::now() - ChronoDuration::minutes(minutes_ago),
            source: "test".to_string(),
            confidence: 0.8,
            threat_level: ThreatLevel::TropicalStorm,
            max_wind_kt: Some(45.0),
            min_pressure_hpa: Some(995.0),
            track_probability: Some(1.0),
            track: Vec::new(),
        })
    }

    fn flood(id: &str, lat: f64, lon: f64, fraction: Option<f64>, minutes_ago: i64) -> Hazard {
        Hazard::Flood(Flood {
            id: id.to_string(),
            polygon: vec![
                (lon - 0.1, lat - 0.1),
                (lon + 0.1, lat - 0.1),
                (lon + 0.1, lat + 0.1),
                (lon - 0.1, lat + 0.1),
                (lon - 0.1, lat - 0.1),
            ],
            location: GeoPoint::new(lat, lon),
            area_km2: 45.3,
            severity: crate::types::FloodSeverity::Moderate,
            water_fraction: fraction,
            detection_time: Utc::now() - ChronoDuration::minutes(minutes_ago),
            source: "test".to_string(),
            confidence: 0.75,
        })
    }

    #[tokio::test]
    async fn test_dedup_collapses_near_duplicates() {
        let (_dir, engine, store) = engine_with_store();
        // Two cyclones within 0.5 deg, one far away
        store.insert_detection(&cyclone("a", -19.5, 34.2, 5)).unwrap();
        store.insert_detection(&cyclone("b", -19.6, 34.3, 60)).unwrap();
        store.insert_detection(&cyclone("c", -15.0, 42.0, 10)).unwrap();

        let active = engine.active_cyclones(None).unwrap();
        assert_eq!(active.len(), 2);
        // Newest of the duplicate pair survives
        assert!(active.iter().any(|c| c.id == "a"));
        assert!(!active.iter().any(|c| c.id == "b"));
    }

    #[tokio::test]
    async fn test_waterlogged_derivation_threshold() {
        let (_dir, engine, store) = engine_with_store();
        store
            .insert_detection(&flood("f-wet", -19.9, 34.9, Some(0.92), 10))
            .unwrap();
        store
            .insert_detection(&flood("f-dry", -16.0, 36.0, Some(0.4), 10))
            .unwrap();
        store
            .insert_detection(&flood("f-none", -14.0, 38.0, None, 10))
            .unwrap();

        let zones = engine.derive_waterlogged().unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].id, "water-f-wet");
    }

    #[tokio::test]
    async fn test_realtime_cache_returns_identical_body() {
        let (_dir, engine, store) = engine_with_store();
        store.insert_detection(&cyclone("a", -19.5, 34.2, 5)).unwrap();

        let first = engine.realtime(Some(24), None, "africa").await.unwrap();
        let second = engine.realtime(Some(24), None, "africa").await.unwrap();
        // Byte-equal within the TTL, including the embedded timestamp
        assert_eq!(first, second);

        engine.invalidate_cache();
        let third = engine.realtime(Some(24), None, "africa").await.unwrap();
        let parsed: UnifiedResponse = serde_json::from_str(&third).unwrap();
        assert_eq!(parsed.summary.cyclones, 1);
        assert!(parsed.success);
    }

    #[tokio::test]
    async fn test_convergences_recomputed_from_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = HazardStore::open(dir.path().join("hazards.db")).unwrap();
        let state = Arc::new(RwLock::new(AppState::default()));
        let engine = QueryEngine::new(
            store.clone(),
            Arc::new(PipelineConfig::default()),
            state.clone(),
        );

        store.insert_detection(&cyclone("cy", -19.5, 47.25, 5)).unwrap();
        {
            let mut s = state.write().await;
            s.current_outbreaks = vec![Outbreak {
                id: "ob".to_string(),
                disease: "Cholera".to_string(),
                country: "Madagascar".to_string(),
                location: GeoPoint::new(-18.9, 47.5),
                cases: 156,
                deaths: 22,
                severity: OutbreakSeverity::High,
                date: Utc::now(),
                source: "test".to_string(),
            }];
        }

        let convergences = engine.active_convergences(None).await.unwrap();
        assert_eq!(convergences.len(), 1);
        assert_eq!(convergences[0].id, "conv-cy-ob");
    }

    #[tokio::test]
    async fn test_bbox_filter_in_realtime() {
        let (_dir, engine, store) = engine_with_store();
        store.insert_detection(&cyclone("inside", -19.5, 34.2, 5)).unwrap();
        store.insert_detection(&cyclone("outside", -12.0, 49.0, 5)).unwrap();

        let bbox = BoundingBox::new(-27.0, -10.0, 30.0, 41.0);
        let body = engine.realtime(None, Some(bbox), "mozambique").await.unwrap();
        let parsed: UnifiedResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.cyclones.len(), 1);
        assert_eq!(parsed.cyclones[0].id, "inside");
    }
}
