//! Hazard Store - durable persistence for detections, alerts, runs and
//! validations
//!
//! Backed by sled with one named tree per logical table. Keys are
//! big-endian timestamps (plus a uniquifier) so iteration is naturally
//! chronological; values are JSON. Critical writes (alerts, opens,
//! validations, runs) flush before acknowledging so they survive a crash;
//! detection batches are flushed once per cycle by the caller.
//!
//! The store is the sole owner of persisted records. Other components
//! hold only transient views obtained by query.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::{
    Alert, FloodSeverity, Hazard, HazardKind, MonitorRun, ValidationEvent, ValidationStats,
};

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unknown alert: {0}")]
    UnknownAlert(String),
    #[error("unknown tracking id: {0}")]
    UnknownTrackingId(String),
}

/// Per-cycle flood assessment summary row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodAssessmentRow {
    pub detection_time: DateTime<Utc>,
    pub region: String,
    pub bbox_json: String,
    pub total_flooded_areas: u32,
    pub total_area_km2: f64,
    pub max_severity: Option<FloodSeverity>,
    /// GeoJSON FeatureCollection of the detected polygons
    pub geojson: String,
}

/// Per-cycle landslide assessment summary row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandslideAssessmentRow {
    pub assessment_time: DateTime<Utc>,
    pub region: String,
    pub bbox_json: String,
    /// Peak 24 h rainfall over the assessed cells (mm)
    pub rainfall_mm: f64,
    pub total_zones: u32,
    pub high_risk_zones: u32,
    pub area_at_risk_km2: f64,
    pub geojson: String,
}

/// Tracking-pixel open event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingOpen {
    pub tracking_id: String,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub ua: Option<String>,
}

/// Durable hazard store handle (cheap to clone)
#[derive(Clone)]
pub struct HazardStore {
    db: Arc<sled::Db>,
    detections: sled::Tree,
    floods: sled::Tree,
    landslide_risks: sled::Tree,
    sent_alerts: sled::Tree,
    tracking_index: sled::Tree,
    dedup_index: sled::Tree,
    tracking_opens: sled::Tree,
    validation_events: sled::Tree,
    monitor_runs: sled::Tree,
}

fn kind_tag(kind: HazardKind) -> u8 {
    match kind {
        HazardKind::Cyclone => 1,
        HazardKind::Flood => 2,
        HazardKind::Landslide => 3,
        HazardKind::Convergence => 4,
        HazardKind::Waterlogged => 5,
    }
}

/// Key: [kind tag][timestamp millis be][sequence be] - sorts by kind then time
fn detection_key(kind: HazardKind, at: DateTime<Utc>, seq: u64) -> [u8; 17] {
    let mut key = [0u8; 17];
    key[0] = kind_tag(kind);
    key[1..9].copy_from_slice(&(at.timestamp_millis().max(0) as u64).to_be_bytes());
    key[9..17].copy_from_slice(&seq.to_be_bytes());
    key
}

fn time_seq_key(at: DateTime<Utc>, seq: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&(at.timestamp_millis().max(0) as u64).to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

impl HazardStore {
    /// Open or create the store at the given path.
    ///
    /// Trees are created on demand, so schema growth across versions is a
    /// no-op for existing databases.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            detections: db.open_tree("detections")?,
            floods: db.open_tree("floods")?,
            landslide_risks: db.open_tree("landslide_risks")?,
            sent_alerts: db.open_tree("sent_alerts")?,
            tracking_index: db.open_tree("tracking_index")?,
            dedup_index: db.open_tree("alert_dedup")?,
            tracking_opens: db.open_tree("tracking_opens")?,
            validation_events: db.open_tree("validation_events")?,
            monitor_runs: db.open_tree("monitor_runs")?,
            db: Arc::new(db),
        })
    }

    /// Flush all pending writes. Called at the end of a cycle's persist
    /// stage and on shutdown so in-flight work reaches disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ========================================================================
    // Detections
    // ========================================================================

    /// Insert one hazard detection; returns the generated numeric id.
    pub fn insert_detection(&self, hazard: &Hazard) -> Result<u64, StoreError> {
        let seq = self.db.generate_id()?;
        let key = detection_key(hazard.kind(), hazard.detection_time(), seq);
        let value = serde_json::to_vec(hazard)?;
        self.detections.insert(key, value)?;
        Ok(seq)
    }

    /// All detections of `kind` with detection_time > since, newest first.
    pub fn list_detections(
        &self,
        kind: HazardKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<Hazard>, StoreError> {
        let start = detection_key(kind, since, u64::MAX);
        // Upper bound: same kind tag, maximal timestamp/sequence bytes
        let mut end = [0xFFu8; 17];
        end[0] = kind_tag(kind);

        let mut hazards = Vec::new();
        for item in self.detections.range(start..=end).rev() {
            let (_, value) = item?;
            match serde_json::from_slice::<Hazard>(&value) {
                Ok(h) if h.detection_time() > since => hazards.push(h),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping unreadable detection row"),
            }
        }
        Ok(hazards)
    }

    /// Count detections of `kind` newer than `since`
    pub fn count_detections(
        &self,
        kind: HazardKind,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        Ok(self.list_detections(kind, since)?.len())
    }

    // ========================================================================
    // Assessment summary rows
    // ========================================================================

    pub fn insert_flood_assessment(&self, row: &FloodAssessmentRow) -> Result<u64, StoreError> {
        let seq = self.db.generate_id()?;
        let key = time_seq_key(row.detection_time, seq);
        self.floods.insert(key, serde_json::to_vec(row)?)?;
        Ok(seq)
    }

    pub fn insert_landslide_assessment(
        &self,
        row: &LandslideAssessmentRow,
    ) -> Result<u64, StoreError> {
        let seq = self.db.generate_id()?;
        let key = time_seq_key(row.assessment_time, seq);
        self.landslide_risks.insert(key, serde_json::to_vec(row)?)?;
        Ok(seq)
    }

    // ========================================================================
    // Alerts
    // ========================================================================

    /// Persist a dispatched alert. Exactly one row exists per alert_id;
    /// the tracking and dedup indexes are updated in the same call.
    pub fn insert_alert(&self, alert: &Alert) -> Result<String, StoreError> {
        let value = serde_json::to_vec(alert)?;
        self.sent_alerts
            .insert(alert.alert_id.as_bytes(), value)?;
        self.tracking_index
            .insert(alert.tracking_id.as_bytes(), alert.alert_id.as_bytes())?;
        self.dedup_index.insert(
            dedup_key(&alert.hazard_id, &alert.country),
            (alert.sent_at.timestamp_millis().max(0) as u64)
                .to_be_bytes()
                .to_vec(),
        )?;
        self.db.flush()?;
        Ok(alert.alert_id.clone())
    }

    pub fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>, StoreError> {
        match self.sent_alerts.get(alert_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Most recent alerts, newest first
    pub fn alert_history(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let mut alerts: Vec<Alert> = self
            .sent_alerts
            .iter()
            .filter_map(|item| {
                item.ok()
                    .and_then(|(_, v)| serde_json::from_slice::<Alert>(&v).ok())
            })
            .collect();
        alerts.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        alerts.truncate(limit);
        Ok(alerts)
    }

    pub fn alert_count(&self) -> usize {
        self.sent_alerts.len()
    }

    /// When was this (hazard, country) pair last alerted, if ever?
    /// Backs the sliding dedup window.
    pub fn last_alert_time(
        &self,
        hazard_id: &str,
        country: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.dedup_index.get(dedup_key(hazard_id, country))? {
            Some(bytes) => {
                let mut millis = [0u8; 8];
                millis.copy_from_slice(&bytes);
                Ok(Utc
                    .timestamp_millis_opt(u64::from_be_bytes(millis) as i64)
                    .single())
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Tracking opens
    // ========================================================================

    /// Record a tracking-pixel open. The open event is always appended;
    /// the alert's `opened_at` is set only on the first open.
    pub fn record_open(
        &self,
        tracking_id: &str,
        at: DateTime<Utc>,
        ip: Option<String>,
        ua: Option<String>,
    ) -> Result<(), StoreError> {
        let alert_id = self
            .tracking_index
            .get(tracking_id.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).to_string())
            .ok_or_else(|| StoreError::UnknownTrackingId(tracking_id.to_string()))?;

        let seq = self.db.generate_id()?;
        let open = TrackingOpen {
            tracking_id: tracking_id.to_string(),
            opened_at: at,
            ip,
            ua,
        };
        self.tracking_opens
            .insert(time_seq_key(at, seq), serde_json::to_vec(&open)?)?;

        if let Some(bytes) = self.sent_alerts.get(alert_id.as_bytes())? {
            let mut alert: Alert = serde_json::from_slice(&bytes)?;
            if alert.opened_at.is_none() {
                alert.opened_at = Some(at);
                self.sent_alerts
                    .insert(alert_id.as_bytes(), serde_json::to_vec(&alert)?)?;
            }
        }

        self.db.flush()?;
        Ok(())
    }

    /// All open events, oldest first
    pub fn list_opens(&self) -> Vec<TrackingOpen> {
        self.tracking_opens
            .iter()
            .filter_map(|item| {
                item.ok()
                    .and_then(|(_, v)| serde_json::from_slice::<TrackingOpen>(&v).ok())
            })
            .collect()
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Append a ground-truth validation event and mark the alert validated.
    pub fn record_validation(
        &self,
        alert_id: &str,
        event: &ValidationEvent,
    ) -> Result<(), StoreError> {
        let bytes = self
            .sent_alerts
            .get(alert_id.as_bytes())?
            .ok_or_else(|| StoreError::UnknownAlert(alert_id.to_string()))?;

        let seq = self.db.generate_id()?;
        self.validation_events
            .insert(time_seq_key(event.event_date, seq), serde_json::to_vec(event)?)?;

        let mut alert: Alert = serde_json::from_slice(&bytes)?;
        alert.validated = true;
        alert.validation_notes = event.actual_impact.clone();
        self.sent_alerts
            .insert(alert_id.as_bytes(), serde_json::to_vec(&alert)?)?;

        self.db.flush()?;
        Ok(())
    }

    pub fn list_validation_events(&self) -> Vec<ValidationEvent> {
        self.validation_events
            .iter()
            .filter_map(|item| {
                item.ok()
                    .and_then(|(_, v)| serde_json::from_slice::<ValidationEvent>(&v).ok())
            })
            .collect()
    }

    /// Aggregate alert/validation counters
    pub fn stats(&self) -> Result<ValidationStats, StoreError> {
        let mut stats = ValidationStats::default();
        for item in self.sent_alerts.iter() {
            let (_, value) = item?;
            let alert: Alert = serde_json::from_slice(&value)?;
            stats.total_alerts += 1;
            if alert.opened_at.is_some() {
                stats.opened_alerts += 1;
            }
            if alert.validated {
                stats.validated_alerts += 1;
            }
        }

        let lead_times: Vec<f64> = self
            .list_validation_events()
            .into_iter()
            .filter_map(|e| e.lead_time_hours)
            .collect();
        if !lead_times.is_empty() {
            stats.mean_lead_time_hours =
                Some(lead_times.iter().sum::<f64>() / lead_times.len() as f64);
        }

        Ok(stats)
    }

    // ========================================================================
    // Monitor runs
    // ========================================================================

    /// Append one run record. Every cycle invocation writes exactly one.
    pub fn insert_run(&self, run: &MonitorRun) -> Result<u64, StoreError> {
        let seq = self.db.generate_id()?;
        self.monitor_runs
            .insert(time_seq_key(run.run_time, seq), serde_json::to_vec(run)?)?;
        self.db.flush()?;
        Ok(seq)
    }

    /// Most recent runs, newest first
    pub fn recent_runs(&self, limit: usize) -> Vec<MonitorRun> {
        let mut runs = Vec::with_capacity(limit);
        for item in self.monitor_runs.iter().rev() {
            if runs.len() >= limit {
                break;
            }
            if let Ok((_, value)) = item {
                if let Ok(run) = serde_json::from_slice::<MonitorRun>(&value) {
                    runs.push(run);
                }
            }
        }
        runs
    }

    pub fn run_count(&self) -> usize {
        self.monitor_runs.len()
    }
}

fn dedup_key(hazard_id: &str, country: &str) -> Vec<u8> {
    format!("{}|{}", hazard_id, country).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AlertType, Cyclone, GeoPoint, LandslideRisk, RecipientOutcome, RiskLevel, ThreatLevel,
    };
    use std::collections::BTreeMap;

    fn open_store() -> (tempfile::TempDir, HazardStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HazardStore::open(dir.path().join("hazards.db")).unwrap();
        (dir, store)
    }

    fn cyclone(id: &str, at: &str) -> Hazard {
        Hazard::Cyclone(Cyclone {
            id: id.to_string(),
            name: None,
            location: GeoPoint::new(-19.85, 34.84),
            detection_time: at.parse().unwrap(),
            source: "test".to_string(),
            confidence: 0.9,
            threat_level: ThreatLevel::Cat2,
            max_wind_kt: Some(87.5),
            min_pressure_hpa: Some(955.0),
            track_probability: None,
            track: Vec::new(),
        })
    }

    fn landslide(id: &str, at: &str) -> Hazard {
        Hazard::Landslide(LandslideRisk {
            id: id.to_string(),
            location: GeoPoint::new(-19.5, 34.2),
            risk_level: RiskLevel::High,
            risk_score: 0.6,
            slope_deg: 30.0,
            rainfall_mm: 220.0,
            reason: "test".to_string(),
            recommended_action: "test".to_string(),
            detection_time: at.parse().unwrap(),
            source: "test".to_string(),
            confidence: 0.6,
        })
    }

    fn alert(alert_id: &str, hazard_id: &str, country: &str, sent_at: &str) -> Alert {
        Alert {
            alert_id: alert_id.to_string(),
            alert_type: AlertType::Cyclone,
            hazard_id: hazard_id.to_string(),
            country: country.to_string(),
            location: GeoPoint::new(-19.85, 34.84),
            subject: "Cyclone warning".to_string(),
            message_variants: BTreeMap::new(),
            recipients: Vec::<RecipientOutcome>::new(),
            sent_at: sent_at.parse().unwrap(),
            tracking_id: format!("{:0<16}", alert_id).chars().take(16).collect(),
            opened_at: None,
            validated: false,
            validation_notes: None,
        }
    }

    #[test]
    fn test_insert_and_list_detections_desc() {
        let (_dir, store) = open_store();
        store.insert_detection(&cyclone("c1", "2024-01-15T00:00:00Z")).unwrap();
        store.insert_detection(&cyclone("c2", "2024-01-15T06:00:00Z")).unwrap();
        store.insert_detection(&cyclone("c3", "2024-01-15T12:00:00Z")).unwrap();
        // Different kind, should not appear in cyclone listings
        store.insert_detection(&landslide("l1", "2024-01-15T06:00:00Z")).unwrap();

        let since: DateTime<Utc> = "2024-01-15T00:00:00Z".parse().unwrap();
        let list = store.list_detections(HazardKind::Cyclone, since).unwrap();
        // Strictly-greater filter drops c1, order is newest first
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id(), "c3");
        assert_eq!(list[1].id(), "c2");

        let landslides = store
            .list_detections(HazardKind::Landslide, "2024-01-14T00:00:00Z".parse().unwrap())
            .unwrap();
        assert_eq!(landslides.len(), 1);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let (_dir, store) = open_store();
        let a = store.insert_detection(&cyclone("c1", "2024-01-15T00:00:00Z")).unwrap();
        let b = store.insert_detection(&cyclone("c2", "2024-01-15T00:00:00Z")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_alert_round_trip_and_dedup_index() {
        let (_dir, store) = open_store();
        let a = alert("AL-1", "cyclone-x", "Mozambique", "2024-01-15T06:00:00Z");
        let id = store.insert_alert(&a).unwrap();
        assert_eq!(id, "AL-1");

        let fetched = store.get_alert("AL-1").unwrap().unwrap();
        assert_eq!(fetched.country, "Mozambique");
        assert!(!fetched.validated);

        let last = store.last_alert_time("cyclone-x", "Mozambique").unwrap();
        assert_eq!(last, Some("2024-01-15T06:00:00Z".parse().unwrap()));
        assert!(store.last_alert_time("cyclone-x", "Malawi").unwrap().is_none());
    }

    #[test]
    fn test_record_open_sets_first_open_only() {
        let (_dir, store) = open_store();
        let a = alert("AL-2", "cyclone-y", "Madagascar", "2024-01-15T06:00:00Z");
        let tracking = a.tracking_id.clone();
        store.insert_alert(&a).unwrap();

        let first: DateTime<Utc> = "2024-01-15T08:00:00Z".parse().unwrap();
        let second: DateTime<Utc> = "2024-01-15T09:00:00Z".parse().unwrap();
        store
            .record_open(&tracking, first, Some("10.0.0.1".to_string()), None)
            .unwrap();
        store.record_open(&tracking, second, None, None).unwrap();

        let fetched = store.get_alert("AL-2").unwrap().unwrap();
        assert_eq!(fetched.opened_at, Some(first));
        assert_eq!(store.list_opens().len(), 2);
        // Opens never precede the send
        assert!(fetched.opened_at.unwrap() >= fetched.sent_at);
    }

    #[test]
    fn test_record_open_unknown_tracking_id() {
        let (_dir, store) = open_store();
        let err = store.record_open("deadbeefdeadbeef", Utc::now(), None, None);
        assert!(matches!(err, Err(StoreError::UnknownTrackingId(_))));
    }

    #[test]
    fn test_record_validation_marks_alert() {
        let (_dir, store) = open_store();
        let a = alert("AL-3", "cyclone-z", "Mozambique", "2024-01-15T06:00:00Z");
        store.insert_alert(&a).unwrap();

        let event = ValidationEvent {
            alert_id: "AL-3".to_string(),
            event_type: "landfall".to_string(),
            event_date: "2024-01-18T18:00:00Z".parse().unwrap(),
            actual_impact: Some("landfall near Beira".to_string()),
            lead_time_hours: Some(84.0),
        };
        store.record_validation("AL-3", &event).unwrap();

        let fetched = store.get_alert("AL-3").unwrap().unwrap();
        assert!(fetched.validated);
        assert_eq!(fetched.validation_notes.as_deref(), Some("landfall near Beira"));

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_alerts, 1);
        assert_eq!(stats.validated_alerts, 1);
        assert_eq!(stats.mean_lead_time_hours, Some(84.0));
    }

    #[test]
    fn test_validation_of_unknown_alert_fails() {
        let (_dir, store) = open_store();
        let event = ValidationEvent {
            alert_id: "missing".to_string(),
            event_type: "landfall".to_string(),
            event_date: Utc::now(),
            actual_impact: None,
            lead_time_hours: None,
        };
        assert!(matches!(
            store.record_validation("missing", &event),
            Err(StoreError::UnknownAlert(_))
        ));
    }

    #[test]
    fn test_monitor_runs_ordered() {
        let (_dir, store) = open_store();
        for (i, t) in ["2024-01-15T00:00:00Z", "2024-01-15T06:00:00Z", "2024-01-15T12:00:00Z"]
            .iter()
            .enumerate()
        {
            store
                .insert_run(&MonitorRun {
                    run_time: t.parse().unwrap(),
                    data_sources: vec!["reanalysis".to_string()],
                    detections_count: i as u32,
                    alerts_sent: 0,
                    duration_seconds: 1.5,
                    status: crate::types::RunStatus::Success,
                    error: None,
                })
                .unwrap();
        }

        assert_eq!(store.run_count(), 3);
        let recent = store.recent_runs(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].detections_count, 2);
        assert_eq!(recent[1].detections_count, 1);
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hazards.db");
        {
            let store = HazardStore::open(&path).unwrap();
            store
                .insert_alert(&alert("AL-9", "h", "Mozambique", "2024-01-15T06:00:00Z"))
                .unwrap();
        }
        let store = HazardStore::open(&path).unwrap();
        assert!(store.get_alert("AL-9").unwrap().is_some());
    }

    #[test]
    fn test_alert_history_newest_first() {
        let (_dir, store) = open_store();
        store.insert_alert(&alert("AL-a", "h1", "Mozambique", "2024-01-15T00:00:00Z")).unwrap();
        store.insert_alert(&alert("AL-b", "h2", "Mozambique", "2024-01-15T06:00:00Z")).unwrap();
        let history = store.alert_history(10).unwrap();
        assert_eq!(history[0].alert_id, "AL-b");
        assert_eq!(history[1].alert_id, "AL-a");
    }
}
