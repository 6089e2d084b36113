//! One pipeline cycle: fetch -> detect -> persist -> alert -> summarize

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::AppState;
use crate::alerts::{alert_threshold, AlertPipeline};
use crate::config::defaults::CYCLE_BUDGET_SECS;
use crate::config::PipelineConfig;
use crate::convergence::detect_convergences;
use crate::detectors::Detector;
use crate::sources::{FetchWindow, HazardSource, RawObservation};
use crate::store::{FloodAssessmentRow, HazardStore, LandslideAssessmentRow, StoreError};
use crate::types::{Cyclone, Hazard, MonitorRun, Outbreak, RunStatus};

/// Everything a cycle needs, injected at startup
pub struct CycleDeps {
    pub config: Arc<PipelineConfig>,
    pub store: HazardStore,
    pub sources: Vec<Arc<dyn HazardSource>>,
    pub detectors: Vec<Box<dyn Detector>>,
    pub alerts: Arc<AlertPipeline>,
    pub state: Arc<RwLock<AppState>>,
}

/// Cycle runner. Every invocation writes exactly one `MonitorRun`.
pub struct Cycle;

impl Cycle {
    /// Run a single cycle to completion (or cancellation / failure).
    ///
    /// Cancellation is honored at state boundaries; the active state
    /// finishes its pending persistence first.
    pub async fn run(deps: &CycleDeps, cancel: &CancellationToken) -> MonitorRun {
        let started = Instant::now();
        let now = Utc::now();
        let mut notes: Vec<String> = Vec::new();

        {
            let mut state = deps.state.write().await;
            state.cycle_active = true;
        }

        // --- fetching ---------------------------------------------------
        let mut per_source: Vec<(String, Vec<RawObservation>)> = Vec::new();
        let mut data_sources: Vec<String> = Vec::new();

        if !cancel.is_cancelled() {
            let fetches = deps.sources.iter().map(|source| {
                let window = FetchWindow::last_hours(now, source.lookback_hours());
                async move { (source.name(), source.fetch(window).await) }
            });
            for (name, result) in join_all(fetches).await {
                data_sources.push(name.to_string());
                match result {
                    Ok(batch) => {
                        if let Some(note) = batch.note {
                            warn!(source = name, note = %note, "source degraded this cycle");
                            notes.push(note);
                        }
                        info!(source = name, observations = batch.observations.len(), "source fetched");
                        per_source.push((name.to_string(), batch.observations));
                    }
                    Err(e) => {
                        warn!(source = name, error = %e, "source outage, skipping this cycle");
                        notes.push(format!("{}: {}", name, e));
                    }
                }
            }
        }

        // --- detecting --------------------------------------------------
        // Detection is CPU-only and non-suspending once observations are
        // in memory. Hazards keep per-source adapter order.
        let mut hazards: Vec<Hazard> = Vec::new();
        if !cancel.is_cancelled() {
            let window = FetchWindow::last_hours(now, deps.config.check_interval_hours as i64);
            for (source_name, observations) in &per_source {
                for detector in &deps.detectors {
                    for hazard in detector.detect(observations, window) {
                        match hazard.validate(now) {
                            Ok(()) => hazards.push(hazard),
                            Err(reason) => {
                                warn!(
                                    source = %source_name,
                                    detector = detector.name(),
                                    %reason,
                                    "dropping hazard failing validation"
                                );
                            }
                        }
                    }
                }
            }
            info!(detections = hazards.len(), "detection complete");
        }

        let outbreaks = extract_outbreaks(&per_source);

        // Convergences are recomputed from the active sets, not persisted
        let cyclones: Vec<Cyclone> = hazards
            .iter()
            .filter_map(|h| match h {
                Hazard::Cyclone(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        let convergences = detect_convergences(
            &cyclones,
            &outbreaks,
            deps.config.convergence_distance_km,
            now,
        );

        // --- persisting -------------------------------------------------
        let terrain_cells_assessed = per_source
            .iter()
            .flat_map(|(_, observations)| observations.iter())
            .filter(|obs| matches!(obs, RawObservation::TerrainCell(_)))
            .count() as u32;

        let mut run_status = RunStatus::Success;
        if !hazards.is_empty() {
            if let Err(e) = persist_all(deps, &hazards, terrain_cells_assessed, now).await {
                error!(error = %e, "persistence failed after retry, aborting cycle");
                notes.push(format!("persistence: {}", e));
                run_status = RunStatus::Error;
            }
        }

        // Refresh the shared active sets even on a cancelled cycle so
        // readers see the freshest data that did get fetched.
        {
            let mut state = deps.state.write().await;
            if !outbreaks.is_empty() {
                state.current_outbreaks = outbreaks;
            }
            state.last_updated = Some(now);
        }

        // --- alerting ---------------------------------------------------
        // Only after the cycle's detections are durably persisted.
        let mut alerts_sent = 0u32;
        if run_status == RunStatus::Success {
            let alertable = hazards
                .iter()
                .filter(|h| alert_threshold(h))
                .cloned()
                .chain(
                    convergences
                        .iter()
                        .cloned()
                        .map(Hazard::Convergence)
                        .filter(|h| alert_threshold(h)),
                );
            for hazard in alertable {
                // Cancellation lets the in-flight dispatch finish, then stops
                if cancel.is_cancelled() {
                    info!("cancellation observed, stopping alert fanout");
                    break;
                }
                match deps.alerts.dispatch(&hazard, now).await {
                    Ok(alerts) => alerts_sent += alerts.len() as u32,
                    Err(e) => {
                        warn!(hazard = hazard.id(), error = %e, "alert persistence failed");
                        notes.push(format!("alert {}: {}", hazard.id(), e));
                    }
                }
            }
        }

        // --- summarizing ------------------------------------------------
        let duration = started.elapsed().as_secs_f64();
        if duration > CYCLE_BUDGET_SECS as f64 {
            warn!(duration_seconds = duration, "cycle exceeded its soft budget");
        }

        let run = MonitorRun {
            run_time: now,
            data_sources,
            detections_count: hazards.len() as u32,
            alerts_sent,
            duration_seconds: duration,
            status: run_status,
            error: if notes.is_empty() {
                None
            } else {
                Some(notes.join("; "))
            },
        };

        if let Err(e) = deps.store.insert_run(&run) {
            error!(error = %e, "failed to record monitor run");
        }
        if let Err(e) = deps.store.flush() {
            error!(error = %e, "store flush failed at cycle end");
        }

        {
            let mut state = deps.state.write().await;
            state.last_run = Some(run.clone());
            state.cycle_active = false;
        }

        info!(
            status = %run.status,
            detections = run.detections_count,
            alerts = run.alerts_sent,
            duration = format!("{:.1}s", run.duration_seconds),
            "cycle complete"
        );

        run
    }
}

/// Persist detections in adapter order plus the per-cycle assessment rows.
/// One retry per the persistence contract; a second failure aborts.
async fn persist_all(
    deps: &CycleDeps,
    hazards: &[Hazard],
    terrain_cells_assessed: u32,
    now: chrono::DateTime<Utc>,
) -> Result<(), StoreError> {
    for hazard in hazards {
        if let Err(first) = deps.store.insert_detection(hazard) {
            warn!(hazard = hazard.id(), error = %first, "detection insert failed, retrying once");
            deps.store.insert_detection(hazard)?;
        }
    }

    let floods: Vec<_> = hazards
        .iter()
        .filter_map(|h| match h {
            Hazard::Flood(f) => Some(f),
            _ => None,
        })
        .collect();
    if !floods.is_empty() {
        let row = FloodAssessmentRow {
            detection_time: now,
            region: "africa".to_string(),
            bbox_json: serde_json::to_string(&deps.config.basin)?,
            total_flooded_areas: floods.len() as u32,
            total_area_km2: floods.iter().map(|f| f.area_km2).sum(),
            max_severity: floods.iter().map(|f| f.severity).max(),
            geojson: flood_feature_collection(&floods)?,
        };
        deps.store.insert_flood_assessment(&row)?;
    }

    let landslides: Vec<_> = hazards
        .iter()
        .filter_map(|h| match h {
            Hazard::Landslide(l) => Some(l),
            _ => None,
        })
        .collect();
    if !landslides.is_empty() {
        // Nominal DEM cell footprint for the area-at-risk estimate (km^2)
        const CELL_FOOTPRINT_KM2: f64 = 30.0;
        let row = LandslideAssessmentRow {
            assessment_time: now,
            region: "africa".to_string(),
            bbox_json: serde_json::to_string(&deps.config.basin)?,
            rainfall_mm: landslides.iter().map(|l| l.rainfall_mm).fold(0.0, f64::max),
            total_zones: terrain_cells_assessed.max(landslides.len() as u32),
            high_risk_zones: landslides.len() as u32,
            area_at_risk_km2: landslides.len() as f64 * CELL_FOOTPRINT_KM2,
            geojson: landslide_feature_collection(&landslides)?,
        };
        deps.store.insert_landslide_assessment(&row)?;
    }

    Ok(())
}

fn extract_outbreaks(per_source: &[(String, Vec<RawObservation>)]) -> Vec<Outbreak> {
    per_source
        .iter()
        .flat_map(|(_, observations)| observations.iter())
        .filter_map(|obs| match obs {
            RawObservation::OutbreakReport(o) => Some(Outbreak {
                id: o.id.clone(),
                disease: o.disease.clone(),
                country: o.country.clone(),
                location: o.location,
                cases: o.cases,
                deaths: o.deaths,
                severity: o
                    .severity
                    .unwrap_or_else(|| crate::types::OutbreakSeverity::from_counts(o.cases, o.deaths)),
                date: o.date,
                source: "outbreak-surveillance".to_string(),
            }),
            _ => None,
        })
        .collect()
}

fn flood_feature_collection(
    floods: &[&crate::types::Flood],
) -> Result<String, serde_json::Error> {
    let features: Vec<serde_json::Value> = floods
        .iter()
        .map(|f| {
            serde_json::json!({
                "type": "Feature",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [f.polygon.iter().map(|(lon, lat)| vec![*lon, *lat]).collect::<Vec<_>>()],
                },
                "properties": {
                    "id": f.id,
                    "area_km2": f.area_km2,
                    "severity": f.severity,
                    "water_fraction": f.water_fraction,
                }
            })
        })
        .collect();
    serde_json::to_string(&serde_json::json!({
        "type": "FeatureCollection",
        "features": features,
    }))
}

fn landslide_feature_collection(
    landslides: &[&crate::types::LandslideRisk],
) -> Result<String, serde_json::Error> {
    let features: Vec<serde_json::Value> = landslides
        .iter()
        .map(|l| {
            serde_json::json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [l.location.lon, l.location.lat],
                },
                "properties": {
                    "id": l.id,
                    "risk_level": l.risk_level,
                    "risk_score": l.risk_score,
                    "slope_deg": l.slope_deg,
                    "rainfall_mm": l.rainfall_mm,
                }
            })
        })
        .collect();
    serde_json::to_string(&serde_json::json!({
        "type": "FeatureCollection",
        "features": features,
    }))
}
