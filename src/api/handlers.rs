//! Request handlers for the hazard-intelligence API

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;

use crate::alerts::AlertPipeline;
use crate::config::{regions, PipelineConfig};
use crate::geo::BoundingBox;
use crate::monitor::AppState;
use crate::query::QueryEngine;
use crate::store::HazardStore;
use crate::types::{
    AlertType, ChannelKind, Cyclone, Flood, FloodSeverity, GeoPoint, Hazard, LandslideRisk,
    Outbreak, OutbreakSeverity, Recipient, RiskLevel, ThreatLevel,
};
use crate::validation;

/// 1x1 transparent GIF served for tracking-pixel requests
const TRACKING_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

/// Shared state for all handlers
#[derive(Clone)]
pub struct ApiState {
    pub query: Arc<QueryEngine>,
    pub store: HazardStore,
    pub alerts: Arc<AlertPipeline>,
    pub app_state: Arc<RwLock<AppState>>,
    pub config: Arc<PipelineConfig>,
}

// ============================================================================
// Envelope helpers
// ============================================================================

fn json_body(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn bad_request(error: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": error.into() })),
    )
        .into_response()
}

fn not_found(error: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": error.into() })),
    )
        .into_response()
}

fn internal(error: impl Into<String>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": error.into() })),
    )
        .into_response()
}

/// Detection data unavailable and nothing cached: machine-readable 503.
/// No fabricated fallback payload, ever.
fn unavailable(error: impl Into<String>) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "success": false,
            "error": error.into(),
            "source": "unavailable",
        })),
    )
        .into_response()
}

fn parse_bbox(params: &HashMap<String, String>) -> Result<Option<BoundingBox>, Response> {
    match params.get("bbox") {
        Some(raw) => BoundingBox::parse_query(raw)
            .map(Some)
            .map_err(bad_request),
        None => Ok(None),
    }
}

fn parse_i64(params: &HashMap<String, String>, key: &str) -> Result<Option<i64>, Response> {
    match params.get(key) {
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| bad_request(format!("invalid {}: {}", key, raw))),
        None => Ok(None),
    }
}

// ============================================================================
// Hazard queries
// ============================================================================

/// GET /hazards/realtime?hours=H&bbox=minLon,minLat,maxLon,maxLat
pub async fn get_realtime(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let hours = match parse_i64(&params, "hours") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let bbox = match parse_bbox(&params) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let region = params.get("region").map(String::as_str).unwrap_or("africa");

    match state.query.realtime(hours, bbox, region).await {
        Ok(body) => json_body(body),
        Err(e) => unavailable(e.to_string()),
    }
}

/// GET /hazards/cyclones?hours=H
pub async fn get_cyclones(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let hours = match parse_i64(&params, "hours") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.query.cyclones(hours).await {
        Ok(body) => json_body(body),
        Err(e) => unavailable(e.to_string()),
    }
}

/// GET /hazards/floods?days=D&bbox=...
pub async fn get_floods(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let days = match parse_i64(&params, "days") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let bbox = match parse_bbox(&params) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.query.floods(days, bbox).await {
        Ok(body) => json_body(body),
        Err(e) => unavailable(e.to_string()),
    }
}

/// GET /hazards/landslides?bbox=...
pub async fn get_landslides(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let bbox = match parse_bbox(&params) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.query.landslides(bbox).await {
        Ok(body) => json_body(body),
        Err(e) => unavailable(e.to_string()),
    }
}

/// GET /hazards/convergences?hours=H
pub async fn get_convergences(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let hours = match parse_i64(&params, "hours") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.query.convergences(hours).await {
        Ok(body) => json_body(body),
        Err(e) => unavailable(e.to_string()),
    }
}

/// GET /hazards/summary
pub async fn get_summary(State(state): State<ApiState>) -> Response {
    match state.query.summary().await {
        Ok(body) => json_body(body),
        Err(e) => unavailable(e.to_string()),
    }
}

/// GET /hazards/by-region/{region}
pub async fn get_by_region(
    State(state): State<ApiState>,
    Path(region): Path<String>,
) -> Response {
    let Some(bbox) = regions::query_region(&region) else {
        return not_found(format!("region '{}' not found", region));
    };
    match state.query.realtime(None, Some(bbox), &region).await {
        Ok(body) => json_body(body),
        Err(e) => unavailable(e.to_string()),
    }
}

/// GET /hazards/health
pub async fn get_health(State(state): State<ApiState>) -> Response {
    let app_state = state.app_state.read().await;
    let sources = app_state.sources_available.clone();
    Json(json!({
        "status": "healthy",
        "detectors_available": !sources.is_empty(),
        "sources": sources,
        "last_run": app_state.last_run,
        "timestamp": Utc::now(),
    }))
    .into_response()
}

// ============================================================================
// Alert triggers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TestAlertRequest {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// POST /alerts/test - render a synthetic alert without dispatching
pub async fn post_alert_test(
    State(state): State<ApiState>,
    Json(request): Json<TestAlertRequest>,
) -> Response {
    let country = request.country.as_deref().unwrap_or("Mozambique");
    let hazard = sample_hazard(AlertType::Cyclone);

    match state.alerts.preview(&hazard, country) {
        Some((message, recipients)) => Json(json!({
            "success": true,
            "country": country,
            "phone_number": request.phone_number,
            "language": request.language.unwrap_or_else(|| "en".to_string()),
            "recipients": recipients.len(),
            "preview": message.plain,
        }))
        .into_response(),
        None => not_found(format!("country '{}' has no recipient route", country)),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendAlertRequest {
    pub alert_type: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// POST /alerts/send - real dispatch
///
/// With explicit `recipients` (email addresses) the alert goes to them
/// under the "Manual" route; otherwise country routing applies.
pub async fn post_alert_send(
    State(state): State<ApiState>,
    Json(request): Json<SendAlertRequest>,
) -> Response {
    let Ok(alert_type) = request.alert_type.parse::<AlertType>() else {
        return not_found(format!("unknown alert type: {}", request.alert_type));
    };

    let hazard = match hazard_from_payload(alert_type, request.data) {
        Ok(h) => h,
        Err(e) => return bad_request(format!("invalid hazard payload: {}", e)),
    };
    if let Err(reason) = hazard.validate(Utc::now()) {
        return bad_request(reason);
    }

    let now = Utc::now();
    let result = if request.recipients.is_empty() {
        state.alerts.dispatch(&hazard, now).await
    } else {
        let recipients = request
            .recipients
            .iter()
            .map(|address| Recipient {
                name: address.clone(),
                address: address.clone(),
                channel: ChannelKind::Email,
                priority: 1,
            })
            .collect();
        state
            .alerts
            .dispatch_manual(&hazard, recipients, now)
            .await
            .map(|a| vec![a])
    };

    match result {
        Ok(alerts) => {
            let sent: usize = alerts.iter().map(|a| a.sent_count()).sum();
            let failed: usize = alerts.iter().map(|a| a.failed_count()).sum();
            Json(json!({
                "success": true,
                "alert_id": alerts.first().map(|a| a.alert_id.clone()),
                "alerts": alerts.iter().map(|a| a.alert_id.clone()).collect::<Vec<_>>(),
                "sent": sent,
                "failed": failed,
                "preview": alerts
                    .first()
                    .and_then(|a| a.message_variants.get("en"))
                    .map(|m| m.plain.clone()),
            }))
            .into_response()
        }
        Err(e) => internal(e.to_string()),
    }
}

/// GET /alerts/history
pub async fn get_alert_history(State(state): State<ApiState>) -> Response {
    match state.store.alert_history(100) {
        Ok(alerts) => Json(json!({
            "total_alerts": state.store.alert_count(),
            "alerts": alerts,
        }))
        .into_response(),
        Err(e) => internal(e.to_string()),
    }
}

/// GET /alerts/preview/{alert_type}?language=...
pub async fn get_alert_preview(
    State(state): State<ApiState>,
    Path(alert_type): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Ok(parsed) = alert_type.parse::<AlertType>() else {
        return not_found(format!("unknown alert type: {}", alert_type));
    };
    let language = params.get("language").map(String::as_str).unwrap_or("en");

    let hazard = sample_hazard(parsed);
    match state.alerts.preview(&hazard, "Mozambique") {
        Some((message, _)) => Json(json!({
            "alert_type": alert_type,
            "language": language,
            "message": message.plain,
        }))
        .into_response(),
        None => internal("no renderer output"),
    }
}

// ============================================================================
// Tracking pixel
// ============================================================================

/// GET /track/{tracking_id}.png - serve the pixel and record the open.
///
/// The pixel is always returned, even for unknown ids, so mail clients
/// never see a broken image.
pub async fn get_tracking_pixel(
    State(state): State<ApiState>,
    Path(pixel): Path<String>,
    headers: HeaderMap,
) -> Response {
    let tracking_id = pixel.strip_suffix(".png").unwrap_or(&pixel);

    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());
    let ua = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    if let Err(e) = state.store.record_open(tracking_id, Utc::now(), ip, ua) {
        warn!(tracking_id, error = %e, "tracking open not recorded");
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, max-age=0"),
        ],
        TRACKING_GIF.to_vec(),
    )
        .into_response()
}

// ============================================================================
// Validation
// ============================================================================

/// GET /validation/stats
pub async fn get_validation_stats(State(state): State<ApiState>) -> Response {
    match validation::stats(&state.store) {
        Ok(stats) => Json(json!({
            "total_alerts": stats.total_alerts,
            "opened_alerts": stats.opened_alerts,
            "validated_alerts": stats.validated_alerts,
            "open_rate": stats.open_rate(),
            "validated_rate": stats.validated_rate(),
            "mean_lead_time_hours": stats.mean_lead_time_hours,
        }))
        .into_response(),
        Err(e) => internal(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidationRecordRequest {
    pub alert_id: String,
    pub event_type: String,
    pub event_date: DateTime<Utc>,
    #[serde(default)]
    pub actual_impact: Option<String>,
}

/// POST /validation/record - attach a ground-truth event to an alert
pub async fn post_validation_record(
    State(state): State<ApiState>,
    Json(request): Json<ValidationRecordRequest>,
) -> Response {
    match validation::record_event(
        &state.store,
        &request.alert_id,
        &request.event_type,
        request.event_date,
        request.actual_impact,
    ) {
        Ok(event) => Json(json!({ "success": true, "event": event })).into_response(),
        Err(validation::ValidationError::UnknownAlert(id)) => {
            not_found(format!("unknown alert: {}", id))
        }
        Err(e) => internal(e.to_string()),
    }
}

// ============================================================================
// Sample hazards for the admin triggers
// ============================================================================

fn hazard_from_payload(alert_type: AlertType, data: serde_json::Value) -> Result<Hazard, String> {
    match alert_type {
        AlertType::Cyclone => serde_json::from_value::<Cyclone>(data)
            .map(Hazard::Cyclone)
            .map_err(|e| e.to_string()),
        AlertType::Flood => serde_json::from_value::<Flood>(data)
            .map(Hazard::Flood)
            .map_err(|e| e.to_string()),
        AlertType::Landslide => serde_json::from_value::<LandslideRisk>(data)
            .map(Hazard::Landslide)
            .map_err(|e| e.to_string()),
        AlertType::Convergence => serde_json::from_value::<crate::types::Convergence>(data)
            .map(Hazard::Convergence)
            .map_err(|e| e.to_string()),
        AlertType::Outbreak => {
            Err("outbreak alerts are dispatched via convergence detection".to_string())
        }
    }
}

/// Fixture hazards used only by the explicit test/preview triggers
pub fn sample_hazard(alert_type: AlertType) -> Hazard {
    let now = Utc::now();
    match alert_type {
        AlertType::Flood => Hazard::Flood(Flood {
            id: "preview-flood".to_string(),
            polygon: vec![
                (39.2, -19.8),
                (39.4, -19.8),
                (39.4, -20.0),
                (39.2, -20.0),
                (39.2, -19.8),
            ],
            location: GeoPoint::new(-19.9, 39.3),
            area_km2: 45.3,
            severity: FloodSeverity::Major,
            water_fraction: Some(0.92),
            detection_time: now,
            source: "sar-flood".to_string(),
            confidence: 0.75,
        }),
        AlertType::Landslide => Hazard::Landslide(LandslideRisk {
            id: "preview-landslide".to_string(),
            location: GeoPoint::new(-19.5, 34.2),
            risk_level: RiskLevel::Extreme,
            risk_score: 0.89,
            slope_deg: 35.0,
            rainfall_mm: 180.0,
            reason: "very heavy rainfall (180 mm/24h) on very steep slope (35 deg)".to_string(),
            recommended_action: "Evacuate slope-adjacent settlements; close hillside roads"
                .to_string(),
            detection_time: now,
            source: "dem-rainfall".to_string(),
            confidence: 0.89,
        }),
        AlertType::Convergence | AlertType::Outbreak => {
            let cyclone = sample_cyclone(now);
            Hazard::Convergence(crate::types::Convergence {
                id: "preview-convergence".to_string(),
                cyclone: cyclone.clone(),
                outbreak: Outbreak {
                    id: "preview-outbreak".to_string(),
                    disease: "Cholera".to_string(),
                    country: "Madagascar".to_string(),
                    location: GeoPoint::new(-18.9, 47.5),
                    cases: 156,
                    deaths: 22,
                    severity: OutbreakSeverity::High,
                    date: now,
                    source: "outbreak-surveillance".to_string(),
                },
                distance_km: 71.4,
                risk_score: 0.85,
                alert_priority: crate::types::AlertPriority::High,
                detection_time: now,
                location: GeoPoint::new(-18.9, 47.5),
            })
        }
        _ => Hazard::Cyclone(sample_cyclone(now)),
    }
}

fn sample_cyclone(now: DateTime<Utc>) -> Cyclone {
    Cyclone {
        id: "preview-cyclone".to_string(),
        name: Some("Test System".to_string()),
        location: GeoPoint::new(-19.85, 34.84),
        detection_time: now,
        source: "reanalysis".to_string(),
        confidence: 0.9,
        threat_level: ThreatLevel::Cat2,
        max_wind_kt: Some(87.5),
        min_pressure_hpa: Some(955.0),
        track_probability: Some(0.85),
        track: Vec::new(),
    }
}
