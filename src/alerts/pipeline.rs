//! Alert dispatch: routing, dedup, fanout with retries, persistence

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use tracing::{info, warn};

use super::channels::{ChannelError, ChannelSet};
use super::renderer::MessageRenderer;
use super::tracking_id;
use crate::config::defaults::DISPATCH_BACKOFF_SECS;
use crate::config::regions::{self, CountryRoute};
use crate::store::{HazardStore, StoreError};
use crate::types::{
    Alert, AlertPriority, AlertType, DeliveryStatus, FloodSeverity, Hazard, Recipient,
    RecipientOutcome, RenderedMessage, RiskLevel, ThreatLevel,
};

/// Does this detection cross the alert threshold?
///
/// Below-threshold hazards are persisted and queryable but do not fan out.
pub fn alert_threshold(hazard: &Hazard) -> bool {
    match hazard {
        Hazard::Cyclone(c) => c.threat_level >= ThreatLevel::TropicalStorm,
        Hazard::Flood(f) => f.severity >= FloodSeverity::Major,
        Hazard::Landslide(l) => l.risk_level >= RiskLevel::Extreme,
        Hazard::Convergence(v) => {
            v.alert_priority >= AlertPriority::High || v.risk_score > 0.7
        }
    }
}

fn alert_type_of(hazard: &Hazard) -> AlertType {
    match hazard {
        Hazard::Cyclone(_) => AlertType::Cyclone,
        Hazard::Flood(_) => AlertType::Flood,
        Hazard::Landslide(_) => AlertType::Landslide,
        Hazard::Convergence(_) => AlertType::Convergence,
    }
}

fn alert_id_prefix(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::Cyclone => "CYC",
        AlertType::Flood => "FLD",
        AlertType::Landslide => "LSL",
        AlertType::Convergence => "CONV",
        AlertType::Outbreak => "OUT",
    }
}

/// Alert pipeline: owns the channel set and renderer, writes through the
/// hazard store.
pub struct AlertPipeline {
    store: HazardStore,
    channels: ChannelSet,
    renderer: Arc<dyn MessageRenderer>,
    pixel_base: String,
    dedup_window: ChronoDuration,
}

impl AlertPipeline {
    pub fn new(
        store: HazardStore,
        channels: ChannelSet,
        renderer: Arc<dyn MessageRenderer>,
        pixel_base: String,
        dedup_hours: i64,
    ) -> Self {
        Self {
            store,
            channels,
            renderer,
            pixel_base,
            dedup_window: ChronoDuration::hours(dedup_hours),
        }
    }

    /// Dispatch one hazard to every affected country route.
    ///
    /// Returns the alerts persisted (one per routed country that was not
    /// suppressed by the dedup window). A hazard outside all routes
    /// produces no alert.
    pub async fn dispatch(
        &self,
        hazard: &Hazard,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, StoreError> {
        let routes = regions::registry().route(hazard.location());
        if routes.is_empty() {
            info!(
                hazard = hazard.id(),
                location = %hazard.location(),
                "hazard outside all alert routes, nothing to dispatch"
            );
            return Ok(Vec::new());
        }

        let mut alerts = Vec::new();
        for route in routes {
            if let Some(alert) = self.dispatch_to_route(hazard, route, now).await? {
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }

    /// Dry-run fanout for one country: renders the messages and resolves
    /// recipients without sending or persisting anything.
    pub fn preview(&self, hazard: &Hazard, country: &str) -> Option<(RenderedMessage, Vec<Recipient>)> {
        let route = regions::registry().by_country(country)?;
        let pixel = format!("{}/{}.png", self.pixel_base, "0000000000000000");
        let variants = self.renderer.render(hazard, &route.country, &pixel);
        let en = variants.get("en")?.clone();
        Some((en, route.recipients.clone()))
    }

    /// Dispatch to an explicit recipient list instead of the routing
    /// registry (the `/alerts/send` administrative trigger). The alert is
    /// persisted under the pseudo-country "Manual" with the usual
    /// tracking bookkeeping; the dedup window does not apply.
    pub async fn dispatch_manual(
        &self,
        hazard: &Hazard,
        recipients: Vec<Recipient>,
        now: DateTime<Utc>,
    ) -> Result<Alert, StoreError> {
        let alert_type = alert_type_of(hazard);
        let tracking = tracking_id(hazard.id(), "Manual", now);
        let pixel_url = format!("{}/{}.png", self.pixel_base, tracking);
        let variants = self.renderer.render(hazard, "Manual", &pixel_url);
        let message = variants
            .get("en")
            .cloned()
            .unwrap_or_else(|| RenderedMessage {
                subject: format!("{} alert", alert_type),
                plain: String::new(),
                html: None,
            });

        let sends = recipients.iter().map(|recipient| {
            let message = message.clone();
            async move {
                let outcome = self.send_with_retries(recipient, &message).await;
                RecipientOutcome {
                    recipient: recipient.clone(),
                    status: outcome.0,
                    attempts: outcome.1,
                }
            }
        });
        let outcomes = join_all(sends).await;

        let alert = Alert {
            alert_id: format!("{}-{}", alert_id_prefix(alert_type), tracking),
            alert_type,
            hazard_id: hazard.id().to_string(),
            country: "Manual".to_string(),
            location: hazard.location(),
            subject: message.subject.clone(),
            message_variants: variants,
            recipients: outcomes,
            sent_at: now,
            tracking_id: tracking,
            opened_at: None,
            validated: false,
            validation_notes: None,
        };
        self.store.insert_alert(&alert)?;
        Ok(alert)
    }

    async fn dispatch_to_route(
        &self,
        hazard: &Hazard,
        route: &CountryRoute,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, StoreError> {
        // Sliding dedup window per (hazard, country)
        if let Some(last) = self.store.last_alert_time(hazard.id(), &route.country)? {
            if now - last < self.dedup_window {
                info!(
                    hazard = hazard.id(),
                    country = %route.country,
                    last_sent = %last,
                    "alert suppressed by dedup window"
                );
                return Ok(None);
            }
        }

        let alert_type = alert_type_of(hazard);
        let tracking = tracking_id(hazard.id(), &route.country, now);
        let pixel_url = format!("{}/{}.png", self.pixel_base, tracking);
        let variants = self.renderer.render(hazard, &route.country, &pixel_url);
        let message = match variants.get("en") {
            Some(m) => m.clone(),
            None => {
                warn!(hazard = hazard.id(), "renderer produced no English variant");
                return Ok(None);
            }
        };

        // Fan out to every recipient independently
        let sends = route.recipients.iter().map(|recipient| {
            let message = message.clone();
            async move {
                let outcome = self.send_with_retries(recipient, &message).await;
                RecipientOutcome {
                    recipient: recipient.clone(),
                    status: outcome.0,
                    attempts: outcome.1,
                }
            }
        });
        let outcomes = join_all(sends).await;

        let alert = Alert {
            alert_id: format!("{}-{}", alert_id_prefix(alert_type), tracking),
            alert_type,
            hazard_id: hazard.id().to_string(),
            country: route.country.clone(),
            location: hazard.location(),
            subject: message.subject.clone(),
            message_variants: variants,
            recipients: outcomes,
            sent_at: now,
            tracking_id: tracking,
            opened_at: None,
            validated: false,
            validation_notes: None,
        };

        // Persisted regardless of per-recipient success
        self.store.insert_alert(&alert)?;

        info!(
            alert_id = %alert.alert_id,
            country = %alert.country,
            sent = alert.sent_count(),
            failed = alert.failed_count(),
            "alert dispatched"
        );

        Ok(Some(alert))
    }

    /// Send to one recipient with at most 2 retries (1 s then 5 s backoff),
    /// all within the current dispatch.
    async fn send_with_retries(
        &self,
        recipient: &Recipient,
        message: &RenderedMessage,
    ) -> (DeliveryStatus, u32) {
        let channel = match self.channels.get(recipient.channel) {
            Some(c) => c,
            None => {
                warn!(
                    recipient = %recipient.name,
                    channel = %recipient.channel,
                    "no provider configured for channel"
                );
                return (DeliveryStatus::NoProvider, 0);
            }
        };

        let mut attempts = 0u32;
        let mut last_error = String::new();
        for backoff in std::iter::once(None).chain(DISPATCH_BACKOFF_SECS.iter().map(Some)) {
            if let Some(secs) = backoff {
                tokio::time::sleep(std::time::Duration::from_secs(*secs)).await;
            }
            attempts += 1;
            match channel.send(recipient, message).await {
                Ok(()) => return (DeliveryStatus::Sent, attempts),
                Err(ChannelError::Timeout) => {
                    last_error = "provider_timeout".to_string();
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            warn!(
                recipient = %recipient.name,
                attempt = attempts,
                error = %last_error,
                "delivery attempt failed"
            );
        }

        (DeliveryStatus::Failed { error: last_error }, attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Convergence, Cyclone, GeoPoint, LandslideRisk, Outbreak, OutbreakSeverity};

    fn cyclone(threat: ThreatLevel) -> Hazard {
        Hazard::Cyclone(Cyclone {
            id: "c".to_string(),
            name: None,
            location: GeoPoint::new(-19.85, 34.84),
            detection_time: Utc::now(),
            source: "test".to_string(),
            confidence: 0.8,
            threat_level: threat,
            max_wind_kt: None,
            min_pressure_hpa: None,
            track_probability: None,
            track: Vec::new(),
        })
    }

    #[test]
    fn test_threshold_cyclone() {
        assert!(!alert_threshold(&cyclone(ThreatLevel::TropicalDepression)));
        assert!(alert_threshold(&cyclone(ThreatLevel::TropicalStorm)));
        assert!(alert_threshold(&cyclone(ThreatLevel::Cat5)));
    }

    #[test]
    fn test_threshold_landslide_extreme_only() {
        let landslide = |level, score| {
            Hazard::Landslide(LandslideRisk {
                id: "l".to_string(),
                location: GeoPoint::new(-19.5, 34.2),
                risk_level: level,
                risk_score: score,
                slope_deg: 36.0,
                rainfall_mm: 420.0,
                reason: String::new(),
                recommended_action: String::new(),
                detection_time: Utc::now(),
                source: "test".to_string(),
                confidence: score,
            })
        };
        assert!(!alert_threshold(&landslide(RiskLevel::High, 0.6)));
        assert!(alert_threshold(&landslide(RiskLevel::Extreme, 0.9)));
    }

    #[test]
    fn test_threshold_convergence_by_priority_or_score() {
        let convergence = |priority, score| {
            let Hazard::Cyclone(c) = cyclone(ThreatLevel::TropicalStorm) else {
                unreachable!()
            };
            Hazard::Convergence(Convergence {
                id: "conv-c-o".to_string(),
                cyclone: c,
                outbreak: Outbreak {
                    id: "o".to_string(),
                    disease: "Cholera".to_string(),
                    country: "Madagascar".to_string(),
                    location: GeoPoint::new(-18.9, 47.5),
                    cases: 156,
                    deaths: 22,
                    severity: OutbreakSeverity::High,
                    date: Utc::now(),
                    source: "test".to_string(),
                },
                distance_km: 300.0,
                risk_score: score,
                alert_priority: priority,
                detection_time: Utc::now(),
                location: GeoPoint::new(-18.9, 47.5),
            })
        };
        assert!(alert_threshold(&convergence(AlertPriority::High, 0.5)));
        assert!(alert_threshold(&convergence(AlertPriority::Medium, 0.75)));
        assert!(!alert_threshold(&convergence(AlertPriority::Medium, 0.5)));
    }
}
