//! Alert fanout behavior: partial channel failure, country routing,
//! missing providers

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use afrostorm::alerts::{
    AlertChannel, AlertPipeline, ChannelError, ChannelSet, EnglishTemplateRenderer,
};
use afrostorm::store::HazardStore;
use afrostorm::types::{
    ChannelKind, Cyclone, DeliveryStatus, GeoPoint, Hazard, Recipient, RenderedMessage,
    ThreatLevel,
};

/// Email channel that fails (as a provider timeout) for listed addresses
#[derive(Clone)]
struct FlakyEmailChannel {
    failing: Vec<String>,
    sent_to: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AlertChannel for FlakyEmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        recipient: &Recipient,
        _message: &RenderedMessage,
    ) -> Result<(), ChannelError> {
        if self.failing.contains(&recipient.address) {
            return Err(ChannelError::Timeout);
        }
        self.sent_to.lock().unwrap().push(recipient.address.clone());
        Ok(())
    }
}

fn cyclone_at(lat: f64, lon: f64) -> Hazard {
    Hazard::Cyclone(Cyclone {
        id: "cyclone-2024011500-000".to_string(),
        name: None,
        location: GeoPoint::new(lat, lon),
        detection_time: Utc::now(),
        source: "test".to_string(),
        confidence: 0.9,
        threat_level: ThreatLevel::Cat2,
        max_wind_kt: Some(87.5),
        min_pressure_hpa: Some(955.0),
        track_probability: None,
        track: Vec::new(),
    })
}

fn pipeline_with(
    store: HazardStore,
    channel: FlakyEmailChannel,
) -> AlertPipeline {
    AlertPipeline::new(
        store,
        ChannelSet::new().with(Arc::new(channel)),
        Arc::new(EnglishTemplateRenderer),
        "http://localhost:8080/track".to_string(),
        6,
    )
}

fn email(name: &str, address: &str) -> Recipient {
    Recipient {
        name: name.to_string(),
        address: address.to_string(),
        channel: ChannelKind::Email,
        priority: 1,
    }
}

#[tokio::test(start_paused = true)]
async fn test_partial_channel_failure_records_both_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let store = HazardStore::open(dir.path().join("hazards.db")).unwrap();
    let pipeline = pipeline_with(
        store.clone(),
        FlakyEmailChannel {
            failing: vec!["down@example.org".to_string()],
            sent_to: Arc::new(Mutex::new(Vec::new())),
        },
    );

    let alert = pipeline
        .dispatch_manual(
            &cyclone_at(-19.85, 34.84),
            vec![
                email("Primary Desk", "ok@example.org"),
                email("Backup Desk", "down@example.org"),
            ],
            Utc::now(),
        )
        .await
        .unwrap();

    // One alert row exists regardless of per-recipient outcomes
    assert!(store.get_alert(&alert.alert_id).unwrap().is_some());
    assert_eq!(alert.recipients.len(), 2);

    assert_eq!(alert.recipients[0].status, DeliveryStatus::Sent);
    assert_eq!(alert.recipients[0].attempts, 1);

    match &alert.recipients[1].status {
        DeliveryStatus::Failed { error } => assert_eq!(error, "provider_timeout"),
        other => panic!("expected failure, got {:?}", other),
    }
    // Initial attempt plus two retries
    assert_eq!(alert.recipients[1].attempts, 3);

    assert_eq!(alert.sent_count(), 1);
    assert_eq!(alert.failed_count(), 1);
}

#[tokio::test]
async fn test_routing_mozambique_and_regional() {
    let dir = tempfile::tempdir().unwrap();
    let store = HazardStore::open(dir.path().join("hazards.db")).unwrap();
    let sent_to = Arc::new(Mutex::new(Vec::new()));
    let pipeline = pipeline_with(
        store.clone(),
        FlakyEmailChannel {
            failing: Vec::new(),
            sent_to: sent_to.clone(),
        },
    );

    let alerts = pipeline
        .dispatch(&cyclone_at(-22.0, 35.3), Utc::now())
        .await
        .unwrap();

    let countries: Vec<&str> = alerts.iter().map(|a| a.country.as_str()).collect();
    assert_eq!(countries, vec!["Mozambique", "Regional"]);

    let sent = sent_to.lock().unwrap().clone();
    assert!(sent.contains(&"previsao@inam.gov.mz".to_string()));
    assert!(sent.contains(&"afrooutbreak@who.int".to_string()));
}

#[tokio::test]
async fn test_hazard_outside_all_routes_dispatches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = HazardStore::open(dir.path().join("hazards.db")).unwrap();
    let pipeline = pipeline_with(
        store.clone(),
        FlakyEmailChannel {
            failing: Vec::new(),
            sent_to: Arc::new(Mutex::new(Vec::new())),
        },
    );

    // Gulf of Guinea: outside every country box and outside the basin
    let alerts = pipeline
        .dispatch(&cyclone_at(0.0, 0.0), Utc::now())
        .await
        .unwrap();
    assert!(alerts.is_empty());
    assert_eq!(store.alert_count(), 0);
}

#[tokio::test]
async fn test_unregistered_channels_yield_no_provider() {
    let dir = tempfile::tempdir().unwrap();
    let store = HazardStore::open(dir.path().join("hazards.db")).unwrap();
    let pipeline = pipeline_with(
        store.clone(),
        FlakyEmailChannel {
            failing: Vec::new(),
            sent_to: Arc::new(Mutex::new(Vec::new())),
        },
    );

    // Mozambique's route includes an SMS recipient; only email is registered
    let alerts = pipeline
        .dispatch(&cyclone_at(-22.0, 35.3), Utc::now())
        .await
        .unwrap();
    let mozambique = alerts.iter().find(|a| a.country == "Mozambique").unwrap();

    let sms_outcome = mozambique
        .recipients
        .iter()
        .find(|r| r.recipient.channel == ChannelKind::Sms)
        .unwrap();
    assert_eq!(sms_outcome.status, DeliveryStatus::NoProvider);

    // Missing providers never fail the dispatch
    assert!(mozambique.sent_count() > 0);
}
