//! Disease outbreak surveillance adapter (regional health office reporting)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::{FetchWindow, HazardSource, OutbreakObs, RawObservation, SourceBatch, SourceError};
use crate::types::{GeoPoint, OutbreakSeverity};

/// Fetches normalized outbreak records from the surveillance provider.
///
/// Severity is taken from the provider when present; otherwise derived
/// from case counts and the case fatality ratio during detection.
pub struct OutbreakSurveillanceSource {
    client: reqwest::Client,
    base_url: String,
}

impl OutbreakSurveillanceSource {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[derive(Debug, Deserialize)]
struct OutbreakPayload {
    #[serde(default)]
    outbreaks: Vec<OutbreakRecord>,
}

#[derive(Debug, Deserialize)]
struct OutbreakRecord {
    #[serde(default)]
    id: Option<String>,
    disease: String,
    country: String,
    /// [lon, lat] per the provider's GeoJSON habit
    coordinates: (f64, f64),
    #[serde(default)]
    cases: u32,
    #[serde(default)]
    deaths: u32,
    #[serde(default)]
    severity: Option<String>,
    report_date: DateTime<Utc>,
}

fn parse_severity(raw: &str) -> Option<OutbreakSeverity> {
    match raw.to_ascii_lowercase().as_str() {
        "low" => Some(OutbreakSeverity::Low),
        "medium" => Some(OutbreakSeverity::Medium),
        "high" => Some(OutbreakSeverity::High),
        _ => None,
    }
}

fn map_payload(payload: OutbreakPayload, window: &FetchWindow) -> Vec<RawObservation> {
    payload
        .outbreaks
        .into_iter()
        .enumerate()
        .filter_map(|(idx, rec)| {
            let (lon, lat) = rec.coordinates;
            let location = GeoPoint::new(lat, lon);
            if !location.is_valid() {
                warn!(
                    disease = %rec.disease,
                    country = %rec.country,
                    "dropping outbreak with invalid coordinates"
                );
                return None;
            }
            let id = rec
                .id
                .unwrap_or_else(|| format!("who-{}-{:03}", window.id_stamp(), idx));
            Some(RawObservation::OutbreakReport(OutbreakObs {
                id,
                disease: rec.disease,
                country: rec.country,
                location,
                cases: rec.cases,
                deaths: rec.deaths,
                severity: rec.severity.as_deref().and_then(parse_severity),
                date: rec.report_date,
            }))
        })
        .collect()
}

#[async_trait]
impl HazardSource for OutbreakSurveillanceSource {
    fn name(&self) -> &'static str {
        "outbreak-surveillance"
    }

    /// Surveillance bulletins trail events by days to weeks
    fn lookback_hours(&self) -> i64 {
        30 * 24
    }

    async fn fetch(&self, window: FetchWindow) -> Result<SourceBatch, SourceError> {
        let url = format!("{}/outbreaks", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[
                ("region", "AFRO".to_string()),
                ("start_date", window.start.to_rfc3339()),
                ("end_date", window.end.to_rfc3339()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(source = self.name(), error = %e, "surveillance provider unreachable");
                return Ok(SourceBatch::degraded(format!(
                    "outbreak-surveillance: {}",
                    e
                )));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            return Ok(SourceBatch::degraded(format!(
                "outbreak-surveillance: HTTP {}",
                status
            )));
        }

        match response.json::<OutbreakPayload>().await {
            Ok(payload) => Ok(SourceBatch::of(map_payload(payload, &window))),
            Err(e) => Ok(SourceBatch::degraded(format!(
                "outbreak-surveillance: bad payload: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_payload_parses_and_filters() {
        let json = r#"{
            "outbreaks": [
                {
                    "disease": "Cholera",
                    "country": "Madagascar",
                    "coordinates": [47.5, -18.9],
                    "cases": 156,
                    "deaths": 22,
                    "severity": "high",
                    "report_date": "2024-01-14T00:00:00Z"
                },
                {
                    "disease": "Mpox",
                    "country": "DRC",
                    "coordinates": [200.0, -4.3],
                    "cases": 127,
                    "deaths": 3,
                    "report_date": "2024-01-13T00:00:00Z"
                }
            ]
        }"#;
        let payload: OutbreakPayload = serde_json::from_str(json).unwrap();
        let now: DateTime<Utc> = "2024-01-15T06:00:00Z".parse().unwrap();
        let obs = map_payload(payload, &FetchWindow::last_hours(now, 24 * 30));
        assert_eq!(obs.len(), 1);
        match &obs[0] {
            RawObservation::OutbreakReport(o) => {
                assert_eq!(o.disease, "Cholera");
                assert_eq!(o.severity, Some(OutbreakSeverity::High));
                assert_eq!(o.location.lat, -18.9);
                assert_eq!(o.location.lon, 47.5);
            }
            other => panic!("unexpected observation: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_severity_left_for_derivation() {
        assert_eq!(parse_severity("catastrophic"), None);
        assert_eq!(parse_severity("HIGH"), Some(OutbreakSeverity::High));
    }
}
