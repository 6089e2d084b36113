//! Alert types: recipients, rendered messages, delivery outcomes

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Kind of hazard an alert was raised for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Cyclone,
    Flood,
    Landslide,
    Convergence,
    Outbreak,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::Cyclone => write!(f, "cyclone"),
            AlertType::Flood => write!(f, "flood"),
            AlertType::Landslide => write!(f, "landslide"),
            AlertType::Convergence => write!(f, "convergence"),
            AlertType::Outbreak => write!(f, "outbreak"),
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cyclone" => Ok(AlertType::Cyclone),
            "flood" => Ok(AlertType::Flood),
            "landslide" => Ok(AlertType::Landslide),
            "convergence" => Ok(AlertType::Convergence),
            "outbreak" => Ok(AlertType::Outbreak),
            other => Err(format!("unknown alert type: {}", other)),
        }
    }
}

/// Delivery channel for a recipient
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    Webhook,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Sms => write!(f, "sms"),
            ChannelKind::Webhook => write!(f, "webhook"),
        }
    }
}

/// Institutional alert recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// Institution name, e.g. "INAM Forecasting Desk"
    pub name: String,
    /// Channel-specific address: email address, phone number, or URL
    pub address: String,
    pub channel: ChannelKind,
    /// 1 = primary contact, 2 = secondary
    pub priority: u8,
}

/// Per-recipient delivery outcome recorded on the alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed { error: String },
    /// Channel credentials were absent; delivery skipped without error
    NoProvider,
}

impl DeliveryStatus {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryStatus::Sent)
    }
}

/// One recipient's outcome within an alert fanout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub recipient: Recipient,
    #[serde(flatten)]
    pub status: DeliveryStatus,
    /// Total send attempts including retries
    pub attempts: u32,
}

/// Message rendered for one language
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderedMessage {
    pub subject: String,
    pub plain: String,
    /// HTML body with the embedded tracking-pixel reference
    #[serde(default)]
    pub html: Option<String>,
}

/// Dispatched alert with delivery tracking bookkeeping.
///
/// Exactly one alert exists per (hazard, country) dispatch; `opened_at`
/// and `validated` are updated out-of-band from tracking-pixel opens and
/// ground-truth reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub hazard_id: String,
    pub country: String,
    pub location: GeoPoint,
    pub subject: String,
    /// Rendered messages keyed by language tag ("en", plus any extra locales)
    pub message_variants: BTreeMap<String, RenderedMessage>,
    pub recipients: Vec<RecipientOutcome>,
    pub sent_at: DateTime<Utc>,
    /// 16 lowercase hex characters linking pixel opens back to this alert
    pub tracking_id: String,
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub validated: bool,
    #[serde(default)]
    pub validation_notes: Option<String>,
}

impl Alert {
    pub fn sent_count(&self) -> usize {
        self.recipients.iter().filter(|r| r.status.is_sent()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| matches!(r.status, DeliveryStatus::Failed { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_type_parse() {
        assert_eq!("cyclone".parse::<AlertType>().unwrap(), AlertType::Cyclone);
        assert_eq!("CONVERGENCE".parse::<AlertType>().unwrap(), AlertType::Convergence);
        assert!("earthquake".parse::<AlertType>().is_err());
    }

    #[test]
    fn test_delivery_status_serde_tag() {
        let outcome = RecipientOutcome {
            recipient: Recipient {
                name: "INAM".to_string(),
                address: "ops@inam.example".to_string(),
                channel: ChannelKind::Email,
                priority: 1,
            },
            status: DeliveryStatus::Failed {
                error: "provider_timeout".to_string(),
            },
            attempts: 3,
        };
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["error"], "provider_timeout");
    }
}
