//! Alert pipeline: country routing, rendering, multi-channel dispatch,
//! deduplication and tracking bookkeeping
//!
//! Flow for one hazard event:
//! 1. Resolve affected countries from the static routing registry
//! 2. Skip (hazard, country) pairs alerted within the dedup window
//! 3. Generate the tracking id and render message variants
//! 4. Dispatch to every recipient, with bounded retries per recipient
//! 5. Persist exactly one alert row per (hazard, country)

mod channels;
mod pipeline;
mod renderer;

pub use channels::{AlertChannel, ChannelError, ChannelSet, SmsChannel, SmtpChannel, WebhookChannel};
pub use pipeline::{alert_threshold, AlertPipeline};
pub use renderer::{EnglishTemplateRenderer, MessageRenderer};

use chrono::{DateTime, Utc};

/// Opaque 16-character token linking a tracking-pixel open back to its
/// alert: the md5 of `hazard_id | country | timestamp`, truncated.
pub fn tracking_id(hazard_id: &str, country: &str, now: DateTime<Utc>) -> String {
    let digest = md5::compute(format!("{}|{}|{}", hazard_id, country, now.to_rfc3339()));
    format!("{:x}", digest).chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_id_shape() {
        let now: DateTime<Utc> = "2024-01-15T06:00:00Z".parse().unwrap();
        let id = tracking_id("cyclone-2024011500-000", "Mozambique", now);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_tracking_id_varies_by_country_and_time() {
        let now: DateTime<Utc> = "2024-01-15T06:00:00Z".parse().unwrap();
        let later = now + chrono::Duration::hours(6);
        let a = tracking_id("h", "Mozambique", now);
        let b = tracking_id("h", "Madagascar", now);
        let c = tracking_id("h", "Mozambique", later);
        assert_ne!(a, b);
        assert_ne!(a, c);
        // Deterministic for identical inputs
        assert_eq!(a, tracking_id("h", "Mozambique", now));
    }
}
