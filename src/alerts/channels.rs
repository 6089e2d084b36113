//! Delivery channels: SMTP email, HTTP SMS gateway, webhooks
//!
//! Every channel is behind the [`AlertChannel`] trait so dispatch code and
//! tests never depend on a concrete provider. A channel whose credentials
//! are absent is simply not registered; dispatch then records
//! `no_provider` for its recipients instead of failing the fanout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::{SmsConfig, SmtpConfig};
use crate::types::{ChannelKind, Recipient, RenderedMessage};

/// Channel-level delivery errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("provider_timeout")]
    Timeout,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid address {0}")]
    BadAddress(String),
}

/// One delivery channel (email, SMS, webhook)
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Deliver one rendered message to one recipient. Success means the
    /// provider acknowledged within the channel timeout.
    async fn send(
        &self,
        recipient: &Recipient,
        message: &RenderedMessage,
    ) -> Result<(), ChannelError>;
}

// ============================================================================
// SMTP
// ============================================================================

/// Email delivery over authenticated SMTP
pub struct SmtpChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpChannel {
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self, ChannelError> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| ChannelError::Provider(e.to_string()))?
            .port(config.port)
            .credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();
        Ok(Self {
            mailer,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl AlertChannel for SmtpChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &RenderedMessage,
    ) -> Result<(), ChannelError> {
        let from = self
            .from
            .parse()
            .map_err(|_| ChannelError::BadAddress(self.from.clone()))?;
        let to = recipient
            .address
            .parse()
            .map_err(|_| ChannelError::BadAddress(recipient.address.clone()))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                message.plain.clone(),
                message.html.clone().unwrap_or_else(|| message.plain.clone()),
            ))
            .map_err(|e| ChannelError::Provider(e.to_string()))?;

        self.mailer.send(email).await.map_err(|e| {
            if e.to_string().contains("timed out") {
                ChannelError::Timeout
            } else {
                ChannelError::Provider(e.to_string())
            }
        })?;

        debug!(to = %recipient.address, "email accepted by SMTP relay");
        Ok(())
    }
}

// ============================================================================
// SMS gateway
// ============================================================================

/// SMS via an HTTP gateway (Africa's Talking compatible shape)
pub struct SmsChannel {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl SmsChannel {
    pub fn new(config: &SmsConfig, timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl AlertChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &RenderedMessage,
    ) -> Result<(), ChannelError> {
        // SMS carries the plain body only, clipped to a sane multipart size
        let body: String = message.plain.chars().take(480).collect();
        let response = self
            .client
            .post(&self.api_url)
            .header("apiKey", &self.api_key)
            .json(&json!({ "to": recipient.address, "message": body }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChannelError::Timeout
                } else {
                    ChannelError::Provider(e.to_string())
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Provider(format!(
                "gateway HTTP {}",
                response.status()
            )))
        }
    }
}

// ============================================================================
// Webhook
// ============================================================================

/// JSON POST to an institutional webhook endpoint
pub struct WebhookChannel {
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Provider(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(
        &self,
        recipient: &Recipient,
        message: &RenderedMessage,
    ) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&recipient.address)
            .json(&json!({
                "subject": message.subject,
                "message": message.plain,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChannelError::Timeout
                } else {
                    ChannelError::Provider(e.to_string())
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Provider(format!(
                "webhook HTTP {}",
                response.status()
            )))
        }
    }
}

// ============================================================================
// Channel set
// ============================================================================

/// Registered channels keyed by kind. Unregistered kinds yield
/// `no_provider` outcomes at dispatch time.
#[derive(Clone, Default)]
pub struct ChannelSet {
    channels: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the production channel set from configuration. Channels with
    /// missing credentials are left unregistered.
    pub fn from_config(config: &crate::config::PipelineConfig) -> Self {
        let mut set = Self::new();

        if let Some(smtp) = &config.smtp {
            match SmtpChannel::new(smtp, Duration::from_secs(config.smtp_timeout_secs)) {
                Ok(channel) => set = set.with(Arc::new(channel)),
                Err(e) => tracing::warn!(error = %e, "SMTP channel unavailable"),
            }
        }
        if let Some(sms) = &config.sms {
            match SmsChannel::new(sms, Duration::from_secs(config.adapter_timeout_secs)) {
                Ok(channel) => set = set.with(Arc::new(channel)),
                Err(e) => tracing::warn!(error = %e, "SMS channel unavailable"),
            }
        }
        match WebhookChannel::new(Duration::from_secs(config.webhook_timeout_secs)) {
            Ok(channel) => set = set.with(Arc::new(channel)),
            Err(e) => tracing::warn!(error = %e, "webhook channel unavailable"),
        }

        set
    }

    pub fn with(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    pub fn get(&self, kind: ChannelKind) -> Option<&Arc<dyn AlertChannel>> {
        self.channels.get(&kind)
    }

    pub fn registered(&self) -> Vec<ChannelKind> {
        self.channels.keys().copied().collect()
    }
}
