//! Outbound subscriber notifications.
//!
//! Notification delivery is fire-and-forget: the gateway spawns a send after
//! a successful payment and never lets a delivery failure reach the USSD
//! caller. Failures are logged and dropped.

use async_trait::async_trait;
use reqwest::header::ACCEPT;

use crate::config::SmsConfig;

/// Delivers a message to a subscriber.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sends `message` to `destination`. Never fails the caller; delivery
    /// problems are handled (logged) internally.
    async fn notify(&self, destination: &str, message: &str);
}

/// SMS delivery through a bulk messaging HTTP API.
pub struct SmsNotifier {
    client: reqwest::Client,
    config: SmsConfig,
}

impl std::fmt::Debug for SmsNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsNotifier")
            .field("endpoint", &self.config.endpoint)
            .field("username", &self.config.username)
            .finish_non_exhaustive()
    }
}

impl SmsNotifier {
    /// Creates a notifier from SMS settings.
    #[must_use]
    pub fn new(config: SmsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Normalizes a subscriber number into international dial format.
    ///
    /// A leading `0` is replaced by the configured dial prefix; anything else
    /// passes through unchanged.
    #[must_use]
    pub fn normalize_msisdn(&self, raw: &str) -> String {
        raw.strip_prefix('0')
            .map_or_else(|| raw.to_owned(), |rest| format!("{}{rest}", self.config.dial_prefix))
    }
}

#[async_trait]
impl NotificationSink for SmsNotifier {
    async fn notify(&self, destination: &str, message: &str) {
        let to = self.normalize_msisdn(destination);

        let mut form = vec![
            ("username", self.config.username.clone()),
            ("to", to.clone()),
            ("message", message.to_owned()),
        ];
        if let Some(sender_id) = &self.config.sender_id {
            form.push(("from", sender_id.clone()));
        }

        let result = self
            .client
            .post(self.config.endpoint.clone())
            .header("apiKey", &self.config.api_key)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(to = %to, "sms handed to gateway");
            }
            Ok(response) => {
                tracing::warn!(to = %to, status = %response.status(), "sms gateway rejected message");
            }
            Err(e) => {
                tracing::warn!(to = %to, error = %e, "sms delivery failed");
            }
        }
    }
}

/// Sink used when no SMS provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn notify(&self, destination: &str, message: &str) {
        tracing::debug!(to = %destination, message, "sms disabled; dropping notification");
    }
}
