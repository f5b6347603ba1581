use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, warn};

use shared_config::AppConfig;

/// Operator alert channel. Only terminal, unrecoverable failures go through it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the message was accepted. Never fails the caller.
    async fn send(&self, recipients: &[String], subject: &str, html_body: &str, text_body: &str) -> bool;
}

/// Posts alerts as JSON to a mail relay or chat webhook.
pub struct HttpNotifier {
    client: Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: &str, config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build notifier HTTP client, using defaults: {}", e);
                Client::new()
            });

        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, recipients: &[String], subject: &str, html_body: &str, text_body: &str) -> bool {
        if recipients.is_empty() {
            warn!("No alert recipients configured, dropping alert: {}", subject);
            return false;
        }

        let body = json!({
            "to": recipients,
            "subject": subject,
            "html": html_body,
            "text": text_body,
        });

        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Sent alert '{}' to {} recipients", subject, recipients.len());
                true
            }
            Ok(response) => {
                error!("Notification endpoint rejected alert '{}': {}", subject, response.status());
                false
            }
            Err(e) => {
                error!("Failed to send alert '{}': {}", subject, e);
                false
            }
        }
    }
}

/// Fallback when no notification endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipients: &[String], subject: &str, _html_body: &str, text_body: &str) -> bool {
        error!(recipients = ?recipients, "ALERT: {}\n{}", subject, text_body);
        true
    }
}

pub fn notifier_from_config(config: &AppConfig) -> Arc<dyn Notifier> {
    match &config.notification_url {
        Some(url) => Arc::new(HttpNotifier::new(url, config)),
        None => Arc::new(LogNotifier),
    }
}
