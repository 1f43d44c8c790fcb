//! Operator notifications (Discord webhook or log only)

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info};

/// Fire-and-forget sink for human-readable status lines
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one line. Delivery failures are logged, never returned.
    async fn notify(&self, text: &str);
}

/// Writes status lines to the log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) {
        info!("{}", text);
    }
}

/// Posts status lines to a Discord webhook
#[derive(Clone)]
pub struct DiscordNotifier {
    webhook_url: String,
    client: Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: &str) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| crate::RelayError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            webhook_url: webhook_url.to_string(),
            client,
        })
    }

    async fn post(&self, text: &str) -> anyhow::Result<()> {
        let payload = serde_json::json!({ "content": text });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("Discord webhook rejected: {} - {}", status, body))
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, text: &str) {
        if let Err(e) = self.post(text).await {
            error!("Failed to send Discord notification: {}", e);
        }
        info!("{}", text);
    }
}
