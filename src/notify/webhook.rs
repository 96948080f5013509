use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// Third-party automation endpoint. Treated as optional telemetry.
#[async_trait]
pub trait WebhookSink: Send + Sync + 'static {
    async fn post(&self, payload: &Value) -> Result<()>;
}

pub struct HttpWebhook {
    client: Client,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl WebhookSink for HttpWebhook {
    async fn post(&self, payload: &Value) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .context("webhook request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("webhook returned {}", response.status()));
        }
        Ok(())
    }
}
