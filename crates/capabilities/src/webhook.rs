//! Completion webhooks.
//!
//! Delivers a job's terminal view as a JSON POST to the endpoint configured
//! on its scraper.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, warn};

use scrapeline_core::config::NotifyConfig;

use crate::traits::{CapabilityError, CompletionNotifier};

#[derive(Debug)]
pub struct WebhookNotifier {
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// `None` when webhooks are disabled.
    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        config
            .webhooks_enabled
            .then(|| Self::new(Duration::from_secs(config.webhook_timeout_secs)))
    }
}

#[async_trait]
impl CompletionNotifier for WebhookNotifier {
    async fn notify(&self, endpoint: &str, payload: &Value) -> Result<(), CapabilityError> {
        let parsed = url::Url::parse(endpoint)
            .map_err(|e| CapabilityError::InvalidInput(format!("webhook url {endpoint}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CapabilityError::InvalidInput(format!(
                "webhook url must be http(s): {endpoint}"
            )));
        }

        let response = self
            .client
            .post(parsed)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!(url = %endpoint, %status, body = %body_text, "webhook returned non-2xx status");
            return Err(CapabilityError::from_status(status.as_u16(), body_text));
        }

        debug!(url = %endpoint, %status, "webhook notification delivered");
        Ok(())
    }
}
