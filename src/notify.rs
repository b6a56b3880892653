//! Webhook delivery. Failures are logged and never reach the caller.
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio::time::sleep;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        NotifierConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    client: Client,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AppError::HttpClient)?;
        Ok(Notifier { client, config })
    }

    /// POST `payload` to `url`. Returns whether delivery succeeded.
    pub async fn notify(&self, url: &str, payload: &Value) -> bool {
        let mut backoff = self.config.initial_backoff;
        for attempt in 1..=self.config.max_attempts.max(1) {
            let retry = match self.client.post(url).json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(url, attempt, "webhook delivered");
                    return true;
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    tracing::warn!(url, attempt, status, "webhook rejected");
                    is_retryable_status(status)
                }
                Err(e) => {
                    tracing::warn!(url, attempt, "webhook delivery failed: {}", e);
                    true
                }
            };
            if !retry || attempt == self.config.max_attempts {
                break;
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(10));
        }
        tracing::error!(url, "giving up on webhook");
        false
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}
