//! Webhook callback delivery for externally initiated documents.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use super::{CallbackSender, EngineError, Result, Retry, RetryConfig};
use crate::workflow::DocumentWorkflow;

/// Delivers callbacks by POSTing the document status payload as JSON.
pub struct HttpCallbackSender {
    client: reqwest::Client,
    retry: Retry,
}

impl HttpCallbackSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            retry: Retry::new(RetryConfig::webhook()),
        }
    }
}

impl Default for HttpCallbackSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackSender for HttpCallbackSender {
    async fn deliver(&self, url: &str, payload: &serde_json::Value) -> Result<()> {
        self.retry
            .run_with_context("callback", || async {
                let response = self
                    .client
                    .post(url)
                    .json(payload)
                    .send()
                    .await
                    .map_err(|e| EngineError::Callback(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(EngineError::Callback(format!(
                        "receiver returned {}",
                        response.status()
                    )));
                }
                Ok(())
            })
            .await
    }
}

/// Background worker that drains undelivered callbacks.
pub struct CallbackWorker {
    engine: Arc<DocumentWorkflow>,
    poll_interval: Duration,
    batch_size: i64,
}

impl CallbackWorker {
    pub fn new(engine: Arc<DocumentWorkflow>) -> Self {
        let poll_interval = std::env::var("CALLBACK_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));
        let batch_size = std::env::var("CALLBACK_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        Self {
            engine,
            poll_interval,
            batch_size,
        }
    }

    /// Run until the surrounding task is cancelled.
    pub async fn run(self) {
        let mut tick = interval(self.poll_interval);
        info!(interval_secs = self.poll_interval.as_secs(), "callback worker started");

        loop {
            tick.tick().await;
            match self.engine.deliver_pending_callbacks(self.batch_size).await {
                Ok(0) => {}
                Ok(delivered) => info!(delivered, "callback worker delivered callbacks"),
                Err(e) => error!(error = %e, "callback worker pass failed"),
            }
        }
    }
}
