//! Periodic sweep of documents past their deadline.
//!
//! The engine never enforces `expires_at` lazily on its own records; this
//! worker (or the admin CLI) transitions stale documents to `expired`.
//! Token-level expiry is enforced independently at validation time.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use crate::workflow::DocumentWorkflow;

/// Background worker that expires overdue documents.
pub struct ExpiryWorker {
    engine: Arc<DocumentWorkflow>,
    poll_interval: Duration,
    batch_size: i64,
}

impl ExpiryWorker {
    pub fn new(engine: Arc<DocumentWorkflow>) -> Self {
        let poll_interval = std::env::var("EXPIRY_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));
        let batch_size = std::env::var("EXPIRY_SWEEP_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        Self {
            engine,
            poll_interval,
            batch_size,
        }
    }

    /// Run until the surrounding task is cancelled.
    pub async fn run(self) {
        let mut tick = interval(self.poll_interval);
        info!(interval_secs = self.poll_interval.as_secs(), "expiry worker started");

        loop {
            tick.tick().await;
            match self.engine.expire_documents(Utc::now(), self.batch_size).await {
                Ok(_) => {}
                Err(e) => error!(error = %e, "expiry sweep failed"),
            }
        }
    }
}
