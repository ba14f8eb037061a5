//! Infrastructure layer for the e-sign engine.
//!
//! Trait definitions and implementations for:
//! - Document/template storage (PostgreSQL, in-memory)
//! - Append-only audit logging
//! - Retry with backoff (conflicts, database, outbound delivery)
//! - Webhook callback delivery
//! - Document expiry sweeps
//! - Shutdown signaling

mod audit;
mod callback;
mod error;
mod expiry;
pub mod memory;
mod pdf;
pub mod postgres;
mod retry;
mod shutdown;
mod traits;

pub use audit::{AuditAction, AuditActor, AuditEntry, AuditEntryBuilder, PgAuditLog};
pub use callback::{CallbackWorker, HttpCallbackSender};
pub use error::*;
pub use expiry::ExpiryWorker;
pub use pdf::{HttpPdfGenerator, UnconfiguredPdfGenerator};
pub use postgres::{PgDocumentStore, PgOtpStore, PgShortLinkStore, PgTemplateStore};
pub use retry::{is_retryable_db_error, Retry, RetryConfig};
pub use shutdown::{
    shutdown_signal, spawn_until_shutdown, ShutdownCoordinator, ShutdownSignal,
};
pub use traits::*;
