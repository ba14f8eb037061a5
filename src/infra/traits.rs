//! Trait definitions for the engine's storage and external collaborators.
//!
//! The workflow engine only ever talks to these traits; Postgres
//! implementations live in `infra::postgres`, in-memory ones (tests, local
//! dev) in `infra::memory`. PDF generation and webhook delivery are
//! external collaborators kept behind the same seam so the state machine is
//! testable in isolation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use super::audit::AuditEntry;
use super::Result;
use crate::domain::{CompanyId, Document, DocumentId, Template, TemplateId};

/// Storage for documents.
///
/// The document is the unit of isolation: reads return the whole record,
/// writes replace it guarded by the version column. `update` fails with
/// `EngineError::VersionConflict` when the stored version no longer matches
/// `document.version`; callers reload and reapply.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a freshly created document (version 0).
    async fn insert(&self, document: &Document) -> Result<()>;

    /// Conditionally replace a document; bumps and returns the new version.
    async fn update(&self, document: &Document) -> Result<i64>;

    /// Load a document scoped by company. Soft-deleted documents and
    /// cross-company ids both come back as `None`.
    async fn find(&self, company_id: CompanyId, id: DocumentId) -> Result<Option<Document>>;

    /// Load a document by id alone (token-authenticated public surface;
    /// the token already binds the company).
    async fn find_unscoped(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Non-terminal documents whose deadline has lapsed.
    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Document>>;

    /// Terminal documents with an undelivered webhook callback.
    async fn list_pending_callbacks(&self, limit: i64) -> Result<Vec<Document>>;
}

/// Storage for templates.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert(&self, template: &Template) -> Result<()>;

    async fn find(&self, company_id: CompanyId, id: TemplateId) -> Result<Option<Template>>;
}

/// Append-only audit log.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;

    async fn for_document(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Vec<AuditEntry>>;
}

/// Short-code to signing-URL mapping for templates with short links.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ShortLinkStore: Send + Sync {
    /// Bind a code to a signing URL, replacing any previous binding for the
    /// same code (token rotation re-points the code).
    async fn put(&self, code: &str, url: &str) -> Result<()>;

    async fn resolve(&self, code: &str) -> Result<Option<String>>;
}

/// Artifacts produced by the PDF generation collaborator.
#[derive(Debug, Clone)]
pub struct PdfArtifacts {
    pub pdf_url: String,
    pub pdf_hash: String,
    pub certificate_url: Option<String>,
}

/// External PDF generation collaborator.
///
/// Invoked after all signatures are collected; on failure the document
/// stays `signed` and the call is retryable.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PdfGenerator: Send + Sync {
    async fn generate(&self, document: &Document) -> Result<PdfArtifacts>;
}

/// Webhook delivery collaborator for externally initiated documents.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CallbackSender: Send + Sync {
    async fn deliver(&self, url: &str, payload: &serde_json::Value) -> Result<()>;
}

/// Best-effort IP geolocation. Implementations must be cheap to drop: the
/// engine wraps calls in a 1-second timeout and never fails an operation on
/// a lookup error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn lookup(&self, ip: &str) -> Option<String>;
}

/// Geolocator that never resolves anything.
pub struct NullGeoLocator;

#[async_trait]
impl GeoLocator for NullGeoLocator {
    async fn lookup(&self, _ip: &str) -> Option<String> {
        None
    }
}
