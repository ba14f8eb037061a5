//! In-memory store implementations.
//!
//! Used by the test suites and by local development without Postgres. The
//! document store honors the same conditional-write contract as the
//! Postgres implementation, so concurrency behavior is identical under
//! test.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::audit::AuditEntry;
use super::{
    AuditLog, DocumentStore, EngineError, Result, ShortLinkStore, TemplateStore,
};
use crate::domain::{CompanyId, Document, DocumentId, Template, TemplateId};
use crate::otp::{OtpState, OtpStore};
use crate::domain::RecipientId;

/// In-memory document store with version-guarded writes.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, document: &Document) -> Result<()> {
        let mut documents = self.documents.write().await;
        documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn update(&self, document: &Document) -> Result<i64> {
        let mut documents = self.documents.write().await;
        let stored = documents
            .get_mut(&document.id)
            .ok_or(EngineError::DocumentNotFound(document.id))?;

        if stored.version != document.version {
            return Err(EngineError::VersionConflict {
                document_id: document.id,
                expected: document.version,
            });
        }

        let mut updated = document.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        let new_version = updated.version;
        *stored = updated;
        Ok(new_version)
    }

    async fn find(&self, company_id: CompanyId, id: DocumentId) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(&id)
            .filter(|d| d.company_id == company_id && !d.is_deleted)
            .cloned())
    }

    async fn find_unscoped(&self, id: DocumentId) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents.get(&id).filter(|d| !d.is_deleted).cloned())
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Document>> {
        let documents = self.documents.read().await;
        let mut expired: Vec<Document> = documents
            .values()
            .filter(|d| !d.is_deleted && !d.status.is_terminal() && d.expires_at < now)
            .cloned()
            .collect();
        expired.sort_by_key(|d| d.expires_at);
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn list_pending_callbacks(&self, limit: i64) -> Result<Vec<Document>> {
        use crate::domain::{CallbackStatus, DocumentStatus};
        let documents = self.documents.read().await;
        let mut pending: Vec<Document> = documents
            .values()
            .filter(|d| {
                d.callback_url.is_some()
                    && d.callback_status == Some(CallbackStatus::Pending)
                    && (d.status.is_terminal() || d.status == DocumentStatus::Signed)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|d| d.updated_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }
}

/// In-memory template store.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<TemplateId, Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn insert(&self, template: &Template) -> Result<()> {
        let mut templates = self.templates.write().await;
        templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn find(&self, company_id: CompanyId, id: TemplateId) -> Result<Option<Template>> {
        let templates = self.templates.read().await;
        Ok(templates
            .get(&id)
            .filter(|t| t.company_id == company_id)
            .cloned())
    }
}

/// In-memory audit log.
#[derive(Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn for_document(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.company_id == company_id && e.document_id == document_id)
            .cloned()
            .collect())
    }
}

/// In-memory OTP state store.
#[derive(Default)]
pub struct InMemoryOtpStore {
    states: RwLock<HashMap<RecipientId, OtpState>>,
}

impl InMemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpStore for InMemoryOtpStore {
    async fn get(&self, recipient_id: RecipientId) -> Result<Option<OtpState>> {
        Ok(self.states.read().await.get(&recipient_id).cloned())
    }

    async fn put(&self, recipient_id: RecipientId, state: OtpState) -> Result<()> {
        self.states.write().await.insert(recipient_id, state);
        Ok(())
    }

    async fn clear(&self, recipient_id: RecipientId) -> Result<()> {
        self.states.write().await.remove(&recipient_id);
        Ok(())
    }
}

/// In-memory short-link store.
#[derive(Default)]
pub struct InMemoryShortLinkStore {
    links: RwLock<HashMap<String, String>>,
}

impl InMemoryShortLinkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShortLinkStore for InMemoryShortLinkStore {
    async fn put(&self, code: &str, url: &str) -> Result<()> {
        self.links
            .write()
            .await
            .insert(code.to_string(), url.to_string());
        Ok(())
    }

    async fn resolve(&self, code: &str) -> Result<Option<String>> {
        Ok(self.links.read().await.get(code).cloned())
    }
}
