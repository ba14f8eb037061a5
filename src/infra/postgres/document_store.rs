//! PostgreSQL document store.
//!
//! Documents are stored as one row each: scalar columns for the fields we
//! filter on, JSONB for the snapshot, payload and recipient list. Writes
//! are guarded by the `version` column; a lost conditional update surfaces
//! as `EngineError::VersionConflict` for the engine to reapply.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    CallbackStatus, CompanyId, Document, DocumentId, DocumentStatus, TemplateId,
};
use crate::infra::{DocumentStore, EngineError, Result};

/// PostgreSQL-backed document store.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn status_to_str(status: DocumentStatus) -> &'static str {
    status.as_str()
}

fn status_from_str(s: &str) -> Result<DocumentStatus> {
    let status = match s {
        "new" => DocumentStatus::New,
        "draft_preview" => DocumentStatus::DraftPreview,
        "distributed" => DocumentStatus::Distributed,
        "opened" => DocumentStatus::Opened,
        "partially_signed" => DocumentStatus::PartiallySigned,
        "signed" => DocumentStatus::Signed,
        "completed" => DocumentStatus::Completed,
        "rejected" => DocumentStatus::Rejected,
        "cancelled" => DocumentStatus::Cancelled,
        "expired" => DocumentStatus::Expired,
        other => {
            return Err(EngineError::Internal(format!(
                "unknown document status in storage: {other}"
            )))
        }
    };
    Ok(status)
}

fn callback_status_to_str(status: CallbackStatus) -> &'static str {
    match status {
        CallbackStatus::Pending => "pending",
        CallbackStatus::Delivered => "delivered",
        CallbackStatus::Failed => "failed",
    }
}

fn callback_status_from_str(s: &str) -> Result<CallbackStatus> {
    match s {
        "pending" => Ok(CallbackStatus::Pending),
        "delivered" => Ok(CallbackStatus::Delivered),
        "failed" => Ok(CallbackStatus::Failed),
        other => Err(EngineError::Internal(format!(
            "unknown callback status in storage: {other}"
        ))),
    }
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: Uuid,
    company_id: Uuid,
    template_id: Uuid,
    status: String,
    snapshot: serde_json::Value,
    payload: serde_json::Value,
    recipients: serde_json::Value,
    expires_at: DateTime<Utc>,
    pdf_url: Option<String>,
    pdf_hash: Option<String>,
    certificate_url: Option<String>,
    callback_url: Option<String>,
    callback_status: Option<String>,
    error_reason: Option<String>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        let snapshot = serde_json::from_value(self.snapshot)
            .map_err(|e| EngineError::Internal(format!("corrupt snapshot column: {e}")))?;
        let payload = serde_json::from_value(self.payload)
            .map_err(|e| EngineError::Internal(format!("corrupt payload column: {e}")))?;
        let recipients = serde_json::from_value(self.recipients)
            .map_err(|e| EngineError::Internal(format!("corrupt recipients column: {e}")))?;
        let callback_status = self
            .callback_status
            .as_deref()
            .map(callback_status_from_str)
            .transpose()?;

        Ok(Document {
            id: DocumentId::from_uuid(self.id),
            company_id: CompanyId::from_uuid(self.company_id),
            template_id: TemplateId::from_uuid(self.template_id),
            snapshot,
            status: status_from_str(&self.status)?,
            payload,
            recipients,
            expires_at: self.expires_at,
            pdf_url: self.pdf_url,
            pdf_hash: self.pdf_hash,
            certificate_url: self.certificate_url,
            callback_url: self.callback_url,
            callback_status,
            error_reason: self.error_reason,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            version: self.version,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    id, company_id, template_id, status, snapshot, payload, recipients,
    expires_at, pdf_url, pdf_hash, certificate_url,
    callback_url, callback_status, error_reason,
    is_deleted, created_at, updated_at, completed_at, version
"#;

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert(&self, document: &Document) -> Result<()> {
        let snapshot = serde_json::to_value(&document.snapshot)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let payload = serde_json::to_value(&document.payload)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let recipients = serde_json::to_value(&document.recipients)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO documents (
                id, company_id, template_id, status, snapshot, payload, recipients,
                expires_at, pdf_url, pdf_hash, certificate_url,
                callback_url, callback_status, error_reason,
                is_deleted, created_at, updated_at, completed_at, version
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11,
                $12, $13, $14,
                $15, $16, $17, $18, 0
            )
            "#,
        )
        .bind(document.id.0)
        .bind(document.company_id.0)
        .bind(document.template_id.0)
        .bind(status_to_str(document.status))
        .bind(snapshot)
        .bind(payload)
        .bind(recipients)
        .bind(document.expires_at)
        .bind(&document.pdf_url)
        .bind(&document.pdf_hash)
        .bind(&document.certificate_url)
        .bind(&document.callback_url)
        .bind(document.callback_status.map(callback_status_to_str))
        .bind(&document.error_reason)
        .bind(document.is_deleted)
        .bind(document.created_at)
        .bind(document.updated_at)
        .bind(document.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, document: &Document) -> Result<i64> {
        let snapshot = serde_json::to_value(&document.snapshot)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let payload = serde_json::to_value(&document.payload)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let recipients = serde_json::to_value(&document.recipients)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE documents SET
                status = $3, snapshot = $4, payload = $5, recipients = $6,
                expires_at = $7, pdf_url = $8, pdf_hash = $9, certificate_url = $10,
                callback_url = $11, callback_status = $12, error_reason = $13,
                is_deleted = $14, updated_at = NOW(), completed_at = $15,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(document.id.0)
        .bind(document.version)
        .bind(status_to_str(document.status))
        .bind(snapshot)
        .bind(payload)
        .bind(recipients)
        .bind(document.expires_at)
        .bind(&document.pdf_url)
        .bind(&document.pdf_hash)
        .bind(&document.certificate_url)
        .bind(&document.callback_url)
        .bind(document.callback_status.map(callback_status_to_str))
        .bind(&document.error_reason)
        .bind(document.is_deleted)
        .bind(document.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish "gone" from "raced": the caller reacts differently.
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM documents WHERE id = $1")
                    .bind(document.id.0)
                    .fetch_optional(&self.pool)
                    .await?;
            return match exists {
                Some(_) => Err(EngineError::VersionConflict {
                    document_id: document.id,
                    expected: document.version,
                }),
                None => Err(EngineError::DocumentNotFound(document.id)),
            };
        }

        Ok(document.version + 1)
    }

    async fn find(&self, company_id: CompanyId, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM documents \
             WHERE id = $1 AND company_id = $2 AND NOT is_deleted"
        ))
        .bind(id.0)
        .bind(company_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    async fn find_unscoped(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM documents WHERE id = $1 AND NOT is_deleted"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM documents \
             WHERE expires_at < $1 \
               AND status NOT IN ('completed', 'rejected', 'cancelled', 'expired') \
               AND NOT is_deleted \
             ORDER BY expires_at ASC \
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn list_pending_callbacks(&self, limit: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM documents \
             WHERE callback_url IS NOT NULL \
               AND callback_status = 'pending' \
               AND status IN ('completed', 'signed', 'rejected', 'cancelled', 'expired') \
             ORDER BY updated_at ASC \
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }
}
