//! Request/response DTOs for the REST surface.
//!
//! Engine request types (`InitiateRequest`, `SubmitRequest`, …) already
//! serialize cleanly and are used directly; this module holds the shapes
//! that exist only at the API boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Document, DocumentId, DocumentStatus};
use crate::workflow::RecipientSummary;

/// `GET /documents/:id/status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStatusResponse {
    pub document_id: DocumentId,
    pub status: DocumentStatus,
    pub recipients: Vec<RecipientSummary>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl From<&Document> for DocumentStatusResponse {
    fn from(document: &Document) -> Self {
        Self {
            document_id: document.id,
            status: document.status,
            recipients: document.recipients.iter().map(Into::into).collect(),
            expires_at: document.expires_at,
            completed_at: document.completed_at,
            pdf_url: document.pdf_url.clone(),
            certificate_url: document.certificate_url.clone(),
            error_reason: document.error_reason.clone(),
        }
    }
}

/// Body for cancel / reject endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body for OTP verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpBody {
    pub code: String,
}

/// Body for batch cancel/resend/delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDocumentsBody {
    pub document_ids: Vec<Uuid>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /bulk/initiate` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkInitiateResponse {
    pub job_id: Uuid,
}
