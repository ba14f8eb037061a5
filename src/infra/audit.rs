//! Append-only audit trail for document lifecycle events.
//!
//! Every state transition in the workflow engine produces exactly one
//! entry. The timeline view in `domain::timeline` is a pure read over this
//! log; nothing here is ever updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::domain::{CompanyId, DocumentId};

/// Lifecycle actions recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DocumentInitiated,
    DocumentDistributed,
    PreviewApproved,
    PreviewRejected,
    SigningPageOpened,
    OtpSent,
    OtpVerified,
    SignatureSubmitted,
    SignatureDeclined,
    SigningDelegated,
    ScrollCompleted,
    DocumentCancelled,
    DocumentResent,
    ReminderSent,
    DocumentExpired,
    DocumentCompleted,
    CompletionFailed,
    CallbackDelivered,
    CallbackFailed,
    DocumentDeleted,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::DocumentInitiated => "document_initiated",
            AuditAction::DocumentDistributed => "document_distributed",
            AuditAction::PreviewApproved => "preview_approved",
            AuditAction::PreviewRejected => "preview_rejected",
            AuditAction::SigningPageOpened => "signing_page_opened",
            AuditAction::OtpSent => "otp_sent",
            AuditAction::OtpVerified => "otp_verified",
            AuditAction::SignatureSubmitted => "signature_submitted",
            AuditAction::SignatureDeclined => "signature_declined",
            AuditAction::SigningDelegated => "signing_delegated",
            AuditAction::ScrollCompleted => "scroll_completed",
            AuditAction::DocumentCancelled => "document_cancelled",
            AuditAction::DocumentResent => "document_resent",
            AuditAction::ReminderSent => "reminder_sent",
            AuditAction::DocumentExpired => "document_expired",
            AuditAction::DocumentCompleted => "document_completed",
            AuditAction::CompletionFailed => "completion_failed",
            AuditAction::CallbackDelivered => "callback_delivered",
            AuditAction::CallbackFailed => "callback_failed",
            AuditAction::DocumentDeleted => "document_deleted",
        };
        write!(f, "{}", s)
    }
}

fn parse_audit_action(s: &str) -> Option<AuditAction> {
    let action = match s {
        "document_initiated" => AuditAction::DocumentInitiated,
        "document_distributed" => AuditAction::DocumentDistributed,
        "preview_approved" => AuditAction::PreviewApproved,
        "preview_rejected" => AuditAction::PreviewRejected,
        "signing_page_opened" => AuditAction::SigningPageOpened,
        "otp_sent" => AuditAction::OtpSent,
        "otp_verified" => AuditAction::OtpVerified,
        "signature_submitted" => AuditAction::SignatureSubmitted,
        "signature_declined" => AuditAction::SignatureDeclined,
        "signing_delegated" => AuditAction::SigningDelegated,
        "scroll_completed" => AuditAction::ScrollCompleted,
        "document_cancelled" => AuditAction::DocumentCancelled,
        "document_resent" => AuditAction::DocumentResent,
        "reminder_sent" => AuditAction::ReminderSent,
        "document_expired" => AuditAction::DocumentExpired,
        "document_completed" => AuditAction::DocumentCompleted,
        "completion_failed" => AuditAction::CompletionFailed,
        "callback_delivered" => AuditAction::CallbackDelivered,
        "callback_failed" => AuditAction::CallbackFailed,
        "document_deleted" => AuditAction::DocumentDeleted,
        _ => return None,
    };
    Some(action)
}

/// Who performed an audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditActor {
    /// Company-side admin or API caller.
    Company { email: Option<String> },
    /// A signing party acting through the public surface.
    Recipient { email: String },
    /// The engine itself (sweeps, callbacks).
    System,
}

impl AuditActor {
    pub fn label(&self) -> String {
        match self {
            AuditActor::Company { email: Some(e) } => e.clone(),
            AuditActor::Company { email: None } => "company".to_string(),
            AuditActor::Recipient { email } => email.clone(),
            AuditActor::System => "system".to_string(),
        }
    }
}

/// One immutable audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub actor: AuditActor,
    pub company_id: CompanyId,
    pub document_id: DocumentId,
    pub recipient_email: Option<String>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Builder for audit entries.
pub struct AuditEntryBuilder {
    action: AuditAction,
    actor: AuditActor,
    company_id: CompanyId,
    document_id: DocumentId,
    recipient_email: Option<String>,
    details: Option<serde_json::Value>,
    success: bool,
    error_message: Option<String>,
}

impl AuditEntryBuilder {
    pub fn new(
        action: AuditAction,
        actor: AuditActor,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Self {
        Self {
            action,
            actor,
            company_id,
            document_id,
            recipient_email: None,
            details: None,
            success: true,
            error_message: None,
        }
    }

    pub fn recipient(mut self, email: impl Into<String>) -> Self {
        self.recipient_email = Some(email.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self
    }

    pub fn build(self) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            at: Utc::now(),
            action: self.action,
            actor: self.actor,
            company_id: self.company_id,
            document_id: self.document_id,
            recipient_email: self.recipient_email,
            details: self.details,
            success: self.success,
            error_message: self.error_message,
        }
    }
}

/// PostgreSQL-backed audit log.
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl super::AuditLog for PgAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<(), super::EngineError> {
        let actor =
            serde_json::to_value(&entry.actor).map_err(|e| {
                super::EngineError::Internal(format!("actor serialization: {e}"))
            })?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, at, action, actor, company_id, document_id,
                recipient_email, details, success, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.at)
        .bind(entry.action.to_string())
        .bind(actor)
        .bind(entry.company_id.0)
        .bind(entry.document_id.0)
        .bind(&entry.recipient_email)
        .bind(&entry.details)
        .bind(entry.success)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await?;

        if entry.success {
            tracing::info!(
                action = %entry.action,
                document_id = %entry.document_id,
                actor = %entry.actor.label(),
                "audit entry"
            );
        } else {
            tracing::warn!(
                action = %entry.action,
                document_id = %entry.document_id,
                actor = %entry.actor.label(),
                error = ?entry.error_message,
                "audit entry (failed)"
            );
        }

        Ok(())
    }

    async fn for_document(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Vec<AuditEntry>, super::EngineError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, at, action, actor, company_id, document_id,
                   recipient_email, details, success, error_message
            FROM audit_log
            WHERE company_id = $1 AND document_id = $2
            ORDER BY at ASC
            "#,
        )
        .bind(company_id.0)
        .bind(document_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(AuditRow::into_entry).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    at: DateTime<Utc>,
    action: String,
    actor: serde_json::Value,
    company_id: Uuid,
    document_id: Uuid,
    recipient_email: Option<String>,
    details: Option<serde_json::Value>,
    success: bool,
    error_message: Option<String>,
}

impl AuditRow {
    fn into_entry(self) -> Option<AuditEntry> {
        let action = parse_audit_action(&self.action)?;
        let actor = serde_json::from_value(self.actor).ok()?;
        Some(AuditEntry {
            id: self.id,
            at: self.at,
            action,
            actor,
            company_id: CompanyId::from_uuid(self.company_id),
            document_id: DocumentId::from_uuid(self.document_id),
            recipient_email: self.recipient_email,
            details: self.details,
            success: self.success,
            error_message: self.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_display_round_trips() {
        for action in [
            AuditAction::DocumentInitiated,
            AuditAction::SignatureSubmitted,
            AuditAction::CallbackFailed,
            AuditAction::DocumentDeleted,
        ] {
            assert_eq!(parse_audit_action(&action.to_string()), Some(action));
        }
        assert_eq!(parse_audit_action("unknown"), None);
    }

    #[test]
    fn builder_sets_failure_fields() {
        let entry = AuditEntryBuilder::new(
            AuditAction::CallbackFailed,
            AuditActor::System,
            CompanyId::new(),
            DocumentId::new(),
        )
        .failed("connection refused")
        .build();

        assert!(!entry.success);
        assert_eq!(entry.error_message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn actor_labels() {
        assert_eq!(AuditActor::System.label(), "system");
        assert_eq!(
            AuditActor::Recipient {
                email: "a@b.co".to_string()
            }
            .label(),
            "a@b.co"
        );
        assert_eq!(AuditActor::Company { email: None }.label(), "company");
    }
}
