//! Error types for the e-sign engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{DocumentId, RecipientId, TemplateId};

/// Errors raised by the workflow engine and its collaborators.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Document not found (also covers cross-tenant access; existence is
    /// never leaked to the wrong company)
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// Template not found
    #[error("template not found: {0}")]
    TemplateNotFound(TemplateId),

    /// Template exists but is not in `active` status
    #[error("template not active: {0}")]
    TemplateNotActive(TemplateId),

    /// Recipient not found on the document
    #[error("recipient not found: {0}")]
    RecipientNotFound(RecipientId),

    /// Presented token failed validation
    #[error("invalid token")]
    InvalidToken,

    /// Presented token has expired
    #[error("token expired")]
    TokenExpired,

    /// Terminal-state access: completed
    #[error("document already completed: {0}")]
    DocumentCompleted(DocumentId),

    /// Terminal-state access: cancelled
    #[error("document cancelled: {0}")]
    DocumentCancelled(DocumentId),

    /// Terminal-state access: rejected
    #[error("document rejected: {0}")]
    DocumentRejected(DocumentId),

    /// Terminal-state access: expired
    #[error("document expired: {0}")]
    DocumentExpired(DocumentId),

    /// Recipient has already signed
    #[error("recipient already signed: {0}")]
    AlreadySigned(RecipientId),

    /// Recipient has already declined
    #[error("recipient already rejected: {0}")]
    AlreadyRejected(RecipientId),

    /// Hierarchy ordering: earlier recipients have not all signed
    #[error("not this recipient's turn: {0}")]
    NotYourTurn(RecipientId),

    /// Field key not assigned to the submitting recipient
    #[error("field {key:?} is not assigned to the submitting recipient on document {document_id}")]
    UnauthorizedField {
        document_id: DocumentId,
        key: String,
    },

    /// Signer did not confirm intent
    #[error("signature intent confirmation is required")]
    ConsentRequired,

    /// Delegation refused (recipient already signed or document resolved)
    #[error("delegation not allowed: {0}")]
    DelegationNotAllowed(String),

    /// Operation requires MFA verification first
    #[error("OTP verification required before signing")]
    OtpRequired,

    /// MFA is not enabled on this document
    #[error("OTP is not enabled for this document")]
    OtpNotRequired,

    /// Wrong OTP code
    #[error("invalid OTP code ({attempts_remaining} attempts remaining)")]
    OtpInvalid { attempts_remaining: u32 },

    /// OTP code outlived its window
    #[error("OTP code expired")]
    OtpExpired,

    /// Too many wrong codes; locked out until the given instant
    #[error("OTP verification locked until {locked_until}")]
    OtpLocked { locked_until: DateTime<Utc> },

    /// Admin operation attempted from a disallowed source status
    #[error("invalid status transition for document {document_id}: {from} -> {action}")]
    InvalidStatusTransition {
        document_id: DocumentId,
        from: String,
        action: String,
    },

    /// Initiate payload failed the delimiter contract
    #[error("payload validation failed: {0}")]
    PayloadValidation(String),

    /// Short link code unknown
    #[error("short link not found: {0}")]
    ShortLinkNotFound(String),

    /// Conditional write lost against a concurrent update
    #[error("version conflict for document {document_id}: expected {expected}")]
    VersionConflict {
        document_id: DocumentId,
        expected: i64,
    },

    /// Notification delivery failure (non-fatal to state transitions)
    #[error("notification error: {0}")]
    Notification(String),

    /// Webhook callback delivery failure
    #[error("callback error: {0}")]
    Callback(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Transient errors are worth retrying at the engine level.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::VersionConflict { .. } | EngineError::Database(_)
        )
    }
}
