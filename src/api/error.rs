//! Structured API error responses with stable error codes.
//!
//! Every domain-rule violation surfaces as 4xx with a machine-readable
//! `code` the calling system can branch on. The public signing surface
//! relies on the distinction between stale links (TOKEN_EXPIRED /
//! DOCUMENT_EXPIRED), resolved documents (DOCUMENT_COMPLETED / _CANCELLED /
//! _REJECTED) and ordering violations (NOT_YOUR_TURN) — these are never
//! collapsed into one generic error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for API responses.
///
/// These codes are stable; clients branch on them programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication (1xxx)
    /// No authentication credentials provided
    AuthRequired,
    /// Invalid API key
    InvalidApiKey,
    /// Insufficient permissions for this operation
    InsufficientPermissions,
    /// Too many requests
    RateLimitExceeded,

    // Signing tokens (2xxx)
    /// Token failed validation or was superseded
    InvalidToken,
    /// Token has expired
    TokenExpired,

    // Resources (3xxx)
    /// Document not found (or not visible to this company)
    DocumentNotFound,
    /// Template not found
    TemplateNotFound,
    /// Template exists but is not active
    TemplateNotActive,
    /// Recipient not found on the document
    RecipientNotFound,
    /// Short link code unknown
    ShortLinkNotFound,
    /// Bulk job not found
    JobNotFound,

    // Terminal-state access (4xxx)
    /// Document already completed
    DocumentCompleted,
    /// Document was cancelled
    DocumentCancelled,
    /// Document was rejected by a recipient
    DocumentRejected,
    /// Document expired
    DocumentExpired,

    // Signing rules (5xxx)
    /// Recipient already signed
    AlreadySigned,
    /// Recipient already declined
    AlreadyRejected,
    /// Earlier recipients have not all signed yet
    NotYourTurn,
    /// Field key not assigned to the submitting recipient
    UnauthorizedField,
    /// Signer did not confirm intent
    ConsentRequired,
    /// Delegation refused
    DelegationNotAllowed,
    /// Admin operation not allowed from the document's current status
    InvalidStatusTransition,

    // OTP (6xxx)
    /// OTP verification required before this operation
    OtpRequired,
    /// MFA is not enabled on this document
    OtpNotRequired,
    /// Wrong code
    OtpInvalid,
    /// Code expired or was never issued
    OtpExpired,
    /// Too many wrong codes; locked out
    OtpLocked,

    // Validation (7xxx)
    /// Request body is malformed
    InvalidRequestBody,
    /// Initiate payload failed the delimiter contract
    PayloadValidation,

    // Concurrency (8xxx)
    /// Conditional write lost after retries
    VersionConflict,

    // Infrastructure (9xxx)
    /// Database operation failed
    DatabaseError,
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Numeric code for easy categorization.
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::AuthRequired => 1001,
            ErrorCode::InvalidApiKey => 1002,
            ErrorCode::InsufficientPermissions => 1003,
            ErrorCode::RateLimitExceeded => 1004,

            ErrorCode::InvalidToken => 2001,
            ErrorCode::TokenExpired => 2002,

            ErrorCode::DocumentNotFound => 3001,
            ErrorCode::TemplateNotFound => 3002,
            ErrorCode::TemplateNotActive => 3003,
            ErrorCode::RecipientNotFound => 3004,
            ErrorCode::ShortLinkNotFound => 3005,
            ErrorCode::JobNotFound => 3006,

            ErrorCode::DocumentCompleted => 4001,
            ErrorCode::DocumentCancelled => 4002,
            ErrorCode::DocumentRejected => 4003,
            ErrorCode::DocumentExpired => 4004,

            ErrorCode::AlreadySigned => 5001,
            ErrorCode::AlreadyRejected => 5002,
            ErrorCode::NotYourTurn => 5003,
            ErrorCode::UnauthorizedField => 5004,
            ErrorCode::ConsentRequired => 5005,
            ErrorCode::DelegationNotAllowed => 5006,
            ErrorCode::InvalidStatusTransition => 5007,

            ErrorCode::OtpRequired => 6001,
            ErrorCode::OtpNotRequired => 6002,
            ErrorCode::OtpInvalid => 6003,
            ErrorCode::OtpExpired => 6004,
            ErrorCode::OtpLocked => 6005,

            ErrorCode::InvalidRequestBody => 7001,
            ErrorCode::PayloadValidation => 7002,

            ErrorCode::VersionConflict => 8001,

            ErrorCode::DatabaseError => 9001,
            ErrorCode::InternalError => 9999,
        }
    }

    /// HTTP status for this code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::AuthRequired => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ErrorCode::InsufficientPermissions => StatusCode::FORBIDDEN,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::TokenExpired => StatusCode::UNAUTHORIZED,

            // Cross-tenant access reads as absence, never as 403.
            ErrorCode::DocumentNotFound => StatusCode::NOT_FOUND,
            ErrorCode::TemplateNotFound => StatusCode::NOT_FOUND,
            ErrorCode::TemplateNotActive => StatusCode::BAD_REQUEST,
            ErrorCode::RecipientNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ShortLinkNotFound => StatusCode::NOT_FOUND,
            ErrorCode::JobNotFound => StatusCode::NOT_FOUND,

            ErrorCode::DocumentCompleted => StatusCode::GONE,
            ErrorCode::DocumentCancelled => StatusCode::GONE,
            ErrorCode::DocumentRejected => StatusCode::GONE,
            ErrorCode::DocumentExpired => StatusCode::GONE,

            ErrorCode::AlreadySigned => StatusCode::CONFLICT,
            ErrorCode::AlreadyRejected => StatusCode::CONFLICT,
            ErrorCode::NotYourTurn => StatusCode::FORBIDDEN,
            ErrorCode::UnauthorizedField => StatusCode::FORBIDDEN,
            ErrorCode::ConsentRequired => StatusCode::BAD_REQUEST,
            ErrorCode::DelegationNotAllowed => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidStatusTransition => StatusCode::BAD_REQUEST,

            ErrorCode::OtpRequired => StatusCode::FORBIDDEN,
            ErrorCode::OtpNotRequired => StatusCode::BAD_REQUEST,
            ErrorCode::OtpInvalid => StatusCode::BAD_REQUEST,
            ErrorCode::OtpExpired => StatusCode::BAD_REQUEST,
            ErrorCode::OtpLocked => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::InvalidRequestBody => StatusCode::BAD_REQUEST,
            ErrorCode::PayloadValidation => StatusCode::BAD_REQUEST,

            ErrorCode::VersionConflict => StatusCode::CONFLICT,

            ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::InvalidApiKey => "INVALID_API_KEY",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            ErrorCode::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            ErrorCode::TemplateNotActive => "TEMPLATE_NOT_ACTIVE",
            ErrorCode::RecipientNotFound => "RECIPIENT_NOT_FOUND",
            ErrorCode::ShortLinkNotFound => "SHORT_LINK_NOT_FOUND",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::DocumentCompleted => "DOCUMENT_COMPLETED",
            ErrorCode::DocumentCancelled => "DOCUMENT_CANCELLED",
            ErrorCode::DocumentRejected => "DOCUMENT_REJECTED",
            ErrorCode::DocumentExpired => "DOCUMENT_EXPIRED",
            ErrorCode::AlreadySigned => "ALREADY_SIGNED",
            ErrorCode::AlreadyRejected => "ALREADY_REJECTED",
            ErrorCode::NotYourTurn => "NOT_YOUR_TURN",
            ErrorCode::UnauthorizedField => "UNAUTHORIZED_FIELD",
            ErrorCode::ConsentRequired => "CONSENT_REQUIRED",
            ErrorCode::DelegationNotAllowed => "DELEGATION_NOT_ALLOWED",
            ErrorCode::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            ErrorCode::OtpRequired => "OTP_REQUIRED",
            ErrorCode::OtpNotRequired => "OTP_NOT_REQUIRED",
            ErrorCode::OtpInvalid => "OTP_INVALID",
            ErrorCode::OtpExpired => "OTP_EXPIRED",
            ErrorCode::OtpLocked => "OTP_LOCKED",
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::PayloadValidation => "PAYLOAD_VALIDATION",
            ErrorCode::VersionConflict => "VERSION_CONFLICT",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

/// Structured error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

/// Detailed error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code.
    pub code: ErrorCode,

    /// Numeric error code.
    pub numeric_code: u32,

    /// Human-readable message.
    pub message: String,

    /// Additional error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Related resource id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
                resource_id: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.error.resource_id = Some(id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let mut response = (status, Json(self)).into_response();

        if let Ok(code_value) = axum::http::HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }

        response
    }
}

// ============================================================================
// Conversion from EngineError
// ============================================================================

impl From<crate::infra::EngineError> for ApiError {
    fn from(err: crate::infra::EngineError) -> Self {
        use crate::infra::EngineError;

        match err {
            EngineError::Database(e) => {
                tracing::error!(error = %e, "database error");
                ApiError::new(ErrorCode::DatabaseError, "Database error")
            }
            EngineError::DocumentNotFound(id) => {
                ApiError::new(ErrorCode::DocumentNotFound, format!("Document not found: {id}"))
                    .with_resource_id(id.to_string())
            }
            EngineError::TemplateNotFound(id) => {
                ApiError::new(ErrorCode::TemplateNotFound, format!("Template not found: {id}"))
                    .with_resource_id(id.to_string())
            }
            EngineError::TemplateNotActive(id) => {
                ApiError::new(ErrorCode::TemplateNotActive, format!("Template is not active: {id}"))
                    .with_resource_id(id.to_string())
            }
            EngineError::RecipientNotFound(id) => {
                ApiError::new(ErrorCode::RecipientNotFound, format!("Recipient not found: {id}"))
                    .with_resource_id(id.to_string())
            }
            EngineError::InvalidToken => {
                ApiError::new(ErrorCode::InvalidToken, "This signing link is not valid")
            }
            EngineError::TokenExpired => {
                ApiError::new(ErrorCode::TokenExpired, "This signing link has expired")
            }
            EngineError::DocumentCompleted(id) => ApiError::new(
                ErrorCode::DocumentCompleted,
                "This document has already been completed",
            )
            .with_resource_id(id.to_string()),
            EngineError::DocumentCancelled(id) => ApiError::new(
                ErrorCode::DocumentCancelled,
                "This document has been cancelled",
            )
            .with_resource_id(id.to_string()),
            EngineError::DocumentRejected(id) => ApiError::new(
                ErrorCode::DocumentRejected,
                "This document has been declined",
            )
            .with_resource_id(id.to_string()),
            EngineError::DocumentExpired(id) => {
                ApiError::new(ErrorCode::DocumentExpired, "This document has expired")
                    .with_resource_id(id.to_string())
            }
            EngineError::AlreadySigned(id) => {
                ApiError::new(ErrorCode::AlreadySigned, "You have already signed this document")
                    .with_resource_id(id.to_string())
            }
            EngineError::AlreadyRejected(id) => {
                ApiError::new(ErrorCode::AlreadyRejected, "You have already declined this document")
                    .with_resource_id(id.to_string())
            }
            EngineError::NotYourTurn(id) => ApiError::new(
                ErrorCode::NotYourTurn,
                "It is not your turn to sign yet; earlier parties must sign first",
            )
            .with_resource_id(id.to_string()),
            EngineError::UnauthorizedField { document_id, key } => ApiError::new(
                ErrorCode::UnauthorizedField,
                format!("Field {key:?} is not assigned to you"),
            )
            .with_resource_id(document_id.to_string())
            .with_details(serde_json::json!({ "field": key })),
            EngineError::ConsentRequired => ApiError::new(
                ErrorCode::ConsentRequired,
                "You must confirm your intent to sign",
            ),
            EngineError::DelegationNotAllowed(reason) => {
                ApiError::new(ErrorCode::DelegationNotAllowed, reason)
            }
            EngineError::OtpRequired => ApiError::new(
                ErrorCode::OtpRequired,
                "Identity verification is required before signing",
            ),
            EngineError::OtpNotRequired => ApiError::new(
                ErrorCode::OtpNotRequired,
                "Verification codes are not enabled for this document",
            ),
            EngineError::OtpInvalid { attempts_remaining } => {
                ApiError::new(ErrorCode::OtpInvalid, "Incorrect verification code")
                    .with_details(serde_json::json!({ "attempts_remaining": attempts_remaining }))
            }
            EngineError::OtpExpired => ApiError::new(
                ErrorCode::OtpExpired,
                "Verification code expired; request a new one",
            ),
            EngineError::OtpLocked { locked_until } => ApiError::new(
                ErrorCode::OtpLocked,
                "Too many incorrect codes; verification is temporarily locked",
            )
            .with_details(serde_json::json!({ "locked_until": locked_until })),
            EngineError::InvalidStatusTransition {
                document_id,
                from,
                action,
            } => ApiError::new(
                ErrorCode::InvalidStatusTransition,
                format!("Cannot {action} a document in status {from}"),
            )
            .with_resource_id(document_id.to_string())
            .with_details(serde_json::json!({ "from_status": from, "action": action })),
            EngineError::PayloadValidation(msg) => {
                let details = serde_json::from_str(&msg).ok();
                let mut error = ApiError::new(ErrorCode::PayloadValidation, "Payload validation failed");
                if let Some(details) = details {
                    error = error.with_details(details);
                } else {
                    error.error.message = msg;
                }
                error
            }
            EngineError::ShortLinkNotFound(code) => {
                ApiError::new(ErrorCode::ShortLinkNotFound, format!("Unknown link: {code}"))
            }
            EngineError::VersionConflict { document_id, .. } => ApiError::new(
                ErrorCode::VersionConflict,
                "The document was modified concurrently; try again",
            )
            .with_resource_id(document_id.to_string()),
            EngineError::Notification(msg) => {
                tracing::error!(error = %msg, "notification failure surfaced to API");
                ApiError::new(ErrorCode::InternalError, "Notification delivery failed")
            }
            EngineError::Callback(msg) => {
                tracing::error!(error = %msg, "callback failure surfaced to API");
                ApiError::new(ErrorCode::InternalError, "Callback delivery failed")
            }
            EngineError::Configuration(msg) => {
                tracing::error!(error = %msg, "configuration error");
                ApiError::new(ErrorCode::InternalError, "Configuration error")
            }
            EngineError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                ApiError::new(ErrorCode::InternalError, "Internal error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DocumentId;
    use crate::infra::EngineError;

    #[test]
    fn numeric_codes_are_grouped() {
        assert_eq!(ErrorCode::AuthRequired.numeric_code(), 1001);
        assert_eq!(ErrorCode::InvalidToken.numeric_code(), 2001);
        assert_eq!(ErrorCode::DocumentNotFound.numeric_code(), 3001);
        assert_eq!(ErrorCode::DocumentCompleted.numeric_code(), 4001);
        assert_eq!(ErrorCode::AlreadySigned.numeric_code(), 5001);
        assert_eq!(ErrorCode::OtpRequired.numeric_code(), 6001);
        assert_eq!(ErrorCode::VersionConflict.numeric_code(), 8001);
        assert_eq!(ErrorCode::InternalError.numeric_code(), 9999);
    }

    #[test]
    fn terminal_state_codes_stay_distinct() {
        let completed = ApiError::from(EngineError::DocumentCompleted(DocumentId::new()));
        let cancelled = ApiError::from(EngineError::DocumentCancelled(DocumentId::new()));
        let rejected = ApiError::from(EngineError::DocumentRejected(DocumentId::new()));
        let expired = ApiError::from(EngineError::DocumentExpired(DocumentId::new()));

        let codes = [
            completed.error.code,
            cancelled.error.code,
            rejected.error.code,
            expired.error.code,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn unauthorized_field_is_forbidden() {
        let error = ApiError::from(EngineError::UnauthorizedField {
            document_id: DocumentId::new(),
            key: "total".to_string(),
        });
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        assert_eq!(error.error.code, ErrorCode::UnauthorizedField);
    }

    #[test]
    fn otp_errors_carry_structured_details() {
        let error = ApiError::from(EngineError::OtpInvalid {
            attempts_remaining: 2,
        });
        assert_eq!(
            error.error.details.unwrap()["attempts_remaining"],
            serde_json::json!(2)
        );

        let locked = ApiError::from(EngineError::OtpLocked {
            locked_until: chrono::Utc::now(),
        });
        assert!(locked.error.details.as_ref().unwrap().get("locked_until").is_some());
        assert_eq!(locked.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn serialization_uses_screaming_snake_case() {
        let error = ApiError::new(ErrorCode::NotYourTurn, "wait");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("NOT_YOUR_TURN"));
        assert!(json.contains("5003"));
    }
}
