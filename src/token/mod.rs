//! Signing tokens for the public surface.
//!
//! Tokens are HMAC JWTs binding a recipient to a document and company, so
//! a request can be attributed without a database round-trip. Authorization
//! of the underlying action always re-checks current document state in
//! storage. Single use is enforced one level up: the recipient row stores
//! the jti of its only live token, and rotation simply replaces it.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{CompanyId, DocumentId, LinkExpiry, RecipientId};
use crate::infra::{EngineError, Result};

/// What a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Full signing-link token delivered by email/SMS.
    Signing,
    /// Short-lived token issued after OTP verification.
    Session,
    /// Read-only preview access for draft-preview documents.
    Preview,
}

/// Claims carried by a signing token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningClaims {
    /// Subject: recipient id.
    pub sub: String,
    /// Document the token is bound to.
    pub doc: String,
    /// Company (tenant) the document belongs to.
    pub org: String,
    /// Recipient email at issuance time.
    pub email: String,
    /// Token kind.
    pub kind: TokenKind,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Token id; the recipient row stores the live one.
    pub jti: String,
}

impl SigningClaims {
    pub fn recipient_id(&self) -> Result<RecipientId> {
        Uuid::parse_str(&self.sub)
            .map(RecipientId::from_uuid)
            .map_err(|_| EngineError::InvalidToken)
    }

    pub fn document_id(&self) -> Result<DocumentId> {
        Uuid::parse_str(&self.doc)
            .map(DocumentId::from_uuid)
            .map_err(|_| EngineError::InvalidToken)
    }

    pub fn company_id(&self) -> Result<CompanyId> {
        Uuid::parse_str(&self.org)
            .map(CompanyId::from_uuid)
            .map_err(|_| EngineError::InvalidToken)
    }
}

/// An issued token plus the bookkeeping the caller persists.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and validates signing tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

/// Session tokens issued after OTP verification live this long.
pub fn session_token_ttl() -> Duration {
    Duration::minutes(30)
}

impl TokenService {
    pub fn new(secret: &[u8], issuer: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
        }
    }

    /// Issue a token for a recipient on a document.
    pub fn issue(
        &self,
        document_id: DocumentId,
        recipient_id: RecipientId,
        company_id: CompanyId,
        email: &str,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let jti = Uuid::new_v4().to_string();

        let claims = SigningClaimsWire {
            iss: self.issuer.clone(),
            inner: SigningClaims {
                sub: recipient_id.to_string(),
                doc: document_id.to_string(),
                org: company_id.to_string(),
                email: email.to_string(),
                kind,
                exp: expires_at.timestamp(),
                iat: now.timestamp(),
                jti: jti.clone(),
            },
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| EngineError::Internal(format!("token encoding: {e}")))?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Validate a token and return its claims.
    pub fn validate(&self, token: &str) -> Result<SigningClaims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        let data =
            decode::<SigningClaimsWire>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => EngineError::TokenExpired,
                    _ => EngineError::InvalidToken,
                }
            })?;

        Ok(data.claims.inner)
    }

    /// Rotate a token: same binding, new kind, new jti. The old token dies
    /// when the caller persists the new jti on the recipient.
    pub fn rotate(&self, old: &SigningClaims, kind: TokenKind, ttl: Duration) -> Result<IssuedToken> {
        self.issue(
            old.document_id()?,
            old.recipient_id()?,
            old.company_id()?,
            &old.email,
            kind,
            ttl,
        )
    }

    /// Absolute expiry instant for a template's link-expiry window.
    pub fn calculate_expiry(&self, expiry: LinkExpiry, from: DateTime<Utc>) -> DateTime<Utc> {
        expiry.expires_at(from)
    }
}

/// Wire format: the claims plus the issuer field jsonwebtoken validates.
#[derive(Serialize, Deserialize)]
struct SigningClaimsWire {
    iss: String,
    #[serde(flatten)]
    inner: SigningClaims,
}
