//! Core type definitions for the e-sign engine.
//!
//! Identifier newtypes and the small enums shared across the domain.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Company identifier (tenant level). Every document and template is scoped
/// to exactly one company; cross-company reads must come back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub uuid::Uuid);

impl CompanyId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl Default for CompanyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Template identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub uuid::Uuid);

impl TemplateId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub uuid::Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recipient identifier (one signing party on one document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientId(pub uuid::Uuid);

impl RecipientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl Default for RecipientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the parties on a document sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    /// Exactly one recipient; their signature resolves the document.
    Single,
    /// Strictly ordered: recipient N cannot act until 1..N-1 have signed.
    Hierarchy,
    /// Any order; resolved once every recipient has signed.
    Multiple,
    /// Same completion rule as `Multiple`; all recipients are invited at once.
    SendToAll,
}

impl SignatureType {
    /// Whether every recipient gets a live token at distribution time.
    pub fn activates_all_at_once(&self) -> bool {
        matches!(self, SignatureType::Multiple | SignatureType::SendToAll)
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignatureType::Single => "single",
            SignatureType::Hierarchy => "hierarchy",
            SignatureType::Multiple => "multiple",
            SignatureType::SendToAll => "send_to_all",
        };
        write!(f, "{}", s)
    }
}

/// Value type of a template delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelimiterType {
    Text,
    Email,
    Phone,
    Date,
    Number,
}

/// Unit for a template's link expiry window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryUnit {
    Hours,
    Days,
}

/// Relative expiry window configured on a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkExpiry {
    pub value: u32,
    pub unit: ExpiryUnit,
}

impl LinkExpiry {
    /// Absolute deadline for a window starting at `from`.
    pub fn expires_at(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + self.duration()
    }

    pub fn duration(&self) -> Duration {
        match self.unit {
            ExpiryUnit::Hours => Duration::hours(i64::from(self.value)),
            ExpiryUnit::Days => Duration::days(i64::from(self.value)),
        }
    }
}

impl Default for LinkExpiry {
    fn default() -> Self {
        Self {
            value: 14,
            unit: ExpiryUnit::Days,
        }
    }
}

/// Channel an OTP or notification is delivered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Email,
    Sms,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_expiry_hours_and_days() {
        let from = Utc::now();

        let hours = LinkExpiry {
            value: 6,
            unit: ExpiryUnit::Hours,
        };
        assert_eq!(hours.expires_at(from) - from, Duration::hours(6));

        let days = LinkExpiry {
            value: 14,
            unit: ExpiryUnit::Days,
        };
        assert_eq!(days.expires_at(from) - from, Duration::days(14));
    }

    #[test]
    fn signature_type_activation() {
        assert!(!SignatureType::Single.activates_all_at_once());
        assert!(!SignatureType::Hierarchy.activates_all_at_once());
        assert!(SignatureType::Multiple.activates_all_at_once());
        assert!(SignatureType::SendToAll.activates_all_at_once());
    }

    #[test]
    fn signature_type_serde_snake_case() {
        let json = serde_json::to_string(&SignatureType::SendToAll).unwrap();
        assert_eq!(json, "\"send_to_all\"");
        let back: SignatureType = serde_json::from_str("\"hierarchy\"").unwrap();
        assert_eq!(back, SignatureType::Hierarchy);
    }
}
