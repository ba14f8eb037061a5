//! Signing templates and their frozen snapshots.
//!
//! A template describes the contract of a document before one exists: the
//! typed placeholders (`delimiters`) in the page body, the ordered signing
//! parties, the expiry window, and the MFA/notification configuration.
//! Documents never reference a live template — they carry a
//! [`TemplateSnapshot`] captured at creation, so later template edits can't
//! reach in-flight documents.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::types::{
    CompanyId, DeliveryChannel, DelimiterType, LinkExpiry, SignatureType, TemplateId,
};

/// Lifecycle status of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Active,
    Archived,
}

/// A typed placeholder in the template body, assigned to one signing party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delimiter {
    /// Placeholder key; appears as `{{key}}` in `html_content`.
    pub key: String,
    #[serde(rename = "type")]
    pub kind: DelimiterType,
    pub required: bool,
    /// signature_order of the recipient allowed to write this key.
    pub assigned_to: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// One signing party slot declared by the template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecipient {
    pub signature_order: u32,
    pub label: String,
    pub recipient_type: String,
}

/// Multi-factor verification configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfaConfig {
    pub enabled: bool,
    pub channel: DeliveryChannel,
    pub otp_expiry_min: u32,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: DeliveryChannel::Email,
            otp_expiry_min: 10,
        }
    }
}

/// Which lifecycle notifications are sent, and to whom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub notify_on_completion: bool,
    #[serde(default)]
    pub notify_on_decline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc_email: Option<String>,
}

/// A signing template owned by one company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub company_id: CompanyId,
    pub name: String,
    pub status: TemplateStatus,
    pub signature_type: SignatureType,
    pub delimiters: Vec<Delimiter>,
    pub recipients: Vec<TemplateRecipient>,
    pub link_expiry: LinkExpiry,
    pub mfa: MfaConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    pub preview_mode: bool,
    pub short_link_enabled: bool,
    /// Signing page body with `{{key}}` placeholders.
    pub html_content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A validation failure for one payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub key: String,
    pub reason: String,
}

impl Template {
    /// Freeze this template into a snapshot. Goes through an explicit
    /// serialize/deserialize round-trip so the snapshot shares no storage
    /// with the live template.
    pub fn snapshot(&self) -> TemplateSnapshot {
        let value = serde_json::to_value(SnapshotBody::from(self))
            .expect("template snapshot serialization is infallible");
        serde_json::from_value(value).expect("template snapshot round-trip is infallible")
    }

    /// Validate an initiate payload against the delimiter contract.
    ///
    /// Required delimiters without a value (and without a default) are
    /// missing; present values must match the delimiter type.
    pub fn validate_payload(&self, payload: &BTreeMap<String, String>) -> Vec<FieldError> {
        validate_against_delimiters(&self.delimiters, payload, true)
    }
}

impl From<&Template> for SnapshotBody {
    fn from(t: &Template) -> Self {
        Self {
            template_id: t.id,
            name: t.name.clone(),
            signature_type: t.signature_type,
            delimiters: t.delimiters.clone(),
            recipients: t.recipients.clone(),
            link_expiry: t.link_expiry,
            mfa: t.mfa.clone(),
            notifications: t.notifications.clone(),
            preview_mode: t.preview_mode,
            short_link_enabled: t.short_link_enabled,
            html_content: t.html_content.clone(),
        }
    }
}

/// The serialized body shared by [`Template::snapshot`] and
/// [`TemplateSnapshot`]. Kept private; only the two conversions touch it.
#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    template_id: TemplateId,
    name: String,
    signature_type: SignatureType,
    delimiters: Vec<Delimiter>,
    recipients: Vec<TemplateRecipient>,
    link_expiry: LinkExpiry,
    mfa: MfaConfig,
    notifications: NotificationConfig,
    preview_mode: bool,
    short_link_enabled: bool,
    html_content: String,
}

/// Immutable copy of a template's configuration embedded in a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub template_id: TemplateId,
    pub name: String,
    pub signature_type: SignatureType,
    pub delimiters: Vec<Delimiter>,
    pub recipients: Vec<TemplateRecipient>,
    pub link_expiry: LinkExpiry,
    pub mfa: MfaConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    pub preview_mode: bool,
    pub short_link_enabled: bool,
    pub html_content: String,
}

impl TemplateSnapshot {
    /// Delimiter keys writable by the recipient at `signature_order`.
    pub fn assigned_keys(&self, signature_order: u32) -> Vec<&str> {
        self.delimiters
            .iter()
            .filter(|d| d.assigned_to == signature_order)
            .map(|d| d.key.as_str())
            .collect()
    }

    /// Validate field data contributed by one recipient. Only checks value
    /// shape; key authorization is enforced by the document.
    pub fn validate_field_values(&self, fields: &BTreeMap<String, String>) -> Vec<FieldError> {
        validate_against_delimiters(&self.delimiters, fields, false)
    }

    /// Substitute `{{key}}` placeholders in the page body with payload
    /// values. Unfilled placeholders render as an empty string.
    pub fn render(&self, payload: &BTreeMap<String, String>) -> String {
        let mut body = self.html_content.clone();
        for delimiter in &self.delimiters {
            let placeholder = format!("{{{{{}}}}}", delimiter.key);
            let value = payload
                .get(&delimiter.key)
                .map(String::as_str)
                .or(delimiter.default_value.as_deref())
                .unwrap_or("");
            body = body.replace(&placeholder, value);
        }
        body
    }
}

fn validate_against_delimiters(
    delimiters: &[Delimiter],
    values: &BTreeMap<String, String>,
    check_required: bool,
) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for delimiter in delimiters {
        match values.get(&delimiter.key) {
            Some(value) => {
                if let Err(reason) = check_value_type(delimiter.kind, value) {
                    errors.push(FieldError {
                        key: delimiter.key.clone(),
                        reason,
                    });
                }
            }
            None => {
                if check_required && delimiter.required && delimiter.default_value.is_none() {
                    errors.push(FieldError {
                        key: delimiter.key.clone(),
                        reason: "required field is missing".to_string(),
                    });
                }
            }
        }
    }

    // Unknown keys are rejected outright rather than silently stored.
    for key in values.keys() {
        if !delimiters.iter().any(|d| &d.key == key) {
            errors.push(FieldError {
                key: key.clone(),
                reason: "unknown field".to_string(),
            });
        }
    }

    errors
}

fn check_value_type(kind: DelimiterType, value: &str) -> Result<(), String> {
    match kind {
        DelimiterType::Text => Ok(()),
        DelimiterType::Email => {
            let at = value.find('@');
            match at {
                Some(pos) if pos > 0 && value[pos + 1..].contains('.') => Ok(()),
                _ => Err("not a valid email address".to_string()),
            }
        }
        DelimiterType::Phone => {
            let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
            if digits >= 7 && value.chars().all(|c| c.is_ascii_digit() || "+-() ".contains(c)) {
                Ok(())
            } else {
                Err("not a valid phone number".to_string())
            }
        }
        DelimiterType::Date => {
            let ok = DateTime::parse_from_rfc3339(value).is_ok()
                || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok();
            if ok {
                Ok(())
            } else {
                Err("not a valid date (expected RFC 3339 or YYYY-MM-DD)".to_string())
            }
        }
        DelimiterType::Number => {
            if value.parse::<f64>().is_ok() {
                Ok(())
            } else {
                Err("not a valid number".to_string())
            }
        }
    }
}

/// Contract document for building an initiate payload, returned by
/// `GET /templates/:id/schema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSchema {
    pub template_id: TemplateId,
    pub name: String,
    pub signature_type: SignatureType,
    pub delimiters: Vec<Delimiter>,
    pub recipients: Vec<TemplateRecipient>,
    pub mfa_enabled: bool,
    pub preview_mode: bool,
}

impl From<&Template> for TemplateSchema {
    fn from(t: &Template) -> Self {
        Self {
            template_id: t.id,
            name: t.name.clone(),
            signature_type: t.signature_type,
            delimiters: t.delimiters.clone(),
            recipients: t.recipients.clone(),
            mfa_enabled: t.mfa.enabled,
            preview_mode: t.preview_mode,
        }
    }
}

impl TemplateSchema {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("schema serialization is infallible")
    }
}
