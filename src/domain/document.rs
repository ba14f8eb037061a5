//! The e-sign document: the one entity the workflow engine owns.
//!
//! A document is a frozen template snapshot plus an ordered list of
//! recipients and a payload of contributed field values. Document status is
//! a function of recipient statuses; the pure helpers here compute
//! transitions, the engine in `workflow/` persists them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::template::TemplateSnapshot;
use super::types::{CompanyId, DocumentId, RecipientId, SignatureType, TemplateId};
use crate::infra::EngineError;

/// Document lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    New,
    DraftPreview,
    Distributed,
    Opened,
    PartiallySigned,
    Signed,
    Completed,
    Rejected,
    Cancelled,
    Expired,
}

impl DocumentStatus {
    /// Terminal states admit no further recipient action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed
                | DocumentStatus::Rejected
                | DocumentStatus::Cancelled
                | DocumentStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::New => "new",
            DocumentStatus::DraftPreview => "draft_preview",
            DocumentStatus::Distributed => "distributed",
            DocumentStatus::Opened => "opened",
            DocumentStatus::PartiallySigned => "partially_signed",
            DocumentStatus::Signed => "signed",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Cancelled => "cancelled",
            DocumentStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-recipient signing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    /// Not yet this recipient's turn (hierarchy) or not yet invited.
    Pending,
    /// Holds a live token and may act.
    Active,
    /// Has visited the signing page.
    Opened,
    Signed,
    Rejected,
}

impl RecipientStatus {
    /// Whether the recipient may currently act on the document.
    pub fn can_act(&self) -> bool {
        matches!(self, RecipientStatus::Active | RecipientStatus::Opened)
    }
}

/// Webhook delivery state for externally initiated documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Pending,
    Delivered,
    Failed,
}

/// Evidence captured when a recipient touches the signing page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_location: Option<String>,
}

/// One signing party on a document.
///
/// `signature_order` is immutable after creation; only status and the
/// signature/evidence fields mutate. Delegation re-addresses the slot in
/// place and records the prior address in `delegated_from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub signature_order: u32,
    pub status: RecipientStatus,
    /// The currently valid signing token; `None` means no live token.
    /// Single use: rotation replaces it, resolution clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub evidence: AccessEvidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_verified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_code: Option<String>,
}

impl Recipient {
    pub fn new(email: String, name: String, phone: Option<String>, signature_order: u32) -> Self {
        Self {
            id: RecipientId::new(),
            email,
            name,
            phone,
            signature_order,
            status: RecipientStatus::Pending,
            token: None,
            token_expires_at: None,
            signature_image: None,
            signature_kind: None,
            signed_at: None,
            evidence: AccessEvidence::default(),
            scroll_completed_at: None,
            delegated_from: None,
            delegation_reason: None,
            otp_verified_at: None,
            short_code: None,
        }
    }
}

/// The central entity. Owned exclusively by its store row; recipients are
/// mutated by index replacement, never aliased out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub company_id: CompanyId,
    pub template_id: TemplateId,
    pub snapshot: TemplateSnapshot,
    pub status: DocumentStatus,
    pub payload: BTreeMap<String, String>,
    pub recipients: Vec<Recipient>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_status: Option<CallbackStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token; bumped by the store on every write.
    #[serde(default)]
    pub version: i64,
}

impl Document {
    /// Create a document from a frozen snapshot. Status starts at
    /// `DraftPreview` when the snapshot asks for a preview pass, otherwise
    /// `Distributed`.
    pub fn create(
        company_id: CompanyId,
        template_id: TemplateId,
        snapshot: TemplateSnapshot,
        payload: BTreeMap<String, String>,
        recipients: Vec<Recipient>,
        callback_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if snapshot.preview_mode {
            DocumentStatus::DraftPreview
        } else {
            DocumentStatus::Distributed
        };
        let expires_at = snapshot.link_expiry.expires_at(now);
        let callback_status = callback_url.as_ref().map(|_| CallbackStatus::Pending);

        Self {
            id: DocumentId::new(),
            company_id,
            template_id,
            snapshot,
            status,
            payload,
            recipients,
            expires_at,
            pdf_url: None,
            pdf_hash: None,
            certificate_url: None,
            callback_url,
            callback_status,
            error_reason: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    pub fn signature_type(&self) -> SignatureType {
        self.snapshot.signature_type
    }

    pub fn recipient(&self, id: RecipientId) -> Option<&Recipient> {
        self.recipients.iter().find(|r| r.id == id)
    }

    pub fn recipient_index(&self, id: RecipientId) -> Option<usize> {
        self.recipients.iter().position(|r| r.id == id)
    }

    /// Map a terminal document status to the error a recipient sees when
    /// they follow a link into it. Distinct codes per state by contract.
    pub fn terminal_access_error(&self) -> Option<EngineError> {
        match self.status {
            DocumentStatus::Completed => Some(EngineError::DocumentCompleted(self.id)),
            DocumentStatus::Cancelled => Some(EngineError::DocumentCancelled(self.id)),
            DocumentStatus::Rejected => Some(EngineError::DocumentRejected(self.id)),
            DocumentStatus::Expired => Some(EngineError::DocumentExpired(self.id)),
            _ => None,
        }
    }

    /// Hierarchy rule: may this recipient act now?
    ///
    /// For hierarchy documents a recipient is eligible only when every
    /// recipient ordered before them has signed. Other signature types have
    /// no ordering constraint.
    pub fn is_recipients_turn(&self, recipient: &Recipient) -> bool {
        if self.signature_type() != SignatureType::Hierarchy {
            return true;
        }
        self.recipients
            .iter()
            .filter(|r| r.signature_order < recipient.signature_order)
            .all(|r| r.status == RecipientStatus::Signed)
    }

    /// The transition table of §state machine: document status after the
    /// given recipient set, assuming a signature was just recorded.
    pub fn derive_status_after_signing(&self) -> DocumentStatus {
        let all_signed = self
            .recipients
            .iter()
            .all(|r| r.status == RecipientStatus::Signed);

        match self.signature_type() {
            SignatureType::Single => DocumentStatus::Signed,
            SignatureType::Hierarchy | SignatureType::Multiple | SignatureType::SendToAll => {
                if all_signed {
                    DocumentStatus::Signed
                } else {
                    DocumentStatus::PartiallySigned
                }
            }
        }
    }

    /// Next unsigned recipient in hierarchy order, if any.
    pub fn next_unsigned_recipient(&self) -> Option<&Recipient> {
        self.recipients
            .iter()
            .filter(|r| r.status != RecipientStatus::Signed)
            .min_by_key(|r| r.signature_order)
    }

    /// Keys the recipient at `signature_order` may write.
    pub fn assigned_keys(&self, signature_order: u32) -> Vec<&str> {
        self.snapshot.assigned_keys(signature_order)
    }

    /// Merge field data contributed by one recipient into the payload.
    ///
    /// Every key must belong to the recipient's own delimiter set; the
    /// first unauthorized key aborts the merge with no partial write.
    pub fn merge_field_data(
        &mut self,
        signature_order: u32,
        field_data: &BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        let assigned: Vec<String> = self
            .assigned_keys(signature_order)
            .into_iter()
            .map(String::from)
            .collect();

        for key in field_data.keys() {
            if !assigned.iter().any(|k| k == key) {
                return Err(EngineError::UnauthorizedField {
                    document_id: self.id,
                    key: key.clone(),
                });
            }
        }

        for (key, value) in field_data {
            self.payload.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Kill every recipient's live token. Used on decline, cancel and
    /// expiry — no recipient can act on a resolved document.
    pub fn invalidate_all_tokens(&mut self) {
        for recipient in &mut self.recipients {
            recipient.token = None;
            recipient.token_expires_at = None;
        }
    }

    /// Whether the document deadline has lapsed.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::template::{Delimiter, MfaConfig, NotificationConfig};
    use crate::domain::types::{DelimiterType, LinkExpiry};

    fn snapshot(signature_type: SignatureType, delimiters: Vec<Delimiter>) -> TemplateSnapshot {
        TemplateSnapshot {
            template_id: TemplateId::new(),
            name: "t".to_string(),
            signature_type,
            delimiters,
            recipients: vec![],
            link_expiry: LinkExpiry::default(),
            mfa: MfaConfig::default(),
            notifications: NotificationConfig::default(),
            preview_mode: false,
            short_link_enabled: false,
            html_content: String::new(),
        }
    }

    fn doc_with(signature_type: SignatureType, orders: &[u32]) -> Document {
        let recipients = orders
            .iter()
            .map(|o| Recipient::new(format!("r{o}@example.com"), format!("R{o}"), None, *o))
            .collect();
        Document::create(
            CompanyId::new(),
            TemplateId::new(),
            snapshot(signature_type, vec![]),
            BTreeMap::new(),
            recipients,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn preview_mode_starts_in_draft_preview() {
        let mut snap = snapshot(SignatureType::Single, vec![]);
        snap.preview_mode = true;
        let doc = Document::create(
            CompanyId::new(),
            TemplateId::new(),
            snap,
            BTreeMap::new(),
            vec![],
            None,
            Utc::now(),
        );
        assert_eq!(doc.status, DocumentStatus::DraftPreview);
    }

    #[test]
    fn single_signer_goes_straight_to_signed() {
        let mut doc = doc_with(SignatureType::Single, &[1]);
        doc.recipients[0].status = RecipientStatus::Signed;
        assert_eq!(doc.derive_status_after_signing(), DocumentStatus::Signed);
    }

    #[test]
    fn hierarchy_is_partial_until_all_signed() {
        let mut doc = doc_with(SignatureType::Hierarchy, &[1, 2]);
        doc.recipients[0].status = RecipientStatus::Signed;
        assert_eq!(
            doc.derive_status_after_signing(),
            DocumentStatus::PartiallySigned
        );

        doc.recipients[1].status = RecipientStatus::Signed;
        assert_eq!(doc.derive_status_after_signing(), DocumentStatus::Signed);
    }

    #[test]
    fn multiple_requires_every_recipient() {
        let mut doc = doc_with(SignatureType::Multiple, &[1, 2, 3]);
        doc.recipients[0].status = RecipientStatus::Signed;
        doc.recipients[2].status = RecipientStatus::Signed;
        assert_eq!(
            doc.derive_status_after_signing(),
            DocumentStatus::PartiallySigned
        );

        doc.recipients[1].status = RecipientStatus::Signed;
        assert_eq!(doc.derive_status_after_signing(), DocumentStatus::Signed);
    }

    #[test]
    fn hierarchy_turn_order_enforced() {
        let doc = doc_with(SignatureType::Hierarchy, &[1, 2]);
        let second = doc.recipients[1].clone();
        assert!(!doc.is_recipients_turn(&second));

        let mut doc = doc;
        doc.recipients[0].status = RecipientStatus::Signed;
        let second = doc.recipients[1].clone();
        assert!(doc.is_recipients_turn(&second));
    }

    #[test]
    fn non_hierarchy_has_no_turn_order() {
        let doc = doc_with(SignatureType::SendToAll, &[1, 2]);
        let second = doc.recipients[1].clone();
        assert!(doc.is_recipients_turn(&second));
    }

    #[test]
    fn merge_rejects_cross_recipient_keys() {
        let delimiters = vec![
            Delimiter {
                key: "mine".to_string(),
                kind: DelimiterType::Text,
                required: false,
                assigned_to: 1,
                default_value: None,
            },
            Delimiter {
                key: "theirs".to_string(),
                kind: DelimiterType::Text,
                required: false,
                assigned_to: 2,
                default_value: None,
            },
        ];
        let mut doc = Document::create(
            CompanyId::new(),
            TemplateId::new(),
            snapshot(SignatureType::Hierarchy, delimiters),
            BTreeMap::new(),
            vec![],
            None,
            Utc::now(),
        );

        let mut fields = BTreeMap::new();
        fields.insert("mine".to_string(), "ok".to_string());
        fields.insert("theirs".to_string(), "nope".to_string());

        let err = doc.merge_field_data(1, &fields).unwrap_err();
        assert!(matches!(err, EngineError::UnauthorizedField { key, .. } if key == "theirs"));
        // Aborted merge leaves no partial write.
        assert!(doc.payload.is_empty());
    }

    #[test]
    fn merge_accepts_own_keys() {
        let delimiters = vec![Delimiter {
            key: "mine".to_string(),
            kind: DelimiterType::Text,
            required: false,
            assigned_to: 1,
            default_value: None,
        }];
        let mut doc = Document::create(
            CompanyId::new(),
            TemplateId::new(),
            snapshot(SignatureType::Single, delimiters),
            BTreeMap::new(),
            vec![],
            None,
            Utc::now(),
        );

        let mut fields = BTreeMap::new();
        fields.insert("mine".to_string(), "value".to_string());
        doc.merge_field_data(1, &fields).unwrap();
        assert_eq!(doc.payload.get("mine").map(String::as_str), Some("value"));
    }

    #[test]
    fn invalidate_all_tokens_clears_every_recipient() {
        let mut doc = doc_with(SignatureType::Multiple, &[1, 2]);
        for r in &mut doc.recipients {
            r.token = Some("a-signing-token".to_string());
            r.token_expires_at = Some(Utc::now());
        }
        doc.invalidate_all_tokens();
        assert!(doc.recipients.iter().all(|r| r.token.is_none()));
        assert!(doc.recipients.iter().all(|r| r.token_expires_at.is_none()));
    }

    #[test]
    fn terminal_access_errors_are_distinct() {
        let mut doc = doc_with(SignatureType::Single, &[1]);

        doc.status = DocumentStatus::Completed;
        assert!(matches!(
            doc.terminal_access_error(),
            Some(EngineError::DocumentCompleted(_))
        ));

        doc.status = DocumentStatus::Expired;
        assert!(matches!(
            doc.terminal_access_error(),
            Some(EngineError::DocumentExpired(_))
        ));

        doc.status = DocumentStatus::Opened;
        assert!(doc.terminal_access_error().is_none());
    }

    #[test]
    fn next_unsigned_follows_order() {
        let mut doc = doc_with(SignatureType::Hierarchy, &[2, 1, 3]);
        doc.recipients[1].status = RecipientStatus::Signed; // order 1
        let next = doc.next_unsigned_recipient().unwrap();
        assert_eq!(next.signature_order, 2);
    }
}
