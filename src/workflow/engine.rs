//! The document state machine.
//!
//! Owns every transition of a [`Document`]: initiation, signing-page
//! access, OTP verification, signature submission, decline, delegation,
//! the admin operations, expiry sweeps and webhook delivery. All document
//! writes go through the store's conditional update; on a lost write the
//! whole operation is reloaded and reapplied, so the transition rules are
//! applied atomically even under concurrent submissions.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{
    AccessEvidence, CallbackStatus, CompanyId, DeliveryChannel, Document, DocumentId,
    DocumentStatus, Recipient, RecipientStatus, SignatureType, Template, TemplateId,
    TemplateSchema, TimelineEntry, derive_timeline,
};
use crate::infra::{
    AuditAction, AuditActor, AuditEntryBuilder, AuditLog, CallbackSender, DocumentStore,
    EngineError, GeoLocator, PdfGenerator, Result, RetryConfig, ShortLinkStore, TemplateStore,
};
use crate::notify::{Message, NotificationService};
use crate::otp::OtpService;
use crate::token::{session_token_ttl, IssuedToken, SigningClaims, TokenKind, TokenService};

/// Reapplies of a lost conditional write before giving up.
const MAX_CONFLICT_RETRIES: u32 = 4;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Base URL signing links are built against, e.g. `https://sign.example.com`.
    pub public_base_url: String,
}

/// Everything the engine talks to.
pub struct WorkflowDeps {
    pub documents: Arc<dyn DocumentStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub audit: Arc<dyn AuditLog>,
    pub short_links: Arc<dyn ShortLinkStore>,
    pub tokens: Arc<TokenService>,
    pub otp: Arc<OtpService>,
    pub notifications: Arc<NotificationService>,
    pub pdf: Arc<dyn PdfGenerator>,
    pub callbacks: Arc<dyn CallbackSender>,
    pub geo: Arc<dyn GeoLocator>,
}

/// The document workflow engine.
pub struct DocumentWorkflow {
    documents: Arc<dyn DocumentStore>,
    templates: Arc<dyn TemplateStore>,
    audit: Arc<dyn AuditLog>,
    short_links: Arc<dyn ShortLinkStore>,
    tokens: Arc<TokenService>,
    otp: Arc<OtpService>,
    notifications: Arc<NotificationService>,
    pdf: Arc<dyn PdfGenerator>,
    callbacks: Arc<dyn CallbackSender>,
    geo: Arc<dyn GeoLocator>,
    config: WorkflowConfig,
}

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// One signing party supplied at initiation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientInput {
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub signature_order: u32,
}

/// Initiate a document from a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub template_id: TemplateId,
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
    pub recipients: Vec<RecipientInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// Company-facing recipient summary (no tokens).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientSummary {
    pub id: crate::domain::RecipientId,
    pub email: String,
    pub name: String,
    pub signature_order: u32,
    pub status: RecipientStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
}

impl From<&Recipient> for RecipientSummary {
    fn from(r: &Recipient) -> Self {
        Self {
            id: r.id,
            email: r.email.clone(),
            name: r.name.clone(),
            signature_order: r.signature_order,
            status: r.status,
            signed_at: r.signed_at,
        }
    }
}

/// Result of [`DocumentWorkflow::initiate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateOutcome {
    pub document_id: DocumentId,
    pub status: DocumentStatus,
    pub recipients: Vec<RecipientSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

/// What the public signing page renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningPageView {
    pub document_id: DocumentId,
    pub document_name: String,
    pub status: DocumentStatus,
    pub body_html: String,
    pub recipient: RecipientSummary,
    /// Delimiter keys this recipient is expected to fill.
    pub fields: Vec<String>,
    pub requires_otp: bool,
    pub otp_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Signature submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub signature_image: String,
    pub signature_kind: String,
    pub intent_confirmation: bool,
    #[serde(default)]
    pub field_data: BTreeMap<String, String>,
}

/// Result of a signature submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub document_status: DocumentStatus,
    pub recipient_status: RecipientStatus,
    /// Email of the recipient activated by hierarchy advancement, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_recipient: Option<String>,
}

/// Result of OTP verification: the rotated session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpOutcome {
    pub token: String,
    pub token_expires_at: DateTime<Utc>,
}

/// Delegation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateRequest {
    pub delegate_email: String,
    pub delegate_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Token-authenticated context: validated claims plus the loaded document.
struct TokenContext {
    claims: SigningClaims,
    document: Document,
    recipient_index: usize,
}

impl TokenContext {
    fn recipient(&self) -> &Recipient {
        &self.document.recipients[self.recipient_index]
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

impl DocumentWorkflow {
    pub fn new(deps: WorkflowDeps, config: WorkflowConfig) -> Self {
        Self {
            documents: deps.documents,
            templates: deps.templates,
            audit: deps.audit,
            short_links: deps.short_links,
            tokens: deps.tokens,
            otp: deps.otp,
            notifications: deps.notifications,
            pdf: deps.pdf,
            callbacks: deps.callbacks,
            geo: deps.geo,
            config,
        }
    }

    // -- initiation ---------------------------------------------------------

    /// Create a document from a template: freeze the snapshot, validate the
    /// payload, build recipients and (unless the template asks for a
    /// preview pass) activate the first signing round.
    pub async fn initiate(
        &self,
        company_id: CompanyId,
        request: InitiateRequest,
    ) -> Result<InitiateOutcome> {
        let template = self
            .templates
            .find(company_id, request.template_id)
            .await?
            .ok_or(EngineError::TemplateNotFound(request.template_id))?;

        if template.status != crate::domain::TemplateStatus::Active {
            return Err(EngineError::TemplateNotActive(template.id));
        }

        let field_errors = template.validate_payload(&request.payload);
        if !field_errors.is_empty() {
            return Err(EngineError::PayloadValidation(
                serde_json::to_string(&field_errors)
                    .unwrap_or_else(|_| "invalid payload".to_string()),
            ));
        }

        let recipients = build_recipients(&template, &request.recipients)?;

        let snapshot = template.snapshot();
        let now = Utc::now();
        let mut document = Document::create(
            company_id,
            template.id,
            snapshot,
            request.payload,
            recipients,
            request.callback_url,
            now,
        );

        let mut preview_url = None;
        if document.status == DocumentStatus::DraftPreview {
            // Preview pass: one read-only token for the reviewing party,
            // bound to the first recipient slot. No signing notifications.
            let issued = self.issue_token(
                &document,
                &document.recipients[0],
                TokenKind::Preview,
                document.snapshot.link_expiry.duration(),
            )?;
            document.recipients[0].token = Some(issued.token.clone());
            document.recipients[0].token_expires_at = Some(issued.expires_at);
            preview_url = Some(self.signing_url(&issued.token));
        } else {
            self.activate_initial_recipients(&mut document).await?;
        }

        self.documents.insert(&document).await?;

        self.record(
            AuditEntryBuilder::new(
                AuditAction::DocumentInitiated,
                AuditActor::Company { email: None },
                company_id,
                document.id,
            )
            .details(serde_json::json!({
                "template_id": template.id.to_string(),
                "signature_type": document.signature_type().to_string(),
                "recipients": document.recipients.len(),
            }))
            .build(),
        )
        .await;

        if document.status == DocumentStatus::Distributed {
            self.record(
                AuditEntryBuilder::new(
                    AuditAction::DocumentDistributed,
                    AuditActor::Company { email: None },
                    company_id,
                    document.id,
                )
                .build(),
            )
            .await;
            self.notify_active_recipients(&document, false).await;
        }

        Ok(InitiateOutcome {
            document_id: document.id,
            status: document.status,
            recipients: document.recipients.iter().map(Into::into).collect(),
            preview_url,
        })
    }

    // -- public signing surface --------------------------------------------

    /// Open the signing page: validates the token, enforces terminal-state
    /// and hierarchy rules, and promotes recipient/document to `opened`
    /// at most once each. Evidence capture is best-effort.
    pub async fn access_signing_page(
        &self,
        raw_token: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<SigningPageView> {
        let geo = self.capture_geo(ip).await;

        let mut attempt = 0u32;
        let (document, recipient_index) = loop {
            let ctx = self.load_token_context(raw_token).await?;
            let mut document = ctx.document;
            let idx = ctx.recipient_index;

            if ctx.claims.kind != TokenKind::Preview
                && !document.is_recipients_turn(&document.recipients[idx])
            {
                return Err(EngineError::NotYourTurn(document.recipients[idx].id));
            }

            let mut changed = false;
            let recipient = &mut document.recipients[idx];

            if matches!(
                recipient.status,
                RecipientStatus::Pending | RecipientStatus::Active
            ) && ctx.claims.kind != TokenKind::Preview
            {
                recipient.status = RecipientStatus::Opened;
                recipient.evidence = AccessEvidence {
                    ip_address: ip.map(String::from),
                    user_agent: user_agent.map(String::from),
                    geo_location: geo.clone(),
                };
                changed = true;
            }

            if document.status == DocumentStatus::Distributed
                && ctx.claims.kind != TokenKind::Preview
            {
                document.status = DocumentStatus::Opened;
                changed = true;
            }

            if !changed {
                break (document, idx);
            }

            match self.documents.update(&document).await {
                Ok(version) => {
                    document.version = version;
                    self.record(
                        AuditEntryBuilder::new(
                            AuditAction::SigningPageOpened,
                            AuditActor::Recipient {
                                email: document.recipients[idx].email.clone(),
                            },
                            document.company_id,
                            document.id,
                        )
                        .recipient(document.recipients[idx].email.clone())
                        .build(),
                    )
                    .await;
                    break (document, idx);
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        let recipient = &document.recipients[recipient_index];
        Ok(SigningPageView {
            document_id: document.id,
            document_name: document.snapshot.name.clone(),
            status: document.status,
            body_html: document.snapshot.render(&document.payload),
            recipient: recipient.into(),
            fields: document
                .assigned_keys(recipient.signature_order)
                .into_iter()
                .map(String::from)
                .collect(),
            requires_otp: document.snapshot.mfa.enabled,
            otp_verified: recipient.otp_verified_at.is_some(),
            scroll_completed_at: recipient.scroll_completed_at,
            expires_at: document.expires_at,
        })
    }

    /// Generate and deliver a one-time code for the recipient.
    pub async fn send_otp(&self, raw_token: &str) -> Result<()> {
        let ctx = self.load_token_context(raw_token).await?;
        ensure_not_preview(&ctx.claims)?;

        if !ctx.document.snapshot.mfa.enabled {
            return Err(EngineError::OtpNotRequired);
        }

        let mfa = &ctx.document.snapshot.mfa;
        let recipient = ctx.recipient();
        let code = self.otp.generate(recipient.id, mfa.otp_expiry_min).await?;

        let destination = match mfa.channel {
            DeliveryChannel::Email => recipient.email.clone(),
            DeliveryChannel::Sms => recipient
                .phone
                .clone()
                .unwrap_or_else(|| recipient.email.clone()),
        };

        self.notifications
            .send(
                Message::OtpCode {
                    code: &code,
                    expiry_minutes: mfa.otp_expiry_min,
                },
                mfa.channel,
                &destination,
            )
            .await?;

        self.record(
            AuditEntryBuilder::new(
                AuditAction::OtpSent,
                AuditActor::Recipient {
                    email: recipient.email.clone(),
                },
                ctx.document.company_id,
                ctx.document.id,
            )
            .recipient(recipient.email.clone())
            .build(),
        )
        .await;

        Ok(())
    }

    /// Verify a one-time code. On success the signing token is rotated to a
    /// short-lived session token; the old token is dead the moment the new
    /// one is persisted.
    pub async fn verify_otp(&self, raw_token: &str, code: &str) -> Result<VerifyOtpOutcome> {
        // The code check is one-shot (it consumes the stored OTP state), so
        // it runs exactly once; only the persist is reapplied on conflicts.
        let first = self.load_token_context(raw_token).await?;
        ensure_not_preview(&first.claims)?;

        if !first.document.snapshot.mfa.enabled {
            return Err(EngineError::OtpNotRequired);
        }

        self.otp.verify(first.recipient().id, code).await?;

        let issued = self
            .tokens
            .rotate(&first.claims, TokenKind::Session, session_token_ttl())?;

        let mut attempt = 0u32;
        loop {
            // The old token stays live until this write lands, so reloading
            // through it is safe across retries.
            let ctx = self.load_token_context(raw_token).await?;
            let mut document = ctx.document;
            let idx = ctx.recipient_index;
            let email = document.recipients[idx].email.clone();
            document.recipients[idx].token = Some(issued.token.clone());
            document.recipients[idx].token_expires_at = Some(issued.expires_at);
            document.recipients[idx].otp_verified_at = Some(Utc::now());

            match self.documents.update(&document).await {
                Ok(_) => {
                    self.record(
                        AuditEntryBuilder::new(
                            AuditAction::OtpVerified,
                            AuditActor::Recipient { email: email.clone() },
                            document.company_id,
                            document.id,
                        )
                        .recipient(email)
                        .build(),
                    )
                    .await;

                    return Ok(VerifyOtpOutcome {
                        token: issued.token,
                        token_expires_at: issued.expires_at,
                    });
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit a signature. Applies the transition table atomically and, for
    /// hierarchy documents, activates the next recipient synchronously.
    pub async fn submit_signature(
        &self,
        raw_token: &str,
        request: SubmitRequest,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<SubmitOutcome> {
        if !request.intent_confirmation {
            return Err(EngineError::ConsentRequired);
        }

        let mut attempt = 0u32;
        let (document, signer_email, outcome, next_notification) = loop {
            let ctx = self.load_token_context(raw_token).await?;
            ensure_not_preview(&ctx.claims)?;
            let now = Utc::now();

            let mut document = ctx.document;
            let idx = ctx.recipient_index;
            let signer_email = document.recipients[idx].email.clone();

            match document.recipients[idx].status {
                RecipientStatus::Signed => {
                    return Err(EngineError::AlreadySigned(document.recipients[idx].id))
                }
                RecipientStatus::Rejected => {
                    return Err(EngineError::AlreadyRejected(document.recipients[idx].id))
                }
                _ => {}
            }

            if document.snapshot.mfa.enabled && ctx.claims.kind != TokenKind::Session {
                return Err(EngineError::OtpRequired);
            }

            if !document.is_recipients_turn(&document.recipients[idx]) {
                return Err(EngineError::NotYourTurn(document.recipients[idx].id));
            }

            // Field authorization comes before any mutation is persisted.
            let order = document.recipients[idx].signature_order;
            let shape_errors = document.snapshot.validate_field_values(&request.field_data);
            if !shape_errors.is_empty() {
                return Err(EngineError::PayloadValidation(
                    serde_json::to_string(&shape_errors)
                        .unwrap_or_else(|_| "invalid field data".to_string()),
                ));
            }
            document.merge_field_data(order, &request.field_data)?;

            // The token stays live so a revisit can answer ALREADY_SIGNED;
            // it dies when the document resolves.
            {
                let recipient = &mut document.recipients[idx];
                recipient.status = RecipientStatus::Signed;
                recipient.signature_image = Some(request.signature_image.clone());
                recipient.signature_kind = Some(request.signature_kind.clone());
                recipient.signed_at = Some(now);
                if recipient.evidence.ip_address.is_none() {
                    recipient.evidence.ip_address = ip.map(String::from);
                    recipient.evidence.user_agent = user_agent.map(String::from);
                }
            }

            document.status = document.derive_status_after_signing();

            // Hierarchy advancement: hand the baton to the next recipient
            // in the same write.
            let mut next_notification = None;
            if document.status == DocumentStatus::PartiallySigned
                && document.signature_type() == SignatureType::Hierarchy
            {
                if let Some(next) = document.next_unsigned_recipient() {
                    let next_id = next.id;
                    let issued = self.issue_token(
                        &document,
                        next,
                        TokenKind::Signing,
                        document.expires_at - now,
                    )?;
                    let next_idx = document
                        .recipient_index(next_id)
                        .expect("next recipient came from this document");
                    let url = self.signing_url(&issued.token);
                    let next_recipient = &mut document.recipients[next_idx];
                    next_recipient.status = RecipientStatus::Active;
                    next_recipient.token = Some(issued.token);
                    next_recipient.token_expires_at = Some(issued.expires_at);
                    next_notification = Some((
                        next_recipient.email.clone(),
                        next_recipient.name.clone(),
                        url,
                        next_recipient.short_code.clone(),
                    ));
                }
            }

            match self.documents.update(&document).await {
                Ok(version) => {
                    document.version = version;
                    let outcome = SubmitOutcome {
                        document_status: document.status,
                        recipient_status: RecipientStatus::Signed,
                        next_recipient: next_notification.as_ref().map(|(email, ..)| email.clone()),
                    };
                    break (document, signer_email, outcome, next_notification);
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        self.record(
            AuditEntryBuilder::new(
                AuditAction::SignatureSubmitted,
                AuditActor::Recipient {
                    email: signer_email.clone(),
                },
                document.company_id,
                document.id,
            )
            .recipient(signer_email)
            .details(serde_json::json!({ "document_status": document.status.to_string() }))
            .build(),
        )
        .await;

        // Post-commit side effects are best-effort by contract.
        if let Some((email, name, url, short_code)) = next_notification {
            if let Some(code) = short_code {
                if let Err(e) = self.short_links.put(&code, &url).await {
                    warn!(error = %e, "failed to re-point short link");
                }
            }
            let message = Message::SigningInvitation {
                recipient_name: &name,
                document_name: &document.snapshot.name,
                signing_url: &url,
            };
            if let Err(e) = self
                .notifications
                .send(message, DeliveryChannel::Email, &email)
                .await
            {
                warn!(error = %e, to = %email, "next-recipient notification failed");
            }
        }

        if document.status == DocumentStatus::Signed {
            if let Err(e) = self.finalize_completion(document.id).await {
                warn!(document_id = %document.id, error = %e, "completion deferred");
            }
        }

        Ok(outcome)
    }

    /// Decline to sign. Resolves the document and kills every recipient's
    /// token — nobody can act on a rejected document.
    pub async fn decline(&self, raw_token: &str, reason: Option<String>) -> Result<()> {
        let mut attempt = 0u32;
        let (document, email) = loop {
            let ctx = self.load_token_context(raw_token).await?;
            ensure_not_preview(&ctx.claims)?;

            let mut document = ctx.document;
            let idx = ctx.recipient_index;

            match document.recipients[idx].status {
                RecipientStatus::Signed => {
                    return Err(EngineError::AlreadySigned(document.recipients[idx].id))
                }
                RecipientStatus::Rejected => {
                    return Err(EngineError::AlreadyRejected(document.recipients[idx].id))
                }
                _ => {}
            }

            let email = document.recipients[idx].email.clone();
            document.recipients[idx].status = RecipientStatus::Rejected;
            document.status = DocumentStatus::Rejected;
            document.error_reason = reason.clone();
            document.invalidate_all_tokens();

            match self.documents.update(&document).await {
                Ok(_) => break (document, email),
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        self.record(
            AuditEntryBuilder::new(
                AuditAction::SignatureDeclined,
                AuditActor::Recipient { email: email.clone() },
                document.company_id,
                document.id,
            )
            .recipient(email.clone())
            .details(serde_json::json!({ "reason": document.error_reason }))
            .build(),
        )
        .await;

        if document.snapshot.notifications.notify_on_decline {
            if let Some(cc) = document.snapshot.notifications.cc_email.clone() {
                let message = Message::DocumentDeclined {
                    document_name: &document.snapshot.name,
                    declined_by: &email,
                    reason: document.error_reason.as_deref(),
                };
                if let Err(e) = self
                    .notifications
                    .send(message, DeliveryChannel::Email, &cc)
                    .await
                {
                    warn!(error = %e, "decline notification failed");
                }
            }
        }

        self.attempt_callback(document.id).await;
        Ok(())
    }

    /// Re-address the recipient slot to a delegate. The slot keeps its
    /// signature_order; the original address is preserved in
    /// `delegated_from`.
    pub async fn delegate(&self, raw_token: &str, request: DelegateRequest) -> Result<()> {
        let mut attempt = 0u32;
        let (document, delegate_url, delegate_email, delegate_name, delegated_by) = loop {
            let ctx = self.load_token_context(raw_token).await?;
            ensure_not_preview(&ctx.claims)?;
            let now = Utc::now();

            let mut document = ctx.document;
            let idx = ctx.recipient_index;

            if document.recipients[idx].status == RecipientStatus::Signed {
                return Err(EngineError::DelegationNotAllowed(
                    "recipient has already signed".to_string(),
                ));
            }

            let issued = self.issue_token(
                &document,
                &document.recipients[idx],
                TokenKind::Signing,
                document.expires_at - now,
            )?;
            let url = self.signing_url(&issued.token);

            let recipient = &mut document.recipients[idx];
            let previous_email = recipient.email.clone();
            recipient.delegated_from = Some(previous_email.clone());
            recipient.delegation_reason = request.reason.clone();
            recipient.email = request.delegate_email.clone();
            recipient.name = request.delegate_name.clone();
            recipient.phone = request.delegate_phone.clone();
            recipient.status = RecipientStatus::Active;
            recipient.token = Some(issued.token);
            recipient.token_expires_at = Some(issued.expires_at);
            recipient.otp_verified_at = None;
            recipient.scroll_completed_at = None;
            recipient.evidence = AccessEvidence::default();
            let short_code = recipient.short_code.clone();

            match self.documents.update(&document).await {
                Ok(_) => {
                    if let Some(code) = short_code {
                        if let Err(e) = self.short_links.put(&code, &url).await {
                            warn!(error = %e, "failed to re-point short link");
                        }
                    }
                    break (
                        document,
                        url,
                        request.delegate_email.clone(),
                        request.delegate_name.clone(),
                        previous_email,
                    );
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        self.record(
            AuditEntryBuilder::new(
                AuditAction::SigningDelegated,
                AuditActor::Recipient {
                    email: delegated_by.clone(),
                },
                document.company_id,
                document.id,
            )
            .recipient(delegated_by.clone())
            .details(serde_json::json!({
                "delegate_email": delegate_email,
                "reason": document
                    .recipients
                    .iter()
                    .find(|r| r.email == delegate_email)
                    .and_then(|r| r.delegation_reason.clone()),
            }))
            .build(),
        )
        .await;

        let message = Message::DelegationNotice {
            delegate_name: &delegate_name,
            delegated_by: &delegated_by,
            document_name: &document.snapshot.name,
            signing_url: &delegate_url,
        };
        if let Err(e) = self
            .notifications
            .send(message, DeliveryChannel::Email, &delegate_email)
            .await
        {
            warn!(error = %e, to = %delegate_email, "delegate notification failed");
        }

        Ok(())
    }

    /// Record that the recipient scrolled to the bottom of the document.
    /// Idempotent: the first timestamp sticks.
    pub async fn mark_scroll_complete(&self, raw_token: &str) -> Result<DateTime<Utc>> {
        let mut attempt = 0u32;
        loop {
            let ctx = self.load_token_context(raw_token).await?;
            ensure_not_preview(&ctx.claims)?;

            if let Some(at) = ctx.recipient().scroll_completed_at {
                return Ok(at);
            }

            let mut document = ctx.document;
            let idx = ctx.recipient_index;
            let now = Utc::now();
            let email = document.recipients[idx].email.clone();
            document.recipients[idx].scroll_completed_at = Some(now);

            match self.documents.update(&document).await {
                Ok(_) => {
                    self.record(
                        AuditEntryBuilder::new(
                            AuditAction::ScrollCompleted,
                            AuditActor::Recipient { email: email.clone() },
                            document.company_id,
                            document.id,
                        )
                        .recipient(email)
                        .build(),
                    )
                    .await;
                    return Ok(now);
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve a short code to its full signing URL.
    pub async fn resolve_short_link(&self, code: &str) -> Result<String> {
        self.short_links
            .resolve(code)
            .await?
            .ok_or_else(|| EngineError::ShortLinkNotFound(code.to_string()))
    }

    // -- company/admin operations ------------------------------------------

    /// Approve a draft preview: distribute the document and activate the
    /// first signing round. Only valid from `draft_preview`.
    pub async fn approve(&self, company_id: CompanyId, document_id: DocumentId) -> Result<()> {
        let mut attempt = 0u32;
        let document = loop {
            let mut document = self.load_scoped(company_id, document_id).await?;

            if document.status != DocumentStatus::DraftPreview {
                return Err(EngineError::InvalidStatusTransition {
                    document_id,
                    from: document.status.to_string(),
                    action: "approve".to_string(),
                });
            }

            // The preview token dies with distribution.
            document.invalidate_all_tokens();
            document.status = DocumentStatus::Distributed;
            self.activate_initial_recipients(&mut document).await?;

            match self.documents.update(&document).await {
                Ok(version) => {
                    document.version = version;
                    break document;
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        self.record(
            AuditEntryBuilder::new(
                AuditAction::PreviewApproved,
                AuditActor::Company { email: None },
                company_id,
                document_id,
            )
            .build(),
        )
        .await;
        self.record(
            AuditEntryBuilder::new(
                AuditAction::DocumentDistributed,
                AuditActor::Company { email: None },
                company_id,
                document_id,
            )
            .build(),
        )
        .await;

        self.notify_active_recipients(&document, false).await;
        Ok(())
    }

    /// Reject a draft preview; the document is cancelled. Only valid from
    /// `draft_preview`.
    pub async fn reject_preview(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        reason: Option<String>,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let mut document = self.load_scoped(company_id, document_id).await?;

            if document.status != DocumentStatus::DraftPreview {
                return Err(EngineError::InvalidStatusTransition {
                    document_id,
                    from: document.status.to_string(),
                    action: "reject".to_string(),
                });
            }

            document.status = DocumentStatus::Cancelled;
            document.error_reason = reason.clone();
            document.invalidate_all_tokens();

            match self.documents.update(&document).await {
                Ok(_) => {
                    self.record(
                        AuditEntryBuilder::new(
                            AuditAction::PreviewRejected,
                            AuditActor::Company { email: None },
                            company_id,
                            document_id,
                        )
                        .details(serde_json::json!({ "reason": reason }))
                        .build(),
                    )
                    .await;
                    return Ok(());
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Cancel a document. Disallowed once completed.
    pub async fn cancel(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        reason: Option<String>,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let mut document = self.load_scoped(company_id, document_id).await?;

            if matches!(
                document.status,
                DocumentStatus::Completed | DocumentStatus::Cancelled
            ) {
                return Err(EngineError::InvalidStatusTransition {
                    document_id,
                    from: document.status.to_string(),
                    action: "cancel".to_string(),
                });
            }

            document.status = DocumentStatus::Cancelled;
            document.error_reason = reason.clone();
            document.invalidate_all_tokens();

            match self.documents.update(&document).await {
                Ok(_) => {
                    self.record(
                        AuditEntryBuilder::new(
                            AuditAction::DocumentCancelled,
                            AuditActor::Company { email: None },
                            company_id,
                            document_id,
                        )
                        .details(serde_json::json!({ "reason": reason }))
                        .build(),
                    )
                    .await;
                    self.attempt_callback(document_id).await;
                    return Ok(());
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Rotate tokens for every recipient who can still act and re-send
    /// their invitations. Disallowed once completed/cancelled/expired.
    pub async fn resend(&self, company_id: CompanyId, document_id: DocumentId) -> Result<()> {
        let mut attempt = 0u32;
        let document = loop {
            let mut document = self.load_scoped(company_id, document_id).await?;
            ensure_resendable(&document, "resend")?;

            let now = Utc::now();
            let ids: Vec<crate::domain::RecipientId> = document
                .recipients
                .iter()
                .filter(|r| r.status.can_act())
                .map(|r| r.id)
                .collect();

            for id in ids {
                let idx = document
                    .recipient_index(id)
                    .expect("recipient came from this document");
                let issued = self.issue_token(
                    &document,
                    &document.recipients[idx],
                    TokenKind::Signing,
                    document.expires_at - now,
                )?;
                let url = self.signing_url(&issued.token);
                let recipient = &mut document.recipients[idx];
                recipient.token = Some(issued.token);
                recipient.token_expires_at = Some(issued.expires_at);
                if let Some(code) = recipient.short_code.clone() {
                    if let Err(e) = self.short_links.put(&code, &url).await {
                        warn!(error = %e, "failed to re-point short link");
                    }
                }
            }

            match self.documents.update(&document).await {
                Ok(version) => {
                    document.version = version;
                    break document;
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        self.record(
            AuditEntryBuilder::new(
                AuditAction::DocumentResent,
                AuditActor::Company { email: None },
                company_id,
                document_id,
            )
            .build(),
        )
        .await;

        self.notify_active_recipients(&document, false).await;
        Ok(())
    }

    /// Re-notify recipients who can still act, reusing their live tokens.
    /// Disallowed once completed/cancelled/expired.
    pub async fn remind(&self, company_id: CompanyId, document_id: DocumentId) -> Result<()> {
        let document = self.load_scoped(company_id, document_id).await?;
        ensure_resendable(&document, "remind")?;

        self.record(
            AuditEntryBuilder::new(
                AuditAction::ReminderSent,
                AuditActor::Company { email: None },
                company_id,
                document_id,
            )
            .build(),
        )
        .await;

        self.notify_active_recipients(&document, true).await;
        Ok(())
    }

    /// Soft-delete: the document disappears from reads but the audit trail
    /// survives.
    pub async fn soft_delete(&self, company_id: CompanyId, document_id: DocumentId) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let mut document = self.load_scoped(company_id, document_id).await?;
            document.is_deleted = true;
            document.invalidate_all_tokens();

            match self.documents.update(&document).await {
                Ok(_) => {
                    self.record(
                        AuditEntryBuilder::new(
                            AuditAction::DocumentDeleted,
                            AuditActor::Company { email: None },
                            company_id,
                            document_id,
                        )
                        .build(),
                    )
                    .await;
                    return Ok(());
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Company-scoped document read.
    pub async fn document_status(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Document> {
        self.load_scoped(company_id, document_id).await
    }

    /// Timeline view derived from the audit log.
    pub async fn timeline(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Vec<TimelineEntry>> {
        // Existence check keeps the 404 scoping consistent.
        self.load_scoped(company_id, document_id).await?;
        let entries = self.audit.for_document(company_id, document_id).await?;
        Ok(derive_timeline(&entries))
    }

    /// Evidence package: the signed artifacts, per-recipient signing
    /// evidence and the full audit trail, bundled for download.
    pub async fn evidence_package(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<serde_json::Value> {
        let document = self.load_scoped(company_id, document_id).await?;
        let entries = self.audit.for_document(company_id, document_id).await?;

        Ok(serde_json::json!({
            "document_id": document.id.to_string(),
            "document_name": document.snapshot.name,
            "status": document.status.to_string(),
            "pdf_url": document.pdf_url,
            "pdf_hash": document.pdf_hash,
            "certificate_url": document.certificate_url,
            "completed_at": document.completed_at,
            "recipients": document
                .recipients
                .iter()
                .map(|r| serde_json::json!({
                    "email": r.email,
                    "name": r.name,
                    "signature_order": r.signature_order,
                    "status": r.status,
                    "signed_at": r.signed_at,
                    "ip_address": r.evidence.ip_address,
                    "user_agent": r.evidence.user_agent,
                    "geo_location": r.evidence.geo_location,
                    "scroll_completed_at": r.scroll_completed_at,
                    "delegated_from": r.delegated_from,
                    "otp_verified_at": r.otp_verified_at,
                }))
                .collect::<Vec<_>>(),
            "audit_trail": entries,
        }))
    }

    /// Check a downloaded PDF's hash against the one recorded at
    /// completion. Only completed documents carry a hash.
    pub async fn verify_pdf_hash(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
        pdf_hash: &str,
    ) -> Result<bool> {
        let document = self.load_scoped(company_id, document_id).await?;
        match document.pdf_hash.as_deref() {
            Some(stored) => Ok(stored == pdf_hash),
            None => Err(EngineError::InvalidStatusTransition {
                document_id,
                from: document.status.to_string(),
                action: "verify".to_string(),
            }),
        }
    }

    /// Delimiter/recipient contract for building an initiate payload.
    pub async fn template_schema(
        &self,
        company_id: CompanyId,
        template_id: TemplateId,
    ) -> Result<TemplateSchema> {
        let template = self
            .templates
            .find(company_id, template_id)
            .await?
            .ok_or(EngineError::TemplateNotFound(template_id))?;
        Ok(TemplateSchema::from(&template))
    }

    // -- completion, expiry, callbacks -------------------------------------

    /// Promote a fully signed document to completed by invoking the PDF
    /// collaborator. On failure the document stays `signed` and the call is
    /// retryable.
    pub async fn finalize_completion(&self, document_id: DocumentId) -> Result<()> {
        let document = self
            .documents
            .find_unscoped(document_id)
            .await?
            .ok_or(EngineError::DocumentNotFound(document_id))?;

        if document.status != DocumentStatus::Signed {
            return Err(EngineError::InvalidStatusTransition {
                document_id,
                from: document.status.to_string(),
                action: "complete".to_string(),
            });
        }

        let artifacts = match self.pdf.generate(&document).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                self.record(
                    AuditEntryBuilder::new(
                        AuditAction::CompletionFailed,
                        AuditActor::System,
                        document.company_id,
                        document_id,
                    )
                    .failed(e.to_string())
                    .build(),
                )
                .await;
                return Err(e);
            }
        };

        let mut attempt = 0u32;
        let document = loop {
            let mut document = self
                .documents
                .find_unscoped(document_id)
                .await?
                .ok_or(EngineError::DocumentNotFound(document_id))?;

            if document.status != DocumentStatus::Signed {
                return Ok(()); // someone else completed or resolved it
            }

            document.status = DocumentStatus::Completed;
            document.pdf_url = Some(artifacts.pdf_url.clone());
            document.pdf_hash = Some(artifacts.pdf_hash.clone());
            document.certificate_url = artifacts.certificate_url.clone();
            document.completed_at = Some(Utc::now());
            document.invalidate_all_tokens();

            match self.documents.update(&document).await {
                Ok(version) => {
                    document.version = version;
                    break document;
                }
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        self.record(
            AuditEntryBuilder::new(
                AuditAction::DocumentCompleted,
                AuditActor::System,
                document.company_id,
                document_id,
            )
            .details(serde_json::json!({ "pdf_hash": document.pdf_hash }))
            .build(),
        )
        .await;

        if document.snapshot.notifications.notify_on_completion {
            for recipient in &document.recipients {
                let message = Message::DocumentCompleted {
                    document_name: &document.snapshot.name,
                    pdf_url: document.pdf_url.as_deref(),
                };
                if let Err(e) = self
                    .notifications
                    .send(message, DeliveryChannel::Email, &recipient.email)
                    .await
                {
                    warn!(error = %e, to = %recipient.email, "completion notification failed");
                }
            }
        }

        self.attempt_callback(document_id).await;
        Ok(())
    }

    /// Sweep expired documents into the `expired` state. Called by the
    /// background worker and the admin CLI; failures on one document never
    /// stop the sweep.
    pub async fn expire_documents(&self, now: DateTime<Utc>, limit: i64) -> Result<u32> {
        let stale = self.documents.list_expired(now, limit).await?;
        let mut expired = 0u32;

        for mut document in stale {
            document.status = DocumentStatus::Expired;
            document.invalidate_all_tokens();

            match self.documents.update(&document).await {
                Ok(_) => {
                    expired += 1;
                    self.record(
                        AuditEntryBuilder::new(
                            AuditAction::DocumentExpired,
                            AuditActor::System,
                            document.company_id,
                            document.id,
                        )
                        .build(),
                    )
                    .await;
                    self.attempt_callback(document.id).await;
                }
                Err(EngineError::VersionConflict { .. }) => {
                    // Raced with live activity; the next sweep re-evaluates.
                    debug!(document_id = %document.id, "expiry sweep lost a write, skipping");
                }
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "expiry sweep failed for document");
                }
            }
        }

        if expired > 0 {
            info!(expired, "expiry sweep transitioned documents");
        }
        Ok(expired)
    }

    /// Cheap storage connectivity probe for readiness checks.
    pub async fn ping_storage(&self) -> Result<()> {
        self.documents.list_pending_callbacks(0).await.map(|_| ())
    }

    /// Deliver outstanding webhook callbacks for resolved documents.
    pub async fn deliver_pending_callbacks(&self, limit: i64) -> Result<u32> {
        let pending = self.documents.list_pending_callbacks(limit).await?;
        let mut delivered = 0u32;
        for document in pending {
            if self.deliver_callback(&document).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    // -- internals ----------------------------------------------------------

    async fn load_token_context(&self, raw_token: &str) -> Result<TokenContext> {
        let claims = self.tokens.validate(raw_token)?;
        let document_id = claims.document_id()?;

        let document = self
            .documents
            .find_unscoped(document_id)
            .await?
            .ok_or(EngineError::DocumentNotFound(document_id))?;

        // The token binds a company; a mismatch reads as absence.
        if document.company_id != claims.company_id()? {
            return Err(EngineError::DocumentNotFound(document_id));
        }

        let recipient_id = claims.recipient_id()?;
        let recipient_index = document
            .recipient_index(recipient_id)
            .ok_or(EngineError::RecipientNotFound(recipient_id))?;

        // Resolution state outranks token freshness: a link into a
        // resolved or overdue document reports what happened to it, with a
        // distinct code per state.
        if let Some(err) = document.terminal_access_error() {
            return Err(err);
        }
        if document.is_past_deadline(Utc::now()) {
            return Err(EngineError::DocumentExpired(document.id));
        }

        // Single use: only the stored token is live.
        if document.recipients[recipient_index].token.as_deref() != Some(raw_token) {
            return Err(EngineError::InvalidToken);
        }

        Ok(TokenContext {
            claims,
            document,
            recipient_index,
        })
    }

    async fn load_scoped(
        &self,
        company_id: CompanyId,
        document_id: DocumentId,
    ) -> Result<Document> {
        self.documents
            .find(company_id, document_id)
            .await?
            .ok_or(EngineError::DocumentNotFound(document_id))
    }

    /// Issue signing tokens at distribution time. Every recipient gets a
    /// token (so an out-of-turn visit can answer NOT_YOUR_TURN instead of
    /// a generic failure), but only the recipients who may act now become
    /// active: all of them for multiple/send_to_all, the first in order
    /// otherwise. Hierarchy advancement later re-issues a fresh token for
    /// each newly activated recipient.
    async fn activate_initial_recipients(&self, document: &mut Document) -> Result<()> {
        let now = Utc::now();
        let ttl = document.expires_at - now;

        let first_order = document
            .recipients
            .iter()
            .map(|r| r.signature_order)
            .min()
            .unwrap_or_default();
        let all_at_once = document.signature_type().activates_all_at_once();

        let ids: Vec<crate::domain::RecipientId> =
            document.recipients.iter().map(|r| r.id).collect();

        for id in ids {
            let idx = document
                .recipient_index(id)
                .expect("recipient came from this document");
            let issued =
                self.issue_token(document, &document.recipients[idx], TokenKind::Signing, ttl)?;
            let url = self.signing_url(&issued.token);

            let mut short_code = None;
            if document.snapshot.short_link_enabled {
                let code = document.recipients[idx]
                    .short_code
                    .clone()
                    .unwrap_or_else(random_short_code);
                self.short_links.put(&code, &url).await?;
                short_code = Some(code);
            }

            let recipient = &mut document.recipients[idx];
            recipient.status = if all_at_once || recipient.signature_order == first_order {
                RecipientStatus::Active
            } else {
                RecipientStatus::Pending
            };
            recipient.token = Some(issued.token);
            recipient.token_expires_at = Some(issued.expires_at);
            if short_code.is_some() {
                recipient.short_code = short_code;
            }
        }

        Ok(())
    }

    fn issue_token(
        &self,
        document: &Document,
        recipient: &Recipient,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        self.tokens.issue(
            document.id,
            recipient.id,
            document.company_id,
            &recipient.email,
            kind,
            ttl,
        )
    }

    fn signing_url(&self, token: &str) -> String {
        format!("{}/sign/{}", self.config.public_base_url, token)
    }

    /// Invite or remind every recipient who currently holds a live token.
    async fn notify_active_recipients(&self, document: &Document, reminder: bool) {
        for recipient in &document.recipients {
            if !recipient.status.can_act() {
                continue;
            }
            let Some(token) = recipient.token.as_deref() else {
                continue;
            };
            let url = self.signing_url(token);
            let message = if reminder {
                Message::SigningReminder {
                    recipient_name: &recipient.name,
                    document_name: &document.snapshot.name,
                    signing_url: &url,
                }
            } else {
                Message::SigningInvitation {
                    recipient_name: &recipient.name,
                    document_name: &document.snapshot.name,
                    signing_url: &url,
                }
            };
            if let Err(e) = self
                .notifications
                .send(message, DeliveryChannel::Email, &recipient.email)
                .await
            {
                warn!(error = %e, to = %recipient.email, "recipient notification failed");
            }
        }
    }

    /// Best-effort webhook delivery; updates `callback_status`, never fails
    /// the caller.
    async fn attempt_callback(&self, document_id: DocumentId) {
        let document = match self.documents.find_unscoped(document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return,
            Err(e) => {
                warn!(document_id = %document_id, error = %e, "callback load failed");
                return;
            }
        };
        if document.callback_url.is_some()
            && document.callback_status == Some(CallbackStatus::Pending)
        {
            self.deliver_callback(&document).await;
        }
    }

    async fn deliver_callback(&self, document: &Document) -> bool {
        let Some(url) = document.callback_url.clone() else {
            return false;
        };

        let payload = serde_json::json!({
            "document_id": document.id.to_string(),
            "status": document.status.to_string(),
            "completed_at": document.completed_at,
            "pdf_url": document.pdf_url,
            "pdf_hash": document.pdf_hash,
            "error_reason": document.error_reason,
        });

        let outcome = self.callbacks.deliver(&url, &payload).await;
        let (status, action) = match &outcome {
            Ok(()) => (CallbackStatus::Delivered, AuditAction::CallbackDelivered),
            Err(_) => (CallbackStatus::Failed, AuditAction::CallbackFailed),
        };

        // Record delivery state; a lost write here just means the next
        // worker pass re-reads fresh state.
        let mut attempt = 0u32;
        loop {
            let Ok(Some(mut fresh)) = self.documents.find_unscoped(document.id).await else {
                break;
            };
            fresh.callback_status = Some(status);
            match self.documents.update(&fresh).await {
                Ok(_) => break,
                Err(EngineError::VersionConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    self.conflict_backoff(attempt).await;
                }
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "callback status write failed");
                    break;
                }
            }
        }

        let mut builder = AuditEntryBuilder::new(
            action,
            AuditActor::System,
            document.company_id,
            document.id,
        );
        if let Err(e) = &outcome {
            builder = builder.failed(e.to_string());
        }
        self.record(builder.build()).await;

        outcome.is_ok()
    }

    async fn capture_geo(&self, ip: Option<&str>) -> Option<String> {
        let ip = ip?;
        match tokio::time::timeout(std::time::Duration::from_secs(1), self.geo.lookup(ip)).await {
            Ok(geo) => geo,
            Err(_) => {
                debug!(ip, "geo lookup timed out");
                None
            }
        }
    }

    async fn conflict_backoff(&self, attempt: u32) {
        let delay = RetryConfig::conflict().delay_for_attempt(attempt - 1);
        tokio::time::sleep(delay).await;
    }

    /// Audit append is never allowed to fail a committed transition.
    async fn record(&self, entry: crate::infra::AuditEntry) {
        if let Err(e) = self.audit.append(entry).await {
            warn!(error = %e, "audit append failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// Preview tokens are read-only; every mutating recipient operation
/// refuses them.
fn ensure_not_preview(claims: &SigningClaims) -> Result<()> {
    if claims.kind == TokenKind::Preview {
        return Err(EngineError::InvalidToken);
    }
    Ok(())
}

fn ensure_resendable(document: &Document, action: &str) -> Result<()> {
    if matches!(
        document.status,
        DocumentStatus::Completed | DocumentStatus::Cancelled | DocumentStatus::Expired
    ) {
        return Err(EngineError::InvalidStatusTransition {
            document_id: document.id,
            from: document.status.to_string(),
            action: action.to_string(),
        });
    }
    Ok(())
}

fn build_recipients(template: &Template, inputs: &[RecipientInput]) -> Result<Vec<Recipient>> {
    if inputs.is_empty() {
        return Err(EngineError::PayloadValidation(
            "at least one recipient is required".to_string(),
        ));
    }

    if template.signature_type == SignatureType::Single && inputs.len() != 1 {
        return Err(EngineError::PayloadValidation(
            "single-signer templates take exactly one recipient".to_string(),
        ));
    }

    let mut orders: Vec<u32> = inputs.iter().map(|r| r.signature_order).collect();
    orders.sort_unstable();
    orders.dedup();
    if orders.len() != inputs.len() {
        return Err(EngineError::PayloadValidation(
            "recipient signature_order values must be unique".to_string(),
        ));
    }

    let mut recipients: Vec<Recipient> = inputs
        .iter()
        .map(|input| {
            Recipient::new(
                input.email.clone(),
                input.name.clone(),
                input.phone.clone(),
                input.signature_order,
            )
        })
        .collect();
    recipients.sort_by_key(|r| r.signature_order);
    Ok(recipients)
}

fn random_short_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
