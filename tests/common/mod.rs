//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use esign_engine::domain::{
    CompanyId, Delimiter, DelimiterType, DeliveryChannel, Document, DocumentId, LinkExpiry,
    MfaConfig, NotificationConfig, SignatureType, Template, TemplateId, TemplateRecipient,
    TemplateStatus,
};
use esign_engine::infra::memory::{
    InMemoryAuditLog, InMemoryDocumentStore, InMemoryOtpStore, InMemoryShortLinkStore,
    InMemoryTemplateStore,
};
use esign_engine::infra::{
    CallbackSender, EngineError, GeoLocator, PdfArtifacts, PdfGenerator,
};
use esign_engine::notify::{NotificationService, RecordingProvider};
use esign_engine::otp::{OtpConfig, OtpService};
use esign_engine::token::TokenService;
use esign_engine::workflow::{
    DocumentWorkflow, InitiateRequest, RecipientInput, WorkflowConfig, WorkflowDeps,
};

/// Test tenant.
pub fn test_company_id() -> CompanyId {
    CompanyId::from_uuid(uuid::Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap())
}

/// A second tenant for cross-company scoping tests.
pub fn other_company_id() -> CompanyId {
    CompanyId::from_uuid(uuid::Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap())
}

/// PDF collaborator that returns fixed artifacts, or fails on demand.
pub struct StaticPdfGenerator {
    pub fail: AtomicBool,
}

impl StaticPdfGenerator {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PdfGenerator for StaticPdfGenerator {
    async fn generate(
        &self,
        document: &Document,
    ) -> Result<PdfArtifacts, EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("render service down".to_string()));
        }
        Ok(PdfArtifacts {
            pdf_url: format!("https://files.test/{}.pdf", document.id),
            pdf_hash: "deadbeef".to_string(),
            certificate_url: Some(format!("https://files.test/{}-cert.pdf", document.id)),
        })
    }
}

/// Callback sink that records deliveries, or fails on demand.
pub struct RecordingCallbackSender {
    pub delivered: Mutex<Vec<(String, serde_json::Value)>>,
    pub fail: AtomicBool,
}

impl RecordingCallbackSender {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl CallbackSender for RecordingCallbackSender {
    async fn deliver(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<(), EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Callback("receiver down".to_string()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        Ok(())
    }
}

/// Geo lookup that always answers.
pub struct FixedGeoLocator;

#[async_trait]
impl GeoLocator for FixedGeoLocator {
    async fn lookup(&self, _ip: &str) -> Option<String> {
        Some("Testville, TS".to_string())
    }
}

/// Fully wired in-memory engine plus handles to its stores.
pub struct TestHarness {
    pub engine: Arc<DocumentWorkflow>,
    pub documents: Arc<InMemoryDocumentStore>,
    pub templates: Arc<InMemoryTemplateStore>,
    pub audit: Arc<InMemoryAuditLog>,
    pub short_links: Arc<InMemoryShortLinkStore>,
    pub provider: Arc<RecordingProvider>,
    pub pdf: Arc<StaticPdfGenerator>,
    pub callbacks: Arc<RecordingCallbackSender>,
    pub company: CompanyId,
}

pub const TEST_BASE_URL: &str = "https://sign.test";

impl TestHarness {
    pub fn new() -> Self {
        Self::with_otp_config(OtpConfig::default())
    }

    pub fn with_otp_config(otp_config: OtpConfig) -> Self {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let templates = Arc::new(InMemoryTemplateStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let short_links = Arc::new(InMemoryShortLinkStore::new());
        let provider = Arc::new(RecordingProvider::new());
        let pdf = Arc::new(StaticPdfGenerator::new());
        let callbacks = Arc::new(RecordingCallbackSender::new());

        let engine = Arc::new(DocumentWorkflow::new(
            WorkflowDeps {
                documents: documents.clone(),
                templates: templates.clone(),
                audit: audit.clone(),
                short_links: short_links.clone(),
                tokens: Arc::new(TokenService::new(
                    b"integration-test-secret-key",
                    "esign-engine",
                )),
                otp: Arc::new(OtpService::new(
                    Arc::new(InMemoryOtpStore::new()),
                    otp_config,
                )),
                notifications: Arc::new(NotificationService::new(provider.clone())),
                pdf: pdf.clone(),
                callbacks: callbacks.clone(),
                geo: Arc::new(FixedGeoLocator),
            },
            WorkflowConfig {
                public_base_url: TEST_BASE_URL.to_string(),
            },
        ));

        Self {
            engine,
            documents,
            templates,
            audit,
            short_links,
            provider,
            pdf,
            callbacks,
            company: test_company_id(),
        }
    }

    pub async fn insert_template(&self, template: &Template) {
        use esign_engine::infra::TemplateStore;
        self.templates.insert(template).await.unwrap();
    }

    pub async fn document(&self, id: DocumentId) -> Document {
        use esign_engine::infra::DocumentStore;
        self.documents.find_unscoped(id).await.unwrap().unwrap()
    }

    /// Live token of the recipient at `signature_order`.
    pub async fn token_of(&self, document_id: DocumentId, signature_order: u32) -> String {
        self.document(document_id)
            .await
            .recipients
            .iter()
            .find(|r| r.signature_order == signature_order)
            .and_then(|r| r.token.clone())
            .expect("recipient has a live token")
    }

    /// The OTP code most recently delivered to `to` (digits of the last
    /// code-bearing notification body).
    pub fn last_otp_code(&self, to: &str) -> String {
        let sent = self.provider.sent.lock().unwrap();
        let body = &sent
            .iter()
            .rev()
            .find(|n| n.to == to && n.subject.contains("verification"))
            .expect("an OTP notification was delivered")
            .body;
        body.split_whitespace()
            .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
            .map(|w| w.to_string())
            .or_else(|| {
                body.split(|c: char| !c.is_ascii_digit())
                    .find(|w| w.len() == 6)
                    .map(|w| w.to_string())
            })
            .expect("OTP body contains a 6-digit code")
    }
}

/// Template builder with sensible defaults.
pub struct TemplateBuilder {
    template: Template,
}

impl TemplateBuilder {
    pub fn new(company: CompanyId, signature_type: SignatureType) -> Self {
        Self {
            template: Template {
                id: TemplateId::new(),
                company_id: company,
                name: "Purchase agreement".to_string(),
                status: TemplateStatus::Active,
                signature_type,
                delimiters: vec![],
                recipients: vec![TemplateRecipient {
                    signature_order: 1,
                    label: "Signer".to_string(),
                    recipient_type: "customer".to_string(),
                }],
                link_expiry: LinkExpiry::default(),
                mfa: MfaConfig::default(),
                notifications: NotificationConfig::default(),
                preview_mode: false,
                short_link_enabled: false,
                html_content: "<p>Agreement for {{vehicle}}</p>".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    pub fn delimiter(mut self, key: &str, kind: DelimiterType, required: bool, order: u32) -> Self {
        self.template.delimiters.push(Delimiter {
            key: key.to_string(),
            kind,
            required,
            assigned_to: order,
            default_value: None,
        });
        self
    }

    pub fn mfa(mut self, enabled: bool) -> Self {
        self.template.mfa = MfaConfig {
            enabled,
            channel: DeliveryChannel::Email,
            otp_expiry_min: 10,
        };
        self
    }

    pub fn preview(mut self, enabled: bool) -> Self {
        self.template.preview_mode = enabled;
        self
    }

    pub fn short_links(mut self, enabled: bool) -> Self {
        self.template.short_link_enabled = enabled;
        self
    }

    pub fn status(mut self, status: TemplateStatus) -> Self {
        self.template.status = status;
        self
    }

    pub fn build(self) -> Template {
        self.template
    }
}

/// Recipient inputs `r1@example.com` … ordered 1..=n.
pub fn recipients(n: u32) -> Vec<RecipientInput> {
    (1..=n)
        .map(|order| RecipientInput {
            email: format!("r{order}@example.com"),
            name: format!("Recipient {order}"),
            phone: None,
            signature_order: order,
        })
        .collect()
}

/// Initiate request with no payload and no callback.
pub fn initiate_request(template_id: TemplateId, recipient_count: u32) -> InitiateRequest {
    InitiateRequest {
        template_id,
        payload: Default::default(),
        recipients: recipients(recipient_count),
        callback_url: None,
    }
}
