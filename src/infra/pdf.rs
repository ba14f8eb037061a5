//! PDF generation collaborator implementations.
//!
//! Rendering itself is an external service; the engine only depends on the
//! invoke/await/update contract. On failure the document stays `signed`
//! and completion is retryable.

use async_trait::async_trait;
use serde::Deserialize;

use super::{EngineError, PdfArtifacts, PdfGenerator, Result};
use crate::domain::Document;

/// Calls an external rendering service over HTTP.
pub struct HttpPdfGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPdfGenerator {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    pdf_url: String,
    pdf_hash: String,
    #[serde(default)]
    certificate_url: Option<String>,
}

#[async_trait]
impl PdfGenerator for HttpPdfGenerator {
    async fn generate(&self, document: &Document) -> Result<PdfArtifacts> {
        let body = serde_json::json!({
            "document_id": document.id.to_string(),
            "html": document.snapshot.render(&document.payload),
            "signatures": document
                .recipients
                .iter()
                .filter(|r| r.signed_at.is_some())
                .map(|r| serde_json::json!({
                    "email": r.email,
                    "name": r.name,
                    "signed_at": r.signed_at,
                    "signature_image": r.signature_image,
                }))
                .collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Internal(format!("pdf service: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Internal(format!(
                "pdf service returned {}",
                response.status()
            )));
        }

        let rendered: RenderResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Internal(format!("pdf service response: {e}")))?;

        Ok(PdfArtifacts {
            pdf_url: rendered.pdf_url,
            pdf_hash: rendered.pdf_hash,
            certificate_url: rendered.certificate_url,
        })
    }
}

/// Fallback when no rendering service is configured: completion always
/// fails and documents stay `signed` until one is.
pub struct UnconfiguredPdfGenerator;

#[async_trait]
impl PdfGenerator for UnconfiguredPdfGenerator {
    async fn generate(&self, _document: &Document) -> Result<PdfArtifacts> {
        Err(EngineError::Configuration(
            "no PDF service configured (set PDF_SERVICE_URL)".to_string(),
        ))
    }
}
