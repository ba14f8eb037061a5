//! Bulk operations: cancel/resend/delete over document batches and
//! CSV-driven bulk initiation.
//!
//! Every batch is a sequential loop with independent per-item accounting; a
//! failure on one document never aborts the rest of the batch.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::engine::{DocumentWorkflow, InitiateRequest, RecipientInput};
use crate::domain::{CompanyId, DocumentId, TemplateId};
use crate::infra::{EngineError, Result};

/// One failed item in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemFailure {
    pub document_id: DocumentId,
    pub reason: String,
}

/// Aggregate result of a batch operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub succeeded: u32,
    pub failed: Vec<BulkItemFailure>,
}

impl BulkOutcome {
    fn absorb(&mut self, document_id: DocumentId, result: Result<()>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(e) => self.failed.push(BulkItemFailure {
                document_id,
                reason: e.to_string(),
            }),
        }
    }
}

impl DocumentWorkflow {
    /// Cancel a batch of documents.
    pub async fn bulk_cancel(
        &self,
        company_id: CompanyId,
        document_ids: &[DocumentId],
        reason: Option<String>,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in document_ids {
            let result = self.cancel(company_id, id, reason.clone()).await;
            outcome.absorb(id, result);
        }
        outcome
    }

    /// Resend a batch of documents.
    pub async fn bulk_resend(
        &self,
        company_id: CompanyId,
        document_ids: &[DocumentId],
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in document_ids {
            let result = self.resend(company_id, id).await;
            outcome.absorb(id, result);
        }
        outcome
    }

    /// Soft-delete a batch of documents.
    pub async fn bulk_delete(
        &self,
        company_id: CompanyId,
        document_ids: &[DocumentId],
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in document_ids {
            let result = self.soft_delete(company_id, id).await;
            outcome.absorb(id, result);
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// CSV bulk initiation
// ---------------------------------------------------------------------------

/// Maps CSV columns onto recipient fields and payload delimiter keys.
/// Each row produces one single-recipient document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Column holding the recipient email.
    pub email: String,
    /// Column holding the recipient name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Delimiter key -> column name.
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
}

/// Parameters of a bulk initiate job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkInitiateSpec {
    pub template_id: TemplateId,
    pub column_mapping: ColumnMapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// A row that failed to initiate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRowError {
    /// 1-based data row number (header excluded).
    pub row: u32,
    pub reason: String,
}

/// Progress counters for a bulk initiate job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkJob {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub total: u32,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub errors: Vec<BulkRowError>,
    pub done: bool,
}

/// In-memory registry of bulk jobs. Jobs are ephemeral progress state;
/// a lost job is re-runnable from the same CSV.
#[derive(Default)]
pub struct BulkJobStore {
    jobs: RwLock<HashMap<Uuid, BulkJob>>,
}

impl BulkJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, company_id: CompanyId, total: u32) -> Uuid {
        let id = Uuid::new_v4();
        let job = BulkJob {
            id,
            company_id,
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
            done: false,
        };
        self.jobs.write().await.insert(id, job);
        id
    }

    pub async fn get(&self, company_id: CompanyId, id: Uuid) -> Option<BulkJob> {
        self.jobs
            .read()
            .await
            .get(&id)
            .filter(|job| job.company_id == company_id)
            .cloned()
    }

    async fn record_row(&self, id: Uuid, error: Option<BulkRowError>) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            job.processed += 1;
            match error {
                Some(e) => {
                    job.failed += 1;
                    job.errors.push(e);
                }
                None => job.succeeded += 1,
            }
        }
    }

    async fn finish(&self, id: Uuid) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            job.done = true;
        }
    }
}

/// Parse the CSV, register a job and process the rows. Returns the job id
/// immediately; processing continues on a spawned task.
pub async fn start_bulk_initiate(
    engine: Arc<DocumentWorkflow>,
    jobs: Arc<BulkJobStore>,
    company_id: CompanyId,
    spec: BulkInitiateSpec,
    csv_text: String,
) -> Result<Uuid> {
    let parsed = parse_csv(&csv_text)?;
    let job_id = jobs.create(company_id, parsed.rows.len() as u32).await;

    tokio::spawn(async move {
        for (row_number, row) in parsed.rows.into_iter().enumerate() {
            let row_number = row_number as u32 + 1;
            let result = initiate_row(&engine, company_id, &spec, &parsed.header, &row).await;
            let error = result.err().map(|e| BulkRowError {
                row: row_number,
                reason: e.to_string(),
            });
            if error.is_some() {
                warn!(job_id = %job_id, row = row_number, "bulk initiate row failed");
            }
            jobs.record_row(job_id, error).await;
        }
        jobs.finish(job_id).await;
    });

    Ok(job_id)
}

async fn initiate_row(
    engine: &DocumentWorkflow,
    company_id: CompanyId,
    spec: &BulkInitiateSpec,
    header: &[String],
    row: &[String],
) -> Result<()> {
    let column = |name: &str| -> Result<String> {
        let idx = header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| EngineError::PayloadValidation(format!("missing column {name:?}")))?;
        Ok(row.get(idx).cloned().unwrap_or_default())
    };

    let email = column(&spec.column_mapping.email)?;
    let name = column(&spec.column_mapping.name)?;
    let phone = match &spec.column_mapping.phone {
        Some(col) => {
            let value = column(col)?;
            (!value.is_empty()).then_some(value)
        }
        None => None,
    };

    let mut payload = BTreeMap::new();
    for (key, col) in &spec.column_mapping.payload {
        let value = column(col)?;
        if !value.is_empty() {
            payload.insert(key.clone(), value);
        }
    }

    engine
        .initiate(
            company_id,
            InitiateRequest {
                template_id: spec.template_id,
                payload,
                recipients: vec![RecipientInput {
                    email,
                    name,
                    phone,
                    signature_order: 1,
                }],
                callback_url: spec.callback_url.clone(),
            },
        )
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV parsing
// ---------------------------------------------------------------------------

struct ParsedCsv {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Minimal CSV reader: comma-separated, double-quoted fields with `""`
/// escapes, CRLF tolerant. Covers what bulk upload spreadsheets produce.
fn parse_csv(text: &str) -> Result<ParsedCsv> {
    let mut lines = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty());

    let header_line = lines
        .next()
        .ok_or_else(|| EngineError::PayloadValidation("empty CSV".to_string()))?;
    let header = parse_csv_line(header_line)?;

    let mut rows = Vec::new();
    for line in lines {
        let row = parse_csv_line(line)?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(EngineError::PayloadValidation(
            "CSV has a header but no data rows".to_string(),
        ));
    }

    Ok(ParsedCsv { header, rows })
}

fn parse_csv_line(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(EngineError::PayloadValidation(
            "unterminated quoted CSV field".to_string(),
        ));
    }

    fields.push(field);
    Ok(fields)
}
