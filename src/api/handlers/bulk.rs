//! Bulk operation handlers.

use axum::extract::{Extension, Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::api::auth_helpers::{company_of, ensure_write};
use crate::api::error::{ApiError, ErrorCode};
use crate::api::types::{BulkDocumentsBody, BulkInitiateResponse};
use crate::auth::AuthContextExt;
use crate::domain::DocumentId;
use crate::server::AppState;
use crate::workflow::{start_bulk_initiate, BulkInitiateSpec, BulkJob, BulkOutcome};

/// POST /api/v1/bulk/initiate — multipart upload: a `spec` part with the
/// JSON [`BulkInitiateSpec`] and a `file` part with the CSV.
pub async fn initiate(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<BulkInitiateResponse>), ApiError> {
    ensure_write(&auth)?;

    let mut spec: Option<BulkInitiateSpec> = None;
    let mut csv_text: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::new(ErrorCode::InvalidRequestBody, format!("multipart error: {e}"))
    })? {
        match field.name() {
            Some("spec") => {
                let text = field.text().await.map_err(|e| {
                    ApiError::new(ErrorCode::InvalidRequestBody, format!("spec part: {e}"))
                })?;
                spec = Some(serde_json::from_str(&text).map_err(|e| {
                    ApiError::new(ErrorCode::InvalidRequestBody, format!("invalid spec: {e}"))
                })?);
            }
            Some("file") => {
                csv_text = Some(field.text().await.map_err(|e| {
                    ApiError::new(ErrorCode::InvalidRequestBody, format!("file part: {e}"))
                })?);
            }
            _ => {}
        }
    }

    let spec = spec.ok_or_else(|| {
        ApiError::new(ErrorCode::InvalidRequestBody, "missing `spec` part")
    })?;
    let csv_text = csv_text.ok_or_else(|| {
        ApiError::new(ErrorCode::InvalidRequestBody, "missing `file` part")
    })?;

    let job_id = start_bulk_initiate(
        state.engine.clone(),
        state.bulk_jobs.clone(),
        company_of(&auth),
        spec,
        csv_text,
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(BulkInitiateResponse { job_id })))
}

/// GET /api/v1/bulk/:job_id/status
pub async fn job_status(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<BulkJob>, ApiError> {
    let job = state
        .bulk_jobs
        .get(company_of(&auth), job_id)
        .await
        .ok_or_else(|| {
            ApiError::new(ErrorCode::JobNotFound, format!("Unknown job: {job_id}"))
        })?;
    Ok(Json(job))
}

/// POST /api/v1/bulk/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(body): Json<BulkDocumentsBody>,
) -> Result<Json<BulkOutcome>, ApiError> {
    ensure_write(&auth)?;
    let ids = to_document_ids(&body);
    let outcome = state
        .engine
        .bulk_cancel(company_of(&auth), &ids, body.reason.clone())
        .await;
    Ok(Json(outcome))
}

/// POST /api/v1/bulk/resend
pub async fn resend(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(body): Json<BulkDocumentsBody>,
) -> Result<Json<BulkOutcome>, ApiError> {
    ensure_write(&auth)?;
    let ids = to_document_ids(&body);
    let outcome = state.engine.bulk_resend(company_of(&auth), &ids).await;
    Ok(Json(outcome))
}

/// POST /api/v1/bulk/delete
pub async fn delete(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(body): Json<BulkDocumentsBody>,
) -> Result<Json<BulkOutcome>, ApiError> {
    ensure_write(&auth)?;
    let ids = to_document_ids(&body);
    let outcome = state.engine.bulk_delete(company_of(&auth), &ids).await;
    Ok(Json(outcome))
}

fn to_document_ids(body: &BulkDocumentsBody) -> Vec<DocumentId> {
    body.document_ids
        .iter()
        .copied()
        .map(DocumentId::from_uuid)
        .collect()
}
