//! Company document handlers.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::api::auth_helpers::{company_of, ensure_admin, ensure_read, ensure_write};
use crate::api::error::ApiError;
use crate::api::types::{DocumentStatusResponse, ReasonBody};
use crate::auth::AuthContextExt;
use crate::domain::{DocumentId, TimelineEntry};
use crate::server::AppState;
use crate::workflow::{InitiateOutcome, InitiateRequest};

/// POST /api/v1/documents/initiate
pub async fn initiate(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(request): Json<InitiateRequest>,
) -> Result<(StatusCode, Json<InitiateOutcome>), ApiError> {
    ensure_write(&auth)?;
    let outcome = state.engine.initiate(company_of(&auth), request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /api/v1/documents/:id/status
pub async fn status(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentStatusResponse>, ApiError> {
    ensure_read(&auth)?;
    let document = state
        .engine
        .document_status(company_of(&auth), DocumentId::from_uuid(id))
        .await?;
    Ok(Json(DocumentStatusResponse::from(&document)))
}

/// POST /api/v1/documents/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_write(&auth)?;
    state
        .engine
        .cancel(company_of(&auth), DocumentId::from_uuid(id), body.reason)
        .await?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

/// POST /api/v1/documents/:id/approve — approve a draft preview.
pub async fn approve(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_admin(&auth)?;
    state
        .engine
        .approve(company_of(&auth), DocumentId::from_uuid(id))
        .await?;
    Ok(Json(serde_json::json!({ "approved": true })))
}

/// POST /api/v1/documents/:id/reject — reject a draft preview.
pub async fn reject(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_admin(&auth)?;
    state
        .engine
        .reject_preview(company_of(&auth), DocumentId::from_uuid(id), body.reason)
        .await?;
    Ok(Json(serde_json::json!({ "rejected": true })))
}

/// POST /api/v1/documents/:id/resend
pub async fn resend(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_write(&auth)?;
    state
        .engine
        .resend(company_of(&auth), DocumentId::from_uuid(id))
        .await?;
    Ok(Json(serde_json::json!({ "resent": true })))
}

/// POST /api/v1/documents/:id/remind
pub async fn remind(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_write(&auth)?;
    state
        .engine
        .remind(company_of(&auth), DocumentId::from_uuid(id))
        .await?;
    Ok(Json(serde_json::json!({ "reminded": true })))
}

/// DELETE /api/v1/documents/:id — soft delete.
pub async fn delete(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_admin(&auth)?;
    state
        .engine
        .soft_delete(company_of(&auth), DocumentId::from_uuid(id))
        .await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// GET /api/v1/documents/:id/evidence — evidence package download.
pub async fn evidence(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_read(&auth)?;
    let package = state
        .engine
        .evidence_package(company_of(&auth), DocumentId::from_uuid(id))
        .await?;
    Ok(Json(package))
}

/// POST /api/v1/documents/:id/verify — PDF integrity check.
pub async fn verify(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
    Json(body): Json<VerifyPdfBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_read(&auth)?;
    let valid = state
        .engine
        .verify_pdf_hash(company_of(&auth), DocumentId::from_uuid(id), &body.pdf_hash)
        .await?;
    Ok(Json(serde_json::json!({ "valid": valid })))
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct VerifyPdfBody {
    pub pdf_hash: String,
}

/// GET /api/v1/documents/:id/timeline
pub async fn timeline(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TimelineEntry>>, ApiError> {
    ensure_read(&auth)?;
    let rows = state
        .engine
        .timeline(company_of(&auth), DocumentId::from_uuid(id))
        .await?;
    Ok(Json(rows))
}
