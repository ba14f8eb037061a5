//! Template contract handlers.

use axum::extract::{Extension, Path, State};
use axum::Json;
use uuid::Uuid;

use crate::api::auth_helpers::{company_of, ensure_read};
use crate::api::error::ApiError;
use crate::auth::AuthContextExt;
use crate::domain::{TemplateId, TemplateSchema};
use crate::server::AppState;

/// GET /api/v1/templates/:id/schema — the delimiter/recipient contract a
/// caller needs to build an initiate payload.
pub async fn schema(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
) -> Result<Json<TemplateSchema>, ApiError> {
    ensure_read(&auth)?;
    let schema = state
        .engine
        .template_schema(company_of(&auth), TemplateId::from_uuid(id))
        .await?;
    Ok(Json(schema))
}
