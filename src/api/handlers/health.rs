//! Health and readiness handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::server::AppState;

/// GET /health — liveness.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "esign-engine",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /ready — readiness; checks storage connectivity.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match state.engine.ping_storage().await {
        Ok(()) => Ok(Json(serde_json::json!({ "status": "ready" }))),
        Err(e) => Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string())),
    }
}
