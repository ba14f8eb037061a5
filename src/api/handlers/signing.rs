//! Public signing surface handlers.
//!
//! Token-authenticated, no session. The token in the path is the only
//! credential; every handler passes it straight to the engine, which
//! re-checks current document state before acting.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Redirect;
use axum::Json;
use chrono::{DateTime, Utc};

use crate::api::error::ApiError;
use crate::api::types::{ReasonBody, VerifyOtpBody};
use crate::server::AppState;
use crate::workflow::{
    DelegateRequest, SigningPageView, SubmitOutcome, SubmitRequest, VerifyOtpOutcome,
};

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// GET /sign/:token — the signing page view.
pub async fn signing_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SigningPageView>, ApiError> {
    let view = state
        .engine
        .access_signing_page(
            &token,
            client_ip(&headers).as_deref(),
            user_agent(&headers).as_deref(),
        )
        .await?;
    Ok(Json(view))
}

/// POST /sign/:token/send-otp
pub async fn send_otp(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.send_otp(&token).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

/// POST /sign/:token/verify-otp
pub async fn verify_otp(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<VerifyOtpBody>,
) -> Result<Json<VerifyOtpOutcome>, ApiError> {
    let outcome = state.engine.verify_otp(&token, &body.code).await?;
    Ok(Json(outcome))
}

/// POST /sign/:token/submit
pub async fn submit(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitOutcome>, ApiError> {
    let outcome = state
        .engine
        .submit_signature(
            &token,
            request,
            client_ip(&headers).as_deref(),
            user_agent(&headers).as_deref(),
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /sign/:token/decline
pub async fn decline(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.decline(&token, body.reason).await?;
    Ok(Json(serde_json::json!({ "declined": true })))
}

/// POST /sign/:token/delegate
pub async fn delegate(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<DelegateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.delegate(&token, request).await?;
    Ok(Json(serde_json::json!({ "delegated": true })))
}

/// GET /sign/:token/scroll-complete
pub async fn scroll_complete(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ScrollCompleteResponse>, ApiError> {
    let at = state.engine.mark_scroll_complete(&token).await?;
    Ok(Json(ScrollCompleteResponse {
        scroll_completed_at: at,
    }))
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ScrollCompleteResponse {
    pub scroll_completed_at: DateTime<Utc>,
}

/// GET /s/:short_code — redirect to the full signing URL.
pub async fn short_link(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Redirect, ApiError> {
    let url = state.engine.resolve_short_link(&code).await?;
    Ok(Redirect::temporary(&url))
}
