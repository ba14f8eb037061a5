//! Router builders for the two entry surfaces.

use axum::routing::{delete, get, post};
use axum::Router;

use super::handlers;
use crate::server::AppState;

/// Authenticated company API, nested under `/api`.
pub fn company_router() -> Router<AppState> {
    Router::new()
        .route("/v1/documents/initiate", post(handlers::documents::initiate))
        .route("/v1/documents/:id/status", get(handlers::documents::status))
        .route("/v1/documents/:id/cancel", post(handlers::documents::cancel))
        .route("/v1/documents/:id/approve", post(handlers::documents::approve))
        .route("/v1/documents/:id/reject", post(handlers::documents::reject))
        .route("/v1/documents/:id/resend", post(handlers::documents::resend))
        .route("/v1/documents/:id/remind", post(handlers::documents::remind))
        .route("/v1/documents/:id/timeline", get(handlers::documents::timeline))
        .route("/v1/documents/:id/evidence", get(handlers::documents::evidence))
        .route("/v1/documents/:id/verify", post(handlers::documents::verify))
        .route("/v1/documents/:id", delete(handlers::documents::delete))
        .route("/v1/templates/:id/schema", get(handlers::templates::schema))
        .route("/v1/bulk/initiate", post(handlers::bulk::initiate))
        .route("/v1/bulk/:job_id/status", get(handlers::bulk::job_status))
        .route("/v1/bulk/cancel", post(handlers::bulk::cancel))
        .route("/v1/bulk/resend", post(handlers::bulk::resend))
        .route("/v1/bulk/delete", post(handlers::bulk::delete))
}

/// Unauthenticated public signing surface (token in the path is the
/// credential).
pub fn signing_router() -> Router<AppState> {
    Router::new()
        .route("/sign/:token", get(handlers::signing::signing_page))
        .route("/sign/:token/send-otp", post(handlers::signing::send_otp))
        .route("/sign/:token/verify-otp", post(handlers::signing::verify_otp))
        .route("/sign/:token/submit", post(handlers::signing::submit))
        .route("/sign/:token/decline", post(handlers::signing::decline))
        .route("/sign/:token/delegate", post(handlers::signing::delegate))
        .route(
            "/sign/:token/scroll-complete",
            get(handlers::signing::scroll_complete),
        )
        .route("/s/:short_code", get(handlers::signing::short_link))
}
