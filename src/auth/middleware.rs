//! Authentication middleware for the company API router.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use super::{ApiKeyValidator, AuthContext, AuthError, Permissions};

/// Authenticates company requests by API key.
pub struct Authenticator {
    api_key_validator: Arc<ApiKeyValidator>,
}

impl Authenticator {
    pub fn new(api_key_validator: Arc<ApiKeyValidator>) -> Self {
        Self { api_key_validator }
    }

    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<AuthContext, AuthError> {
        let header = auth_header.ok_or(AuthError::MissingAuth)?;

        if let Some(key) = header.strip_prefix("ApiKey ") {
            return self.api_key_validator.validate(key);
        }

        // Raw API key in the header.
        if header.starts_with(super::API_KEY_PREFIX) {
            return self.api_key_validator.validate(header);
        }

        Err(AuthError::MissingAuth)
    }
}

/// Auth context extension attached to authenticated requests.
#[derive(Clone)]
pub struct AuthContextExt(pub AuthContext);

/// Middleware configuration/state.
#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub authenticator: Arc<Authenticator>,
    /// If false, requests are treated as fully authorized (dev mode).
    pub require_auth: bool,
    /// Optional per-company rate limiter.
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

/// Authentication middleware for the company router.
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let context = match state.authenticator.authenticate(auth_header) {
        Ok(context) => context,
        Err(e) if state.require_auth => return auth_error_response(e),
        Err(_) => AuthContext {
            company_id: Uuid::nil(),
            permissions: Permissions::admin(),
        },
    };

    if let Some(ref limiter) = state.rate_limiter {
        let key = if context.company_id.is_nil() {
            "bootstrap".to_string()
        } else {
            format!("company:{}", context.company_id)
        };
        if let Err(e) = limiter.check(&key) {
            return auth_error_response(e);
        }
    }

    request.extensions_mut().insert(AuthContextExt(context));
    next.run(request).await
}

fn auth_error_response(error: AuthError) -> Response {
    let (status, code, message) = match error {
        AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", "Missing authentication"),
        AuthError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "INVALID_API_KEY", "Invalid API key"),
        AuthError::InsufficientPermissions => (
            StatusCode::FORBIDDEN,
            "INSUFFICIENT_PERMISSIONS",
            "Insufficient permissions",
        ),
        AuthError::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT_EXCEEDED",
            "Rate limit exceeded",
        ),
    };

    (
        status,
        axum::Json(serde_json::json!({
            "error": { "code": code, "message": message }
        })),
    )
        .into_response()
}

/// Fixed-window per-key rate limiter.
pub struct RateLimiter {
    requests_per_minute: u32,
    counts: std::sync::RwLock<std::collections::HashMap<String, (u32, std::time::Instant)>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            counts: std::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Result<(), AuthError> {
        let mut counts = self.counts.write().unwrap();
        let now = std::time::Instant::now();

        let entry = counts.entry(key.to_string()).or_insert((0, now));

        if now.duration_since(entry.1).as_secs() >= 60 {
            *entry = (0, now);
        }

        if entry.0 >= self.requests_per_minute {
            return Err(AuthError::RateLimited);
        }

        entry.0 += 1;
        Ok(())
    }
}
