//! Authentication for the company API surface.
//!
//! Companies authenticate with hashed API keys scoped to their tenant.
//! Recipients never come through here — the public signing surface is
//! authenticated purely by signing tokens (see `token`).
//!
//! # Authorization model
//!
//! - `read`: document status, timelines, template schemas
//! - `write`: initiate, cancel, resend, remind, bulk operations
//! - `admin`: approve/reject previews, delete
//!
//! # Configuration
//!
//! - `AUTH_MODE`: `required` (default) or `disabled` for local development
//! - `BOOTSTRAP_ADMIN_API_KEY`: initial admin key for setup
//! - `RATE_LIMIT_PER_MINUTE`: optional per-company rate limit

mod api_key;
mod middleware;

pub use api_key::*;
pub use middleware::*;

use uuid::Uuid;

/// Authentication context extracted from a company API request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Company the credentials belong to. Nil for the bootstrap admin.
    pub company_id: Uuid,

    /// Allowed operations.
    pub permissions: Permissions,
}

/// Permission flags for company operations.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub admin: bool,
}

impl Permissions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            admin: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            admin: false,
        }
    }

    pub fn admin() -> Self {
        Self {
            read: true,
            write: true,
            admin: true,
        }
    }
}

impl AuthContext {
    pub fn can_read(&self) -> bool {
        self.permissions.read
    }

    pub fn can_write(&self) -> bool {
        self.permissions.write
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.admin
    }
}

/// Authentication error.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingAuth,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("rate limit exceeded")]
    RateLimited,
}
