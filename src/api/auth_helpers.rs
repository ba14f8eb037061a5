//! Authorization helpers for company API handlers.

use crate::api::error::{ApiError, ErrorCode};
use crate::auth::AuthContext;
use crate::domain::CompanyId;

/// The company a request acts for.
pub fn company_of(auth: &AuthContext) -> CompanyId {
    CompanyId::from_uuid(auth.company_id)
}

/// Require read permission.
pub fn ensure_read(auth: &AuthContext) -> Result<(), ApiError> {
    if !auth.can_read() {
        return Err(ApiError::new(
            ErrorCode::InsufficientPermissions,
            "Read permission required",
        ));
    }
    Ok(())
}

/// Require write permission.
pub fn ensure_write(auth: &AuthContext) -> Result<(), ApiError> {
    if !auth.can_write() {
        return Err(ApiError::new(
            ErrorCode::InsufficientPermissions,
            "Write permission required",
        ));
    }
    Ok(())
}

/// Require admin permission.
pub fn ensure_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if !auth.is_admin() {
        return Err(ApiError::new(
            ErrorCode::InsufficientPermissions,
            "Admin permission required",
        ));
    }
    Ok(())
}
