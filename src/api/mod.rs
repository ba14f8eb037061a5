//! REST API layer: error codes, DTOs, handlers and routers.

pub mod auth_helpers;
pub mod error;
pub mod handlers;
mod rest;
pub mod types;

pub use error::{ApiError, ErrorCode};
pub use rest::{company_router, signing_router};
