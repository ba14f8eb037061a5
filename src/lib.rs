//! esign-engine
//!
//! Multi-party e-signature document lifecycle service.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (templates, documents, recipients)
//! - [`workflow`] - The document state machine and bulk operations
//! - [`token`] - Signing-token service (issue, validate, rotate)
//! - [`otp`] - One-time-code verification with attempt limiting
//! - [`notify`] - Outbound notifications with pluggable providers
//! - [`auth`] - Company API authentication (API keys)
//! - [`infra`] - Storage, audit log, retry, workers
//! - [`api`] - REST routers and error taxonomy
//! - [`server`] - Bootstrap and wiring

pub mod api;
pub mod auth;
pub mod domain;
pub mod infra;
pub mod migrations;
pub mod notify;
pub mod otp;
pub mod server;
pub mod token;
pub mod workflow;

// Re-export commonly used types
pub use domain::{
    CompanyId, Document, DocumentId, DocumentStatus, Recipient, RecipientId, RecipientStatus,
    SignatureType, Template, TemplateId, TemplateSnapshot,
};

pub use infra::{EngineError, Result};
pub use workflow::{DocumentWorkflow, WorkflowConfig, WorkflowDeps};
