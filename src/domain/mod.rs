//! Domain models for the e-sign engine.
//!
//! Templates, documents, recipients and the pure state-transition helpers
//! the workflow engine builds on.

mod document;
mod template;
mod timeline;
mod types;

pub use document::*;
pub use template::*;
pub use timeline::*;
pub use types::*;
