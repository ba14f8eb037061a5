//! PostgreSQL implementations of the storage traits.

mod document_store;
mod otp_store;
mod template_store;

pub use document_store::PgDocumentStore;
pub use otp_store::PgOtpStore;
pub use template_store::{PgShortLinkStore, PgTemplateStore};
