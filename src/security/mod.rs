pub mod audit;
pub mod file_validation;

pub use audit::{AuditEvent, AuditEventType, AuditStore, InMemoryAuditStore, PgAuditStore};
pub use file_validation::{validate_file_upload, FileValidationConfig, FileValidationResult};
