//! Individual Performance Commitment and Review (IPCR).
//!
//! A form moves Draft → Submitted → Reviewed → Finalized, with Returned
//! sending it back to the owner. Scores are 1-5 per dimension; the final
//! rating is frozen at finalization.

pub mod cycles;
pub mod duplicate_guard;
pub mod error;
pub mod evidence;
pub mod handlers;
pub mod lifecycle;
pub mod notify;
pub mod permissions;
pub mod pg_store;
pub mod scoring;
pub mod store;
pub mod types;

pub use error::{ActionResponse, IpcrError, IpcrResult};
pub use evidence::{EvidencePolicy, EvidenceQuotaManager};
pub use handlers::configure_ipcr_routes;
pub use lifecycle::PerformanceFormLifecycle;
pub use scoring::{score_form, FormScore};
pub use types::*;
