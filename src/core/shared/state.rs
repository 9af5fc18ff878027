use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::shared::utils::DbPool;
use crate::drive::BlobStore;
use crate::ipcr::cycles::RatingCycleRegistry;
use crate::ipcr::evidence::{EvidencePolicy, EvidenceQuotaManager};
use crate::ipcr::lifecycle::PerformanceFormLifecycle;
use crate::ipcr::notify::Notifier;
use crate::ipcr::store::FormStore;
use crate::security::audit::AuditStore;

/// Collaborators the IPCR core runs against.
#[derive(Clone)]
pub struct Backends {
    pub cycles: Arc<dyn RatingCycleRegistry>,
    pub forms: Arc<dyn FormStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub audit: Arc<dyn AuditStore>,
    pub notifier: Notifier,
}

pub struct AppState {
    /// `None` when running on the in-memory backend.
    pub conn: Option<DbPool>,
    pub config: AppConfig,
    pub lifecycle: Arc<PerformanceFormLifecycle>,
    pub evidence: Arc<EvidenceQuotaManager>,
    pub audit: Arc<dyn AuditStore>,
}

impl AppState {
    pub fn new(config: AppConfig, conn: Option<DbPool>, backends: Backends) -> Self {
        let lifecycle = PerformanceFormLifecycle::new(
            backends.cycles,
            backends.forms.clone(),
            backends.audit.clone(),
            backends.notifier,
        );
        let evidence = EvidenceQuotaManager::new(
            backends.forms,
            backends.blobs,
            backends.audit.clone(),
            EvidencePolicy::from(&config.evidence),
        );

        Self {
            conn,
            config,
            lifecycle: Arc::new(lifecycle),
            evidence: Arc::new(evidence),
            audit: backends.audit,
        }
    }
}
