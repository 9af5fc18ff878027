//! In-memory wiring of the whole IPCR core for unit and integration tests.

use axum::Router;
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{AppConfig, Backend};
use crate::core::shared::state::{AppState, Backends};
use crate::drive::InMemoryBlobStore;
use crate::ipcr::cycles::InMemoryCycleRegistry;
use crate::ipcr::evidence::EvidenceQuotaManager;
use crate::ipcr::handlers::configure_ipcr_routes;
use crate::ipcr::lifecycle::PerformanceFormLifecycle;
use crate::ipcr::notify::{InAppNotificationHandler, NotificationHandler, Notifier};
use crate::ipcr::store::InMemoryFormStore;
use crate::ipcr::types::{Caller, IndicatorCategory, NewIndicator, RatingCycle, Role};
use crate::security::audit::InMemoryAuditStore;

pub struct TestHarness {
    pub division_id: Uuid,
    pub cycle: RatingCycle,
    pub cycles: InMemoryCycleRegistry,
    pub forms: Arc<InMemoryFormStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub audit: Arc<InMemoryAuditStore>,
    pub notifications: Arc<InAppNotificationHandler>,
    pub lifecycle: Arc<PerformanceFormLifecycle>,
    pub evidence: Arc<EvidenceQuotaManager>,
    pub state: Arc<AppState>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::build(AppConfig::default(), true).await
    }

    pub async fn without_active_cycle() -> Self {
        Self::build(AppConfig::default(), false).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        Self::build(config, true).await
    }

    async fn build(mut config: AppConfig, activate: bool) -> Self {
        config.backend = Backend::Memory;

        let cycles = InMemoryCycleRegistry::new();
        let cycle = cycles.insert("January-June 2026", date(2026, 1, 1), date(2026, 6, 30)).await;
        if activate {
            // The cycle was just inserted, so activation cannot miss.
            let _ = cycles.activate(cycle.id).await;
        }

        let forms = Arc::new(InMemoryFormStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let audit = Arc::new(InMemoryAuditStore::default());
        let notifications = Arc::new(InAppNotificationHandler::new());
        let handlers: Vec<Arc<dyn NotificationHandler>> = vec![notifications.clone()];

        let backends = Backends {
            cycles: Arc::new(cycles.clone()),
            forms: forms.clone(),
            blobs: blobs.clone(),
            audit: audit.clone(),
            notifier: Notifier::new(handlers),
        };
        let state = Arc::new(AppState::new(config, None, backends));

        Self {
            division_id: Uuid::new_v4(),
            cycle,
            cycles,
            forms,
            blobs,
            audit,
            notifications,
            lifecycle: state.lifecycle.clone(),
            evidence: state.evidence.clone(),
            state,
        }
    }

    pub fn router(&self) -> Router {
        configure_ipcr_routes(self.state.config.evidence.max_file_size).with_state(self.state.clone())
    }

    /// A fresh employee in the harness division.
    pub fn employee(&self) -> Caller {
        Caller::new(Uuid::new_v4(), Role::Employee, Some(self.division_id))
    }

    pub fn division_chief(&self) -> Caller {
        Caller::new(Uuid::new_v4(), Role::DivisionChief, Some(self.division_id))
    }

    pub fn hr_manager(&self) -> Caller {
        Caller::new(Uuid::new_v4(), Role::HrManager, None)
    }

    pub fn head_of_office(&self) -> Caller {
        Caller::new(Uuid::new_v4(), Role::HeadOfOffice, None)
    }

    /// Creates a form for `employee`, adds one indicator per score triple,
    /// submits it and has a division chief endorse it.
    pub async fn reviewed_form(&self, employee: &Caller, scores: &[(i32, i32, i32)]) -> Uuid {
        let form_id = match self.lifecycle.create_form(employee).await {
            Ok(created) => created.form_id,
            Err(e) => panic!("create_form failed: {e}"),
        };
        for &(q, e, t) in scores {
            if let Err(err) = self
                .lifecycle
                .add_indicator(employee, form_id, scored_indicator(q, e, t))
                .await
            {
                panic!("add_indicator failed: {err}");
            }
        }
        if let Err(e) = self.lifecycle.submit(employee, form_id).await {
            panic!("submit failed: {e}");
        }
        if let Err(e) = self.lifecycle.endorse(&self.division_chief(), form_id).await {
            panic!("endorse failed: {e}");
        }
        form_id
    }
}

pub fn scored_indicator(quantity: i32, quality: i32, timeliness: i32) -> NewIndicator {
    NewIndicator {
        category: IndicatorCategory::Core,
        description: "Process travel vouchers".to_string(),
        indicator: "Vouchers processed within 3 working days".to_string(),
        actual_accomplishment: Some("All vouchers processed".to_string()),
        quantity_score: Some(quantity),
        quality_score: Some(quality),
        timeliness_score: Some(timeliness),
    }
}

pub fn unscored_indicator() -> NewIndicator {
    NewIndicator {
        category: IndicatorCategory::Strategic,
        description: "Digitize personnel records".to_string(),
        indicator: "80% of 201 files scanned by June".to_string(),
        actual_accomplishment: None,
        quantity_score: None,
        quality_score: None,
        timeliness_score: None,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}
