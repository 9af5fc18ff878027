//! IPCR form state machine.
//!
//! ```text
//! draft ──submit──▶ submitted ──endorse──▶ reviewed ──finalize──▶ finalized
//!   ▲                   │                     │
//!   └──── returned ◀────┴──────return─────────┘
//! ```
//!
//! Each action runs the same sequence: load, authorize against the
//! permission table, check the status, check the guard, then commit through
//! one conditional store write. Audit and notification side effects happen
//! after the commit and never undo it.

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::cycles::RatingCycleRegistry;
use super::duplicate_guard::DuplicateGuard;
use super::error::{IpcrError, IpcrResult};
use super::notify::{FormNotification, Notifier};
use super::permissions::{authorize, authorize_role, Action, FormOwner, Scope};
use super::scoring::{is_valid_score, score_form, FormScore, ScoringError};
use super::store::{status_rejection, FinalRating, FormStore, Transition};
use super::types::{
    Caller, FormFilter, FormStatus, Indicator, IndicatorField, IndicatorPatch, NewIndicator,
    PerformanceForm, RatingCycle,
};
use crate::security::audit::{AuditEvent, AuditEventType, AuditOutcome, AuditResource, AuditStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormCreated {
    pub form_id: Uuid,
    /// `false` when the caller already had a form for the active cycle.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDetail {
    pub form: PerformanceForm,
    pub indicators: Vec<Indicator>,
    pub attachment_count: usize,
    /// Provisional score shown before finalization once every indicator is
    /// fully rated. Never persisted.
    pub preview: Option<FormScore>,
}

pub struct PerformanceFormLifecycle {
    cycles: Arc<dyn RatingCycleRegistry>,
    store: Arc<dyn FormStore>,
    guard: DuplicateGuard,
    audit: Arc<dyn AuditStore>,
    notifier: Notifier,
}

impl PerformanceFormLifecycle {
    pub fn new(
        cycles: Arc<dyn RatingCycleRegistry>,
        store: Arc<dyn FormStore>,
        audit: Arc<dyn AuditStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            guard: DuplicateGuard::new(store.clone()),
            cycles,
            store,
            audit,
            notifier,
        }
    }

    pub async fn active_cycle(&self) -> IpcrResult<Option<RatingCycle>> {
        self.cycles.active_cycle().await
    }

    pub async fn create_form(&self, caller: &Caller) -> IpcrResult<FormCreated> {
        if let Err(e) = authorize_role(caller, Action::CreateForm) {
            self.record_denial(caller, Action::CreateForm, None).await;
            return Err(e);
        }

        let cycle = self
            .cycles
            .active_cycle()
            .await?
            .ok_or_else(|| IpcrError::Validation("No active rating cycle".to_string()))?;

        if let Some(form_id) = self.guard.exists(caller.user_id, cycle.id).await? {
            info!("Employee {} already has form {form_id} for cycle {}", caller.user_id, cycle.id);
            return Ok(FormCreated {
                form_id,
                created: false,
            });
        }

        let draft = PerformanceForm::new_draft(caller.user_id, caller.division_id, cycle.id);
        let form = match self.store.insert_form(draft).await {
            Ok(form) => form,
            Err(IpcrError::Conflict(reason)) => {
                // Lost the race to a concurrent create; hand back the winner.
                return match self.guard.exists(caller.user_id, cycle.id).await? {
                    Some(form_id) => Ok(FormCreated {
                        form_id,
                        created: false,
                    }),
                    None => Err(IpcrError::Conflict(reason)),
                };
            }
            Err(e) => return Err(e),
        };

        info!("Created IPCR form {} for employee {} in cycle {}", form.id, form.employee_id, cycle.name);
        self.record(
            AuditEvent::new(AuditEventType::FormCreated, caller)
                .with_form(form.id)
                .with_description(&format!("Form created for cycle {}", cycle.name))
                .with_metadata("cycleId", serde_json::json!(cycle.id)),
        )
        .await;

        Ok(FormCreated {
            form_id: form.id,
            created: true,
        })
    }

    pub async fn get_form(&self, caller: &Caller, form_id: Uuid) -> IpcrResult<FormDetail> {
        let form = self.load_form(form_id).await?;
        self.check(caller, Action::ViewForm, &form).await?;

        let indicators = self.store.list_indicators(form.id).await?;
        let attachment_count = self.store.list_attachments(form.id).await?.len();
        let preview = if form.status.is_terminal() {
            None
        } else {
            score_form(&indicators).ok()
        };

        Ok(FormDetail {
            form,
            indicators,
            attachment_count,
            preview,
        })
    }

    /// Lists forms visible to the caller, narrowed by `filter`.
    pub async fn list_forms(&self, caller: &Caller, mut filter: FormFilter) -> IpcrResult<Vec<PerformanceForm>> {
        match authorize_role(caller, Action::ViewForm)? {
            Scope::Own => filter.employee_id = Some(caller.user_id),
            Scope::Division => {
                let division_id = caller.division_id.ok_or_else(|| {
                    IpcrError::Forbidden("no division assigned to this reviewer".to_string())
                })?;
                filter.division_id = Some(division_id);
            }
            Scope::Any => {}
        }
        self.store.list_forms(&filter).await
    }

    pub async fn add_indicator(&self, caller: &Caller, form_id: Uuid, new: NewIndicator) -> IpcrResult<Indicator> {
        let form = self.load_form(form_id).await?;
        self.check(caller, Action::EditContent, &form).await?;
        if !form.status.is_owner_editable() {
            return Err(status_rejection(form.status, "add an indicator"));
        }

        require_text("description", &new.description)?;
        require_text("indicator", &new.indicator)?;
        for (name, score) in [
            ("quantityScore", new.quantity_score),
            ("qualityScore", new.quality_score),
            ("timelinessScore", new.timeliness_score),
        ] {
            check_score(name, score)?;
        }

        let now = Utc::now();
        let mut indicator = Indicator {
            id: Uuid::new_v4(),
            form_id: form.id,
            category: new.category,
            description: new.description.trim().to_string(),
            indicator: new.indicator.trim().to_string(),
            actual_accomplishment: new.actual_accomplishment,
            quantity_score: None,
            quality_score: None,
            timeliness_score: None,
            average_score: None,
            sort_order: 0,
            created_at: now,
            updated_at: now,
        };
        indicator.apply(&IndicatorField::QuantityScore(new.quantity_score));
        indicator.apply(&IndicatorField::QualityScore(new.quality_score));
        indicator.apply(&IndicatorField::TimelinessScore(new.timeliness_score));

        let indicator = self
            .store
            .insert_indicator(indicator, FormStatus::OWNER_EDITABLE)
            .await?;

        self.record(
            AuditEvent::new(AuditEventType::IndicatorAdded, caller)
                .with_form(form.id)
                .with_resource(AuditResource::new("indicator").with_id(indicator.id))
                .with_metadata("category", serde_json::json!(indicator.category.as_str())),
        )
        .await;

        Ok(indicator)
    }

    /// Applies each present field as its own write. The owner edits content
    /// and self-ratings while the form is editable; reviewers in scope edit
    /// scores only while it is under review.
    pub async fn update_indicator(
        &self,
        caller: &Caller,
        indicator_id: Uuid,
        patch: IndicatorPatch,
    ) -> IpcrResult<Indicator> {
        let current = self.load_indicator(indicator_id).await?;
        let form = self.load_form(current.form_id).await?;

        let fields = patch.into_fields();
        let is_owner = caller.user_id == form.employee_id;
        let (action, editable_in) = if is_owner {
            (Action::EditContent, FormStatus::OWNER_EDITABLE)
        } else {
            (Action::EditScores, FormStatus::UNDER_REVIEW)
        };
        self.check(caller, action, &form).await?;

        if !is_owner {
            if let Some(field) = fields.iter().find(|f| !f.is_score()) {
                self.record_denial(caller, action, Some(form.id)).await;
                return Err(IpcrError::Forbidden(format!(
                    "reviewers may only change scores, not {}",
                    field.name()
                )));
            }
        }
        if !editable_in.contains(&form.status) {
            return Err(status_rejection(form.status, "edit an indicator"));
        }

        if fields.is_empty() {
            return Err(IpcrError::Validation("No indicator fields to update".to_string()));
        }
        for field in &fields {
            match field {
                IndicatorField::Description(text) => require_text("description", text)?,
                IndicatorField::Indicator(text) => require_text("indicator", text)?,
                other if other.is_score() => check_score(other.name(), other.score())?,
                _ => {}
            }
        }

        let mut updated = current;
        for field in &fields {
            let field = match field {
                IndicatorField::Description(text) => IndicatorField::Description(text.trim().to_string()),
                IndicatorField::Indicator(text) => IndicatorField::Indicator(text.trim().to_string()),
                other => other.clone(),
            };
            updated = self
                .store
                .update_indicator_field(indicator_id, &field, editable_in)
                .await?;
        }

        let names: Vec<&str> = fields.iter().map(IndicatorField::name).collect();
        self.record(
            AuditEvent::new(AuditEventType::IndicatorUpdated, caller)
                .with_form(form.id)
                .with_resource(AuditResource::new("indicator").with_id(indicator_id))
                .with_metadata("fields", serde_json::json!(names)),
        )
        .await;

        Ok(updated)
    }

    pub async fn remove_indicator(&self, caller: &Caller, indicator_id: Uuid) -> IpcrResult<()> {
        let indicator = self.load_indicator(indicator_id).await?;
        let form = self.load_form(indicator.form_id).await?;
        self.check(caller, Action::EditContent, &form).await?;
        if !form.status.is_owner_editable() {
            return Err(status_rejection(form.status, "remove an indicator"));
        }

        self.store
            .delete_indicator(indicator_id, FormStatus::OWNER_EDITABLE)
            .await?;

        self.record(
            AuditEvent::new(AuditEventType::IndicatorRemoved, caller)
                .with_form(form.id)
                .with_resource(AuditResource::new("indicator").with_id(indicator_id)),
        )
        .await;
        Ok(())
    }

    pub async fn submit(&self, caller: &Caller, form_id: Uuid) -> IpcrResult<PerformanceForm> {
        let form = self.load_form(form_id).await?;
        self.check(caller, Action::Submit, &form).await?;
        require_status(&form, FormStatus::OWNER_EDITABLE, "submit")?;

        if self.store.list_indicators(form.id).await?.is_empty() {
            return Err(IpcrError::Validation(
                "Add at least one indicator before submitting".to_string(),
            ));
        }

        let transition = Transition::new(form.id, FormStatus::OWNER_EDITABLE, FormStatus::Submitted, caller.user_id)
            .at_version(form.version);
        let form = self.store.transition(&transition).await?;

        info!("Form {} submitted by {}", form.id, caller.user_id);
        self.record(AuditEvent::new(AuditEventType::FormSubmitted, caller).with_form(form.id))
            .await;
        self.notifier.notify(FormNotification::submitted(&form)).await;
        Ok(form)
    }

    pub async fn endorse(&self, caller: &Caller, form_id: Uuid) -> IpcrResult<PerformanceForm> {
        const FROM: &[FormStatus] = &[FormStatus::Submitted];

        let form = self.load_form(form_id).await?;
        self.check(caller, Action::Endorse, &form).await?;
        require_status(&form, FROM, "endorse")?;

        let transition = Transition::new(form.id, FROM, FormStatus::Reviewed, caller.user_id);
        let form = self.store.transition(&transition).await?;

        info!("Form {} endorsed by {} ({})", form.id, caller.user_id, caller.role);
        self.record(AuditEvent::new(AuditEventType::FormEndorsed, caller).with_form(form.id))
            .await;
        Ok(form)
    }

    pub async fn return_form(
        &self,
        caller: &Caller,
        form_id: Uuid,
        remarks: Option<String>,
    ) -> IpcrResult<PerformanceForm> {
        let form = self.load_form(form_id).await?;
        self.check(caller, Action::Return, &form).await?;
        require_status(&form, FormStatus::UNDER_REVIEW, "return")?;

        let mut transition = Transition::new(form.id, FormStatus::UNDER_REVIEW, FormStatus::Returned, caller.user_id);
        if let Some(remarks) = remarks.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) {
            transition = transition.with_remarks(remarks);
        }
        let form = self.store.transition(&transition).await?;

        info!("Form {} returned by {}", form.id, caller.user_id);
        self.record(
            AuditEvent::new(AuditEventType::FormReturned, caller)
                .with_form(form.id)
                .with_description(form.remarks.as_deref().unwrap_or_default()),
        )
        .await;
        self.notifier.notify(FormNotification::returned(&form)).await;
        Ok(form)
    }

    /// Scores the snapshot read at the form's current version and commits
    /// only if no write landed in between.
    pub async fn finalize(&self, caller: &Caller, form_id: Uuid) -> IpcrResult<PerformanceForm> {
        const FROM: &[FormStatus] = &[FormStatus::Reviewed];

        let form = self.load_form(form_id).await?;
        self.check(caller, Action::Finalize, &form).await?;
        require_status(&form, FROM, "finalize")?;

        let indicators = self.store.list_indicators(form.id).await?;
        let score = score_form(&indicators).map_err(|e| match e {
            ScoringError::NoIndicators => IpcrError::Validation("Form has no indicators".to_string()),
            ScoringError::IncompleteScores(ids) => IpcrError::Validation(format!(
                "{} indicator(s) still need quantity, quality and timeliness scores",
                ids.len()
            )),
            ScoringError::OutOfRange(id) => {
                IpcrError::Validation(format!("Indicator {id} has a score outside 1-5"))
            }
        })?;

        let transition = Transition::new(form.id, FROM, FormStatus::Finalized, caller.user_id)
            .at_version(form.version)
            .with_outcome(FinalRating {
                average: score.grand_average,
                adjectival: score.adjectival_rating,
            });
        let form = self.store.transition(&transition).await?;

        info!(
            "Form {} finalized by {}: {:.3} ({})",
            form.id, caller.user_id, score.grand_average, score.adjectival_rating
        );
        self.record(
            AuditEvent::new(AuditEventType::FormFinalized, caller)
                .with_form(form.id)
                .with_metadata("grandAverage", serde_json::json!(score.grand_average))
                .with_metadata("adjectivalRating", serde_json::json!(score.adjectival_rating)),
        )
        .await;
        self.notifier.notify(FormNotification::finalized(&form)).await;
        Ok(form)
    }

    async fn load_form(&self, form_id: Uuid) -> IpcrResult<PerformanceForm> {
        self.store
            .get_form(form_id)
            .await?
            .ok_or_else(|| IpcrError::NotFound("Form not found".to_string()))
    }

    async fn load_indicator(&self, indicator_id: Uuid) -> IpcrResult<Indicator> {
        self.store
            .get_indicator(indicator_id)
            .await?
            .ok_or_else(|| IpcrError::NotFound("Indicator not found".to_string()))
    }

    async fn check(&self, caller: &Caller, action: Action, form: &PerformanceForm) -> IpcrResult<()> {
        let result = authorize(caller, action, &FormOwner::from(form));
        if result.is_err() {
            self.record_denial(caller, action, Some(form.id)).await;
        }
        result
    }

    async fn record_denial(&self, caller: &Caller, action: Action, form_id: Option<Uuid>) {
        warn!(
            "Denied {} ({}) the right to {}{}",
            caller.user_id,
            caller.role,
            action.as_str(),
            form_id.map(|id| format!(" on form {id}")).unwrap_or_default()
        );
        let mut event = AuditEvent::new(AuditEventType::PermissionDenied, caller)
            .with_outcome(AuditOutcome::Failure)
            .with_description(action.as_str());
        if let Some(form_id) = form_id {
            event = event.with_form(form_id);
        }
        self.record(event).await;
    }

    async fn record(&self, event: AuditEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.audit.store(event).await {
            error!("Failed to store audit event {}: {e}", event_type.as_str());
        }
    }
}

fn require_status(form: &PerformanceForm, allowed: &[FormStatus], action: &str) -> IpcrResult<()> {
    if allowed.contains(&form.status) {
        Ok(())
    } else {
        Err(IpcrError::Conflict(format!("Cannot {action} a form that is {}", form.status)))
    }
}

fn require_text(name: &str, value: &str) -> IpcrResult<()> {
    if value.trim().is_empty() {
        return Err(IpcrError::Validation(format!("{name} must not be empty")));
    }
    Ok(())
}

fn check_score(name: &str, score: Option<i32>) -> IpcrResult<()> {
    match score {
        Some(s) if !is_valid_score(s) => Err(IpcrError::Validation(format!(
            "{name} must be between 1 and 5, got {s}"
        ))),
        _ => Ok(()),
    }
}
