//! Persistence contract for forms, indicators and attachment metadata.
//!
//! Every mutating call is a single conditional write: the form's status is
//! re-checked against the allowed set inside the same lock or transaction
//! that performs the write, and the form `version` is bumped. Transitions
//! additionally compare the version the caller read.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::{IpcrError, IpcrResult};
use super::types::{
    AdjectivalRating, Attachment, AttachmentScope, FormFilter, FormStatus, Indicator,
    IndicatorField, PerformanceForm,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalRating {
    pub average: f64,
    pub adjectival: AdjectivalRating,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub form_id: Uuid,
    pub from: &'static [FormStatus],
    pub to: FormStatus,
    /// When set, the write only lands if the form is still at this version.
    pub expected_version: Option<i64>,
    pub actor_id: Uuid,
    pub remarks: Option<String>,
    pub outcome: Option<FinalRating>,
}

impl Transition {
    pub fn new(form_id: Uuid, from: &'static [FormStatus], to: FormStatus, actor_id: Uuid) -> Self {
        Self {
            form_id,
            from,
            to,
            expected_version: None,
            actor_id,
            remarks: None,
            outcome: None,
        }
    }

    pub fn at_version(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn with_outcome(mut self, outcome: FinalRating) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Applies the status change and the review stamps that go with it.
    pub fn apply_to(&self, form: &mut PerformanceForm) {
        let now = Utc::now();
        form.status = self.to;
        form.version += 1;
        form.updated_at = now;
        match self.to {
            FormStatus::Submitted => form.submitted_at = Some(now),
            FormStatus::Reviewed => {
                form.reviewed_by = Some(self.actor_id);
                form.reviewed_at = Some(now);
            }
            FormStatus::Returned => {
                form.reviewed_by = Some(self.actor_id);
                form.reviewed_at = Some(now);
            }
            FormStatus::Finalized => {
                form.finalized_by = Some(self.actor_id);
                form.finalized_at = Some(now);
                if let Some(outcome) = self.outcome {
                    form.final_average_rating = Some(outcome.average);
                    form.adjectival_rating = Some(outcome.adjectival);
                }
            }
            FormStatus::Draft => {}
        }
        if let Some(remarks) = &self.remarks {
            form.remarks = Some(remarks.clone());
        }
    }
}

/// Error for a write attempted while the form is in the wrong status.
/// Finalized forms are immutable, which is a validation failure; any other
/// mismatch is a state conflict.
pub fn status_rejection(status: FormStatus, attempted: &str) -> IpcrError {
    if status == FormStatus::Finalized {
        IpcrError::Validation(format!(
            "Form is finalized and can no longer be changed ({attempted})"
        ))
    } else {
        IpcrError::Conflict(format!("Cannot {attempted} while form is {status}"))
    }
}

pub fn transition_rejection(form: &PerformanceForm, transition: &Transition) -> IpcrError {
    if !transition.from.contains(&form.status) {
        return IpcrError::Conflict(format!(
            "Cannot move form from {} to {}",
            form.status, transition.to
        ));
    }
    IpcrError::Conflict(format!(
        "Form changed while moving to {} (version {} expected, found {})",
        transition.to,
        transition.expected_version.unwrap_or(form.version),
        form.version
    ))
}

pub fn quota_rejection(scope: AttachmentScope, limit: usize) -> IpcrError {
    IpcrError::Validation(format!(
        "Evidence limit reached: at most {limit} files per {}",
        scope.label()
    ))
}

#[async_trait]
pub trait FormStore: Send + Sync {
    async fn find_form_for(&self, employee_id: Uuid, cycle_id: Uuid) -> IpcrResult<Option<PerformanceForm>>;
    /// Fails with `Conflict` when a form already exists for the same
    /// (employee, cycle).
    async fn insert_form(&self, form: PerformanceForm) -> IpcrResult<PerformanceForm>;
    async fn get_form(&self, form_id: Uuid) -> IpcrResult<Option<PerformanceForm>>;
    async fn list_forms(&self, filter: &FormFilter) -> IpcrResult<Vec<PerformanceForm>>;
    async fn transition(&self, transition: &Transition) -> IpcrResult<PerformanceForm>;

    async fn list_indicators(&self, form_id: Uuid) -> IpcrResult<Vec<Indicator>>;
    async fn get_indicator(&self, indicator_id: Uuid) -> IpcrResult<Option<Indicator>>;
    async fn insert_indicator(
        &self,
        indicator: Indicator,
        editable_in: &'static [FormStatus],
    ) -> IpcrResult<Indicator>;
    async fn update_indicator_field(
        &self,
        indicator_id: Uuid,
        field: &IndicatorField,
        editable_in: &'static [FormStatus],
    ) -> IpcrResult<Indicator>;
    /// Refuses to remove an indicator that still has evidence attached.
    async fn delete_indicator(&self, indicator_id: Uuid, editable_in: &'static [FormStatus]) -> IpcrResult<()>;

    async fn count_attachments(&self, form_id: Uuid, scope: AttachmentScope) -> IpcrResult<usize>;
    /// Inserts metadata only if the form is not finalized and the scope is
    /// still under `limit`.
    async fn insert_attachment(&self, attachment: Attachment, limit: usize) -> IpcrResult<Attachment>;
    async fn get_attachment(&self, attachment_id: Uuid) -> IpcrResult<Option<Attachment>>;
    async fn list_attachments(&self, form_id: Uuid) -> IpcrResult<Vec<Attachment>>;
    async fn delete_attachment(&self, attachment_id: Uuid) -> IpcrResult<()>;
}

#[derive(Debug, Default)]
struct Tables {
    forms: HashMap<Uuid, PerformanceForm>,
    indicators: HashMap<Uuid, Indicator>,
    attachments: HashMap<Uuid, Attachment>,
}

impl Tables {
    fn form_mut(&mut self, form_id: Uuid) -> IpcrResult<&mut PerformanceForm> {
        self.forms
            .get_mut(&form_id)
            .ok_or_else(|| IpcrError::NotFound("Form not found".to_string()))
    }

    fn editable_form(
        &mut self,
        form_id: Uuid,
        editable_in: &[FormStatus],
        attempted: &str,
    ) -> IpcrResult<&mut PerformanceForm> {
        let form = self.form_mut(form_id)?;
        if !editable_in.contains(&form.status) {
            return Err(status_rejection(form.status, attempted));
        }
        Ok(form)
    }

    fn count_in_scope(&self, form_id: Uuid, scope: AttachmentScope) -> usize {
        self.attachments
            .values()
            .filter(|a| a.form_id == form_id && a.scope() == scope)
            .count()
    }
}

/// Single-lock store: every trait call is atomic with respect to the others.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFormStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryFormStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn form_count(&self) -> usize {
        self.tables.read().await.forms.len()
    }

    pub async fn attachment_count(&self) -> usize {
        self.tables.read().await.attachments.len()
    }
}

#[async_trait]
impl FormStore for InMemoryFormStore {
    async fn find_form_for(&self, employee_id: Uuid, cycle_id: Uuid) -> IpcrResult<Option<PerformanceForm>> {
        let tables = self.tables.read().await;
        Ok(tables
            .forms
            .values()
            .find(|f| f.employee_id == employee_id && f.cycle_id == cycle_id)
            .cloned())
    }

    async fn insert_form(&self, form: PerformanceForm) -> IpcrResult<PerformanceForm> {
        let mut tables = self.tables.write().await;
        let duplicate = tables
            .forms
            .values()
            .any(|f| f.employee_id == form.employee_id && f.cycle_id == form.cycle_id);
        if duplicate {
            return Err(IpcrError::Conflict(
                "A form already exists for this employee and cycle".to_string(),
            ));
        }
        tables.forms.insert(form.id, form.clone());
        Ok(form)
    }

    async fn get_form(&self, form_id: Uuid) -> IpcrResult<Option<PerformanceForm>> {
        Ok(self.tables.read().await.forms.get(&form_id).cloned())
    }

    async fn list_forms(&self, filter: &FormFilter) -> IpcrResult<Vec<PerformanceForm>> {
        let tables = self.tables.read().await;
        let mut forms: Vec<PerformanceForm> = tables
            .forms
            .values()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        forms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(forms)
    }

    async fn transition(&self, transition: &Transition) -> IpcrResult<PerformanceForm> {
        let mut tables = self.tables.write().await;
        let form = tables.form_mut(transition.form_id)?;
        let version_ok = transition
            .expected_version
            .map_or(true, |expected| expected == form.version);
        if !transition.from.contains(&form.status) || !version_ok {
            return Err(transition_rejection(form, transition));
        }
        transition.apply_to(form);
        Ok(form.clone())
    }

    async fn list_indicators(&self, form_id: Uuid) -> IpcrResult<Vec<Indicator>> {
        let tables = self.tables.read().await;
        let mut indicators: Vec<Indicator> = tables
            .indicators
            .values()
            .filter(|i| i.form_id == form_id)
            .cloned()
            .collect();
        indicators.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(indicators)
    }

    async fn get_indicator(&self, indicator_id: Uuid) -> IpcrResult<Option<Indicator>> {
        Ok(self.tables.read().await.indicators.get(&indicator_id).cloned())
    }

    async fn insert_indicator(
        &self,
        mut indicator: Indicator,
        editable_in: &'static [FormStatus],
    ) -> IpcrResult<Indicator> {
        let mut tables = self.tables.write().await;
        tables.editable_form(indicator.form_id, editable_in, "add an indicator")?;

        indicator.sort_order = tables
            .indicators
            .values()
            .filter(|i| i.form_id == indicator.form_id)
            .map(|i| i.sort_order + 1)
            .max()
            .unwrap_or(0);

        let form = tables.form_mut(indicator.form_id)?;
        form.version += 1;
        form.updated_at = Utc::now();
        tables.indicators.insert(indicator.id, indicator.clone());
        Ok(indicator)
    }

    async fn update_indicator_field(
        &self,
        indicator_id: Uuid,
        field: &IndicatorField,
        editable_in: &'static [FormStatus],
    ) -> IpcrResult<Indicator> {
        let mut tables = self.tables.write().await;
        let form_id = tables
            .indicators
            .get(&indicator_id)
            .map(|i| i.form_id)
            .ok_or_else(|| IpcrError::NotFound("Indicator not found".to_string()))?;

        let form = tables.editable_form(form_id, editable_in, "edit an indicator")?;
        form.version += 1;
        form.updated_at = Utc::now();

        let indicator = tables
            .indicators
            .get_mut(&indicator_id)
            .ok_or_else(|| IpcrError::NotFound("Indicator not found".to_string()))?;
        indicator.apply(field);
        Ok(indicator.clone())
    }

    async fn delete_indicator(&self, indicator_id: Uuid, editable_in: &'static [FormStatus]) -> IpcrResult<()> {
        let mut tables = self.tables.write().await;
        let form_id = tables
            .indicators
            .get(&indicator_id)
            .map(|i| i.form_id)
            .ok_or_else(|| IpcrError::NotFound("Indicator not found".to_string()))?;

        tables.editable_form(form_id, editable_in, "remove an indicator")?;
        if tables.count_in_scope(form_id, AttachmentScope::Indicator(indicator_id)) > 0 {
            return Err(IpcrError::Validation(
                "Remove the indicator's evidence files before removing it".to_string(),
            ));
        }

        tables.indicators.remove(&indicator_id);
        let form = tables.form_mut(form_id)?;
        form.version += 1;
        form.updated_at = Utc::now();
        Ok(())
    }

    async fn count_attachments(&self, form_id: Uuid, scope: AttachmentScope) -> IpcrResult<usize> {
        Ok(self.tables.read().await.count_in_scope(form_id, scope))
    }

    async fn insert_attachment(&self, attachment: Attachment, limit: usize) -> IpcrResult<Attachment> {
        let mut tables = self.tables.write().await;
        let form = tables.form_mut(attachment.form_id)?;
        if form.status.is_terminal() {
            return Err(status_rejection(form.status, "upload evidence"));
        }

        let scope = attachment.scope();
        if let AttachmentScope::Indicator(indicator_id) = scope {
            let belongs = tables
                .indicators
                .get(&indicator_id)
                .is_some_and(|i| i.form_id == attachment.form_id);
            if !belongs {
                return Err(IpcrError::NotFound("Indicator not found on this form".to_string()));
            }
        }

        if tables.count_in_scope(attachment.form_id, scope) >= limit {
            return Err(quota_rejection(scope, limit));
        }
        if tables
            .attachments
            .values()
            .any(|a| a.storage_path == attachment.storage_path)
        {
            return Err(IpcrError::Conflict("Duplicate storage path".to_string()));
        }

        tables.attachments.insert(attachment.id, attachment.clone());
        Ok(attachment)
    }

    async fn get_attachment(&self, attachment_id: Uuid) -> IpcrResult<Option<Attachment>> {
        Ok(self.tables.read().await.attachments.get(&attachment_id).cloned())
    }

    async fn list_attachments(&self, form_id: Uuid) -> IpcrResult<Vec<Attachment>> {
        let tables = self.tables.read().await;
        let mut attachments: Vec<Attachment> = tables
            .attachments
            .values()
            .filter(|a| a.form_id == form_id)
            .cloned()
            .collect();
        attachments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(attachments)
    }

    async fn delete_attachment(&self, attachment_id: Uuid) -> IpcrResult<()> {
        let mut tables = self.tables.write().await;
        let form_id = tables
            .attachments
            .get(&attachment_id)
            .map(|a| a.form_id)
            .ok_or_else(|| IpcrError::NotFound("Attachment not found".to_string()))?;
        let form = tables.form_mut(form_id)?;
        if form.status.is_terminal() {
            return Err(status_rejection(form.status, "delete evidence"));
        }
        tables.attachments.remove(&attachment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipcr::types::IndicatorCategory;

    fn indicator_for(form_id: Uuid) -> Indicator {
        let now = Utc::now();
        Indicator {
            id: Uuid::new_v4(),
            form_id,
            category: IndicatorCategory::Strategic,
            description: "Draft annual plan".into(),
            indicator: "Plan approved by March".into(),
            actual_accomplishment: None,
            quantity_score: None,
            quality_score: None,
            timeliness_score: None,
            average_score: None,
            sort_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_unique_per_employee_and_cycle() {
        let store = InMemoryFormStore::new();
        let (employee, cycle) = (Uuid::new_v4(), Uuid::new_v4());
        store.insert_form(PerformanceForm::new_draft(employee, None, cycle)).await.unwrap();
        let err = store
            .insert_form(PerformanceForm::new_draft(employee, None, cycle))
            .await
            .unwrap_err();
        assert!(matches!(err, IpcrError::Conflict(_)));
        assert_eq!(store.form_count().await, 1);
    }

    #[tokio::test]
    async fn test_transition_is_conditional_on_status_and_version() {
        let store = InMemoryFormStore::new();
        let form = store
            .insert_form(PerformanceForm::new_draft(Uuid::new_v4(), None, Uuid::new_v4()))
            .await
            .unwrap();
        let actor = form.employee_id;

        let submitted = store
            .transition(&Transition::new(form.id, FormStatus::OWNER_EDITABLE, FormStatus::Submitted, actor))
            .await
            .unwrap();
        assert_eq!(submitted.status, FormStatus::Submitted);
        assert_eq!(submitted.version, 1);
        assert!(submitted.submitted_at.is_some());

        let again = store
            .transition(&Transition::new(form.id, FormStatus::OWNER_EDITABLE, FormStatus::Submitted, actor))
            .await;
        assert!(matches!(again, Err(IpcrError::Conflict(_))));

        let stale = store
            .transition(
                &Transition::new(form.id, &[FormStatus::Submitted], FormStatus::Reviewed, actor).at_version(0),
            )
            .await;
        assert!(matches!(stale, Err(IpcrError::Conflict(_))));
        let form = store.get_form(form.id).await.unwrap().unwrap();
        assert_eq!(form.status, FormStatus::Submitted);
    }

    #[tokio::test]
    async fn test_indicator_writes_bump_version_and_respect_status() {
        let store = InMemoryFormStore::new();
        let form = store
            .insert_form(PerformanceForm::new_draft(Uuid::new_v4(), None, Uuid::new_v4()))
            .await
            .unwrap();

        let first = store
            .insert_indicator(indicator_for(form.id), FormStatus::OWNER_EDITABLE)
            .await
            .unwrap();
        let second = store
            .insert_indicator(indicator_for(form.id), FormStatus::OWNER_EDITABLE)
            .await
            .unwrap();
        assert_eq!((first.sort_order, second.sort_order), (0, 1));

        store
            .update_indicator_field(first.id, &IndicatorField::QuantityScore(Some(4)), FormStatus::OWNER_EDITABLE)
            .await
            .unwrap();
        assert_eq!(store.get_form(form.id).await.unwrap().unwrap().version, 3);

        let err = store
            .update_indicator_field(first.id, &IndicatorField::QualityScore(Some(4)), FormStatus::UNDER_REVIEW)
            .await
            .unwrap_err();
        assert!(matches!(err, IpcrError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_attachment_quota_is_enforced_atomically() {
        let store = InMemoryFormStore::new();
        let form = store
            .insert_form(PerformanceForm::new_draft(Uuid::new_v4(), None, Uuid::new_v4()))
            .await
            .unwrap();

        for n in 0..2 {
            let attachment = Attachment {
                id: Uuid::new_v4(),
                form_id: form.id,
                indicator_id: None,
                file_name: format!("{n}.pdf"),
                file_size: 10,
                file_type: "application/pdf".into(),
                storage_path: format!("path/{n}"),
                uploaded_by: form.employee_id,
                created_at: Utc::now(),
            };
            let result = store.insert_attachment(attachment, 1).await;
            assert_eq!(result.is_ok(), n == 0);
        }
        assert_eq!(store.count_attachments(form.id, AttachmentScope::Form).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_score_edits_keep_average_in_step() {
        let store = InMemoryFormStore::new();
        let form = store
            .insert_form(PerformanceForm::new_draft(Uuid::new_v4(), None, Uuid::new_v4()))
            .await
            .unwrap();
        let indicator = store
            .insert_indicator(indicator_for(form.id), &[FormStatus::Draft])
            .await
            .unwrap();

        let quantity = IndicatorField::QuantityScore(Some(5));
        let quality = IndicatorField::QualityScore(Some(4));
        let timeliness = IndicatorField::TimelinessScore(Some(4));
        let (a, b, c) = tokio::join!(
            store.update_indicator_field(indicator.id, &quantity, &[FormStatus::Draft]),
            store.update_indicator_field(indicator.id, &quality, &[FormStatus::Draft]),
            store.update_indicator_field(indicator.id, &timeliness, &[FormStatus::Draft]),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let stored = store.get_indicator(indicator.id).await.unwrap().unwrap();
        assert_eq!(stored.average_score, Some(4.33));
        assert_eq!(store.get_form(form.id).await.unwrap().unwrap().version, form.version + 4);
    }
}
