use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::error::{IpcrError, IpcrResult};
use super::scoring::{GRAND_AVERAGE_PLACES, INDICATOR_AVERAGE_PLACES};
use super::store::{quota_rejection, status_rejection, transition_rejection, FormStore, Transition};
use super::types::{
    Attachment, AttachmentScope, FormFilter, FormStatus, Indicator, IndicatorField,
    PerformanceForm,
};
use crate::core::shared::schema::{ipcr_attachments, ipcr_forms, ipcr_indicators};
use crate::core::shared::utils::DbPool;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ipcr_forms)]
pub struct FormRecord {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub division_id: Option<Uuid>,
    pub cycle_id: Uuid,
    pub status: String,
    pub version: i64,
    pub remarks: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub finalized_by: Option<Uuid>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub final_average_rating: Option<BigDecimal>,
    pub adjectival_rating: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Columns a transition may touch.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = ipcr_forms)]
#[diesel(treat_none_as_null = true)]
struct FormChanges {
    status: String,
    version: i64,
    remarks: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    finalized_by: Option<Uuid>,
    finalized_at: Option<DateTime<Utc>>,
    final_average_rating: Option<BigDecimal>,
    adjectival_rating: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ipcr_indicators)]
pub struct IndicatorRecord {
    pub id: Uuid,
    pub form_id: Uuid,
    pub category: String,
    pub description: String,
    pub success_indicator: String,
    pub actual_accomplishment: Option<String>,
    pub quantity_score: Option<i32>,
    pub quality_score: Option<i32>,
    pub timeliness_score: Option<i32>,
    pub average_score: Option<BigDecimal>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ipcr_attachments)]
pub struct AttachmentRecord {
    pub id: Uuid,
    pub form_id: Uuid,
    pub indicator_id: Option<Uuid>,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub storage_path: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

fn to_decimal(value: f64, places: u32) -> IpcrResult<BigDecimal> {
    format!("{:.*}", places as usize, value)
        .parse::<BigDecimal>()
        .map_err(|e| IpcrError::Internal(format!("Invalid decimal {value}: {e}")))
}

/// Parses through the decimal text so 4.333 comes back as exactly 4.333.
fn from_decimal(value: Option<BigDecimal>) -> Option<f64> {
    value.and_then(|v| v.to_string().parse::<f64>().ok())
}

fn record_to_form(record: FormRecord) -> IpcrResult<PerformanceForm> {
    Ok(PerformanceForm {
        id: record.id,
        employee_id: record.employee_id,
        division_id: record.division_id,
        cycle_id: record.cycle_id,
        status: record.status.parse()?,
        version: record.version,
        remarks: record.remarks,
        submitted_at: record.submitted_at,
        reviewed_by: record.reviewed_by,
        reviewed_at: record.reviewed_at,
        finalized_by: record.finalized_by,
        finalized_at: record.finalized_at,
        final_average_rating: from_decimal(record.final_average_rating),
        adjectival_rating: record.adjectival_rating.map(|r| r.parse()).transpose()?,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

fn form_to_record(form: &PerformanceForm) -> IpcrResult<FormRecord> {
    Ok(FormRecord {
        id: form.id,
        employee_id: form.employee_id,
        division_id: form.division_id,
        cycle_id: form.cycle_id,
        status: form.status.as_str().to_string(),
        version: form.version,
        remarks: form.remarks.clone(),
        submitted_at: form.submitted_at,
        reviewed_by: form.reviewed_by,
        reviewed_at: form.reviewed_at,
        finalized_by: form.finalized_by,
        finalized_at: form.finalized_at,
        final_average_rating: form
            .final_average_rating
            .map(|v| to_decimal(v, GRAND_AVERAGE_PLACES))
            .transpose()?,
        adjectival_rating: form.adjectival_rating.map(|r| r.as_str().to_string()),
        created_at: form.created_at,
        updated_at: form.updated_at,
    })
}

fn form_changes(form: &PerformanceForm) -> IpcrResult<FormChanges> {
    let record = form_to_record(form)?;
    Ok(FormChanges {
        status: record.status,
        version: record.version,
        remarks: record.remarks,
        submitted_at: record.submitted_at,
        reviewed_by: record.reviewed_by,
        reviewed_at: record.reviewed_at,
        finalized_by: record.finalized_by,
        finalized_at: record.finalized_at,
        final_average_rating: record.final_average_rating,
        adjectival_rating: record.adjectival_rating,
        updated_at: record.updated_at,
    })
}

fn record_to_indicator(record: IndicatorRecord) -> IpcrResult<Indicator> {
    Ok(Indicator {
        id: record.id,
        form_id: record.form_id,
        category: record.category.parse()?,
        description: record.description,
        indicator: record.success_indicator,
        actual_accomplishment: record.actual_accomplishment,
        quantity_score: record.quantity_score,
        quality_score: record.quality_score,
        timeliness_score: record.timeliness_score,
        average_score: from_decimal(record.average_score),
        sort_order: record.sort_order,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

fn indicator_to_record(indicator: &Indicator) -> IpcrResult<IndicatorRecord> {
    Ok(IndicatorRecord {
        id: indicator.id,
        form_id: indicator.form_id,
        category: indicator.category.as_str().to_string(),
        description: indicator.description.clone(),
        success_indicator: indicator.indicator.clone(),
        actual_accomplishment: indicator.actual_accomplishment.clone(),
        quantity_score: indicator.quantity_score,
        quality_score: indicator.quality_score,
        timeliness_score: indicator.timeliness_score,
        average_score: indicator
            .average_score
            .map(|v| to_decimal(v, INDICATOR_AVERAGE_PLACES))
            .transpose()?,
        sort_order: indicator.sort_order,
        created_at: indicator.created_at,
        updated_at: indicator.updated_at,
    })
}

fn record_to_attachment(record: AttachmentRecord) -> Attachment {
    Attachment {
        id: record.id,
        form_id: record.form_id,
        indicator_id: record.indicator_id,
        file_name: record.file_name,
        file_size: record.file_size,
        file_type: record.file_type,
        storage_path: record.storage_path,
        uploaded_by: record.uploaded_by,
        created_at: record.created_at,
    }
}

fn attachment_to_record(attachment: &Attachment) -> AttachmentRecord {
    AttachmentRecord {
        id: attachment.id,
        form_id: attachment.form_id,
        indicator_id: attachment.indicator_id,
        file_name: attachment.file_name.clone(),
        file_size: attachment.file_size,
        file_type: attachment.file_type.clone(),
        storage_path: attachment.storage_path.clone(),
        uploaded_by: attachment.uploaded_by,
        created_at: attachment.created_at,
    }
}

/// Loads the form row with `FOR UPDATE`; later writes in the same
/// transaction see a status nobody else can change underneath them.
fn lock_form(conn: &mut PgConnection, form_id: Uuid) -> IpcrResult<PerformanceForm> {
    let record = ipcr_forms::table
        .find(form_id)
        .select(FormRecord::as_select())
        .for_update()
        .first::<FormRecord>(conn)
        .optional()?
        .ok_or_else(|| IpcrError::NotFound("Form not found".to_string()))?;
    record_to_form(record)
}

fn lock_editable_form(
    conn: &mut PgConnection,
    form_id: Uuid,
    editable_in: &[FormStatus],
    attempted: &str,
) -> IpcrResult<PerformanceForm> {
    let form = lock_form(conn, form_id)?;
    if !editable_in.contains(&form.status) {
        return Err(status_rejection(form.status, attempted));
    }
    Ok(form)
}

fn bump_version(conn: &mut PgConnection, form: &PerformanceForm) -> IpcrResult<()> {
    let updated = diesel::update(
        ipcr_forms::table
            .filter(ipcr_forms::id.eq(form.id))
            .filter(ipcr_forms::version.eq(form.version)),
    )
    .set((
        ipcr_forms::version.eq(ipcr_forms::version + 1),
        ipcr_forms::updated_at.eq(Utc::now()),
    ))
    .execute(conn)?;

    if updated != 1 {
        return Err(IpcrError::Conflict("Form changed, please reload".to_string()));
    }
    Ok(())
}

fn count_in_scope(conn: &mut PgConnection, form_id: Uuid, scope: AttachmentScope) -> IpcrResult<usize> {
    let in_form = ipcr_attachments::table.filter(ipcr_attachments::form_id.eq(form_id));
    let count: i64 = match scope {
        AttachmentScope::Form => in_form
            .filter(ipcr_attachments::indicator_id.is_null())
            .count()
            .get_result(conn)?,
        AttachmentScope::Indicator(indicator_id) => in_form
            .filter(ipcr_attachments::indicator_id.eq(indicator_id))
            .count()
            .get_result(conn)?,
    };
    usize::try_from(count).map_err(|e| IpcrError::Internal(e.to_string()))
}

fn load_indicator(conn: &mut PgConnection, indicator_id: Uuid) -> IpcrResult<Indicator> {
    let record = ipcr_indicators::table
        .find(indicator_id)
        .select(IndicatorRecord::as_select())
        .first::<IndicatorRecord>(conn)
        .optional()?
        .ok_or_else(|| IpcrError::NotFound("Indicator not found".to_string()))?;
    record_to_indicator(record)
}

/// Locks the indicator's form, then reads the indicator under that lock so
/// concurrent edits of sibling fields never work from a stale row.
fn lock_indicator_form(
    conn: &mut PgConnection,
    indicator_id: Uuid,
    editable_in: &[FormStatus],
    attempted: &str,
) -> IpcrResult<(Indicator, PerformanceForm)> {
    let form_id: Uuid = ipcr_indicators::table
        .find(indicator_id)
        .select(ipcr_indicators::form_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| IpcrError::NotFound("Indicator not found".to_string()))?;
    let form = lock_editable_form(conn, form_id, editable_in, attempted)?;
    let indicator = load_indicator(conn, indicator_id)?;
    Ok((indicator, form))
}

/// Writes one indicator column plus the derived average.
fn write_indicator_field(
    conn: &mut PgConnection,
    indicator: &Indicator,
    field: &IndicatorField,
) -> IpcrResult<()> {
    use ipcr_indicators::dsl;

    let average = indicator
        .average_score
        .map(|v| to_decimal(v, INDICATOR_AVERAGE_PLACES))
        .transpose()?;
    let target = dsl::ipcr_indicators.find(indicator.id);
    let common = (dsl::average_score.eq(average), dsl::updated_at.eq(indicator.updated_at));

    match field {
        IndicatorField::Category(category) => diesel::update(target)
            .set((dsl::category.eq(category.as_str()), common))
            .execute(conn)?,
        IndicatorField::Description(text) => diesel::update(target)
            .set((dsl::description.eq(text.as_str()), common))
            .execute(conn)?,
        IndicatorField::Indicator(text) => diesel::update(target)
            .set((dsl::success_indicator.eq(text.as_str()), common))
            .execute(conn)?,
        IndicatorField::ActualAccomplishment(text) => diesel::update(target)
            .set((dsl::actual_accomplishment.eq(text.clone()), common))
            .execute(conn)?,
        IndicatorField::QuantityScore(score) => diesel::update(target)
            .set((dsl::quantity_score.eq(*score), common))
            .execute(conn)?,
        IndicatorField::QualityScore(score) => diesel::update(target)
            .set((dsl::quality_score.eq(*score), common))
            .execute(conn)?,
        IndicatorField::TimelinessScore(score) => diesel::update(target)
            .set((dsl::timeliness_score.eq(*score), common))
            .execute(conn)?,
    };
    Ok(())
}

pub struct PgFormStore {
    pool: DbPool,
}

impl PgFormStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, work: F) -> IpcrResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> IpcrResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            work(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl FormStore for PgFormStore {
    async fn find_form_for(&self, employee_id: Uuid, cycle_id: Uuid) -> IpcrResult<Option<PerformanceForm>> {
        self.run(move |conn| {
            ipcr_forms::table
                .filter(ipcr_forms::employee_id.eq(employee_id))
                .filter(ipcr_forms::cycle_id.eq(cycle_id))
                .select(FormRecord::as_select())
                .first::<FormRecord>(conn)
                .optional()?
                .map(record_to_form)
                .transpose()
        })
        .await
    }

    async fn insert_form(&self, form: PerformanceForm) -> IpcrResult<PerformanceForm> {
        let record = form_to_record(&form)?;
        self.run(move |conn| {
            diesel::insert_into(ipcr_forms::table)
                .values(&record)
                .execute(conn)
                .map_err(|e| match IpcrError::from(e) {
                    IpcrError::Conflict(_) => IpcrError::Conflict(
                        "A form already exists for this employee and cycle".to_string(),
                    ),
                    other => other,
                })?;
            Ok(())
        })
        .await?;
        Ok(form)
    }

    async fn get_form(&self, form_id: Uuid) -> IpcrResult<Option<PerformanceForm>> {
        self.run(move |conn| {
            ipcr_forms::table
                .find(form_id)
                .select(FormRecord::as_select())
                .first::<FormRecord>(conn)
                .optional()?
                .map(record_to_form)
                .transpose()
        })
        .await
    }

    async fn list_forms(&self, filter: &FormFilter) -> IpcrResult<Vec<PerformanceForm>> {
        let filter = filter.clone();
        self.run(move |conn| {
            let mut query = ipcr_forms::table.select(FormRecord::as_select()).into_boxed();
            if let Some(employee_id) = filter.employee_id {
                query = query.filter(ipcr_forms::employee_id.eq(employee_id));
            }
            if let Some(division_id) = filter.division_id {
                query = query.filter(ipcr_forms::division_id.eq(division_id));
            }
            if let Some(cycle_id) = filter.cycle_id {
                query = query.filter(ipcr_forms::cycle_id.eq(cycle_id));
            }
            if let Some(status) = filter.status {
                query = query.filter(ipcr_forms::status.eq(status.as_str()));
            }

            query
                .order(ipcr_forms::created_at.desc())
                .load::<FormRecord>(conn)?
                .into_iter()
                .map(record_to_form)
                .collect()
        })
        .await
    }

    async fn transition(&self, transition: &Transition) -> IpcrResult<PerformanceForm> {
        let transition = transition.clone();
        self.run(move |conn| {
            conn.transaction::<_, IpcrError, _>(|conn| {
                let current = lock_form(conn, transition.form_id)?;
                let version_ok = transition
                    .expected_version
                    .map_or(true, |expected| expected == current.version);
                if !transition.from.contains(&current.status) || !version_ok {
                    return Err(transition_rejection(&current, &transition));
                }

                let mut next = current.clone();
                transition.apply_to(&mut next);
                let from: Vec<&str> = transition.from.iter().map(|s| s.as_str()).collect();

                let updated = diesel::update(
                    ipcr_forms::table
                        .filter(ipcr_forms::id.eq(current.id))
                        .filter(ipcr_forms::version.eq(current.version))
                        .filter(ipcr_forms::status.eq_any(from)),
                )
                .set(&form_changes(&next)?)
                .execute(conn)?;

                if updated != 1 {
                    return Err(transition_rejection(&current, &transition));
                }
                Ok(next)
            })
        })
        .await
    }

    async fn list_indicators(&self, form_id: Uuid) -> IpcrResult<Vec<Indicator>> {
        self.run(move |conn| {
            ipcr_indicators::table
                .filter(ipcr_indicators::form_id.eq(form_id))
                .order((ipcr_indicators::sort_order.asc(), ipcr_indicators::created_at.asc()))
                .select(IndicatorRecord::as_select())
                .load::<IndicatorRecord>(conn)?
                .into_iter()
                .map(record_to_indicator)
                .collect()
        })
        .await
    }

    async fn get_indicator(&self, indicator_id: Uuid) -> IpcrResult<Option<Indicator>> {
        self.run(move |conn| match load_indicator(conn, indicator_id) {
            Ok(indicator) => Ok(Some(indicator)),
            Err(IpcrError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn insert_indicator(
        &self,
        mut indicator: Indicator,
        editable_in: &'static [FormStatus],
    ) -> IpcrResult<Indicator> {
        self.run(move |conn| {
            conn.transaction::<_, IpcrError, _>(|conn| {
                let form = lock_editable_form(conn, indicator.form_id, editable_in, "add an indicator")?;

                let last: Option<i32> = ipcr_indicators::table
                    .filter(ipcr_indicators::form_id.eq(form.id))
                    .select(diesel::dsl::max(ipcr_indicators::sort_order))
                    .first(conn)?;
                indicator.sort_order = last.map_or(0, |n| n + 1);

                diesel::insert_into(ipcr_indicators::table)
                    .values(&indicator_to_record(&indicator)?)
                    .execute(conn)?;
                bump_version(conn, &form)?;
                Ok(indicator)
            })
        })
        .await
    }

    async fn update_indicator_field(
        &self,
        indicator_id: Uuid,
        field: &IndicatorField,
        editable_in: &'static [FormStatus],
    ) -> IpcrResult<Indicator> {
        let field = field.clone();
        self.run(move |conn| {
            conn.transaction::<_, IpcrError, _>(|conn| {
                let (mut indicator, form) =
                    lock_indicator_form(conn, indicator_id, editable_in, "edit an indicator")?;

                indicator.apply(&field);
                write_indicator_field(conn, &indicator, &field)?;
                bump_version(conn, &form)?;
                Ok(indicator)
            })
        })
        .await
    }

    async fn delete_indicator(&self, indicator_id: Uuid, editable_in: &'static [FormStatus]) -> IpcrResult<()> {
        self.run(move |conn| {
            conn.transaction::<_, IpcrError, _>(|conn| {
                let (_, form) = lock_indicator_form(conn, indicator_id, editable_in, "remove an indicator")?;

                if count_in_scope(conn, form.id, AttachmentScope::Indicator(indicator_id))? > 0 {
                    return Err(IpcrError::Validation(
                        "Remove the indicator's evidence files before removing it".to_string(),
                    ));
                }

                diesel::delete(ipcr_indicators::table.find(indicator_id)).execute(conn)?;
                bump_version(conn, &form)
            })
        })
        .await
    }

    async fn count_attachments(&self, form_id: Uuid, scope: AttachmentScope) -> IpcrResult<usize> {
        self.run(move |conn| count_in_scope(conn, form_id, scope)).await
    }

    async fn insert_attachment(&self, attachment: Attachment, limit: usize) -> IpcrResult<Attachment> {
        self.run(move |conn| {
            conn.transaction::<_, IpcrError, _>(|conn| {
                let form = lock_form(conn, attachment.form_id)?;
                if form.status.is_terminal() {
                    return Err(status_rejection(form.status, "upload evidence"));
                }

                let scope = attachment.scope();
                if let AttachmentScope::Indicator(indicator_id) = scope {
                    let belongs: i64 = ipcr_indicators::table
                        .filter(ipcr_indicators::id.eq(indicator_id))
                        .filter(ipcr_indicators::form_id.eq(form.id))
                        .count()
                        .get_result(conn)?;
                    if belongs == 0 {
                        return Err(IpcrError::NotFound("Indicator not found on this form".to_string()));
                    }
                }

                if count_in_scope(conn, form.id, scope)? >= limit {
                    return Err(quota_rejection(scope, limit));
                }

                diesel::insert_into(ipcr_attachments::table)
                    .values(&attachment_to_record(&attachment))
                    .execute(conn)?;
                Ok(attachment)
            })
        })
        .await
    }

    async fn get_attachment(&self, attachment_id: Uuid) -> IpcrResult<Option<Attachment>> {
        self.run(move |conn| {
            Ok(ipcr_attachments::table
                .find(attachment_id)
                .select(AttachmentRecord::as_select())
                .first::<AttachmentRecord>(conn)
                .optional()?
                .map(record_to_attachment))
        })
        .await
    }

    async fn list_attachments(&self, form_id: Uuid) -> IpcrResult<Vec<Attachment>> {
        self.run(move |conn| {
            Ok(ipcr_attachments::table
                .filter(ipcr_attachments::form_id.eq(form_id))
                .order(ipcr_attachments::created_at.asc())
                .select(AttachmentRecord::as_select())
                .load::<AttachmentRecord>(conn)?
                .into_iter()
                .map(record_to_attachment)
                .collect())
        })
        .await
    }

    async fn delete_attachment(&self, attachment_id: Uuid) -> IpcrResult<()> {
        self.run(move |conn| {
            conn.transaction::<_, IpcrError, _>(|conn| {
                let form_id: Uuid = ipcr_attachments::table
                    .find(attachment_id)
                    .select(ipcr_attachments::form_id)
                    .first(conn)
                    .optional()?
                    .ok_or_else(|| IpcrError::NotFound("Attachment not found".to_string()))?;

                let form = lock_form(conn, form_id)?;
                if form.status.is_terminal() {
                    return Err(status_rejection(form.status, "delete evidence"));
                }

                diesel::delete(ipcr_attachments::table.find(attachment_id)).execute(conn)?;
                Ok(())
            })
        })
        .await
    }
}
