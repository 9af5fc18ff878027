use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::IpcrError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Employee,
    DivisionChief,
    HrManager,
    HeadOfOffice,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::DivisionChief => "divisionChief",
            Self::HrManager => "hrManager",
            Self::HeadOfOffice => "headOfOffice",
        }
    }
}

impl FromStr for Role {
    type Err = IpcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" => Ok(Self::Employee),
            "divisionChief" => Ok(Self::DivisionChief),
            "hrManager" => Ok(Self::HrManager),
            "headOfOffice" => Ok(Self::HeadOfOffice),
            other => Err(IpcrError::Validation(format!("Unknown role: {other}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity supplied by the upstream identity gateway for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
    pub division_id: Option<Uuid>,
}

impl Caller {
    pub fn new(user_id: Uuid, role: Role, division_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            role,
            division_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormStatus {
    Draft,
    Submitted,
    Reviewed,
    Finalized,
    Returned,
}

impl FormStatus {
    pub const OWNER_EDITABLE: &'static [FormStatus] = &[FormStatus::Draft, FormStatus::Returned];
    pub const UNDER_REVIEW: &'static [FormStatus] = &[FormStatus::Submitted, FormStatus::Reviewed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Reviewed => "reviewed",
            Self::Finalized => "finalized",
            Self::Returned => "returned",
        }
    }

    pub fn is_owner_editable(&self) -> bool {
        Self::OWNER_EDITABLE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized)
    }
}

impl FromStr for FormStatus {
    type Err = IpcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "submitted" => Ok(Self::Submitted),
            "reviewed" => Ok(Self::Reviewed),
            "finalized" => Ok(Self::Finalized),
            "returned" => Ok(Self::Returned),
            other => Err(IpcrError::Internal(format!("Unknown form status: {other}"))),
        }
    }
}

impl fmt::Display for FormStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorCategory {
    Strategic,
    Core,
    Support,
}

impl IndicatorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strategic => "strategic",
            Self::Core => "core",
            Self::Support => "support",
        }
    }
}

impl FromStr for IndicatorCategory {
    type Err = IpcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strategic" => Ok(Self::Strategic),
            "core" => Ok(Self::Core),
            "support" => Ok(Self::Support),
            other => Err(IpcrError::Validation(format!(
                "Unknown indicator category: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdjectivalRating {
    Outstanding,
    #[serde(rename = "Very Satisfactory")]
    VerySatisfactory,
    Satisfactory,
    Unsatisfactory,
    Poor,
}

impl AdjectivalRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outstanding => "Outstanding",
            Self::VerySatisfactory => "Very Satisfactory",
            Self::Satisfactory => "Satisfactory",
            Self::Unsatisfactory => "Unsatisfactory",
            Self::Poor => "Poor",
        }
    }
}

impl FromStr for AdjectivalRating {
    type Err = IpcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Outstanding" => Ok(Self::Outstanding),
            "Very Satisfactory" => Ok(Self::VerySatisfactory),
            "Satisfactory" => Ok(Self::Satisfactory),
            "Unsatisfactory" => Ok(Self::Unsatisfactory),
            "Poor" => Ok(Self::Poor),
            other => Err(IpcrError::Internal(format!(
                "Unknown adjectival rating: {other}"
            ))),
        }
    }
}

impl fmt::Display for AdjectivalRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingCycle {
    pub id: Uuid,
    pub name: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceForm {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub division_id: Option<Uuid>,
    pub cycle_id: Uuid,
    pub status: FormStatus,
    pub version: i64,
    pub remarks: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub finalized_by: Option<Uuid>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub final_average_rating: Option<f64>,
    pub adjectival_rating: Option<AdjectivalRating>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PerformanceForm {
    pub fn new_draft(employee_id: Uuid, division_id: Option<Uuid>, cycle_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            employee_id,
            division_id,
            cycle_id,
            status: FormStatus::Draft,
            version: 0,
            remarks: None,
            submitted_at: None,
            reviewed_by: None,
            reviewed_at: None,
            finalized_by: None,
            finalized_at: None,
            final_average_rating: None,
            adjectival_rating: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicator {
    pub id: Uuid,
    pub form_id: Uuid,
    pub category: IndicatorCategory,
    pub description: String,
    pub indicator: String,
    pub actual_accomplishment: Option<String>,
    pub quantity_score: Option<i32>,
    pub quality_score: Option<i32>,
    pub timeliness_score: Option<i32>,
    pub average_score: Option<f64>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Indicator {
    pub fn has_all_scores(&self) -> bool {
        self.quantity_score.is_some() && self.quality_score.is_some() && self.timeliness_score.is_some()
    }

    /// Applies a single field change in place and refreshes the derived average.
    pub fn apply(&mut self, field: &IndicatorField) {
        match field {
            IndicatorField::Category(category) => self.category = *category,
            IndicatorField::Description(text) => self.description = text.clone(),
            IndicatorField::Indicator(text) => self.indicator = text.clone(),
            IndicatorField::ActualAccomplishment(text) => self.actual_accomplishment = text.clone(),
            IndicatorField::QuantityScore(score) => self.quantity_score = *score,
            IndicatorField::QualityScore(score) => self.quality_score = *score,
            IndicatorField::TimelinessScore(score) => self.timeliness_score = *score,
        }
        self.average_score = super::scoring::average_score(
            self.quantity_score,
            self.quality_score,
            self.timeliness_score,
        );
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIndicator {
    pub category: IndicatorCategory,
    pub description: String,
    pub indicator: String,
    pub actual_accomplishment: Option<String>,
    pub quantity_score: Option<i32>,
    pub quality_score: Option<i32>,
    pub timeliness_score: Option<i32>,
}

/// One independently persisted indicator field write.
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorField {
    Category(IndicatorCategory),
    Description(String),
    Indicator(String),
    ActualAccomplishment(Option<String>),
    QuantityScore(Option<i32>),
    QualityScore(Option<i32>),
    TimelinessScore(Option<i32>),
}

impl IndicatorField {
    pub fn is_score(&self) -> bool {
        matches!(
            self,
            Self::QuantityScore(_) | Self::QualityScore(_) | Self::TimelinessScore(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Category(_) => "category",
            Self::Description(_) => "description",
            Self::Indicator(_) => "indicator",
            Self::ActualAccomplishment(_) => "actualAccomplishment",
            Self::QuantityScore(_) => "quantityScore",
            Self::QualityScore(_) => "qualityScore",
            Self::TimelinessScore(_) => "timelinessScore",
        }
    }

    pub fn score(&self) -> Option<i32> {
        match self {
            Self::QuantityScore(s) | Self::QualityScore(s) | Self::TimelinessScore(s) => *s,
            _ => None,
        }
    }
}

/// Partial update as sent by the client. A present key is a write; `null`
/// clears nullable fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorPatch {
    pub category: Option<IndicatorCategory>,
    pub description: Option<String>,
    pub indicator: Option<String>,
    #[serde(default, with = "double_option")]
    pub actual_accomplishment: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub quantity_score: Option<Option<i32>>,
    #[serde(default, with = "double_option")]
    pub quality_score: Option<Option<i32>>,
    #[serde(default, with = "double_option")]
    pub timeliness_score: Option<Option<i32>>,
}

impl IndicatorPatch {
    pub fn into_fields(self) -> Vec<IndicatorField> {
        let mut fields = Vec::new();
        if let Some(category) = self.category {
            fields.push(IndicatorField::Category(category));
        }
        if let Some(description) = self.description {
            fields.push(IndicatorField::Description(description));
        }
        if let Some(indicator) = self.indicator {
            fields.push(IndicatorField::Indicator(indicator));
        }
        if let Some(accomplishment) = self.actual_accomplishment {
            fields.push(IndicatorField::ActualAccomplishment(accomplishment));
        }
        if let Some(score) = self.quantity_score {
            fields.push(IndicatorField::QuantityScore(score));
        }
        if let Some(score) = self.quality_score {
            fields.push(IndicatorField::QualityScore(score));
        }
        if let Some(score) = self.timeliness_score {
            fields.push(IndicatorField::TimelinessScore(score));
        }
        fields
    }
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
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

impl Attachment {
    pub fn scope(&self) -> AttachmentScope {
        match self.indicator_id {
            Some(indicator_id) => AttachmentScope::Indicator(indicator_id),
            None => AttachmentScope::Form,
        }
    }
}

/// Quota bucket an attachment counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentScope {
    Form,
    Indicator(Uuid),
}

impl AttachmentScope {
    pub fn from_indicator(indicator_id: Option<Uuid>) -> Self {
        indicator_id.map_or(Self::Form, Self::Indicator)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Indicator(_) => "indicator",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormFilter {
    pub employee_id: Option<Uuid>,
    pub division_id: Option<Uuid>,
    pub cycle_id: Option<Uuid>,
    pub status: Option<FormStatus>,
}

impl FormFilter {
    pub fn matches(&self, form: &PerformanceForm) -> bool {
        self.employee_id.map_or(true, |id| form.employee_id == id)
            && self.division_id.map_or(true, |id| form.division_id == Some(id))
            && self.cycle_id.map_or(true, |id| form.cycle_id == id)
            && self.status.map_or(true, |status| form.status == status)
    }
}
