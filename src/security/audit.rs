use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ipcr::types::{Caller, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    FormCreated,
    IndicatorAdded,
    IndicatorUpdated,
    IndicatorRemoved,
    FormSubmitted,
    FormEndorsed,
    FormReturned,
    FormFinalized,
    EvidenceUploaded,
    EvidenceDeleted,
    PermissionDenied,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormCreated => "FORM_CREATED",
            Self::IndicatorAdded => "INDICATOR_ADDED",
            Self::IndicatorUpdated => "INDICATOR_UPDATED",
            Self::IndicatorRemoved => "INDICATOR_REMOVED",
            Self::FormSubmitted => "FORM_SUBMITTED",
            Self::FormEndorsed => "FORM_ENDORSED",
            Self::FormReturned => "FORM_RETURNED",
            Self::FormFinalized => "FORM_FINALIZED",
            Self::EvidenceUploaded => "EVIDENCE_UPLOADED",
            Self::EvidenceDeleted => "EVIDENCE_DELETED",
            Self::PermissionDenied => "PERMISSION_DENIED",
        }
    }

    pub fn severity(&self) -> AuditSeverity {
        match self {
            Self::PermissionDenied => AuditSeverity::Warning,
            Self::FormFinalized | Self::EvidenceDeleted => AuditSeverity::High,
            _ => AuditSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum AuditSeverity {
    Info,
    Warning,
    High,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditActor {
    pub user_id: Uuid,
    pub role: Role,
    pub division_id: Option<Uuid>,
}

impl From<&Caller> for AuditActor {
    fn from(caller: &Caller) -> Self {
        Self {
            user_id: caller.user_id,
            role: caller.role,
            division_id: caller.division_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResource {
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
}

impl AuditResource {
    pub fn new(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            resource_id: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.resource_id = Some(id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub outcome: AuditOutcome,
    pub actor: AuditActor,
    pub form_id: Option<Uuid>,
    pub resource: Option<AuditResource>,
    pub description: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, caller: &Caller) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            severity: event_type.severity(),
            outcome: AuditOutcome::Success,
            actor: AuditActor::from(caller),
            form_id: None,
            resource: None,
            description: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_form(mut self, form_id: Uuid) -> Self {
        self.form_id = Some(form_id);
        self
    }

    pub fn with_resource(mut self, resource: AuditResource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn store(&self, event: AuditEvent) -> Result<()>;
    async fn events_for_form(&self, form_id: Uuid) -> Result<Vec<AuditEvent>>;
}

#[derive(Debug, Clone)]
pub struct InMemoryAuditStore {
    events: Arc<RwLock<Vec<AuditEvent>>>,
    max_events: usize,
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl InMemoryAuditStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            max_events,
        }
    }

    pub async fn all(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn count_of(&self, event_type: AuditEventType) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn store(&self, event: AuditEvent) -> Result<()> {
        let mut events = self.events.write().await;

        if events.len() >= self.max_events {
            events.remove(0);
        }

        events.push(event);
        Ok(())
    }

    async fn events_for_form(&self, form_id: Uuid) -> Result<Vec<AuditEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.form_id == Some(form_id))
            .cloned()
            .collect())
    }
}

/// Audit trail persisted in `ipcr_audit_log`.
#[derive(Clone)]
pub struct PgAuditStore {
    pool: crate::core::shared::utils::DbPool,
}

impl PgAuditStore {
    pub fn new(pool: crate::core::shared::utils::DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn store(&self, event: AuditEvent) -> Result<()> {
        use crate::core::shared::schema::ipcr_audit_log;
        use diesel::prelude::*;

        let pool = self.pool.clone();
        let record = AuditRecord::from_event(&event)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            diesel::insert_into(ipcr_audit_log::table)
                .values(&record)
                .execute(&mut conn)?;
            Ok(())
        })
        .await??;

        Ok(())
    }

    async fn events_for_form(&self, form_id: Uuid) -> Result<Vec<AuditEvent>> {
        use crate::core::shared::schema::ipcr_audit_log;
        use diesel::prelude::*;

        let pool = self.pool.clone();
        let records = tokio::task::spawn_blocking(move || -> Result<Vec<AuditRecord>> {
            let mut conn = pool.get()?;
            Ok(ipcr_audit_log::table
                .filter(ipcr_audit_log::form_id.eq(form_id))
                .order(ipcr_audit_log::created_at.asc())
                .select(AuditRecord::as_select())
                .load(&mut conn)?)
        })
        .await??;

        records.into_iter().map(AuditRecord::into_event).collect()
    }
}

#[derive(Debug, Clone, diesel::Queryable, diesel::Selectable, diesel::Insertable)]
#[diesel(table_name = crate::core::shared::schema::ipcr_audit_log)]
struct AuditRecord {
    id: Uuid,
    event_type: String,
    severity: String,
    outcome: String,
    actor_id: Uuid,
    actor_role: String,
    form_id: Option<Uuid>,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    description: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl AuditRecord {
    fn from_event(event: &AuditEvent) -> Result<Self> {
        Ok(Self {
            id: event.id,
            event_type: event.event_type.as_str().to_string(),
            severity: event.severity.as_str().to_string(),
            outcome: event.outcome.as_str().to_string(),
            actor_id: event.actor.user_id,
            actor_role: event.actor.role.as_str().to_string(),
            form_id: event.form_id,
            resource_type: event.resource.as_ref().map(|r| r.resource_type.clone()),
            resource_id: event.resource.as_ref().and_then(|r| r.resource_id),
            description: event.description.clone(),
            metadata: serde_json::to_value(&event.metadata)?,
            created_at: event.timestamp,
        })
    }

    fn into_event(self) -> Result<AuditEvent> {
        let event_type: AuditEventType =
            serde_json::from_value(serde_json::Value::String(to_variant_name(&self.event_type)))?;
        let outcome = if self.outcome == AuditOutcome::Failure.as_str() {
            AuditOutcome::Failure
        } else {
            AuditOutcome::Success
        };
        let role = self
            .actor_role
            .parse::<Role>()
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        Ok(AuditEvent {
            id: self.id,
            timestamp: self.created_at,
            event_type,
            severity: event_type.severity(),
            outcome,
            actor: AuditActor {
                user_id: self.actor_id,
                role,
                division_id: None,
            },
            form_id: self.form_id,
            resource: self.resource_type.map(|resource_type| AuditResource {
                resource_type,
                resource_id: self.resource_id,
            }),
            description: self.description,
            metadata: serde_json::from_value(self.metadata).unwrap_or_default(),
        })
    }
}

/// `FORM_CREATED` -> `FormCreated`
fn to_variant_name(stored: &str) -> String {
    stored
        .split('_')
        .map(|part| {
            let lower = part.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> Caller {
        Caller::new(Uuid::new_v4(), Role::Employee, Some(Uuid::new_v4()))
    }

    #[test]
    fn test_audit_event_creation() {
        let caller = caller();
        let event = AuditEvent::new(AuditEventType::FormCreated, &caller);

        assert_eq!(event.event_type, AuditEventType::FormCreated);
        assert_eq!(event.actor.user_id, caller.user_id);
        assert_eq!(event.outcome, AuditOutcome::Success);
    }

    #[test]
    fn test_audit_severity_levels() {
        assert_eq!(AuditEventType::FormSubmitted.severity(), AuditSeverity::Info);
        assert_eq!(AuditEventType::PermissionDenied.severity(), AuditSeverity::Warning);
        assert_eq!(AuditEventType::FormFinalized.severity(), AuditSeverity::High);
    }

    #[test]
    fn test_audit_resource_builder() {
        let id = Uuid::new_v4();
        let resource = AuditResource::new("attachment").with_id(id);

        assert_eq!(resource.resource_type, "attachment");
        assert_eq!(resource.resource_id, Some(id));
    }

    #[test]
    fn test_stored_name_maps_back_to_variant() {
        assert_eq!(to_variant_name("FORM_CREATED"), "FormCreated");
        assert_eq!(to_variant_name("PERMISSION_DENIED"), "PermissionDenied");
        let parsed: AuditEventType =
            serde_json::from_value(serde_json::Value::String(to_variant_name("EVIDENCE_UPLOADED")))
                .unwrap();
        assert_eq!(parsed, AuditEventType::EvidenceUploaded);
    }

    #[tokio::test]
    async fn test_in_memory_store_filters_by_form() {
        let store = InMemoryAuditStore::new(10);
        let caller = caller();
        let form_id = Uuid::new_v4();

        store
            .store(AuditEvent::new(AuditEventType::FormCreated, &caller).with_form(form_id))
            .await
            .unwrap();
        store
            .store(AuditEvent::new(AuditEventType::FormCreated, &caller).with_form(Uuid::new_v4()))
            .await
            .unwrap();

        let events = store.events_for_form(form_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(store.count_of(AuditEventType::FormCreated).await, 2);
    }

    #[tokio::test]
    async fn test_in_memory_store_caps_size() {
        let store = InMemoryAuditStore::new(2);
        let caller = caller();
        for _ in 0..5 {
            store
                .store(AuditEvent::new(AuditEventType::IndicatorAdded, &caller))
                .await
                .unwrap();
        }
        assert_eq!(store.all().await.len(), 2);
    }
}
