//! Evidence attachments: quota, type and permission checks around a blob
//! store and the attachment metadata table.
//!
//! Upload writes the blob first and the metadata row second, deleting the
//! blob again if the row cannot be written. Delete removes the blob first
//! and keeps the row if that fails, so a tracked record never points at a
//! file the system has silently lost track of.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::error::{IpcrError, IpcrResult};
use super::permissions::{authorize, is_allowed, Action, FormOwner};
use super::store::{quota_rejection, status_rejection, FormStore};
use super::types::{Attachment, AttachmentScope, Caller, PerformanceForm};
use crate::config::EvidenceConfig;
use crate::drive::BlobStore;
use crate::security::audit::{AuditEvent, AuditEventType, AuditOutcome, AuditResource, AuditStore};
use crate::security::file_validation::{validate_file_upload, FileValidationConfig};

pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
pub const FORM_LEVEL_LIMIT: usize = 10;
pub const INDICATOR_LEVEL_LIMIT: usize = 5;
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct EvidencePolicy {
    pub max_file_size: usize,
    pub form_limit: usize,
    pub indicator_limit: usize,
    pub url_ttl: Duration,
    pub validation: FileValidationConfig,
    /// Lets HR managers and the head of office delete files other users
    /// uploaded. Uploaders can always delete their own.
    pub admin_may_delete_others: bool,
}

impl Default for EvidencePolicy {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            form_limit: FORM_LEVEL_LIMIT,
            indicator_limit: INDICATOR_LEVEL_LIMIT,
            url_ttl: SIGNED_URL_TTL,
            validation: FileValidationConfig::default(),
            admin_may_delete_others: false,
        }
    }
}

impl From<&EvidenceConfig> for EvidencePolicy {
    fn from(config: &EvidenceConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            form_limit: config.form_limit,
            indicator_limit: config.indicator_limit,
            url_ttl: Duration::from_secs(config.signed_url_ttl_secs),
            validation: FileValidationConfig {
                allowed_types: config.allowed_types.clone(),
                ..FileValidationConfig::default()
            },
            admin_may_delete_others: config.admin_may_delete_others,
        }
    }
}

impl EvidencePolicy {
    pub fn limit_for(&self, scope: AttachmentScope) -> usize {
        match scope {
            AttachmentScope::Form => self.form_limit,
            AttachmentScope::Indicator(_) => self.indicator_limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvidenceUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

pub struct EvidenceQuotaManager {
    store: Arc<dyn FormStore>,
    blobs: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditStore>,
    policy: EvidencePolicy,
}

impl EvidenceQuotaManager {
    pub fn new(
        store: Arc<dyn FormStore>,
        blobs: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditStore>,
        policy: EvidencePolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            audit,
            policy,
        }
    }

    pub fn policy(&self) -> &EvidencePolicy {
        &self.policy
    }

    pub async fn list_attachments(&self, caller: &Caller, form_id: Uuid) -> IpcrResult<Vec<Attachment>> {
        let form = self.load_form(form_id).await?;
        authorize(caller, Action::ViewForm, &FormOwner::from(&form))?;
        self.store.list_attachments(form.id).await
    }

    pub async fn upload(
        &self,
        caller: &Caller,
        form_id: Uuid,
        indicator_id: Option<Uuid>,
        file: EvidenceUpload,
    ) -> IpcrResult<Attachment> {
        if file.data.len() > self.policy.max_file_size {
            return Err(IpcrError::Validation(format!(
                "File is {} bytes; the limit is {} MB",
                file.data.len(),
                self.policy.max_file_size / (1024 * 1024)
            )));
        }

        let checked = validate_file_upload(&file.file_name, &file.content_type, &file.data, &self.policy.validation);
        if !checked.is_valid {
            return Err(IpcrError::Validation(checked.errors.join("; ")));
        }
        for warning in &checked.warnings {
            warn!("Evidence {} for form {form_id}: {warning}", file.file_name);
        }

        let form = self.load_form(form_id).await?;
        if let Err(e) = authorize(caller, Action::UploadEvidence, &FormOwner::from(&form)) {
            self.record_denial(caller, Action::UploadEvidence, form.id).await;
            return Err(e);
        }
        if form.status.is_terminal() {
            return Err(status_rejection(form.status, "upload evidence"));
        }

        let scope = AttachmentScope::from_indicator(indicator_id);
        if let AttachmentScope::Indicator(indicator_id) = scope {
            let belongs = self
                .store
                .get_indicator(indicator_id)
                .await?
                .is_some_and(|i| i.form_id == form.id);
            if !belongs {
                return Err(IpcrError::NotFound("Indicator not found on this form".to_string()));
            }
        }

        let limit = self.policy.limit_for(scope);
        if self.store.count_attachments(form.id, scope).await? >= limit {
            return Err(quota_rejection(scope, limit));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let storage_path = storage_path(&form, scope, id, now, &file.file_name);
        let attachment = Attachment {
            id,
            form_id: form.id,
            indicator_id,
            file_name: file.file_name,
            file_size: i64::try_from(file.data.len()).map_err(|e| IpcrError::Internal(e.to_string()))?,
            file_type: checked.content_type.clone(),
            storage_path: storage_path.clone(),
            uploaded_by: caller.user_id,
            created_at: now,
        };

        self.blobs.put(&storage_path, file.data, &checked.content_type).await?;

        let attachment = match self.store.insert_attachment(attachment, limit).await {
            Ok(attachment) => attachment,
            Err(e) => {
                warn!("Metadata insert failed for {storage_path}, removing uploaded blob: {e}");
                if let Err(cleanup) = self.blobs.delete(&storage_path).await {
                    error!("Orphaned evidence blob {storage_path}: {cleanup}");
                }
                return Err(e);
            }
        };

        info!(
            "Stored evidence {} ({} bytes) for form {} {}",
            attachment.id,
            attachment.file_size,
            form.id,
            scope.label()
        );
        self.record(
            AuditEvent::new(AuditEventType::EvidenceUploaded, caller)
                .with_form(form.id)
                .with_resource(AuditResource::new("attachment").with_id(attachment.id))
                .with_metadata("fileName", serde_json::json!(attachment.file_name))
                .with_metadata("fileSize", serde_json::json!(attachment.file_size)),
        )
        .await;

        Ok(attachment)
    }

    pub async fn delete(&self, caller: &Caller, attachment_id: Uuid) -> IpcrResult<()> {
        let attachment = self.load_attachment(attachment_id).await?;
        let form = self.load_form(attachment.form_id).await?;

        if !self.may_delete(caller, &attachment, &form) {
            self.record_denial(caller, Action::DeleteOthersEvidence, form.id).await;
            return Err(IpcrError::Forbidden(
                "only the uploader may delete this evidence file".to_string(),
            ));
        }
        if form.status.is_terminal() {
            return Err(status_rejection(form.status, "delete evidence"));
        }

        if let Err(e) = self.blobs.delete(&attachment.storage_path).await {
            error!(
                "Keeping metadata for evidence {}: storage delete failed: {e}",
                attachment.id
            );
            return Err(e.into());
        }
        self.store.delete_attachment(attachment.id).await?;

        info!("Deleted evidence {} from form {}", attachment.id, form.id);
        self.record(
            AuditEvent::new(AuditEventType::EvidenceDeleted, caller)
                .with_form(form.id)
                .with_resource(AuditResource::new("attachment").with_id(attachment.id))
                .with_metadata("uploadedBy", serde_json::json!(attachment.uploaded_by)),
        )
        .await;
        Ok(())
    }

    /// Signs a new short-lived download URL. Nothing is persisted.
    pub async fn fresh_download_url(&self, storage_path: &str) -> IpcrResult<SignedUrl> {
        let url = self.blobs.signed_url(storage_path, self.policy.url_ttl).await?;
        let ttl = chrono::Duration::from_std(self.policy.url_ttl)
            .map_err(|e| IpcrError::Internal(e.to_string()))?;
        Ok(SignedUrl {
            url,
            expires_at: Utc::now() + ttl,
        })
    }

    pub async fn download_url(&self, caller: &Caller, attachment_id: Uuid) -> IpcrResult<SignedUrl> {
        let attachment = self.load_attachment(attachment_id).await?;
        let form = self.load_form(attachment.form_id).await?;
        authorize(caller, Action::ViewForm, &FormOwner::from(&form))?;
        self.fresh_download_url(&attachment.storage_path).await
    }

    /// Uploader always; others only through the admin-delete policy.
    fn may_delete(&self, caller: &Caller, attachment: &Attachment, form: &PerformanceForm) -> bool {
        if attachment.uploaded_by == caller.user_id {
            return true;
        }
        self.policy.admin_may_delete_others
            && is_allowed(caller, Action::DeleteOthersEvidence, &FormOwner::from(form))
    }

    async fn load_form(&self, form_id: Uuid) -> IpcrResult<PerformanceForm> {
        self.store
            .get_form(form_id)
            .await?
            .ok_or_else(|| IpcrError::NotFound("Form not found".to_string()))
    }

    async fn load_attachment(&self, attachment_id: Uuid) -> IpcrResult<Attachment> {
        self.store
            .get_attachment(attachment_id)
            .await?
            .ok_or_else(|| IpcrError::NotFound("Attachment not found".to_string()))
    }

    async fn record_denial(&self, caller: &Caller, action: Action, form_id: Uuid) {
        warn!("Denied {} the right to {} on form {form_id}", caller.user_id, action.as_str());
        self.record(
            AuditEvent::new(AuditEventType::PermissionDenied, caller)
                .with_outcome(AuditOutcome::Failure)
                .with_form(form_id)
                .with_description(action.as_str()),
        )
        .await;
    }

    async fn record(&self, event: AuditEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.audit.store(event).await {
            error!("Failed to store audit event {}: {e}", event_type.as_str());
        }
    }
}

/// `{employee}/{scope}/{scope id}/{millis}-{attachment id}-{file name}`
pub fn storage_path(
    form: &PerformanceForm,
    scope: AttachmentScope,
    attachment_id: Uuid,
    at: DateTime<Utc>,
    file_name: &str,
) -> String {
    let scope_id = match scope {
        AttachmentScope::Form => form.id,
        AttachmentScope::Indicator(indicator_id) => indicator_id,
    };
    format!(
        "{}/{}/{}/{}-{}-{}",
        form.employee_id,
        scope.label(),
        scope_id,
        at.timestamp_millis(),
        attachment_id.simple(),
        sanitize_file_name(file_name)
    )
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(100)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Q1 report (final).pdf"), "Q1_report__final_.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\scans\\memo.png"), "memo.png");
        assert_eq!(sanitize_file_name("..."), "file");
    }

    #[test]
    fn test_storage_path_is_namespaced() {
        let form = PerformanceForm::new_draft(Uuid::new_v4(), None, Uuid::new_v4());
        let indicator_id = Uuid::new_v4();
        let attachment_id = Uuid::new_v4();
        let path = storage_path(
            &form,
            AttachmentScope::Indicator(indicator_id),
            attachment_id,
            Utc::now(),
            "photo.png",
        );
        let prefix = format!("{}/indicator/{}/", form.employee_id, indicator_id);
        assert!(path.starts_with(&prefix), "{path}");
        assert!(path.ends_with(&format!("-{}-photo.png", attachment_id.simple())));
    }

    #[test]
    fn test_default_policy_limits() {
        let policy = EvidencePolicy::default();
        assert_eq!(policy.limit_for(AttachmentScope::Form), 10);
        assert_eq!(policy.limit_for(AttachmentScope::Indicator(Uuid::nil())), 5);
        assert_eq!(policy.url_ttl, Duration::from_secs(3600));
        assert!(!policy.admin_may_delete_others);
    }
}
