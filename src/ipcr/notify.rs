use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{AdjectivalRating, PerformanceForm};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Log,
    InApp,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::InApp => "in_app",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FormSubmitted,
    FormReturned,
    FormFinalized,
}

/// Who should hear about a form event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Employee(Uuid),
    /// Division chiefs of the given division plus HR managers.
    DivisionReviewers(Option<Uuid>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormNotification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub form_id: Uuid,
    pub recipient: Recipient,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl FormNotification {
    fn new(kind: NotificationKind, form: &PerformanceForm, recipient: Recipient, title: &str, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            form_id: form.id,
            recipient,
            title: title.to_string(),
            message,
            created_at: Utc::now(),
        }
    }

    pub fn submitted(form: &PerformanceForm) -> Self {
        Self::new(
            NotificationKind::FormSubmitted,
            form,
            Recipient::DivisionReviewers(form.division_id),
            "IPCR submitted for review",
            format!("Employee {} submitted an IPCR form for review.", form.employee_id),
        )
    }

    pub fn returned(form: &PerformanceForm) -> Self {
        let message = match form.remarks.as_deref() {
            Some(remarks) if !remarks.is_empty() => {
                format!("Your IPCR form was returned for revision: {remarks}")
            }
            _ => "Your IPCR form was returned for revision.".to_string(),
        };
        Self::new(
            NotificationKind::FormReturned,
            form,
            Recipient::Employee(form.employee_id),
            "IPCR returned",
            message,
        )
    }

    pub fn finalized(form: &PerformanceForm) -> Self {
        let rating = form
            .adjectival_rating
            .map_or_else(|| "unrated".to_string(), |r: AdjectivalRating| r.to_string());
        let average = form
            .final_average_rating
            .map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
        Self::new(
            NotificationKind::FormFinalized,
            form,
            Recipient::Employee(form.employee_id),
            "IPCR finalized",
            format!("Your IPCR form was finalized with a rating of {average} ({rating})."),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("Channel closed")]
    ChannelClosed,
}

/// Delivery backend for form notifications.
#[async_trait::async_trait]
pub trait NotificationHandler: Send + Sync {
    fn channel(&self) -> NotificationChannel;
    async fn send(&self, notification: &FormNotification) -> Result<(), NotificationError>;
}

pub struct LogNotificationHandler;

#[async_trait::async_trait]
impl NotificationHandler for LogNotificationHandler {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Log
    }

    async fn send(&self, notification: &FormNotification) -> Result<(), NotificationError> {
        tracing::info!(
            form_id = %notification.form_id,
            kind = ?notification.kind,
            recipient = ?notification.recipient,
            "{}",
            notification.title
        );
        Ok(())
    }
}

/// Keeps delivered notifications for in-app display and optionally fans them
/// out on a broadcast channel.
#[derive(Default)]
pub struct InAppNotificationHandler {
    delivered: Arc<RwLock<Vec<FormNotification>>>,
    broadcast: Option<tokio::sync::broadcast::Sender<FormNotification>>,
}

impl InAppNotificationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broadcast(broadcast: tokio::sync::broadcast::Sender<FormNotification>) -> Self {
        Self {
            delivered: Arc::default(),
            broadcast: Some(broadcast),
        }
    }

    pub async fn delivered(&self) -> Vec<FormNotification> {
        self.delivered.read().await.clone()
    }

    pub async fn for_recipient(&self, recipient: &Recipient) -> Vec<FormNotification> {
        self.delivered
            .read()
            .await
            .iter()
            .filter(|n| &n.recipient == recipient)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl NotificationHandler for InAppNotificationHandler {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::InApp
    }

    async fn send(&self, notification: &FormNotification) -> Result<(), NotificationError> {
        self.delivered.write().await.push(notification.clone());

        if let Some(tx) = &self.broadcast {
            // No subscribers is fine; the notification is still stored.
            if tx.receiver_count() > 0 && tx.send(notification.clone()).is_err() {
                return Err(NotificationError::ChannelClosed);
            }
        }
        Ok(())
    }
}

/// Fans a notification out to every registered handler. Delivery failures
/// are logged, never returned.
#[derive(Clone, Default)]
pub struct Notifier {
    handlers: Vec<Arc<dyn NotificationHandler>>,
}

impl Notifier {
    pub fn new(handlers: Vec<Arc<dyn NotificationHandler>>) -> Self {
        Self { handlers }
    }

    pub async fn notify(&self, notification: FormNotification) {
        for handler in &self.handlers {
            if let Err(e) = handler.send(&notification).await {
                tracing::warn!(
                    "Notification {} for form {} not delivered via {}: {}",
                    notification.id,
                    notification.form_id,
                    handler.channel().as_str(),
                    e
                );
            }
        }
    }
}
