//! Expiry notifications — threshold classes, dedup records, and the
//! outbound collaborators (email dispatch, in-app log).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::UserId;
use crate::error::{NotifyError, StoreError};

/// A named expiry-proximity bucket driving distinct notification content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThresholdClass {
    /// Expires within the next seven days (but not within 24 hours)
    #[serde(rename = "reminder-7d")]
    Reminder7d,
    /// Expires within the next 24 hours
    #[serde(rename = "urgent-24h")]
    Urgent24h,
    /// Already expired
    #[serde(rename = "expired")]
    Expired,
}

impl ThresholdClass {
    pub const ALL: [ThresholdClass; 3] = [
        ThresholdClass::Reminder7d,
        ThresholdClass::Urgent24h,
        ThresholdClass::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdClass::Reminder7d => "reminder-7d",
            ThresholdClass::Urgent24h => "urgent-24h",
            ThresholdClass::Expired => "expired",
        }
    }

    /// Email template used for this class.
    pub fn template(&self) -> TemplateKind {
        match self {
            ThresholdClass::Reminder7d => TemplateKind::ExpiryReminder,
            ThresholdClass::Urgent24h => TemplateKind::ExpiryUrgent,
            ThresholdClass::Expired => TemplateKind::AccessExpired,
        }
    }

    pub fn in_app_kind(&self) -> InAppKind {
        match self {
            ThresholdClass::Reminder7d => InAppKind::Reminder,
            ThresholdClass::Urgent24h => InAppKind::Urgent,
            ThresholdClass::Expired => InAppKind::Expired,
        }
    }
}

impl std::fmt::Display for ThresholdClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThresholdClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminder-7d" | "reminder" => Ok(ThresholdClass::Reminder7d),
            "urgent-24h" | "urgent" => Ok(ThresholdClass::Urgent24h),
            "expired" => Ok(ThresholdClass::Expired),
            other => Err(format!(
                "unknown threshold class '{other}' (expected reminder-7d, urgent-24h or expired)"
            )),
        }
    }
}

/// Proof that a user was notified about one class on one calendar day.
///
/// The triple (`user_id`, `threshold_class`, `sent_date`) is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub user_id: UserId,
    pub threshold_class: ThresholdClass,
    pub sent_date: NaiveDate,

    /// Dashboards listed in the delivered notice
    #[serde(default)]
    pub resource_refs: Vec<String>,

    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(
        user_id: UserId,
        threshold_class: ThresholdClass,
        sent_at: DateTime<Utc>,
        resource_refs: Vec<String>,
    ) -> Self {
        Self {
            user_id,
            threshold_class,
            sent_date: sent_at.date_naive(),
            resource_refs,
            created_at: sent_at,
        }
    }
}

/// Storage for the notification gate's dedup records.
#[async_trait]
pub trait NotificationLog: Send + Sync {
    /// Whether a record exists for this exact dedup key.
    async fn exists(
        &self,
        user_id: &UserId,
        class: ThresholdClass,
        day: NaiveDate,
    ) -> Result<bool, StoreError>;

    /// Insert unless a record already holds the key. Returns whether it was written.
    async fn insert_if_absent(&self, record: NotificationRecord) -> Result<bool, StoreError>;

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<NotificationRecord>, StoreError>;

    /// Remove a user's history. Returns how many records went.
    async fn delete_for_user(&self, user_id: &UserId) -> Result<usize, StoreError>;
}

/// Which email template to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    AssignmentGranted,
    ExpiryReminder,
    ExpiryUrgent,
    AccessExpired,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::AssignmentGranted => "assignment_granted",
            TemplateKind::ExpiryReminder => "expiry_reminder",
            TemplateKind::ExpiryUrgent => "expiry_urgent",
            TemplateKind::AccessExpired => "access_expired",
        }
    }
}

/// Outbound email transport.
///
/// Callers treat every failure as transient: it is logged, never propagated
/// into the operation that triggered the email.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    /// Transport name (e.g., "log", "http").
    fn name(&self) -> &str;

    async fn send(
        &self,
        kind: TemplateKind,
        recipient: &str,
        data: &serde_json::Value,
    ) -> Result<(), NotifyError>;
}

/// Category of an in-app notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InAppKind {
    Assignment,
    Reminder,
    Urgent,
    Expired,
}

impl InAppKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InAppKind::Assignment => "assignment",
            InAppKind::Reminder => "reminder",
            InAppKind::Urgent => "urgent",
            InAppKind::Expired => "expired",
        }
    }
}

impl std::str::FromStr for InAppKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assignment" => Ok(InAppKind::Assignment),
            "reminder" => Ok(InAppKind::Reminder),
            "urgent" => Ok(InAppKind::Urgent),
            "expired" => Ok(InAppKind::Expired),
            other => Err(format!("unknown notification kind '{other}'")),
        }
    }
}

/// An entry in the user's in-app notification feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InAppNotification {
    pub id: String,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: InAppKind,

    /// The dashboard the notice is about, when there is exactly one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl InAppNotification {
    pub fn new(
        user_id: UserId,
        kind: InAppKind,
        title: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            title: title.into(),
            message: message.into(),
            kind,
            related_id: None,
            created_at,
        }
    }

    pub fn with_related(mut self, related_id: Option<String>) -> Self {
        self.related_id = related_id;
        self
    }
}

/// The in-app notification feed. Written best-effort alongside email.
#[async_trait]
pub trait InAppNotifier: Send + Sync {
    async fn create(&self, notification: InAppNotification) -> Result<String, StoreError>;

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<InAppNotification>, StoreError>;

    async fn delete_for_user(&self, user_id: &UserId) -> Result<usize, StoreError>;
}
