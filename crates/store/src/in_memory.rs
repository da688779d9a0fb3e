//! In-memory backend — useful for testing and ephemeral deployments.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashkeep_core::directory::{Dashboard, ResourceCatalog, User, UserDirectory, UserId};
use dashkeep_core::error::StoreError;
use dashkeep_core::notification::{
    InAppNotification, InAppNotifier, NotificationLog, NotificationRecord, ThresholdClass,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Stores every aggregate in process memory.
///
/// Implements all four storage traits so one instance can back a whole
/// service graph. `user_writes()` counts successful `save_user` calls, which
/// lets tests assert that a no-op sweep touched nothing.
pub struct InMemoryStore {
    users: Arc<RwLock<BTreeMap<UserId, User>>>,
    dashboards: Arc<RwLock<BTreeMap<String, Dashboard>>>,
    records: Arc<RwLock<Vec<NotificationRecord>>>,
    in_app: Arc<RwLock<Vec<InAppNotification>>>,
    user_writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(BTreeMap::new())),
            dashboards: Arc::new(RwLock::new(BTreeMap::new())),
            records: Arc::new(RwLock::new(Vec::new())),
            in_app: Arc::new(RwLock::new(Vec::new())),
            user_writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful `save_user` calls since construction.
    pub fn user_writes(&self) -> usize {
        self.user_writes.load(Ordering::Relaxed)
    }

    /// Number of dedup records held.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn filter_users<F>(users: &BTreeMap<UserId, User>, pred: F) -> Vec<User>
where
    F: Fn(DateTime<Utc>) -> bool,
{
    users
        .values()
        .filter(|u| {
            u.assignments
                .iter()
                .any(|a| a.expires_at.is_some_and(&pred))
        })
        .cloned()
        .collect()
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_user(&self, user: User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(StoreError::Duplicate(format!("user {}", user.id)));
        }
        users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn save_user(&self, user: &User) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        let Some(stored) = users.get_mut(&user.id) else {
            return Ok(false);
        };
        *stored = user.clone();
        self.user_writes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn delete_user(&self, id: &UserId) -> Result<bool, StoreError> {
        Ok(self.users.write().await.remove(id).is_some())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn find_users_with_assignments_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError> {
        let users = self.users.read().await;
        Ok(filter_users(&users, |expires| expires > start && expires <= end))
    }

    async fn find_users_with_expired_assignments(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError> {
        let users = self.users.read().await;
        Ok(filter_users(&users, |expires| expires <= as_of))
    }

    async fn find_users_with_lapsed_grants(&self) -> Result<Vec<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|u| !u.lapsed.is_empty())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryStore {
    async fn find_dashboard(&self, id: &str) -> Result<Option<Dashboard>, StoreError> {
        Ok(self.dashboards.read().await.get(id).cloned())
    }

    async fn upsert_dashboard(&self, dashboard: Dashboard) -> Result<(), StoreError> {
        self.dashboards
            .write()
            .await
            .insert(dashboard.id.clone(), dashboard);
        Ok(())
    }

    async fn delete_dashboard(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.dashboards.write().await.remove(id).is_some())
    }

    async fn list_dashboards(&self) -> Result<Vec<Dashboard>, StoreError> {
        Ok(self.dashboards.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl NotificationLog for InMemoryStore {
    async fn exists(
        &self,
        user_id: &UserId,
        class: ThresholdClass,
        day: NaiveDate,
    ) -> Result<bool, StoreError> {
        Ok(self.records.read().await.iter().any(|r| {
            &r.user_id == user_id && r.threshold_class == class && r.sent_date == day
        }))
    }

    async fn insert_if_absent(&self, record: NotificationRecord) -> Result<bool, StoreError> {
        // Check and insert under one write guard
        let mut records = self.records.write().await;
        let taken = records.iter().any(|r| {
            r.user_id == record.user_id
                && r.threshold_class == record.threshold_class
                && r.sent_date == record.sent_date
        });
        if taken {
            return Ok(false);
        }
        records.push(record);
        Ok(true)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<NotificationRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_for_user(&self, user_id: &UserId) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| &r.user_id != user_id);
        Ok(before - records.len())
    }
}

#[async_trait]
impl InAppNotifier for InMemoryStore {
    async fn create(&self, notification: InAppNotification) -> Result<String, StoreError> {
        let id = notification.id.clone();
        self.in_app.write().await.push(notification);
        Ok(id)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<InAppNotification>, StoreError> {
        let mut list: Vec<InAppNotification> = self
            .in_app
            .read()
            .await
            .iter()
            .filter(|n| &n.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn delete_for_user(&self, user_id: &UserId) -> Result<usize, StoreError> {
        let mut in_app = self.in_app.write().await;
        let before = in_app.len();
        in_app.retain(|n| &n.user_id != user_id);
        Ok(before - in_app.len())
    }
}
