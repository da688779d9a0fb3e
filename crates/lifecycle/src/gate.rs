//! Notification gate — at most one notice per (user, class, day).

use chrono::{DateTime, NaiveDate, Utc};
use dashkeep_core::directory::UserId;
use dashkeep_core::error::Result;
use dashkeep_core::notification::{NotificationLog, NotificationRecord, ThresholdClass};
use std::sync::Arc;
use tracing::debug;

pub struct NotificationGate {
    log: Arc<dyn NotificationLog>,
}

impl NotificationGate {
    pub fn new(log: Arc<dyn NotificationLog>) -> Self {
        Self { log }
    }

    /// True only if nothing was recorded for this key yet.
    pub async fn should_send(
        &self,
        user_id: &UserId,
        class: ThresholdClass,
        day: NaiveDate,
    ) -> Result<bool> {
        let sent = self.log.exists(user_id, class, day).await?;
        if sent {
            debug!(user_id = %user_id, class = %class, %day, "Already notified today");
        }
        Ok(!sent)
    }

    /// Record a delivered notice for the UTC day of `sent_at`.
    ///
    /// Returns false when another run recorded the same key first.
    pub async fn record(
        &self,
        user_id: &UserId,
        class: ThresholdClass,
        sent_at: DateTime<Utc>,
        resource_refs: Vec<String>,
    ) -> Result<bool> {
        let record = NotificationRecord::new(user_id.clone(), class, sent_at, resource_refs);
        Ok(self.log.insert_if_absent(record).await?)
    }

    pub async fn history(&self, user_id: &UserId) -> Result<Vec<NotificationRecord>> {
        Ok(self.log.list_for_user(user_id).await?)
    }
}
