//! User directory and resource catalog — the aggregates assignments live in.
//!
//! Assignments are not a standalone collection: they are embedded in the
//! [`User`] aggregate and persisted with it. Every mutation of a user's grant
//! list is a whole-aggregate write through [`UserDirectory::save_user`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assignment::{Assignment, AssignmentRequest};
use crate::error::StoreError;

/// Unique identifier for a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random ID.
    pub fn generate() -> Self {
        Self(format!("usr_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A tenant user and the dashboards granted to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,

    #[serde(default)]
    pub assignments: Vec<Assignment>,

    /// Grants the sweeper removed before the user was told they expired
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lapsed: Vec<Assignment>,

    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        id: UserId,
        email: impl Into<String>,
        name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email: email.into(),
            name: name.into(),
            assignments: Vec::new(),
            lapsed: Vec::new(),
            created_at,
        }
    }

    /// Merge a batch of grants into the user, last-write-wins per resource.
    ///
    /// Any existing assignment for the same `resource_ref` is replaced rather
    /// than appended to. Requests are assumed validated. Returns the
    /// assignments created by this call.
    pub fn grant(&mut self, requests: Vec<AssignmentRequest>, now: DateTime<Utc>) -> Vec<Assignment> {
        let mut granted = Vec::with_capacity(requests.len());
        for request in requests {
            let assignment = request.into_assignment(now);
            self.assignments
                .retain(|a| a.resource_ref != assignment.resource_ref);
            self.lapsed
                .retain(|a| a.resource_ref != assignment.resource_ref);
            granted.retain(|a: &Assignment| a.resource_ref != assignment.resource_ref);
            self.assignments.push(assignment.clone());
            granted.push(assignment);
        }
        granted
    }

    /// Remove every assignment whose resource is listed. Returns how many went.
    ///
    /// Pending expiry notices for those resources are dropped too.
    pub fn revoke(&mut self, resource_refs: &[String]) -> usize {
        let listed = |a: &Assignment| resource_refs.iter().any(|r| r == &a.resource_ref);
        let before = self.assignments.len();
        self.assignments.retain(|a| !listed(a));
        self.lapsed.retain(|a| !listed(a));
        before - self.assignments.len()
    }

    /// Drop every assignment expired at `as_of`. Returns how many went.
    ///
    /// Grants whose expiry notice has not gone out move to `lapsed`, so the
    /// notice still reaches the user after the sweep.
    pub fn purge_expired(&mut self, as_of: DateTime<Utc>) -> usize {
        let (expired, active): (Vec<Assignment>, Vec<Assignment>) = std::mem::take(&mut self.assignments)
            .into_iter()
            .partition(|a| a.is_expired_at(as_of));
        self.assignments = active;

        for grant in &expired {
            if grant.expiry_notice_sent {
                continue;
            }
            self.lapsed.retain(|l| l.resource_ref != grant.resource_ref);
            self.lapsed.push(grant.clone());
        }
        expired.len()
    }

    /// Expired grants the user has not been told about, swept or not.
    pub fn expiry_notice_due(&self, as_of: DateTime<Utc>) -> Vec<Assignment> {
        let mut due: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|a| a.awaits_expiry_notice(as_of))
            .cloned()
            .collect();
        for grant in &self.lapsed {
            if !due.iter().any(|d| d.resource_ref == grant.resource_ref) {
                due.push(grant.clone());
            }
        }
        due
    }

    /// Record that the expiry notice for `notified` went out.
    pub fn settle_expiry_notice(&mut self, notified: &[Assignment]) {
        self.lapsed
            .retain(|l| !notified.iter().any(|n| n.same_grant(l)));
        for grant in &mut self.assignments {
            if notified.iter().any(|n| n.same_grant(grant)) {
                grant.expiry_notice_sent = true;
            }
        }
    }

    pub fn active_assignments(&self, as_of: DateTime<Utc>) -> Vec<Assignment> {
        self.assignments
            .iter()
            .filter(|a| a.is_active_at(as_of))
            .cloned()
            .collect()
    }

    pub fn expired_assignments(&self, as_of: DateTime<Utc>) -> Vec<Assignment> {
        self.assignments
            .iter()
            .filter(|a| a.is_expired_at(as_of))
            .cloned()
            .collect()
    }

    pub fn assignment(&self, resource_ref: &str) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.resource_ref == resource_ref)
    }
}

/// A dashboard in the resource catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    /// The reference assignments point at
    pub id: String,

    /// Display name used in notification content
    pub name: String,

    /// Where the user opens the dashboard
    pub url: String,
}

impl Dashboard {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Persistence for the user aggregate.
///
/// Implementations: SQLite, in-memory (for testing).
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Insert a new user. Fails with [`StoreError::Duplicate`] if the ID exists.
    async fn create_user(&self, user: User) -> Result<(), StoreError>;

    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;

    /// Replace the stored copy of an existing user.
    ///
    /// Never creates a user: returns `Ok(false)` and writes nothing when the
    /// user is gone, so a stale aggregate cannot bring a deleted user back.
    async fn save_user(&self, user: &User) -> Result<bool, StoreError>;

    /// Delete a user together with its embedded assignments.
    async fn delete_user(&self, id: &UserId) -> Result<bool, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Users holding at least one assignment with `start < expires_at <= end`.
    async fn find_users_with_assignments_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError>;

    /// Users holding at least one assignment with `expires_at <= as_of`.
    async fn find_users_with_expired_assignments(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError>;

    /// Users with swept grants still waiting for their expiry notice.
    async fn find_users_with_lapsed_grants(&self) -> Result<Vec<User>, StoreError> {
        Ok(self
            .list_users()
            .await?
            .into_iter()
            .filter(|u| !u.lapsed.is_empty())
            .collect())
    }
}

/// The dashboard catalog, consulted when composing notification content.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn find_dashboard(&self, id: &str) -> Result<Option<Dashboard>, StoreError>;

    async fn upsert_dashboard(&self, dashboard: Dashboard) -> Result<(), StoreError>;

    async fn delete_dashboard(&self, id: &str) -> Result<bool, StoreError>;

    async fn list_dashboards(&self) -> Result<Vec<Dashboard>, StoreError>;
}
