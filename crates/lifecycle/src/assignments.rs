//! The assignment store service.
//!
//! Owns every mutation of a user's grant list. Mutations are whole-aggregate
//! writes: load the user, change the list, save it back. Notifications that
//! follow a mutation are best-effort and never undo it.

use chrono::{DateTime, Utc};
use dashkeep_core::assignment::{Assignment, AssignmentRequest};
use dashkeep_core::clock::Clock;
use dashkeep_core::directory::{Dashboard, ResourceCatalog, User, UserDirectory, UserId};
use dashkeep_core::error::{Error, Result, StoreError};
use dashkeep_core::event::{DomainEvent, EventBus};
use dashkeep_core::notification::{
    EmailDispatcher, InAppKind, InAppNotification, InAppNotifier, NotificationLog, TemplateKind,
};
use dashkeep_store::Stores;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::digest;

/// Result of a batch `assign`.
#[derive(Debug, Clone, Serialize)]
pub struct AssignOutcome {
    /// The user's full assignment list after the merge
    pub assignments: Vec<Assignment>,
    /// The assignments this call created
    pub granted: Vec<Assignment>,
    /// Whether the "new access" email went out
    pub email_sent: bool,
}

/// Every expired assignment of one user.
#[derive(Debug, Clone, Serialize)]
pub struct ExpiredGroup {
    pub user_id: UserId,
    pub email: String,
    pub assignments: Vec<Assignment>,
}

/// What a user deletion took with it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserRemoval {
    pub notification_records: usize,
    pub in_app_notifications: usize,
}

pub struct AssignmentService {
    users: Arc<dyn UserDirectory>,
    catalog: Arc<dyn ResourceCatalog>,
    log: Arc<dyn NotificationLog>,
    in_app: Arc<dyn InAppNotifier>,
    mailer: Arc<dyn EmailDispatcher>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    app_url: String,
}

impl AssignmentService {
    pub fn new(
        stores: &Stores,
        mailer: Arc<dyn EmailDispatcher>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            users: stores.users.clone(),
            catalog: stores.catalog.clone(),
            log: stores.log.clone(),
            in_app: stores.in_app.clone(),
            mailer,
            clock,
            event_bus,
            app_url: String::new(),
        }
    }

    /// Base URL used to build absolute dashboard links in emails.
    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = app_url.into();
        self
    }

    async fn load_user(&self, user_id: &UserId) -> Result<User> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| Error::user_not_found(user_id))
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        id: Option<UserId>,
        email: &str,
        name: &str,
    ) -> Result<User> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::Validation(format!("invalid email address: {email:?}")));
        }
        let name = match name.trim() {
            "" => email,
            n => n,
        };
        let id = match id {
            Some(id) if id.as_str().trim().is_empty() => {
                return Err(Error::Validation("user id must not be blank".into()));
            }
            Some(id) => id,
            None => UserId::generate(),
        };

        let user = User::new(id, email, name, self.clock.now());
        self.users.create_user(user.clone()).await.map_err(|e| match e {
            StoreError::Duplicate(_) => Error::Validation(format!("user {} already exists", user.id)),
            other => Error::Store(other),
        })?;
        info!(user_id = %user.id, "User created");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &UserId) -> Result<User> {
        self.load_user(user_id).await
    }

    /// Delete a user together with their notification history and in-app feed.
    pub async fn delete_user(&self, user_id: &UserId) -> Result<UserRemoval> {
        if !self.users.delete_user(user_id).await? {
            return Err(Error::user_not_found(user_id));
        }
        let removal = UserRemoval {
            notification_records: self.log.delete_for_user(user_id).await?,
            in_app_notifications: self.in_app.delete_for_user(user_id).await?,
        };
        info!(
            user_id = %user_id,
            records = removal.notification_records,
            in_app = removal.in_app_notifications,
            "User deleted"
        );
        Ok(removal)
    }

    /// The user's in-app feed, newest first as stored.
    pub async fn notifications(&self, user_id: &UserId) -> Result<Vec<InAppNotification>> {
        self.load_user(user_id).await?;
        Ok(self.in_app.list_for_user(user_id).await?)
    }

    // ── Dashboards ────────────────────────────────────────────────────

    pub async fn register_dashboard(&self, dashboard: Dashboard) -> Result<Dashboard> {
        if dashboard.id.trim().is_empty() {
            return Err(Error::Validation("dashboard id is required".into()));
        }
        if dashboard.name.trim().is_empty() {
            return Err(Error::Validation("dashboard name is required".into()));
        }
        let dashboard = Dashboard::new(dashboard.id.trim(), dashboard.name.trim(), dashboard.url.trim());
        self.catalog.upsert_dashboard(dashboard.clone()).await?;
        debug!(dashboard = %dashboard.id, "Dashboard registered");
        Ok(dashboard)
    }

    pub async fn list_dashboards(&self) -> Result<Vec<Dashboard>> {
        Ok(self.catalog.list_dashboards().await?)
    }

    /// Remove a dashboard from the catalog. Existing grants for it are left
    /// in place and lapse through the normal expiry path.
    pub async fn delete_dashboard(&self, id: &str) -> Result<()> {
        if !self.catalog.delete_dashboard(id).await? {
            return Err(Error::dashboard_not_found(id));
        }
        info!(dashboard = %id, "Dashboard removed from catalog");
        Ok(())
    }

    // ── Assignments ───────────────────────────────────────────────────

    /// Grant a batch of dashboards to a user.
    ///
    /// Validation happens before anything is written: a blank reference or
    /// an expiry at or before now is a `Validation` error, an unknown user or
    /// dashboard is `NotFound`. Existing grants for the same dashboard are
    /// replaced. After the write, the user is emailed the new grants; a
    /// failed email only flips `email_sent` to false.
    pub async fn assign(
        &self,
        user_id: &UserId,
        requests: Vec<AssignmentRequest>,
    ) -> Result<AssignOutcome> {
        let now = self.clock.now();

        if requests.is_empty() {
            return Err(Error::Validation("at least one assignment is required".into()));
        }
        for request in &requests {
            request.validate(now)?;
        }

        let mut user = self.load_user(user_id).await?;

        let mut seen = HashSet::new();
        for request in &requests {
            let resource_ref = request.resource_ref.trim();
            if seen.insert(resource_ref.to_string())
                && self.catalog.find_dashboard(resource_ref).await?.is_none()
            {
                return Err(Error::dashboard_not_found(resource_ref));
            }
        }

        let granted = user.grant(requests, now);
        if !self.users.save_user(&user).await? {
            return Err(Error::user_not_found(user_id));
        }

        info!(
            user_id = %user.id,
            granted = granted.len(),
            total = user.assignments.len(),
            "Assignments granted"
        );

        let email_sent = self.announce_grants(&user, &granted, now).await;

        self.event_bus.publish(DomainEvent::AssignmentsGranted {
            user_id: user.id.to_string(),
            resource_refs: granted.iter().map(|a| a.resource_ref.clone()).collect(),
            email_sent,
            timestamp: now,
        });

        Ok(AssignOutcome {
            assignments: user.assignments,
            granted,
            email_sent,
        })
    }

    /// Email and in-app notice for fresh grants. Returns whether the email went out.
    async fn announce_grants(&self, user: &User, granted: &[Assignment], now: DateTime<Utc>) -> bool {
        let lines = match digest::dashboard_lines(self.catalog.as_ref(), granted).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(user_id = %user.id, "Skipping grant notice, catalog lookup failed: {e}");
                return false;
            }
        };

        let message = format!("You now have access to: {}", digest::names(&lines));
        let related = (granted.len() == 1).then(|| granted[0].resource_ref.clone());
        let data = digest::payload(user, &self.app_url, lines);

        let email_sent = match self
            .mailer
            .send(TemplateKind::AssignmentGranted, &user.email, &data)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id = %user.id, transport = self.mailer.name(), "Grant email failed: {e}");
                false
            }
        };

        let notice = InAppNotification::new(
            user.id.clone(),
            InAppKind::Assignment,
            "New dashboard access",
            message,
            now,
        )
        .with_related(related);
        if let Err(e) = self.in_app.create(notice).await {
            warn!(user_id = %user.id, "In-app grant notice failed: {e}");
        }

        email_sent
    }

    /// Remove the listed dashboards from a user. Returns the remaining list.
    pub async fn unassign(&self, user_id: &UserId, resource_refs: &[String]) -> Result<Vec<Assignment>> {
        let mut user = self.load_user(user_id).await?;
        let refs: Vec<String> = resource_refs.iter().map(|r| r.trim().to_string()).collect();

        let removed = user.revoke(&refs);
        if removed > 0 {
            if !self.users.save_user(&user).await? {
                return Err(Error::user_not_found(user_id));
            }
            info!(user_id = %user.id, removed, "Assignments revoked");
            self.event_bus.publish(DomainEvent::AssignmentsRevoked {
                user_id: user.id.to_string(),
                removed,
                timestamp: self.clock.now(),
            });
        }
        Ok(user.assignments)
    }

    /// Assignments with no expiry or an expiry after `as_of` (default: now).
    pub async fn list_active(
        &self,
        user_id: &UserId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<Assignment>> {
        let as_of = as_of.unwrap_or_else(|| self.clock.now());
        Ok(self.load_user(user_id).await?.active_assignments(as_of))
    }

    /// The user's assignments with `expires_at <= as_of` (default: now).
    pub async fn list_expired_for_user(
        &self,
        user_id: &UserId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<Assignment>> {
        let as_of = as_of.unwrap_or_else(|| self.clock.now());
        Ok(self.load_user(user_id).await?.expired_assignments(as_of))
    }

    /// Every expired assignment across users, grouped by user.
    pub async fn list_expired(&self, as_of: Option<DateTime<Utc>>) -> Result<Vec<ExpiredGroup>> {
        let as_of = as_of.unwrap_or_else(|| self.clock.now());
        let users = self.users.find_users_with_expired_assignments(as_of).await?;
        Ok(users
            .into_iter()
            .filter_map(|u| {
                let assignments = u.expired_assignments(as_of);
                (!assignments.is_empty()).then(|| ExpiredGroup {
                    user_id: u.id,
                    email: u.email,
                    assignments,
                })
            })
            .collect())
    }
}
