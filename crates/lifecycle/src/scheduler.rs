//! Threshold scheduler — expiry reminders by proximity class.
//!
//! Each [`ThresholdClass`] selects a disjoint slice of assignments relative
//! to `now`:
//!
//! | class        | remaining time `expires_at - now` |
//! |--------------|-----------------------------------|
//! | `reminder-7d`| `24h < remaining <= 7d`           |
//! | `urgent-24h` | `0 < remaining <= 24h`            |
//! | `expired`    | `remaining <= 0`                  |
//!
//! A run sends each qualifying user one email listing only that class's
//! assignments, writes an in-app notice, then records the send with the
//! [`NotificationGate`] so later runs the same day stay quiet.
//!
//! The `expired` class also covers grants the sweeper already removed: they
//! wait in [`User::lapsed`] until their notice goes out. Each expired grant
//! is announced once.

use chrono::{DateTime, Duration, Utc};
use dashkeep_core::assignment::Assignment;
use dashkeep_core::clock::Clock;
use dashkeep_core::directory::{ResourceCatalog, User, UserDirectory, UserId};
use dashkeep_core::error::{Error, Result};
use dashkeep_core::event::{DomainEvent, EventBus};
use dashkeep_core::notification::{
    EmailDispatcher, InAppNotification, InAppNotifier, ThresholdClass,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::digest;
use crate::gate::NotificationGate;

/// Counts from one class run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThresholdRunReport {
    pub class: ThresholdClass,
    pub users_considered: usize,
    pub notified: usize,
    /// Already notified for this class today
    pub suppressed: usize,
    /// Email delivery failed; no record written, retried on the next firing
    pub failed: usize,
    pub duration_ms: u64,
}

impl ThresholdRunReport {
    fn new(class: ThresholdClass) -> Self {
        Self {
            class,
            users_considered: 0,
            notified: 0,
            suppressed: 0,
            failed: 0,
            duration_ms: 0,
        }
    }
}

fn reminder_floor() -> Duration {
    Duration::hours(24)
}

fn reminder_ceiling() -> Duration {
    Duration::days(7)
}

/// Whether `assignment` falls in `class` at `now`.
pub fn qualifies(class: ThresholdClass, assignment: &Assignment, now: DateTime<Utc>) -> bool {
    let Some(remaining) = assignment.remaining_at(now) else {
        return false;
    };
    match class {
        ThresholdClass::Reminder7d => remaining > reminder_floor() && remaining <= reminder_ceiling(),
        ThresholdClass::Urgent24h => remaining > Duration::zero() && remaining <= reminder_floor(),
        ThresholdClass::Expired => remaining <= Duration::zero() && !assignment.expiry_notice_sent,
    }
}

pub struct ThresholdScheduler {
    users: Arc<dyn UserDirectory>,
    catalog: Arc<dyn ResourceCatalog>,
    in_app: Arc<dyn InAppNotifier>,
    mailer: Arc<dyn EmailDispatcher>,
    gate: Arc<NotificationGate>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    app_url: String,
    run_timeout: std::time::Duration,
}

impl ThresholdScheduler {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        catalog: Arc<dyn ResourceCatalog>,
        in_app: Arc<dyn InAppNotifier>,
        mailer: Arc<dyn EmailDispatcher>,
        gate: Arc<NotificationGate>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            users,
            catalog,
            in_app,
            mailer,
            gate,
            clock,
            event_bus,
            app_url: String::new(),
            run_timeout: std::time::Duration::from_secs(300),
        }
    }

    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = app_url.into();
        self
    }

    pub fn with_run_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Evaluate one class against the current time.
    pub async fn run_class(&self, class: ThresholdClass) -> Result<ThresholdRunReport> {
        let started = Instant::now();
        let now = self.clock.now();

        let result = match tokio::time::timeout(self.run_timeout, self.run_class_at(class, now)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Fatal(format!(
                "{class} run exceeded its {}s timeout",
                self.run_timeout.as_secs()
            ))),
        };

        let mut report = match result {
            Ok(report) => report,
            Err(e) => {
                warn!(class = %class, "Threshold run aborted: {e}");
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: format!("notify:{class}"),
                    error_message: e.to_string(),
                    timestamp: self.clock.now(),
                });
                return Err(e);
            }
        };
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            class = %class,
            considered = report.users_considered,
            notified = report.notified,
            suppressed = report.suppressed,
            failed = report.failed,
            "Threshold run complete"
        );
        Ok(report)
    }

    async fn candidates(&self, class: ThresholdClass, now: DateTime<Utc>) -> Result<Vec<User>> {
        let users = match class {
            ThresholdClass::Reminder7d => {
                self.users
                    .find_users_with_assignments_expiring_between(now + reminder_floor(), now + reminder_ceiling())
                    .await?
            }
            ThresholdClass::Urgent24h => {
                self.users
                    .find_users_with_assignments_expiring_between(now, now + reminder_floor())
                    .await?
            }
            ThresholdClass::Expired => {
                let mut by_id = BTreeMap::new();
                for user in self.users.find_users_with_expired_assignments(now).await? {
                    by_id.insert(user.id.clone(), user);
                }
                for user in self.users.find_users_with_lapsed_grants().await? {
                    by_id.entry(user.id.clone()).or_insert(user);
                }
                by_id.into_values().collect()
            }
        };
        Ok(users)
    }

    fn due(class: ThresholdClass, user: &User, now: DateTime<Utc>) -> Vec<Assignment> {
        match class {
            ThresholdClass::Expired => user.expiry_notice_due(now),
            _ => user
                .assignments
                .iter()
                .filter(|a| qualifies(class, a, now))
                .cloned()
                .collect(),
        }
    }

    /// Mark announced expired grants on a fresh copy of the user.
    ///
    /// A failure here only means the notice repeats on a later day.
    async fn settle_expired(&self, user_id: &UserId, notified: &[Assignment]) {
        let mut user = match self.users.find_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(e) => {
                warn!(user_id = %user_id, "Could not settle expiry notice: {e}");
                return;
            }
        };
        user.settle_expiry_notice(notified);
        if let Err(e) = self.users.save_user(&user).await {
            warn!(user_id = %user_id, "Could not settle expiry notice: {e}");
        }
    }

    async fn run_class_at(&self, class: ThresholdClass, now: DateTime<Utc>) -> Result<ThresholdRunReport> {
        let mut report = ThresholdRunReport::new(class);
        let today = now.date_naive();

        for user in self.candidates(class, now).await? {
            let due = Self::due(class, &user, now);
            if due.is_empty() {
                continue;
            }
            report.users_considered += 1;

            if !self.gate.should_send(&user.id, class, today).await? {
                report.suppressed += 1;
                continue;
            }

            let lines = digest::dashboard_lines(self.catalog.as_ref(), &due).await?;
            let names = digest::names(&lines);
            let data = digest::payload(&user, &self.app_url, lines);

            if let Err(e) = self.mailer.send(class.template(), &user.email, &data).await {
                warn!(user_id = %user.id, class = %class, "Expiry email failed: {e}");
                report.failed += 1;
                continue;
            }

            let (title, message) = in_app_text(class, &names);
            let related = (due.len() == 1).then(|| due[0].resource_ref.clone());
            let notice = InAppNotification::new(user.id.clone(), class.in_app_kind(), title, message, now)
                .with_related(related);
            if let Err(e) = self.in_app.create(notice).await {
                warn!(user_id = %user.id, "In-app expiry notice failed: {e}");
            }

            let refs: Vec<String> = due.iter().map(|a| a.resource_ref.clone()).collect();
            if !self.gate.record(&user.id, class, now, refs).await? {
                debug!(user_id = %user.id, class = %class, "Record already written by a concurrent run");
            }
            if class == ThresholdClass::Expired {
                self.settle_expired(&user.id, &due).await;
            }
            report.notified += 1;

            self.event_bus.publish(DomainEvent::NotificationSent {
                user_id: user.id.to_string(),
                class,
                assignments: due.len(),
                timestamp: now,
            });
        }

        Ok(report)
    }
}

fn in_app_text(class: ThresholdClass, names: &str) -> (&'static str, String) {
    match class {
        ThresholdClass::Reminder7d => ("Access expiring soon", format!("Expires within 7 days: {names}")),
        ThresholdClass::Urgent24h => ("Access expires tomorrow", format!("Expires within 24 hours: {names}")),
        ThresholdClass::Expired => ("Access expired", format!("Your access has ended: {names}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dashkeep_core::clock::ManualClock;
    use dashkeep_core::directory::Dashboard;
    use dashkeep_core::notification::{InAppKind, NotificationLog, TemplateKind};
    use dashkeep_notify::OutboxMailer;
    use dashkeep_store::InMemoryStore;

    struct Fixture {
        scheduler: ThresholdScheduler,
        store: Arc<InMemoryStore>,
        outbox: Arc<OutboxMailer>,
        clock: Arc<ManualClock>,
        bus: Arc<EventBus>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    async fn fixture(assignments: Vec<Assignment>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let outbox = Arc::new(OutboxMailer::new());
        let clock = Arc::new(ManualClock::new(t0()));

        for id in ["q3", "ops", "hr"] {
            store
                .upsert_dashboard(Dashboard::new(id, id.to_uppercase(), format!("/d/{id}")))
                .await
                .unwrap();
        }
        let mut user = User::new(UserId::new("u1"), "ada@example.com", "Ada", t0());
        user.assignments = assignments;
        store.create_user(user).await.unwrap();

        let bus = Arc::new(EventBus::default());
        let scheduler = ThresholdScheduler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            outbox.clone(),
            Arc::new(NotificationGate::new(store.clone())),
            clock.clone(),
            bus.clone(),
        );
        Fixture { scheduler, store, outbox, clock, bus }
    }

    fn expiring_in(id: &str, d: Duration) -> Assignment {
        Assignment::new(id, t0() - Duration::days(30), Some(t0() + d))
    }

    #[test]
    fn classes_are_disjoint() {
        let now = t0();
        let cases = [
            (Duration::days(8), None),
            (Duration::days(7), Some(ThresholdClass::Reminder7d)),
            (Duration::days(3), Some(ThresholdClass::Reminder7d)),
            (Duration::hours(24) + Duration::seconds(1), Some(ThresholdClass::Reminder7d)),
            (Duration::hours(24), Some(ThresholdClass::Urgent24h)),
            (Duration::hours(12), Some(ThresholdClass::Urgent24h)),
            (Duration::seconds(1), Some(ThresholdClass::Urgent24h)),
            (Duration::zero(), Some(ThresholdClass::Expired)),
            (-Duration::days(3), Some(ThresholdClass::Expired)),
        ];
        for (offset, expected) in cases {
            let a = expiring_in("x", offset);
            let matched: Vec<_> = ThresholdClass::ALL
                .into_iter()
                .filter(|c| qualifies(*c, &a, now))
                .collect();
            assert_eq!(matched, expected.into_iter().collect::<Vec<_>>(), "offset {offset}");
        }
        let permanent = Assignment::permanent("p", now);
        assert!(ThresholdClass::ALL.iter().all(|c| !qualifies(*c, &permanent, now)));
    }

    #[tokio::test]
    async fn three_day_and_twelve_hour_grants() {
        let f = fixture(vec![
            expiring_in("q3", Duration::days(3)),
            expiring_in("ops", Duration::hours(12)),
        ])
        .await;

        let reminder = f.scheduler.run_class(ThresholdClass::Reminder7d).await.unwrap();
        let urgent = f.scheduler.run_class(ThresholdClass::Urgent24h).await.unwrap();
        assert_eq!((reminder.notified, urgent.notified), (1, 1));
        assert_eq!((reminder.class, urgent.class), (ThresholdClass::Reminder7d, ThresholdClass::Urgent24h));

        let records = NotificationLog::list_for_user(f.store.as_ref(), &UserId::new("u1")).await.unwrap();
        assert_eq!(records.len(), 2);

        let reminders = f.outbox.sent_of(TemplateKind::ExpiryReminder);
        let urgents = f.outbox.sent_of(TemplateKind::ExpiryUrgent);
        assert_eq!(f.outbox.sent_count(), 2);
        assert_eq!(reminders[0].dashboard_ids(), vec!["q3"]);
        assert_eq!(urgents[0].dashboard_ids(), vec!["ops"]);

        let feed = InAppNotifier::list_for_user(f.store.as_ref(), &UserId::new("u1")).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert!(feed.iter().any(|n| n.kind == InAppKind::Urgent && n.related_id.as_deref() == Some("ops")));
    }

    #[tokio::test]
    async fn second_evaluation_same_day_is_suppressed() {
        let f = fixture(vec![expiring_in("ops", Duration::hours(20))]).await;

        let first = f.scheduler.run_class(ThresholdClass::Urgent24h).await.unwrap();
        assert_eq!(first.notified, 1);

        // The hourly check fires again later the same day
        f.clock.advance(Duration::hours(1));
        let second = f.scheduler.run_class(ThresholdClass::Urgent24h).await.unwrap();
        assert_eq!(second.notified, 0);
        assert_eq!(second.suppressed, 1);

        assert_eq!(f.outbox.sent_count(), 1);
        assert_eq!(f.store.record_count().await, 1);
    }

    #[tokio::test]
    async fn next_day_notifies_again() {
        let f = fixture(vec![expiring_in("q3", Duration::days(5))]).await;
        f.scheduler.run_class(ThresholdClass::Reminder7d).await.unwrap();
        f.clock.advance(Duration::days(1));
        let report = f.scheduler.run_class(ThresholdClass::Reminder7d).await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(f.store.record_count().await, 2);
    }

    #[tokio::test]
    async fn expired_class_sees_unswept_grants() {
        let f = fixture(vec![
            expiring_in("hr", Duration::zero()),
            expiring_in("q3", Duration::days(2)),
        ])
        .await;

        let report = f.scheduler.run_class(ThresholdClass::Expired).await.unwrap();
        assert_eq!(report.notified, 1);
        let sent = f.outbox.sent_of(TemplateKind::AccessExpired);
        assert_eq!(sent[0].dashboard_ids(), vec!["hr"]);
        assert!(sent[0].rendered.text.contains("HR"));
    }

    #[tokio::test]
    async fn expired_notice_reaches_swept_grants() {
        let f = fixture(vec![expiring_in("hr", -Duration::hours(6))]).await;
        let uid = UserId::new("u1");

        // Swept long before the daily expired check
        let mut user = f.store.find_user(&uid).await.unwrap().unwrap();
        assert_eq!(user.purge_expired(t0()), 1);
        assert!(f.store.save_user(&user).await.unwrap());

        let report = f.scheduler.run_class(ThresholdClass::Expired).await.unwrap();
        assert_eq!(report.notified, 1);
        let sent = f.outbox.sent_of(TemplateKind::AccessExpired);
        assert_eq!(sent[0].dashboard_ids(), vec!["hr"]);

        let user = f.store.find_user(&uid).await.unwrap().unwrap();
        assert!(user.lapsed.is_empty());
    }

    #[tokio::test]
    async fn expired_grant_is_announced_once() {
        let f = fixture(vec![expiring_in("hr", -Duration::hours(1))]).await;
        let uid = UserId::new("u1");

        assert_eq!(f.scheduler.run_class(ThresholdClass::Expired).await.unwrap().notified, 1);
        let user = f.store.find_user(&uid).await.unwrap().unwrap();
        assert!(user.assignments[0].expiry_notice_sent);

        // A later sweep does not queue a second notice
        let mut user = user;
        user.purge_expired(f.clock.now());
        assert!(user.lapsed.is_empty());
        assert!(f.store.save_user(&user).await.unwrap());

        f.clock.advance(Duration::days(1));
        let next = f.scheduler.run_class(ThresholdClass::Expired).await.unwrap();
        assert_eq!(next.users_considered, 0);
        assert_eq!(f.outbox.sent_of(TemplateKind::AccessExpired).len(), 1);
    }

    /// Never finishes a send.
    struct StalledMailer;

    #[async_trait::async_trait]
    impl EmailDispatcher for StalledMailer {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn send(
            &self,
            _kind: TemplateKind,
            _recipient: &str,
            _data: &serde_json::Value,
        ) -> std::result::Result<(), dashkeep_core::error::NotifyError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_fatal_and_reported() {
        let f = fixture(vec![expiring_in("ops", Duration::hours(3))]).await;
        let mut rx = f.bus.subscribe();
        let scheduler = ThresholdScheduler::new(
            f.store.clone(),
            f.store.clone(),
            f.store.clone(),
            Arc::new(StalledMailer),
            Arc::new(NotificationGate::new(f.store.clone())),
            f.clock.clone(),
            f.bus.clone(),
        )
        .with_run_timeout(std::time::Duration::from_secs(5));

        let err = scheduler.run_class(ThresholdClass::Urgent24h).await.unwrap_err();
        assert!(matches!(err, Error::Fatal(ref m) if m.contains("timeout")));

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::ErrorOccurred { context, error_message, timestamp } => {
                assert_eq!(context, "notify:urgent-24h");
                assert!(error_message.contains("timeout"));
                assert_eq!(*timestamp, t0());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(f.store.record_count().await, 0);
    }

    #[tokio::test]
    async fn email_failure_leaves_no_record() {
        let f = fixture(vec![expiring_in("ops", Duration::hours(3))]).await;
        f.outbox.set_failing(true);

        let report = f.scheduler.run_class(ThresholdClass::Urgent24h).await.unwrap();
        assert_eq!((report.failed, report.notified), (1, 0));
        assert_eq!(f.store.record_count().await, 0);

        // Recovered transport: the next firing the same day delivers
        f.outbox.set_failing(false);
        let retry = f.scheduler.run_class(ThresholdClass::Urgent24h).await.unwrap();
        assert_eq!(retry.notified, 1);
    }

    #[tokio::test]
    async fn nothing_due_sends_nothing() {
        let f = fixture(vec![
            expiring_in("q3", Duration::days(30)),
            Assignment::permanent("ops", t0()),
        ])
        .await;
        for class in ThresholdClass::ALL {
            let report = f.scheduler.run_class(class).await.unwrap();
            assert_eq!(report.users_considered, 0);
        }
        assert_eq!(f.outbox.sent_count(), 0);
    }
}
