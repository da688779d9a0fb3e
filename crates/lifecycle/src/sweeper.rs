//! Expiration sweeper — purges assignments whose expiry has passed.
//!
//! A run is idempotent: it removes whatever is expired at its `now`
//! snapshot, so a retried or repeated run only finds what is left. Runs
//! never overlap; a second call while one is active returns
//! [`SweepOutcome::Skipped`] instead of queueing.

use chrono::{DateTime, Utc};
use dashkeep_core::clock::Clock;
use dashkeep_core::directory::UserDirectory;
use dashkeep_core::error::{Error, Result};
use dashkeep_core::event::{DomainEvent, EventBus};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// What one completed sweep did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed: usize,
    pub users_affected: usize,
    pub duration_ms: u64,
    /// The single instant every expiry was compared against
    pub swept_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another sweep was already running
    Skipped,
}

/// Lifetime counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepStats {
    pub total_runs: u64,
    pub failed_runs: u64,
    pub total_removed: u64,
    pub total_users_affected: u64,
    pub last_run: Option<SweepReport>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub is_running: bool,
}

/// Clears the running flag on every exit path, including timeouts.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ExpirationSweeper {
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    run_timeout: Duration,
    running: AtomicBool,
    stats: Mutex<SweepStats>,
}

impl ExpirationSweeper {
    pub fn new(users: Arc<dyn UserDirectory>, clock: Arc<dyn Clock>, event_bus: Arc<EventBus>) -> Self {
        Self {
            users,
            clock,
            event_bus,
            run_timeout: Duration::from_secs(300),
            running: AtomicBool::new(false),
            stats: Mutex::new(SweepStats::default()),
        }
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one sweep.
    ///
    /// Fails with `Fatal` when a write fails partway or the run exceeds its
    /// timeout. Users swept before the failure stay swept.
    pub async fn run(&self) -> Result<SweepOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Sweep already in progress, skipping");
            return Ok(SweepOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);

        let started = Instant::now();
        let now = self.clock.now();

        let result = match tokio::time::timeout(self.run_timeout, self.sweep_at(now)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Fatal(format!(
                "sweep exceeded its {}s timeout",
                self.run_timeout.as_secs()
            ))),
        };

        let (removed, users_affected) = match result {
            Ok(counts) => counts,
            Err(e) => {
                error!("Sweep aborted: {e}");
                self.with_stats(|s| s.failed_runs += 1);
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: "sweep".into(),
                    error_message: e.to_string(),
                    timestamp: self.clock.now(),
                });
                return Err(e);
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let report = SweepReport {
            removed,
            users_affected,
            duration_ms,
            swept_at: now,
            message: format!(
                "Removed {removed} expired assignment(s) from {users_affected} user(s) at {}",
                now.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        };

        self.with_stats(|s| {
            s.total_runs += 1;
            s.total_removed += removed as u64;
            s.total_users_affected += users_affected as u64;
            s.last_run = Some(report.clone());
            s.last_run_at = Some(now);
        });

        info!(removed, users_affected, duration_ms, "Sweep complete");
        self.event_bus.publish(DomainEvent::SweepCompleted {
            removed,
            users_affected,
            duration_ms,
            timestamp: now,
        });

        Ok(SweepOutcome::Completed(report))
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let users = self
            .users
            .find_users_with_expired_assignments(now)
            .await
            .map_err(|e| Error::Fatal(format!("expired lookup failed: {e}")))?;

        let mut removed = 0;
        let mut users_affected = 0;
        for mut user in users {
            let purged = user.purge_expired(now);
            if purged == 0 {
                continue;
            }
            let saved = self
                .users
                .save_user(&user)
                .await
                .map_err(|e| Error::Fatal(format!("persisting user {}: {e}", user.id)))?;
            if !saved {
                debug!(user_id = %user.id, "User deleted during sweep, skipped");
                continue;
            }
            debug!(user_id = %user.id, purged, "Swept user");
            removed += purged;
            users_affected += 1;
        }
        Ok((removed, users_affected))
    }

    /// How many assignments a sweep at `as_of` (default: now) would remove.
    pub async fn expired_count(&self, as_of: Option<DateTime<Utc>>) -> Result<usize> {
        let as_of = as_of.unwrap_or_else(|| self.clock.now());
        let users = self.users.find_users_with_expired_assignments(as_of).await?;
        Ok(users.iter().map(|u| u.expired_assignments(as_of).len()).sum())
    }

    pub fn stats(&self) -> SweepStats {
        let mut stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone());
        stats.is_running = self.is_running();
        stats
    }

    fn with_stats(&self, f: impl FnOnce(&mut SweepStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use dashkeep_core::assignment::Assignment;
    use dashkeep_core::clock::ManualClock;
    use dashkeep_core::directory::{User, UserId};
    use dashkeep_core::error::StoreError;
    use dashkeep_store::InMemoryStore;
    use std::sync::atomic::AtomicUsize;

    fn user(id: &str, assignments: Vec<Assignment>) -> User {
        let mut u = User::new(UserId::new(id), format!("{id}@example.com"), id, Utc::now());
        u.assignments = assignments;
        u
    }

    async fn seeded(now: DateTime<Utc>) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let past = now - ChronoDuration::days(10);
        store
            .create_user(user("a", vec![
                Assignment::new("x", past, Some(now - ChronoDuration::hours(1))),
                Assignment::new("y", past, Some(now)),
                Assignment::permanent("z", past),
            ]))
            .await
            .unwrap();
        store
            .create_user(user("b", vec![Assignment::new("x", past, Some(now - ChronoDuration::days(2)))]))
            .await
            .unwrap();
        store
            .create_user(user("c", vec![Assignment::new("x", past, Some(now + ChronoDuration::hours(1)))]))
            .await
            .unwrap();
        store
    }

    fn sweeper(store: Arc<InMemoryStore>, now: DateTime<Utc>) -> ExpirationSweeper {
        ExpirationSweeper::new(store, Arc::new(ManualClock::new(now)), Arc::new(EventBus::default()))
    }

    fn completed(outcome: SweepOutcome) -> SweepReport {
        match outcome {
            SweepOutcome::Completed(report) => report,
            SweepOutcome::Skipped => panic!("sweep was skipped"),
        }
    }

    #[tokio::test]
    async fn sweeps_expired_including_boundary() {
        let now = Utc::now();
        let store = seeded(now).await;
        let sweeper = sweeper(store.clone(), now);

        assert_eq!(sweeper.expired_count(None).await.unwrap(), 3);

        let report = completed(sweeper.run().await.unwrap());
        assert_eq!(report.removed, 3);
        assert_eq!(report.users_affected, 2);
        assert_eq!(report.swept_at, now);

        let a = store.find_user(&UserId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.assignments.len(), 1);
        assert_eq!(a.assignments[0].resource_ref, "z");
        // Still owed an expiry notice
        let lapsed: Vec<&str> = a.lapsed.iter().map(|l| l.resource_ref.as_str()).collect();
        assert_eq!(lapsed, vec!["x", "y"]);
        let c = store.find_user(&UserId::new("c")).await.unwrap().unwrap();
        assert_eq!(c.assignments.len(), 1);
    }

    #[tokio::test]
    async fn second_sweep_is_a_noop() {
        let now = Utc::now();
        let store = seeded(now).await;
        let sweeper = sweeper(store.clone(), now);

        completed(sweeper.run().await.unwrap());
        let writes = store.user_writes();

        let second = completed(sweeper.run().await.unwrap());
        assert_eq!(second.removed, 0);
        assert_eq!(second.users_affected, 0);
        assert_eq!(store.user_writes(), writes);

        let stats = sweeper.stats();
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.total_removed, 3);
        assert_eq!(stats.total_users_affected, 2);
        assert_eq!(stats.last_run_at, Some(now));
        assert!(!stats.is_running);
    }

    #[tokio::test]
    async fn empty_sweep_writes_nothing() {
        let now = Utc::now();
        let store = Arc::new(InMemoryStore::new());
        store
            .create_user(user("p", vec![Assignment::permanent("x", now - ChronoDuration::days(900))]))
            .await
            .unwrap();
        let sweeper = sweeper(store.clone(), now + ChronoDuration::days(3650));

        let report = completed(sweeper.run().await.unwrap());
        assert_eq!((report.removed, report.users_affected), (0, 0));
        assert_eq!(store.user_writes(), 0);
    }

    /// Fails `save_user` after a number of successful writes.
    struct FlakyDirectory {
        inner: Arc<InMemoryStore>,
        ok_writes: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl UserDirectory for FlakyDirectory {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn create_user(&self, user: User) -> std::result::Result<(), StoreError> {
            self.inner.create_user(user).await
        }
        async fn find_user(&self, id: &UserId) -> std::result::Result<Option<User>, StoreError> {
            self.inner.find_user(id).await
        }
        async fn save_user(&self, user: &User) -> std::result::Result<bool, StoreError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.ok_writes {
                return Err(StoreError::Storage("disk full".into()));
            }
            self.inner.save_user(user).await
        }
        async fn delete_user(&self, id: &UserId) -> std::result::Result<bool, StoreError> {
            self.inner.delete_user(id).await
        }
        async fn list_users(&self) -> std::result::Result<Vec<User>, StoreError> {
            self.inner.list_users().await
        }
        async fn find_users_with_assignments_expiring_between(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> std::result::Result<Vec<User>, StoreError> {
            self.inner.find_users_with_assignments_expiring_between(start, end).await
        }
        async fn find_users_with_expired_assignments(
            &self,
            as_of: DateTime<Utc>,
        ) -> std::result::Result<Vec<User>, StoreError> {
            self.inner.find_users_with_expired_assignments(as_of).await
        }
    }

    #[tokio::test]
    async fn write_failure_aborts_but_keeps_earlier_users() {
        let now = Utc::now();
        let store = seeded(now).await;
        let flaky = Arc::new(FlakyDirectory {
            inner: store.clone(),
            ok_writes: 1,
            writes: AtomicUsize::new(0),
        });
        let sweeper = ExpirationSweeper::new(
            flaky,
            Arc::new(ManualClock::new(now)),
            Arc::new(EventBus::default()),
        );

        let err = sweeper.run().await.unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
        assert!(!sweeper.is_running());
        assert_eq!(sweeper.stats().failed_runs, 1);
        assert_eq!(sweeper.stats().total_runs, 0);

        // Users are visited in id order: "a" was swept before the failure on "b"
        let a = store.find_user(&UserId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.assignments.len(), 1);
        assert_eq!(sweeper.expired_count(None).await.unwrap(), 1);

        // A retry against healthy storage finishes the job
        let retry = ExpirationSweeper::new(
            store.clone(),
            Arc::new(ManualClock::new(now)),
            Arc::new(EventBus::default()),
        );
        assert_eq!(completed(retry.run().await.unwrap()).removed, 1);
    }

    /// Blocks the expired lookup until released.
    struct GatedDirectory {
        inner: Arc<InMemoryStore>,
        release: tokio::sync::Notify,
        entered: tokio::sync::Notify,
    }

    #[async_trait]
    impl UserDirectory for GatedDirectory {
        fn name(&self) -> &str {
            "gated"
        }
        async fn create_user(&self, user: User) -> std::result::Result<(), StoreError> {
            self.inner.create_user(user).await
        }
        async fn find_user(&self, id: &UserId) -> std::result::Result<Option<User>, StoreError> {
            self.inner.find_user(id).await
        }
        async fn save_user(&self, user: &User) -> std::result::Result<bool, StoreError> {
            self.inner.save_user(user).await
        }
        async fn delete_user(&self, id: &UserId) -> std::result::Result<bool, StoreError> {
            self.inner.delete_user(id).await
        }
        async fn list_users(&self) -> std::result::Result<Vec<User>, StoreError> {
            self.inner.list_users().await
        }
        async fn find_users_with_assignments_expiring_between(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> std::result::Result<Vec<User>, StoreError> {
            self.inner.find_users_with_assignments_expiring_between(start, end).await
        }
        async fn find_users_with_expired_assignments(
            &self,
            as_of: DateTime<Utc>,
        ) -> std::result::Result<Vec<User>, StoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.find_users_with_expired_assignments(as_of).await
        }
    }

    #[tokio::test]
    async fn overlapping_sweep_is_skipped() {
        let now = Utc::now();
        let gated = Arc::new(GatedDirectory {
            inner: seeded(now).await,
            release: tokio::sync::Notify::new(),
            entered: tokio::sync::Notify::new(),
        });
        let sweeper = Arc::new(ExpirationSweeper::new(
            gated.clone(),
            Arc::new(ManualClock::new(now)),
            Arc::new(EventBus::default()),
        ));

        let first = tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run().await }
        });
        gated.entered.notified().await;
        assert!(sweeper.is_running());
        assert!(sweeper.stats().is_running);

        assert_eq!(sweeper.run().await.unwrap(), SweepOutcome::Skipped);

        gated.release.notify_one();
        let report = completed(first.await.unwrap().unwrap());
        assert_eq!(report.removed, 3);
        assert!(!sweeper.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_fatal_and_releases_flag() {
        let now = Utc::now();
        let gated = Arc::new(GatedDirectory {
            inner: seeded(now).await,
            release: tokio::sync::Notify::new(),
            entered: tokio::sync::Notify::new(),
        });
        let sweeper = ExpirationSweeper::new(
            gated,
            Arc::new(ManualClock::new(now)),
            Arc::new(EventBus::default()),
        )
        .with_run_timeout(Duration::from_secs(5));

        let err = sweeper.run().await.unwrap_err();
        assert!(matches!(err, Error::Fatal(ref m) if m.contains("timeout")));
        assert!(!sweeper.is_running());
    }

    /// Deletes one user right after the expired lookup returns.
    struct DeletingDirectory {
        inner: Arc<InMemoryStore>,
        victim: UserId,
    }

    #[async_trait]
    impl UserDirectory for DeletingDirectory {
        fn name(&self) -> &str {
            "deleting"
        }
        async fn create_user(&self, user: User) -> std::result::Result<(), StoreError> {
            self.inner.create_user(user).await
        }
        async fn find_user(&self, id: &UserId) -> std::result::Result<Option<User>, StoreError> {
            self.inner.find_user(id).await
        }
        async fn save_user(&self, user: &User) -> std::result::Result<bool, StoreError> {
            self.inner.save_user(user).await
        }
        async fn delete_user(&self, id: &UserId) -> std::result::Result<bool, StoreError> {
            self.inner.delete_user(id).await
        }
        async fn list_users(&self) -> std::result::Result<Vec<User>, StoreError> {
            self.inner.list_users().await
        }
        async fn find_users_with_assignments_expiring_between(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> std::result::Result<Vec<User>, StoreError> {
            self.inner.find_users_with_assignments_expiring_between(start, end).await
        }
        async fn find_users_with_expired_assignments(
            &self,
            as_of: DateTime<Utc>,
        ) -> std::result::Result<Vec<User>, StoreError> {
            let users = self.inner.find_users_with_expired_assignments(as_of).await?;
            self.inner.delete_user(&self.victim).await?;
            Ok(users)
        }
    }

    #[tokio::test]
    async fn user_deleted_mid_sweep_stays_deleted() {
        let now = Utc::now();
        let store = seeded(now).await;
        let sweeper = ExpirationSweeper::new(
            Arc::new(DeletingDirectory {
                inner: store.clone(),
                victim: UserId::new("b"),
            }),
            Arc::new(ManualClock::new(now)),
            Arc::new(EventBus::default()),
        );

        let report = completed(sweeper.run().await.unwrap());
        assert_eq!((report.removed, report.users_affected), (2, 1));
        assert!(store.find_user(&UserId::new("b")).await.unwrap().is_none());
        assert_eq!(store.list_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn publishes_completion_event() {
        let now = Utc::now();
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let sweeper = ExpirationSweeper::new(seeded(now).await, Arc::new(ManualClock::new(now)), bus);

        completed(sweeper.run().await.unwrap());
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::SweepCompleted { removed, users_affected, .. } => {
                assert_eq!((*removed, *users_affected), (3, 2));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
