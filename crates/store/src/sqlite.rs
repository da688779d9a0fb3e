//! SQLite backend.
//!
//! Uses a single SQLite database file with five tables:
//! - `users` — the user aggregate; assignments and lapsed grants embedded
//!   as JSON columns
//! - `assignment_expiry` — one row per expiring assignment, rewritten with
//!   every `save_user` so expiry queries never have to scan JSON
//! - `dashboards` — the resource catalog
//! - `notification_records` — gate dedup log, primary key (user, class, day)
//! - `in_app_notifications` — the user-facing notification feed

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use dashkeep_core::assignment::Assignment;
use dashkeep_core::directory::{Dashboard, ResourceCatalog, User, UserDirectory, UserId};
use dashkeep_core::error::StoreError;
use dashkeep_core::notification::{
    InAppKind, InAppNotification, InAppNotifier, NotificationLog, NotificationRecord,
    ThresholdClass,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

/// A production SQLite store implementing every storage trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful
    /// for tests); the pool is then pinned to one connection so every query
    /// sees the same database.
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {url}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements: [(&str, &str); 7] = [
            (
                "users table",
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id           TEXT PRIMARY KEY NOT NULL,
                    email        TEXT NOT NULL,
                    name         TEXT NOT NULL,
                    assignments  TEXT NOT NULL DEFAULT '[]',
                    lapsed       TEXT NOT NULL DEFAULT '[]',
                    created_at   TEXT NOT NULL
                )
                "#,
            ),
            (
                "assignment_expiry table",
                r#"
                CREATE TABLE IF NOT EXISTS assignment_expiry (
                    user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    resource_ref  TEXT NOT NULL,
                    expires_at_us INTEGER NOT NULL,
                    PRIMARY KEY (user_id, resource_ref)
                )
                "#,
            ),
            (
                "expiry index",
                "CREATE INDEX IF NOT EXISTS idx_assignment_expiry_at ON assignment_expiry(expires_at_us)",
            ),
            (
                "dashboards table",
                r#"
                CREATE TABLE IF NOT EXISTS dashboards (
                    id    TEXT PRIMARY KEY NOT NULL,
                    name  TEXT NOT NULL,
                    url   TEXT NOT NULL
                )
                "#,
            ),
            (
                "notification_records table",
                r#"
                CREATE TABLE IF NOT EXISTS notification_records (
                    user_id          TEXT NOT NULL,
                    threshold_class  TEXT NOT NULL,
                    sent_date        TEXT NOT NULL,
                    resource_refs    TEXT NOT NULL DEFAULT '[]',
                    created_at       TEXT NOT NULL,
                    PRIMARY KEY (user_id, threshold_class, sent_date)
                )
                "#,
            ),
            (
                "in_app_notifications table",
                r#"
                CREATE TABLE IF NOT EXISTS in_app_notifications (
                    id          TEXT PRIMARY KEY NOT NULL,
                    user_id     TEXT NOT NULL,
                    title       TEXT NOT NULL,
                    message     TEXT NOT NULL,
                    kind        TEXT NOT NULL,
                    related_id  TEXT,
                    created_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "in_app user index",
                "CREATE INDEX IF NOT EXISTS idx_in_app_user ON in_app_notifications(user_id, created_at DESC)",
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn ts(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
    }

    fn get<'r, T>(row: &'r sqlx::sqlite::SqliteRow, column: &str) -> Result<T, StoreError>
    where
        T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
    {
        row.try_get(column)
            .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
    }

    /// Parse a `User` from a row of `users`.
    fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, StoreError> {
        let id: String = Self::get(row, "id")?;
        let assignments_json: String = Self::get(row, "assignments")?;
        let lapsed_json: String = Self::get(row, "lapsed")?;
        let created_at: String = Self::get(row, "created_at")?;

        let assignments: Vec<Assignment> = serde_json::from_str(&assignments_json)
            .map_err(|e| StoreError::QueryFailed(format!("assignments column: {e}")))?;
        let lapsed: Vec<Assignment> = serde_json::from_str(&lapsed_json)
            .map_err(|e| StoreError::QueryFailed(format!("lapsed column: {e}")))?;

        Ok(User {
            id: UserId(id),
            email: Self::get(row, "email")?,
            name: Self::get(row, "name")?,
            assignments,
            lapsed,
            created_at: Self::parse_ts("created_at", &created_at)?,
        })
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<NotificationRecord, StoreError> {
        let class: String = Self::get(row, "threshold_class")?;
        let sent_date: String = Self::get(row, "sent_date")?;
        let refs_json: String = Self::get(row, "resource_refs")?;
        let created_at: String = Self::get(row, "created_at")?;

        Ok(NotificationRecord {
            user_id: UserId(Self::get(row, "user_id")?),
            threshold_class: ThresholdClass::from_str(&class).map_err(StoreError::QueryFailed)?,
            sent_date: NaiveDate::parse_from_str(&sent_date, "%Y-%m-%d")
                .map_err(|e| StoreError::QueryFailed(format!("sent_date column: {e}")))?,
            resource_refs: serde_json::from_str(&refs_json).unwrap_or_default(),
            created_at: Self::parse_ts("created_at", &created_at)?,
        })
    }

    fn row_to_in_app(row: &sqlx::sqlite::SqliteRow) -> Result<InAppNotification, StoreError> {
        let kind: String = Self::get(row, "kind")?;
        let created_at: String = Self::get(row, "created_at")?;

        Ok(InAppNotification {
            id: Self::get(row, "id")?,
            user_id: UserId(Self::get(row, "user_id")?),
            title: Self::get(row, "title")?,
            message: Self::get(row, "message")?,
            kind: InAppKind::from_str(&kind).map_err(StoreError::QueryFailed)?,
            related_id: Self::get(row, "related_id")?,
            created_at: Self::parse_ts("created_at", &created_at)?,
        })
    }

    /// Rewrite the expiry index rows for one user inside `tx`.
    async fn reindex_expiry(
        tx: &mut Transaction<'_, Sqlite>,
        user: &User,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM assignment_expiry WHERE user_id = ?1")
            .bind(user.id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Storage(format!("expiry index clear: {e}")))?;

        for assignment in &user.assignments {
            let Some(expires_at) = assignment.expires_at else {
                continue;
            };
            sqlx::query(
                "INSERT INTO assignment_expiry (user_id, resource_ref, expires_at_us) VALUES (?1, ?2, ?3)",
            )
            .bind(user.id.as_str())
            .bind(&assignment.resource_ref)
            .bind(expires_at.timestamp_micros())
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Storage(format!("expiry index insert: {e}")))?;
        }
        Ok(())
    }

    fn to_json(what: &str, grants: &[Assignment]) -> Result<String, StoreError> {
        serde_json::to_string(grants).map_err(|e| StoreError::Storage(format!("{what} serialization: {e}")))
    }

    /// Insert or update the `users` row, then rebuild its expiry index.
    ///
    /// An update that matches no row rolls back and returns `false`.
    async fn write_user(&self, user: &User, insert: bool) -> Result<bool, StoreError> {
        let assignments_json = Self::to_json("Assignments", &user.assignments)?;
        let lapsed_json = Self::to_json("Lapsed grants", &user.lapsed)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        let result = if insert {
            sqlx::query(
                "INSERT INTO users (id, email, name, assignments, lapsed, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(user.id.as_str())
            .bind(&user.email)
            .bind(&user.name)
            .bind(&assignments_json)
            .bind(&lapsed_json)
            .bind(Self::ts(&user.created_at))
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query("UPDATE users SET email = ?2, name = ?3, assignments = ?4, lapsed = ?5 WHERE id = ?1")
                .bind(user.id.as_str())
                .bind(&user.email)
                .bind(&user.name)
                .bind(&assignments_json)
                .bind(&lapsed_json)
                .execute(&mut *tx)
                .await
        };

        let result = result.map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(format!("user {}", user.id))
            }
            other => StoreError::Storage(format!("user write failed: {other}")),
        })?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| StoreError::Storage(format!("ROLLBACK failed: {e}")))?;
            debug!(user_id = %user.id, "User gone, save skipped");
            return Ok(false);
        }

        Self::reindex_expiry(&mut tx, user).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        debug!(user_id = %user.id, assignments = user.assignments.len(), "Saved user");
        Ok(true)
    }

    async fn users_where(&self, filter: &str, binds: &[i64]) -> Result<Vec<User>, StoreError> {
        let sql = format!(
            "SELECT * FROM users WHERE id IN (SELECT user_id FROM assignment_expiry WHERE {filter}) ORDER BY id"
        );
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("expiry lookup: {e}")))?;
        rows.iter().map(Self::row_to_user).collect()
    }
}

/// Candidate rows are selected at microsecond resolution with inclusive
/// bounds, then filtered exactly against the aggregate.
fn keep_exact(users: Vec<User>, pred: impl Fn(DateTime<Utc>) -> bool) -> Vec<User> {
    users
        .into_iter()
        .filter(|u| u.assignments.iter().any(|a| a.expires_at.is_some_and(&pred)))
        .collect()
}

#[async_trait]
impl UserDirectory for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_user(&self, user: User) -> Result<(), StoreError> {
        self.write_user(&user, true).await.map(|_| ())
    }

    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET user: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_user(r)?)),
            None => Ok(None),
        }
    }

    async fn save_user(&self, user: &User) -> Result<bool, StoreError> {
        self.write_user(user, false).await
    }

    async fn delete_user(&self, id: &UserId) -> Result<bool, StoreError> {
        // assignment_expiry rows go with the user via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE user failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("LIST users: {e}")))?;
        rows.iter().map(Self::row_to_user).collect()
    }

    async fn find_users_with_assignments_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError> {
        let candidates = self
            .users_where(
                "expires_at_us >= ?1 AND expires_at_us <= ?2",
                &[start.timestamp_micros(), end.timestamp_micros()],
            )
            .await?;
        Ok(keep_exact(candidates, |expires| expires > start && expires <= end))
    }

    async fn find_users_with_expired_assignments(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError> {
        let candidates = self
            .users_where("expires_at_us <= ?1", &[as_of.timestamp_micros()])
            .await?;
        Ok(keep_exact(candidates, |expires| expires <= as_of))
    }

    async fn find_users_with_lapsed_grants(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users WHERE lapsed != '[]' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("lapsed lookup: {e}")))?;
        rows.iter().map(Self::row_to_user).collect()
    }
}

#[async_trait]
impl ResourceCatalog for SqliteStore {
    async fn find_dashboard(&self, id: &str) -> Result<Option<Dashboard>, StoreError> {
        let row = sqlx::query("SELECT * FROM dashboards WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET dashboard: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Dashboard {
                id: Self::get(r, "id")?,
                name: Self::get(r, "name")?,
                url: Self::get(r, "url")?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert_dashboard(&self, dashboard: Dashboard) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO dashboards (id, name, url) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, url = excluded.url
            "#,
        )
        .bind(&dashboard.id)
        .bind(&dashboard.name)
        .bind(&dashboard.url)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("dashboard upsert failed: {e}")))?;
        Ok(())
    }

    async fn delete_dashboard(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM dashboards WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE dashboard failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_dashboards(&self) -> Result<Vec<Dashboard>, StoreError> {
        let rows = sqlx::query("SELECT * FROM dashboards ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("LIST dashboards: {e}")))?;

        rows.iter()
            .map(|r| {
                Ok(Dashboard {
                    id: Self::get(r, "id")?,
                    name: Self::get(r, "name")?,
                    url: Self::get(r, "url")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl NotificationLog for SqliteStore {
    async fn exists(
        &self,
        user_id: &UserId,
        class: ThresholdClass,
        day: NaiveDate,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM notification_records WHERE user_id = ?1 AND threshold_class = ?2 AND sent_date = ?3",
        )
        .bind(user_id.as_str())
        .bind(class.as_str())
        .bind(day.format("%Y-%m-%d").to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("record lookup: {e}")))?;

        let cnt: i64 = Self::get(&row, "cnt")?;
        Ok(cnt > 0)
    }

    async fn insert_if_absent(&self, record: NotificationRecord) -> Result<bool, StoreError> {
        let refs_json = serde_json::to_string(&record.resource_refs)
            .map_err(|e| StoreError::Storage(format!("resource_refs serialization: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO notification_records (user_id, threshold_class, sent_date, resource_refs, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, threshold_class, sent_date) DO NOTHING
            "#,
        )
        .bind(record.user_id.as_str())
        .bind(record.threshold_class.as_str())
        .bind(record.sent_date.format("%Y-%m-%d").to_string())
        .bind(&refs_json)
        .bind(Self::ts(&record.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("record insert failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<NotificationRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM notification_records WHERE user_id = ?1 ORDER BY sent_date DESC, threshold_class",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("LIST records: {e}")))?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn delete_for_user(&self, user_id: &UserId) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM notification_records WHERE user_id = ?1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE records failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl InAppNotifier for SqliteStore {
    async fn create(&self, notification: InAppNotification) -> Result<String, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO in_app_notifications (id, user_id, title, message, kind, related_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&notification.id)
        .bind(notification.user_id.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .bind(&notification.related_id)
        .bind(Self::ts(&notification.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("in-app insert failed: {e}")))?;

        Ok(notification.id)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<InAppNotification>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM in_app_notifications WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("LIST in-app: {e}")))?;
        rows.iter().map(Self::row_to_in_app).collect()
    }

    async fn delete_for_user(&self, user_id: &UserId) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM in_app_notifications WHERE user_id = ?1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE in-app failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }
}
