//! Workflow engine — the named periodic tasks that drive the lifecycle.
//!
//! Every background job is an explicit [`PeriodicTask`]: a cron schedule
//! plus a [`TaskAction`] (sweep, or evaluate one threshold class). The
//! engine only decides *when* a task is due; [`TaskRunner`] decides *what*
//! running it means.
//!
//! Time comes from an injected [`Clock`], and [`WorkflowEngine::tick`] can
//! be driven directly, so tests advance a manual clock instead of sleeping.

pub mod cron;
pub mod runner;

pub use cron::CronExpr;
pub use runner::{TaskResult, TaskRunner};

use chrono::{DateTime, Duration, DurationRound, Utc};
use dashkeep_config::AppConfig;
use dashkeep_core::clock::Clock;
use dashkeep_core::notification::ThresholdClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};

/// A scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicTask {
    /// Unique task ID
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Cron expression (e.g., "30 * * * *" = every hour at :30)
    pub schedule: String,

    /// Whether this task is active
    pub enabled: bool,

    pub action: TaskAction,

    /// When this task last fired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,

    /// When this task should next fire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,

    /// Outcome of the most recent execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<TaskResult>,
}

impl PeriodicTask {
    pub fn new(id: impl Into<String>, name: impl Into<String>, schedule: impl Into<String>, action: TaskAction) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            schedule: schedule.into(),
            enabled: true,
            action,
            last_run: None,
            next_run: None,
            last_result: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// The action to perform when a task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskAction {
    /// Purge expired assignments
    Sweep,
    /// Evaluate one threshold class and send due notices
    Notify { class: ThresholdClass },
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskAction::Sweep => f.write_str("sweep"),
            TaskAction::Notify { class } => write!(f, "notify:{class}"),
        }
    }
}

/// A task that came due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredTask {
    pub task_id: String,
    pub action: TaskAction,
    pub fired_at: DateTime<Utc>,
}

/// The standard task list for a configuration.
///
/// Disabled sections still produce their tasks, marked disabled, so they
/// show up in listings.
pub fn tasks_from_config(config: &AppConfig) -> Vec<PeriodicTask> {
    let sweep = PeriodicTask::new("sweep", "Expired assignment sweep", &config.sweeper.schedule, TaskAction::Sweep);

    let r = &config.reminders;
    let notify = |id: &str, name: &str, schedule: &str, class: ThresholdClass| {
        PeriodicTask::new(id, name, schedule, TaskAction::Notify { class })
    };
    let mut reminders = vec![
        notify("reminder-7d", "7-day expiry reminder", r.reminder_schedule.as_str(), ThresholdClass::Reminder7d),
        notify("urgent-24h-daily", "24-hour expiry warning", r.urgent_daily_schedule.as_str(), ThresholdClass::Urgent24h),
        notify("urgent-24h-hourly", "24-hour expiry warning (hourly check)", r.urgent_hourly_schedule.as_str(), ThresholdClass::Urgent24h),
        notify("expired", "Access expired notice", r.expired_schedule.as_str(), ThresholdClass::Expired),
    ];

    let sweep = if config.sweeper.enabled { sweep } else { sweep.disabled() };
    if !r.enabled {
        reminders = reminders.into_iter().map(PeriodicTask::disabled).collect();
    }

    std::iter::once(sweep).chain(reminders).collect()
}

fn minute_of(dt: &DateTime<Utc>) -> DateTime<Utc> {
    dt.duration_trunc(Duration::minutes(1)).unwrap_or(*dt)
}

/// The workflow engine manages periodic tasks.
pub struct WorkflowEngine {
    tasks: Arc<RwLock<BTreeMap<String, PeriodicTask>>>,
    clock: Arc<dyn Clock>,
    tick_interval: std::time::Duration,
}

impl WorkflowEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(BTreeMap::new())),
            clock,
            tick_interval: std::time::Duration::from_secs(30),
        }
    }

    /// How often the background loop checks for due tasks.
    pub fn with_tick_interval(mut self, interval: std::time::Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Add a task, replacing any task with the same id.
    pub async fn add_task(&self, mut task: PeriodicTask) -> Result<(), String> {
        // Validate cron expression at registration time
        let expr = CronExpr::parse(&task.schedule)?;
        task.next_run = expr.next_after(&self.clock.now());
        info!(task_id = %task.id, name = %task.name, schedule = %task.schedule, "Adding periodic task");
        self.tasks.write().await.insert(task.id.clone(), task);
        Ok(())
    }

    /// Register many tasks; returns one message per rejected task.
    pub async fn load_tasks(&self, tasks: Vec<PeriodicTask>) -> Vec<String> {
        let mut errors = Vec::new();
        for task in tasks {
            let id = task.id.clone();
            if let Err(e) = self.add_task(task).await {
                errors.push(format!("Task '{id}': {e}"));
            }
        }
        errors
    }

    pub async fn remove_task(&self, id: &str) -> bool {
        self.tasks.write().await.remove(id).is_some()
    }

    pub async fn list_tasks(&self) -> Vec<PeriodicTask> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn get_task(&self, id: &str) -> Option<PeriodicTask> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn pause_task(&self, id: &str) -> bool {
        self.set_enabled(id, false).await
    }

    pub async fn resume_task(&self, id: &str) -> bool {
        self.set_enabled(id, true).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        if let Some(task) = self.tasks.write().await.get_mut(id) {
            task.enabled = enabled;
            true
        } else {
            false
        }
    }

    /// Store the outcome of an execution on its task.
    pub async fn record_result(&self, result: TaskResult) {
        if let Some(task) = self.tasks.write().await.get_mut(&result.task_id) {
            task.last_result = Some(result);
        }
    }

    /// Collect every enabled task due at `now`.
    ///
    /// A task fires at most once per matching minute, however often the
    /// engine ticks within it.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<TriggeredTask> {
        let minute = minute_of(&now);
        let mut due = Vec::new();
        let mut tasks = self.tasks.write().await;

        for task in tasks.values_mut() {
            if !task.enabled {
                continue;
            }
            let expr = match CronExpr::parse(&task.schedule) {
                Ok(e) => e,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Invalid cron expression, skipping");
                    continue;
                }
            };
            if !expr.matches(&minute) {
                continue;
            }
            // Don't fire twice in the same minute
            if task.last_run.is_some_and(|last| minute_of(&last) == minute) {
                continue;
            }

            task.last_run = Some(now);
            task.next_run = expr.next_after(&now);
            info!(task_id = %task.id, action = %task.action, "Periodic task triggered");
            due.push(TriggeredTask {
                task_id: task.id.clone(),
                action: task.action,
                fired_at: now,
            });
        }
        due
    }

    /// Start the background loop.
    ///
    /// Due tasks are sent on the returned receiver; the loop ends when
    /// `shutdown` flips to true or the receiver is dropped.
    pub fn start(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<TriggeredTask>, tokio::task::JoinHandle<()>) {
        let engine = Arc::clone(self);
        let (tx, rx) = mpsc::channel::<TriggeredTask>(64);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Workflow engine stopping");
                            return;
                        }
                        continue;
                    }
                }

                let now = engine.clock.now();
                for triggered in engine.tick(now).await {
                    if tx.send(triggered).await.is_err() {
                        debug!("Triggered task receiver dropped, stopping loop");
                        return;
                    }
                }
            }
        });

        (rx, handle)
    }
}
