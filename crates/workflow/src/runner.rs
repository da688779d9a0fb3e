//! Executes triggered tasks against the lifecycle services.

use chrono::{DateTime, Utc};
use dashkeep_core::clock::Clock;
use dashkeep_lifecycle::{Lifecycle, SweepOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::{TaskAction, TriggeredTask, WorkflowEngine};

/// Outcome of one task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub summary: String,
    pub finished_at: DateTime<Utc>,
}

pub struct TaskRunner {
    lifecycle: Lifecycle,
    engine: Arc<WorkflowEngine>,
    clock: Arc<dyn Clock>,
}

impl TaskRunner {
    pub fn new(lifecycle: Lifecycle, engine: Arc<WorkflowEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            lifecycle,
            engine,
            clock,
        }
    }

    /// Run one task and record its outcome on the engine.
    ///
    /// Failures are logged and reported in the result; they never stop the
    /// engine, and the next firing tries again.
    pub async fn execute(&self, task: &TriggeredTask) -> TaskResult {
        let outcome: Result<String, String> = match task.action {
            TaskAction::Sweep => match self.lifecycle.sweeper.run().await {
                Ok(SweepOutcome::Completed(report)) => Ok(report.message),
                Ok(SweepOutcome::Skipped) => Ok("Skipped: a sweep was already running".into()),
                Err(e) => Err(e.to_string()),
            },
            TaskAction::Notify { class } => match self.lifecycle.scheduler.run_class(class).await {
                Ok(r) => Ok(format!(
                    "{class}: {} considered, {} notified, {} suppressed, {} failed",
                    r.users_considered, r.notified, r.suppressed, r.failed
                )),
                Err(e) => Err(e.to_string()),
            },
        };

        let result = match outcome {
            Ok(summary) => {
                info!(task_id = %task.task_id, %summary, "Periodic task finished");
                TaskResult {
                    task_id: task.task_id.clone(),
                    success: true,
                    summary,
                    finished_at: self.clock.now(),
                }
            }
            Err(e) => {
                error!(task_id = %task.task_id, action = %task.action, "Periodic task failed: {e}");
                TaskResult {
                    task_id: task.task_id.clone(),
                    success: false,
                    summary: e,
                    finished_at: self.clock.now(),
                }
            }
        };

        self.engine.record_result(result.clone()).await;
        result
    }

    /// Consume triggered tasks until the sender side closes.
    ///
    /// Each task runs on its own tokio task so a long sweep does not hold
    /// back a notification check.
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::Receiver<TriggeredTask>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let runner = Arc::clone(&self);
                tokio::spawn(async move {
                    runner.execute(&task).await;
                });
            }
        })
    }
}
