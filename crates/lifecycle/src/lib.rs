//! The assignment lifecycle — the heart of Dashkeep.
//!
//! A grant moves through three stages:
//!
//! 1. **Assign**: an administrator grants dashboards, optionally with an
//!    expiry ([`AssignmentService`])
//! 2. **Remind**: as the expiry approaches, the [`ThresholdScheduler`]
//!    emails a 7-day reminder and a 24-hour warning, deduplicated per day
//!    by the [`NotificationGate`]
//! 3. **Expire**: the [`ExpirationSweeper`] removes lapsed grants, and the
//!    scheduler's `expired` class tells the user
//!
//! Every service takes its collaborators as trait objects and reads time
//! from an injected [`Clock`], so the whole lifecycle runs against
//! in-memory stores and a manual clock in tests.

pub mod assignments;
mod digest;
pub mod gate;
pub mod scheduler;
pub mod sweeper;

pub use assignments::{AssignOutcome, AssignmentService, ExpiredGroup, UserRemoval};
pub use gate::NotificationGate;
pub use scheduler::{ThresholdRunReport, ThresholdScheduler, qualifies};
pub use sweeper::{ExpirationSweeper, SweepOutcome, SweepReport, SweepStats};

use dashkeep_config::AppConfig;
use dashkeep_core::clock::Clock;
use dashkeep_core::event::EventBus;
use dashkeep_core::notification::EmailDispatcher;
use dashkeep_store::Stores;
use std::sync::Arc;
use std::time::Duration;

/// All lifecycle services wired to one set of stores.
#[derive(Clone)]
pub struct Lifecycle {
    pub assignments: Arc<AssignmentService>,
    pub sweeper: Arc<ExpirationSweeper>,
    pub scheduler: Arc<ThresholdScheduler>,
    pub gate: Arc<NotificationGate>,
}

impl Lifecycle {
    pub fn new(
        stores: &Stores,
        mailer: Arc<dyn EmailDispatcher>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
        config: &AppConfig,
    ) -> Self {
        let gate = Arc::new(NotificationGate::new(stores.log.clone()));

        let assignments = AssignmentService::new(stores, mailer.clone(), clock.clone(), event_bus.clone())
            .with_app_url(&config.email.app_url);

        let sweeper = ExpirationSweeper::new(stores.users.clone(), clock.clone(), event_bus.clone())
            .with_run_timeout(Duration::from_secs(config.sweeper.run_timeout_secs));

        let scheduler = ThresholdScheduler::new(
            stores.users.clone(),
            stores.catalog.clone(),
            stores.in_app.clone(),
            mailer,
            gate.clone(),
            clock,
            event_bus,
        )
        .with_app_url(&config.email.app_url)
        .with_run_timeout(Duration::from_secs(config.reminders.run_timeout_secs));

        Self {
            assignments: Arc::new(assignments),
            sweeper: Arc::new(sweeper),
            scheduler: Arc::new(scheduler),
            gate,
        }
    }
}
