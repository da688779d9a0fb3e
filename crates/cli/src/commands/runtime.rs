//! Wiring shared by every command that touches storage.

use std::sync::Arc;

use dashkeep_config::AppConfig;
use dashkeep_core::clock::{Clock, SystemClock};
use dashkeep_core::event::EventBus;
use dashkeep_core::notification::EmailDispatcher;
use dashkeep_lifecycle::Lifecycle;
use dashkeep_store::Stores;
use tracing::info;

/// The configured stores, mailer and lifecycle services.
pub struct Runtime {
    pub config: AppConfig,
    pub stores: Stores,
    pub lifecycle: Lifecycle,
    pub clock: Arc<dyn Clock>,
    pub event_bus: Arc<EventBus>,
}

impl Runtime {
    pub async fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let stores = Stores::from_config(&config.storage)
            .await
            .map_err(|e| format!("Failed to open storage: {e}"))?;
        let mailer = dashkeep_notify::from_config(&config.email)
            .map_err(|e| format!("Failed to set up email: {e}"))?;

        info!(
            storage = %config.storage.backend,
            email = mailer.name(),
            "Runtime ready"
        );

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let event_bus = Arc::new(EventBus::default());
        let lifecycle = Lifecycle::new(&stores, mailer, clock.clone(), event_bus.clone(), &config);

        Ok(Self {
            config,
            stores,
            lifecycle,
            clock,
            event_bus,
        })
    }
}
