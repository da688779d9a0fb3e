//! Storage backends for Dashkeep.
//!
//! Each backend implements every persistence trait from `dashkeep-core`
//! ([`UserDirectory`], [`ResourceCatalog`], [`NotificationLog`],
//! [`InAppNotifier`]), so a single instance is shared behind four
//! trait objects.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use dashkeep_config::StorageConfig;
use dashkeep_core::directory::{ResourceCatalog, UserDirectory};
use dashkeep_core::error::StoreError;
use dashkeep_core::notification::{InAppNotifier, NotificationLog};
use std::sync::Arc;

/// The storage handles a service graph needs.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserDirectory>,
    pub catalog: Arc<dyn ResourceCatalog>,
    pub log: Arc<dyn NotificationLog>,
    pub in_app: Arc<dyn InAppNotifier>,
}

impl Stores {
    /// Share one backend across all four roles.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: UserDirectory + ResourceCatalog + NotificationLog + InAppNotifier + 'static,
    {
        Self {
            users: backend.clone(),
            catalog: backend.clone(),
            log: backend.clone(),
            in_app: backend,
        }
    }

    /// Ephemeral stores; nothing survives the process.
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryStore::new()))
    }

    /// Build the backend selected by `[storage]`.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StoreError> {
        match config.backend.as_str() {
            "memory" => {
                tracing::warn!("Using in-memory storage; data is lost on exit");
                Ok(Self::in_memory())
            }
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                ensure_parent_dir(&config.database_url)?;
                let store = SqliteStore::new(&config.database_url).await?;
                Ok(Self::from_backend(Arc::new(store)))
            }
            other => Err(StoreError::Storage(format!(
                "Unsupported storage backend: {other}"
            ))),
        }
    }
}

#[cfg(feature = "sqlite")]
fn ensure_parent_dir(url: &str) -> Result<(), StoreError> {
    if url.contains(":memory:") {
        return Ok(());
    }
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = std::path::Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Storage(format!("Cannot create {}: {e}", parent.display()))
        })?;
    }
    Ok(())
}
