//! # Dashkeep Core
//!
//! Domain types, collaborator traits, and error definitions for Dashkeep,
//! the dashboard-access service. This crate has **no storage or transport
//! dependencies** — it defines the model that every other crate implements
//! against.
//!
//! ## Layout
//!
//! - [`assignment`] — time-bounded dashboard grants embedded in a user
//! - [`directory`] — users, dashboards, and the traits that persist them
//! - [`notification`] — threshold classes, dedup records, email and in-app traits
//! - [`clock`] — injectable time source
//! - [`event`] — broadcast bus for domain events

pub mod assignment;
pub mod clock;
pub mod directory;
pub mod error;
pub mod event;
pub mod notification;

// Re-export key types at crate root for ergonomics
pub use assignment::{Assignment, AssignmentRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{Dashboard, ResourceCatalog, User, UserDirectory, UserId};
pub use error::{Error, NotifyError, Result, StoreError};
pub use event::{DomainEvent, EventBus};
pub use notification::{
    EmailDispatcher, InAppKind, InAppNotification, InAppNotifier, NotificationLog,
    NotificationRecord, TemplateKind, ThresholdClass,
};
