//! Error types for the Dashkeep domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Storage and notification delivery each get their own bounded-context enum.

use thiserror::Error;

/// The top-level error type for all Dashkeep operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced user or dashboard does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Malformed input, e.g. an assignment without a resource reference.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A best-effort dependency (email, in-app log) failed.
    ///
    /// Callers of assign/sweep/notify log and swallow this variant.
    #[error("Dependency unavailable: {0}")]
    TransientDependency(String),

    /// Storage became unavailable mid-run; the current sweep or notify run aborts.
    #[error("Fatal: {0}")]
    Fatal(String),

    // --- Storage errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Delivery errors ---
    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn user_not_found(id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            kind: "User",
            id: id.to_string(),
        }
    }

    pub fn dashboard_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "Dashboard",
            id: id.into(),
        }
    }

    /// Whether the error is the caller's fault (bad id or bad input).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::Validation(_))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Email transport not configured: {0}")]
    NotConfigured(String),

    #[error("Delivery to {recipient} failed: {reason}")]
    DeliveryFailed { recipient: String, reason: String },

    #[error("Relay rejected message (status: {status_code}): {message}")]
    Rejected { status_code: u16, message: String },

    #[error("Template rendering failed: {0}")]
    Template(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_displays_kind_and_id() {
        let err = Error::user_not_found("u_42");
        assert_eq!(err.to_string(), "User not found: u_42");
        assert!(err.is_client_error());
    }

    #[test]
    fn store_error_wraps() {
        let err: Error = StoreError::Storage("disk full".into()).into();
        assert!(err.to_string().contains("disk full"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn delivery_error_displays_recipient() {
        let err = Error::Notify(NotifyError::DeliveryFailed {
            recipient: "ada@example.com".into(),
            reason: "connection refused".into(),
        });
        assert!(err.to_string().contains("ada@example.com"));
        assert!(err.to_string().contains("connection refused"));
    }
}
