//! Configuration loading, validation, and management for Dashkeep.
//!
//! Loads configuration from `~/.dashkeep/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.dashkeep/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where users, dashboards and notification records live
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Admin API authentication
    #[serde(default)]
    pub admin: AdminConfig,

    /// Outbound email transport
    #[serde(default)]
    pub email: EmailConfig,

    /// Expiration sweeper schedule and limits
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Expiry reminder schedules
    #[serde(default)]
    pub reminders: ReminderConfig,

    /// Log output format
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}
fn default_database_url() -> String {
    format!(
        "sqlite://{}",
        AppConfig::config_dir().join("dashkeep.db").display()
    )
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            database_url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8640
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Static bearer tokens accepted by the admin API. Empty = open API.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub tokens: Vec<String>,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("tokens", &format!("[{} REDACTED]", self.tokens.len()))
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// "log" (write emails to the log) or "http" (POST to a relay)
    #[serde(default = "default_email_transport")]
    pub transport: String,

    /// Relay endpoint for the "http" transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// HMAC-SHA256 secret used to sign relay payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,

    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Base URL used when a dashboard link is relative
    #[serde(default = "default_app_url")]
    pub app_url: String,

    #[serde(default = "default_email_timeout")]
    pub timeout_secs: u64,
}

fn default_email_transport() -> String {
    "log".into()
}
fn default_from_address() -> String {
    "Dashkeep <no-reply@dashkeep.local>".into()
}
fn default_app_url() -> String {
    "http://localhost:8640".into()
}
fn default_email_timeout() -> u64 {
    15
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: default_email_transport(),
            endpoint: None,
            api_key: None,
            signing_secret: None,
            from_address: default_from_address(),
            app_url: default_app_url(),
            timeout_secs: default_email_timeout(),
        }
    }
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("transport", &self.transport)
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("signing_secret", &redact(&self.signing_secret))
            .field("from_address", &self.from_address)
            .field("app_url", &self.app_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cron expression (5-field: minute hour dom month dow)
    #[serde(default = "default_sweep_schedule")]
    pub schedule: String,

    /// Upper bound on a single sweep
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

fn default_sweep_schedule() -> String {
    "0 * * * *".into()
}
fn default_run_timeout() -> u64 {
    300
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_sweep_schedule(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Daily 7-day reminder
    #[serde(default = "default_reminder_schedule")]
    pub reminder_schedule: String,

    /// Daily 24-hour check
    #[serde(default = "default_urgent_daily_schedule")]
    pub urgent_daily_schedule: String,

    /// Hourly 24-hour check
    #[serde(default = "default_urgent_hourly_schedule")]
    pub urgent_hourly_schedule: String,

    /// Daily post-expiry notice
    #[serde(default = "default_expired_schedule")]
    pub expired_schedule: String,

    /// Upper bound on one threshold-class run
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

fn default_reminder_schedule() -> String {
    "0 9 * * *".into()
}
fn default_urgent_daily_schedule() -> String {
    "0 10 * * *".into()
}
fn default_urgent_hourly_schedule() -> String {
    "30 * * * *".into()
}
fn default_expired_schedule() -> String {
    "0 11 * * *".into()
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reminder_schedule: default_reminder_schedule(),
            urgent_daily_schedule: default_urgent_daily_schedule(),
            urgent_hourly_schedule: default_urgent_hourly_schedule(),
            expired_schedule: default_expired_schedule(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from the default path (~/.dashkeep/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `DASHKEEP_DATABASE_URL`
    /// - `DASHKEEP_ADMIN_TOKEN` (appended to `admin.tokens`)
    /// - `DASHKEEP_EMAIL_ENDPOINT` (switches the transport to "http")
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load `path` (defaults when missing) and apply the environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DASHKEEP_DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Ok(token) = std::env::var("DASHKEEP_ADMIN_TOKEN")
            && !token.is_empty()
            && !self.admin.tokens.contains(&token)
        {
            self.admin.tokens.push(token);
        }
        if let Ok(endpoint) = std::env::var("DASHKEEP_EMAIL_ENDPOINT") {
            self.email.endpoint = Some(endpoint);
            self.email.transport = "http".into();
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".dashkeep")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.storage.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "storage.backend must be \"sqlite\" or \"memory\", got \"{other}\""
                )));
            }
        }

        match self.email.transport.as_str() {
            "log" => {}
            "http" => {
                if self.email.endpoint.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigError::ValidationError(
                        "email.endpoint is required when email.transport = \"http\"".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "email.transport must be \"log\" or \"http\", got \"{other}\""
                )));
            }
        }

        if self.sweeper.run_timeout_secs == 0 || self.reminders.run_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "run_timeout_secs must be > 0".into(),
            ));
        }

        for (field, schedule) in [
            ("sweeper.schedule", &self.sweeper.schedule),
            ("reminders.reminder_schedule", &self.reminders.reminder_schedule),
            ("reminders.urgent_daily_schedule", &self.reminders.urgent_daily_schedule),
            ("reminders.urgent_hourly_schedule", &self.reminders.urgent_hourly_schedule),
            ("reminders.expired_schedule", &self.reminders.expired_schedule),
        ] {
            // Field-level parsing happens when the workflow engine registers the task
            if schedule.split_whitespace().count() != 5 {
                return Err(ConfigError::ValidationError(format!(
                    "{field}: expected 5 fields (minute hour dom month dow), got \"{schedule}\""
                )));
            }
        }

        Ok(())
    }

    /// Whether the admin API requires a bearer token.
    pub fn admin_auth_enabled(&self) -> bool {
        !self.admin.tokens.is_empty()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
