//! Email transports for Dashkeep.
//!
//! Every transport implements [`EmailDispatcher`] and renders its message
//! through [`templates::render`], so the same data payload reads the same
//! whichever transport carries it.
//!
//! Available transports:
//! - **log** — writes the rendered message to the trace log (default)
//! - **http** — POSTs a signed JSON envelope to a mail relay
//! - **outbox** — captures messages in memory (tests, dry runs)

pub mod http;
pub mod log;
pub mod outbox;
pub mod templates;

pub use http::{HttpRelayConfig, HttpRelayMailer};
pub use log::LogMailer;
pub use outbox::{OutboxMailer, SentEmail};
pub use templates::{RenderedEmail, render};

use dashkeep_config::EmailConfig;
use dashkeep_core::error::NotifyError;
use dashkeep_core::notification::EmailDispatcher;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the transport selected by `[email]`.
pub fn from_config(config: &EmailConfig) -> Result<Arc<dyn EmailDispatcher>, NotifyError> {
    let mailer: Arc<dyn EmailDispatcher> = match config.transport.as_str() {
        "log" => Arc::new(LogMailer::new(&config.from_address)),
        "http" => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| NotifyError::NotConfigured("email.endpoint is required for the http transport".into()))?;
            Arc::new(HttpRelayMailer::new(HttpRelayConfig {
                endpoint,
                api_key: config.api_key.clone(),
                signing_secret: config.signing_secret.clone(),
                from_address: config.from_address.clone(),
                timeout: Duration::from_secs(config.timeout_secs),
            })?)
        }
        other => {
            return Err(NotifyError::NotConfigured(format!(
                "unknown email transport: {other}"
            )));
        }
    };
    info!(transport = mailer.name(), "Email transport ready");
    Ok(mailer)
}
