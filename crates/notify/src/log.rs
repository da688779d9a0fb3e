//! Log transport — renders the message and writes it to the trace log.
//!
//! The default transport: nothing leaves the process, so a fresh install
//! can exercise the whole lifecycle without an email relay.

use async_trait::async_trait;
use dashkeep_core::error::NotifyError;
use dashkeep_core::notification::{EmailDispatcher, TemplateKind};
use tracing::info;

use crate::templates;

pub struct LogMailer {
    from_address: String,
}

impl LogMailer {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
        }
    }
}

#[async_trait]
impl EmailDispatcher for LogMailer {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        kind: TemplateKind,
        recipient: &str,
        data: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        let email = templates::render(kind, data)?;
        info!(
            template = kind.as_str(),
            from = %self.from_address,
            to = %recipient,
            subject = %email.subject,
            "Email (log transport)\n{}",
            email.text
        );
        Ok(())
    }
}
