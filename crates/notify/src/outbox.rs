//! Outbox transport — keeps every message in memory.
//!
//! Backs tests and dry runs: callers can inspect what would have been sent
//! and switch the transport into a failing mode to exercise the
//! best-effort paths.

use async_trait::async_trait;
use dashkeep_core::error::NotifyError;
use dashkeep_core::notification::{EmailDispatcher, TemplateKind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::templates::{self, RenderedEmail};

/// One captured message.
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub kind: TemplateKind,
    pub recipient: String,
    pub data: serde_json::Value,
    pub rendered: RenderedEmail,
}

impl SentEmail {
    /// Dashboard ids listed in the message, in order.
    pub fn dashboard_ids(&self) -> Vec<String> {
        self.data["dashboards"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|d| d["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct OutboxMailer {
    sent: Mutex<Vec<SentEmail>>,
    failing: AtomicBool,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail with `DeliveryFailed`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn sent_of(&self, kind: TemplateKind) -> Vec<SentEmail> {
        self.sent().into_iter().filter(|e| e.kind == kind).collect()
    }
}

#[async_trait]
impl EmailDispatcher for OutboxMailer {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(
        &self,
        kind: TemplateKind,
        recipient: &str,
        data: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::DeliveryFailed {
                recipient: recipient.to_string(),
                reason: "outbox set to fail".into(),
            });
        }

        let rendered = templates::render(kind, data)?;
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError::DeliveryFailed {
                recipient: recipient.to_string(),
                reason: "outbox lock poisoned".into(),
            })?;
        sent.push(SentEmail {
            kind,
            recipient: recipient.to_string(),
            data: data.clone(),
            rendered,
        });
        Ok(())
    }
}
