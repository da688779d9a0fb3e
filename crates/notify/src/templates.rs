//! Plain-text message templates.
//!
//! Every template takes the same data shape:
//!
//! ```json
//! {
//!   "name": "Ada",
//!   "app_url": "https://dash.example.com",
//!   "dashboards": [
//!     { "id": "sales", "name": "Sales", "url": "/d/sales", "expires_at": "2026-01-01T00:00:00Z" }
//!   ]
//! }
//! ```
//!
//! `expires_at` is omitted (or null) for permanent grants.

use dashkeep_core::error::NotifyError;
use dashkeep_core::notification::TemplateKind;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Write;

/// A rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct TemplateData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    app_url: String,
    dashboards: Vec<DashboardLine>,
}

#[derive(Debug, Deserialize)]
struct DashboardLine {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    expires_at: Option<String>,
}

impl DashboardLine {
    fn link(&self, app_url: &str) -> String {
        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            self.url.clone()
        } else if self.url.is_empty() {
            format!("{}/dashboards/{}", app_url.trim_end_matches('/'), self.id)
        } else {
            format!("{}{}", app_url.trim_end_matches('/'), self.url)
        }
    }
}

/// Render `kind` against `data`.
pub fn render(kind: TemplateKind, data: &serde_json::Value) -> Result<RenderedEmail, NotifyError> {
    let data: TemplateData = serde_json::from_value(data.clone())
        .map_err(|e| NotifyError::Template(format!("{}: {e}", kind.as_str())))?;

    if data.dashboards.is_empty() {
        return Err(NotifyError::Template(format!(
            "{}: no dashboards to list",
            kind.as_str()
        )));
    }

    let count = data.dashboards.len();
    let plural = if count == 1 { "" } else { "s" };
    let (subject, intro) = match kind {
        TemplateKind::AssignmentGranted => (
            format!("You have been given access to {count} dashboard{plural}"),
            "The following dashboards are now available to you:",
        ),
        TemplateKind::ExpiryReminder => (
            format!("Dashboard access expiring within 7 days ({count})"),
            "Your access to these dashboards expires within the next 7 days:",
        ),
        TemplateKind::ExpiryUrgent => (
            format!("Dashboard access expires within 24 hours ({count})"),
            "Your access to these dashboards expires within the next 24 hours:",
        ),
        TemplateKind::AccessExpired => (
            format!("Dashboard access expired ({count})"),
            "Your access to these dashboards has expired:",
        ),
    };

    let greeting = if data.name.is_empty() {
        "Hello,".to_string()
    } else {
        format!("Hello {},", data.name)
    };

    let mut text = format!("{greeting}\n\n{intro}\n\n");
    for line in &data.dashboards {
        let _ = write!(text, "  - {} <{}>", line.name, line.link(&data.app_url));
        match (&line.expires_at, kind) {
            (Some(at), TemplateKind::AccessExpired) => {
                let _ = write!(text, " (expired {at})");
            }
            (Some(at), _) => {
                let _ = write!(text, " (expires {at})");
            }
            (None, _) => {}
        }
        text.push('\n');
    }

    if kind == TemplateKind::AccessExpired {
        text.push_str("\nContact your administrator if you still need access.\n");
    }

    Ok(RenderedEmail { subject, text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "name": "Ada",
            "app_url": "https://dash.example.com/",
            "dashboards": [
                { "id": "sales", "name": "Sales", "url": "/d/sales", "expires_at": "2026-01-03T00:00:00Z" },
                { "id": "ops", "name": "Ops", "url": "https://ops.example.com/board" }
            ]
        })
    }

    #[test]
    fn granted_lists_every_dashboard() {
        let email = render(TemplateKind::AssignmentGranted, &sample()).unwrap();
        assert_eq!(email.subject, "You have been given access to 2 dashboards");
        assert!(email.text.starts_with("Hello Ada,"));
        assert!(email.text.contains("Sales <https://dash.example.com/d/sales> (expires 2026-01-03T00:00:00Z)"));
        assert!(email.text.contains("Ops <https://ops.example.com/board>\n"));
    }

    #[test]
    fn expired_wording() {
        let data = json!({
            "dashboards": [{ "id": "sales", "name": "Sales", "expires_at": "yesterday" }]
        });
        let email = render(TemplateKind::AccessExpired, &data).unwrap();
        assert_eq!(email.subject, "Dashboard access expired (1)");
        assert!(email.text.starts_with("Hello,"));
        assert!(email.text.contains("(expired yesterday)"));
        assert!(email.text.contains("/dashboards/sales"));
    }

    #[test]
    fn urgent_subject() {
        let email = render(TemplateKind::ExpiryUrgent, &sample()).unwrap();
        assert!(email.subject.contains("24 hours"));
    }

    #[test]
    fn missing_dashboards_is_template_error() {
        let result = render(TemplateKind::ExpiryReminder, &json!({ "name": "Ada" }));
        assert!(matches!(result, Err(NotifyError::Template(_))));

        let result = render(TemplateKind::ExpiryReminder, &json!({ "dashboards": [] }));
        assert!(matches!(result, Err(NotifyError::Template(_))));
    }
}
