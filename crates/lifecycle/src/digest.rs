//! Builds the data payload shared by every email template.

use dashkeep_core::assignment::Assignment;
use dashkeep_core::directory::{ResourceCatalog, User};
use dashkeep_core::error::StoreError;
use serde_json::{Value, json};

/// One line per assignment, enriched with the catalog entry.
///
/// A dashboard that has left the catalog is still listed under its id.
pub(crate) async fn dashboard_lines(
    catalog: &dyn ResourceCatalog,
    assignments: &[Assignment],
) -> Result<Vec<Value>, StoreError> {
    let mut lines = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let dashboard = catalog.find_dashboard(&assignment.resource_ref).await?;
        let (name, url) = match dashboard {
            Some(d) => (d.name, d.url),
            None => (assignment.resource_ref.clone(), String::new()),
        };
        lines.push(json!({
            "id": assignment.resource_ref,
            "name": name,
            "url": url,
            "expires_at": assignment.expires_at.map(|t| t.to_rfc3339()),
        }));
    }
    Ok(lines)
}

pub(crate) fn payload(user: &User, app_url: &str, lines: Vec<Value>) -> Value {
    json!({
        "name": user.name,
        "app_url": app_url,
        "dashboards": lines,
    })
}

/// Human-readable list of dashboard names for in-app messages.
pub(crate) fn names(lines: &[Value]) -> String {
    lines
        .iter()
        .filter_map(|l| l["name"].as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
