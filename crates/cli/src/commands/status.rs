//! `dashkeep status` — Show configuration and storage summary.

use std::path::Path;

use dashkeep_config::AppConfig;
use dashkeep_core::directory::{ResourceCatalog, UserDirectory};

use super::config_cmd::on_off;
use super::runtime::Runtime;

pub async fn run(config: AppConfig, config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("📊 Dashkeep Status");
    println!("==================");
    println!("  Config file:  {}", config_path.display());
    println!("  Storage:      {} ({})", config.storage.backend, config.storage.database_url);
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);
    println!("  Admin auth:   {}", on_off(config.admin_auth_enabled()));
    println!("  Email:        {}", config.email.transport);
    println!("  Sweeper:      {} ({})", on_off(config.sweeper.enabled), config.sweeper.schedule);
    println!("  Reminders:    {}", on_off(config.reminders.enabled));

    let runtime = Runtime::build(config).await?;
    let users = runtime.stores.users.list_users().await?;
    let assignments: usize = users.iter().map(|u| u.assignments.len()).sum();
    let dashboards = runtime.stores.catalog.list_dashboards().await?;
    let expired = runtime.lifecycle.sweeper.expired_count(None).await?;

    println!();
    println!("  Users:        {}", users.len());
    println!("  Dashboards:   {}", dashboards.len());
    println!("  Assignments:  {assignments}");
    println!("  Awaiting sweep: {expired}");

    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, using defaults. Run `dashkeep onboard` to create one");
    }

    Ok(())
}
