//! `dashkeep config` — Configuration management commands.

use std::path::Path;

use dashkeep_config::AppConfig;

pub async fn validate(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating {}...", config_path.display());

    match AppConfig::load_with_env(config_path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if !config.admin_auth_enabled() {
                warnings.push("No admin tokens set, the API accepts unauthenticated requests");
            }
            if config.gateway.host == "0.0.0.0" && !config.admin_auth_enabled() {
                warnings.push("Gateway bound to 0.0.0.0 without admin tokens");
            }
            if config.storage.backend == "memory" {
                warnings.push("In-memory storage loses all assignments on restart");
            }
            if config.email.transport == "log" {
                warnings.push("Email transport is \"log\", users will not receive mail");
            }

            for (name, schedule) in [
                ("sweeper.schedule", &config.sweeper.schedule),
                ("reminders.reminder_schedule", &config.reminders.reminder_schedule),
                ("reminders.urgent_daily_schedule", &config.reminders.urgent_daily_schedule),
                ("reminders.urgent_hourly_schedule", &config.reminders.urgent_hourly_schedule),
                ("reminders.expired_schedule", &config.reminders.expired_schedule),
            ] {
                if let Err(e) = dashkeep_workflow::CronExpr::parse(schedule) {
                    println!("   ❌ {name}: {e}");
                    return Err(format!("{name}: {e}").into());
                }
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Storage:   {} ({})", config.storage.backend, config.storage.database_url);
            println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
            println!("   Email:     {}", config.email.transport);
            println!("   Sweeper:   {} ({})", on_off(config.sweeper.enabled), config.sweeper.schedule);
            println!("   Reminders: {}", on_off(config.reminders.enabled));
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_with_env(config_path)
        .map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path.display());
    Ok(())
}

pub(crate) fn on_off(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}
