//! `dashkeep tasks` — Show the periodic task schedule.

use chrono::Utc;
use dashkeep_config::AppConfig;
use dashkeep_workflow::{CronExpr, tasks_from_config};

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc::now();

    println!("⏰ Periodic tasks");
    println!("================");
    for task in tasks_from_config(&config) {
        let next = match CronExpr::parse(&task.schedule) {
            Ok(expr) if task.enabled => expr
                .next_after(&now)
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "never".into()),
            Ok(_) => "paused".into(),
            Err(e) => format!("invalid schedule: {e}"),
        };
        println!("  {:<18} {:<14} {:<12} next: {next}", task.id, task.schedule, task.action.to_string());
    }

    Ok(())
}
