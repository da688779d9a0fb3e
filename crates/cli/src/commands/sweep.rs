//! `dashkeep sweep` — One-off expiration sweep.

use dashkeep_config::AppConfig;
use dashkeep_lifecycle::SweepOutcome;

use super::runtime::Runtime;

pub async fn run(config: AppConfig, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::build(config).await?;
    let sweeper = &runtime.lifecycle.sweeper;

    if dry_run {
        let count = sweeper.expired_count(None).await?;
        println!("🔍 {count} expired assignment(s) would be removed");
        return Ok(());
    }

    match sweeper.run().await? {
        SweepOutcome::Completed(report) => {
            println!("✅ {}", report.message);
            println!("   Removed:        {}", report.removed);
            println!("   Users affected: {}", report.users_affected);
            println!("   Duration:       {} ms", report.duration_ms);
        }
        SweepOutcome::Skipped => println!("⚠️  A sweep is already running, nothing done"),
    }

    Ok(())
}
