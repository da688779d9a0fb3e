//! `dashkeep notify <class>` — Evaluate one threshold class now.

use dashkeep_config::AppConfig;
use dashkeep_core::notification::ThresholdClass;

use super::runtime::Runtime;

pub async fn run(config: AppConfig, class: ThresholdClass) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::build(config).await?;
    let report = runtime.lifecycle.scheduler.run_class(class).await?;

    println!("📨 {class}");
    println!("   Users considered: {}", report.users_considered);
    println!("   Notified:         {}", report.notified);
    println!("   Already notified: {}", report.suppressed);
    if report.failed > 0 {
        println!("   ⚠️  Failed:        {} (retried on the next run)", report.failed);
    }

    Ok(())
}
