//! `dashkeep onboard` — First-time setup.

use std::path::Path;

use dashkeep_config::AppConfig;

pub async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("📊 Dashkeep — First-Time Setup");
    println!("==============================\n");

    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
    {
        if dir.exists() {
            println!("  Config directory exists: {}", dir.display());
        } else {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created config directory: {}", dir.display());
        }
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set [admin] tokens before exposing the API beyond localhost");
    println!("   2. Point [email] at your mail relay (transport = \"http\")");
    println!("   3. Run: dashkeep serve\n");

    Ok(())
}
