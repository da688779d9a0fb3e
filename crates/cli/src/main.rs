//! Dashkeep CLI — the main entry point.
//!
//! Commands:
//! - `onboard`  — Write a default config file
//! - `serve`    — Start the admin API and the periodic task engine
//! - `sweep`    — Purge expired assignments once (or preview with `--dry-run`)
//! - `notify`   — Evaluate one threshold class now
//! - `tasks`    — List the periodic task schedule
//! - `status`   — Show configuration and storage summary
//! - `config`   — Validate, show, or locate the config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dashkeep_config::AppConfig;
use dashkeep_core::notification::ThresholdClass;

mod commands;

#[derive(Parser)]
#[command(
    name = "dashkeep",
    about = "Dashkeep — time-bounded dashboard access with expiry reminders",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.dashkeep/config.toml)
    #[arg(short, long, global = true, env = "DASHKEEP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Onboard,

    /// Start the admin API and the periodic task engine
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Serve the API without running periodic tasks
        #[arg(long)]
        no_tasks: bool,
    },

    /// Purge expired assignments once
    Sweep {
        /// Only count what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Evaluate one threshold class and send due notices
    Notify {
        /// reminder-7d, urgent-24h or expired
        class: ThresholdClass,
    },

    /// List periodic tasks and when they next fire
    Tasks,

    /// Show configuration and storage summary
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse and validate the config file
    Validate,
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path
    Path,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    // These two must work even when the config file is broken
    match &cli.command {
        Commands::Onboard => {
            init_tracing(cli.verbose, false);
            return commands::onboard::run(&config_path).await;
        }
        Commands::Config { action } => {
            init_tracing(cli.verbose, false);
            return match action {
                ConfigAction::Validate => commands::config_cmd::validate(&config_path).await,
                ConfigAction::Show => commands::config_cmd::show(&config_path).await,
                ConfigAction::Path => commands::config_cmd::path(&config_path).await,
            };
        }
        _ => {}
    }

    let config = AppConfig::load_with_env(&config_path)
        .map_err(|e| format!("Failed to load config: {e}"))?;
    init_tracing(cli.verbose, config.logging.json);

    match cli.command {
        Commands::Serve { port, no_tasks } => commands::serve::run(config, port, no_tasks).await?,
        Commands::Sweep { dry_run } => commands::sweep::run(config, dry_run).await?,
        Commands::Notify { class } => commands::notify::run(config, class).await?,
        Commands::Tasks => commands::tasks::run(config).await?,
        Commands::Status => commands::status::run(config, &config_path).await?,
        Commands::Onboard | Commands::Config { .. } => {}
    }

    Ok(())
}
