//! `dashkeep serve` — Admin API plus the periodic task engine.

use std::sync::Arc;

use dashkeep_config::AppConfig;
use dashkeep_core::event::EventBus;
use dashkeep_gateway::ApiState;
use dashkeep_workflow::{TaskRunner, WorkflowEngine, tasks_from_config};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::config_cmd::on_off;
use super::runtime::Runtime;

pub async fn run(
    mut config: AppConfig,
    port_override: Option<u16>,
    no_tasks: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let runtime = Runtime::build(config).await?;
    let config = &runtime.config;

    println!("📊 Dashkeep — Starting");
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Storage:   {}", config.storage.backend);
    println!("   Email:     {}", config.email.transport);
    println!("   Sweeper:   {}", on_off(config.sweeper.enabled && !no_tasks));
    println!("   Reminders: {}", on_off(config.reminders.enabled && !no_tasks));

    spawn_event_logger(&runtime.event_bus);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workflow = if no_tasks {
        info!("Periodic tasks disabled by --no-tasks");
        None
    } else {
        let engine = Arc::new(WorkflowEngine::new(runtime.clock.clone()));
        let tasks = tasks_from_config(config);
        let total = tasks.len();
        let errors = engine.load_tasks(tasks).await;
        for err in &errors {
            warn!("Task load error: {err}");
        }
        info!(loaded = total - errors.len(), total, "Periodic tasks registered");

        let (task_rx, _engine_handle) = engine.start(shutdown_rx);
        let runner = Arc::new(TaskRunner::new(
            runtime.lifecycle.clone(),
            engine.clone(),
            runtime.clock.clone(),
        ));
        runner.spawn(task_rx);
        info!("Workflow engine started");
        Some(engine)
    };

    let state = Arc::new(ApiState {
        lifecycle: runtime.lifecycle.clone(),
        workflow,
        admin_tokens: config.admin.tokens.clone(),
    });

    // Blocks until Ctrl-C
    dashkeep_gateway::serve(config, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Mirror domain events into the debug log.
fn spawn_event_logger(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(kind = event.kind(), at = %event.timestamp(), ?event, "Domain event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
