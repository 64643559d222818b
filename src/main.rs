use anyhow::Context;
use clap::Parser;
use fieldrun::agent::{AgentClient, AgentWorker};
use fieldrun::api::{create_router, AppState};
use fieldrun::cli::{self, Cli, Commands, RouteSummary};
use fieldrun::config::AppConfig;
use fieldrun::coordinator::Coordinator;
use fieldrun::persistence::{MemoryReportStore, PostgresReportStore, ReportSink, StatusBuffer};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;

    match cli.command {
        Commands::Coordinator { port } => {
            init_logging(&config.logging);
            if let Some(port) = port {
                config.server.port = port;
            }
            validate(&config)?;
            run_coordinator(config).await?;
        }
        Commands::Agent { id, coordinator_url } => {
            init_logging(&config.logging);
            if let Some(url) = coordinator_url {
                config.agent.coordinator_url = url;
            }
            validate(&config)?;
            run_agent(config, id).await?;
        }
        Commands::Route { path } => {
            init_logging_simple();
            let route = cli::load_route(&path)
                .with_context(|| format!("failed to load route from {}", path))?;
            cli::print_route_summary(&RouteSummary::new(&route, config.motion.steps_per_segment));
        }
        Commands::Check => {
            init_logging_simple();
            validate(&config)?;
            println!("Configuration OK");
        }
    }

    Ok(())
}

fn validate(config: &AppConfig) -> anyhow::Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {}", e);
        }
        anyhow::bail!("invalid configuration: {}", errors.join("; "));
    }
    Ok(())
}

async fn run_coordinator(config: AppConfig) -> anyhow::Result<()> {
    let sink: Arc<dyn ReportSink> = match &config.database {
        Some(db) => {
            let store = PostgresReportStore::new(&db.url, db.max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            warn!("No database configured; reports are kept in memory only");
            Arc::new(MemoryReportStore::new())
        }
    };

    let buffer = Arc::new(StatusBuffer::new(sink, config.buffer.batch_threshold));
    let coordinator = Coordinator::new(
        config.coordinator.clone(),
        buffer,
        config.buffer.resync_window,
    );
    let handle = coordinator.handle();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let coordinator_task = tokio::spawn(coordinator.run(shutdown_tx.subscribe()));

    let app = create_router(AppState::with_shutdown(handle, shutdown_tx.clone()));
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "coordinator listening");

    let signal_tx = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = signal_tx.send(());
        })
        .await?;

    // Covers a server exit that did not come from the signal
    let _ = shutdown_tx.send(());
    coordinator_task.await?;

    info!("coordinator stopped");
    Ok(())
}

async fn run_agent(config: AppConfig, agent_id: String) -> anyhow::Result<()> {
    let worker = AgentWorker::from_config(agent_id.clone(), &config)?;
    let client = AgentClient::new(agent_id, config.agent.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    client.run(worker, shutdown_rx).await?;
    info!("agent stopped");
    Ok(())
}
