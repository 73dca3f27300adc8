use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use upkeep_core::config::UpkeepConfig;
use upkeep_scheduler::{
    PmRepository, RunOptions, SchedulerEngine, SchedulerRunner, SqliteRepository,
};

mod app;
mod auth;
mod http;

#[derive(Debug, Parser)]
#[command(name = "upkeep-gateway", version, about = "Preventive-maintenance scheduler")]
struct Cli {
    /// Path to the TOML config (falls back to UPKEEP_CONFIG, then ~/.upkeep/upkeep.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the trigger and status endpoints (default).
    Serve,
    /// Run a single scheduler pass and print its summary as JSON.
    RunOnce {
        #[arg(long)]
        org_id: Option<String>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "upkeep_gateway=info,upkeep_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // config: --config > UPKEEP_CONFIG env > ~/.upkeep/upkeep.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("UPKEEP_CONFIG").ok());
    let config = UpkeepConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        UpkeepConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path)?;
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    let repo: Arc<dyn PmRepository> = Arc::new(SqliteRepository::new(db)?);
    info!("database migrations complete");

    let runner = Arc::new(SchedulerRunner::new(repo, config.scheduler.clone()));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, runner).await,
        Command::RunOnce {
            org_id,
            batch_size,
            dry_run,
        } => {
            let batch_size = config
                .scheduler
                .resolve_batch_size(batch_size)
                .ok_or_else(|| anyhow::anyhow!("--batch-size must be at least 1"))?;
            let options = RunOptions {
                org_id,
                batch_size,
                dry_run,
            };
            let summary = runner.run(&options).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

async fn serve(config: UpkeepConfig, runner: Arc<SchedulerRunner>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;

    // periodic pass in background, if enabled
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if config.scheduler.tick_interval_secs > 0 {
        let engine = SchedulerEngine::new(
            Arc::clone(&runner),
            runner.default_options(),
            Duration::from_secs(config.scheduler.tick_interval_secs),
        );
        tokio::spawn(engine.run(shutdown_rx));
    } else {
        info!("periodic PM passes disabled; waiting for external triggers");
    }

    let state = Arc::new(app::AppState::new(config, runner));
    let router = app::build_router(state);

    info!("Upkeep gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // signal scheduler engine to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}

fn ensure_parent_dir(path: &str) -> upkeep_core::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
