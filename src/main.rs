//! hypermind — multi-agent perp trading core.
//!
//! Every cycle: snapshot the market, fan out to the configured LLM agents in
//! parallel, validate and risk-gate their structured decisions, execute the
//! approved intents on the venue, persist everything. Headless; metrics are
//! pushed as structured JSON logs to stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

use hypermind::application::system::Application;
use hypermind::config::{AppConfig, parse_agent_roster};
use hypermind::domain::repositories::{
    AccountSnapshotRepository, AgentRepository, BotStateRepository,
};
use hypermind::infrastructure::persistence::database::Database;
use hypermind::infrastructure::persistence::repositories::{
    SqliteAccountSnapshotRepository, SqliteAgentRepository, SqliteBotStateRepository,
};

#[derive(Parser)]
#[command(name = "hypermind", version, about = "Multi-agent perp trading core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading loop until SIGINT/SIGTERM.
    Start,
    /// Print last cycle result, uptime, cycle count and equity.
    Status,
    /// Upsert the agent roster from a TOML file into the database.
    SyncAgents {
        #[arg(long)]
        file: PathBuf,
    },
}

fn init_tracing() {
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    // Exit codes: 0 success, 1 configuration error, 2 runtime error.
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let result = match cli.command {
        Command::Start => start(config).await,
        Command::Status => status(config).await,
        Command::SyncAgents { file } => sync_agents(config, file).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Runtime error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn start(config: AppConfig) -> Result<()> {
    info!(
        "hypermind {} starting (mode {:?}, testnet {}, period {}s)",
        env!("CARGO_PKG_VERSION"),
        config.mode,
        config.is_testnet,
        config.cycle_period_secs
    );

    let app = Application::build(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, letting the in-flight cycle finish");
        let _ = shutdown_tx.send(true);
    });

    app.run(shutdown_rx).await?;
    info!("hypermind stopped.");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn status(config: AppConfig) -> Result<()> {
    let database = Database::new(&config.database_url).await?;

    let bot_state = SqliteBotStateRepository::new(database.clone())
        .load()
        .await?;
    let latest = SqliteAccountSnapshotRepository::new(database)
        .recent(1)
        .await?
        .into_iter()
        .next();

    match bot_state {
        None => println!("No recorded state — the loop has never run against this database."),
        Some(state) => {
            println!("service_start_time: {}", state.service_start_time);
            println!("cycle_count:        {}", state.cycle_count);
            match state.last_cycle_at {
                Some(at) => println!("last_cycle_at:      {}", at),
                None => println!("last_cycle_at:      never"),
            }
            match state.last_cycle_status {
                Some(status) => println!("last_cycle_status:  {}", status),
                None => println!("last_cycle_status:  n/a"),
            }
            match state.last_error {
                Some(err) => println!("last_error:         {}", err),
                None => println!("last_error:         none"),
            }
        }
    }

    if let Some(snapshot) = latest {
        println!("equity:             {}", snapshot.equity);
        println!("free_cash:          {}", snapshot.free_cash);
        println!("gross_exposure:     {}", snapshot.gross_exposure);
        println!("realized_pnl_total: {}", snapshot.realized_pnl_total);
    }

    Ok(())
}

async fn sync_agents(config: AppConfig, file: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read roster file {}", file.display()))?;
    let roster = parse_agent_roster(&raw)?;

    let database = Database::new(&config.database_url).await?;
    let repository = SqliteAgentRepository::new(database);

    let mut synced = 0usize;
    for entry in roster.agents {
        let agent = entry.into_agent_config();
        repository.upsert(&agent).await?;
        info!(
            "sync-agents: {} ({}) active={}",
            agent.agent_id, agent.display_name, agent.is_active
        );
        synced += 1;
    }

    println!("Synced {} agents into trading_agents.", synced);
    Ok(())
}
