//! aitrader - multi-model AI trading orchestrator.
//!
//! `start` runs the scheduler and pending-expire sweeper until SIGINT, then
//! drains in-flight cycles (submitted exchange orders are not cancelled).
//! `stop` clears the global scheduler toggle so a running `start` process
//! stops launching cycles. `emergency-stop-all` forces every model into
//! simulation and exits 0.

use aitrader::application::pending_queue::PendingQueue;
use aitrader::application::registry::{CredentialOverrides, ModelRegistry};
use aitrader::application::risk_manager::RiskManager;
use aitrader::application::scheduler::Scheduler;
use aitrader::application::trading_executor::TradingExecutor;
use aitrader::config::Config;
use aitrader::domain::types::{IncidentType, Severity};
use aitrader::infrastructure::ai::OpenAiDecider;
use aitrader::infrastructure::binance::MAINNET_BASE_URL;
use aitrader::infrastructure::market_data::BinanceMarketData;
use aitrader::infrastructure::persistence::{Database, Store};
use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "aitrader", about = "Multi-model AI trading orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Launch the scheduler and pending-expire sweeper.
    Start,
    /// Disable the global scheduler toggle; a running `start` drains.
    Stop,
    /// Force every model into simulation.
    EmergencyStopAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Start => start(config).await,
        Command::Stop => stop(config).await,
        Command::EmergencyStopAll => emergency_stop_all(config).await,
    }
}

fn build_scheduler(config: &Config, store: Arc<Store>) -> Arc<Scheduler> {
    let market = Arc::new(BinanceMarketData::new(MAINNET_BASE_URL.to_string()));
    let decider = Arc::new(OpenAiDecider::new(
        config.ai_base_url.clone(),
        config.ai_api_key.clone(),
    ));
    let registry = Arc::new(ModelRegistry::new(
        store.clone(),
        CredentialOverrides {
            api_key: config.binance_api_key.clone(),
            api_secret: config.binance_secret_key.clone(),
        },
    ));
    let risk = Arc::new(RiskManager::new(store.clone()));
    let queue = Arc::new(PendingQueue::new(
        store.clone(),
        risk.clone(),
        market.clone(),
        registry.clone(),
    ));
    let executor = Arc::new(TradingExecutor::new(
        store.clone(),
        market,
        decider,
        risk,
        queue.clone(),
        registry.clone(),
        config.coins.clone(),
    ));
    Scheduler::new(store, registry, executor, queue)
}

async fn start(config: Config) -> Result<()> {
    info!("aitrader {} starting...", env!("CARGO_PKG_VERSION"));
    info!("Coin basket: {:?}", config.coins);

    let database = Database::new(&config.database_url).await?;
    let store = Arc::new(Store::new(database.pool.clone()));
    store.seed_system_profiles().await?;
    store
        .append_incident(
            None,
            IncidentType::SystemInit,
            Severity::Low,
            "System started",
            json!({ "version": env!("CARGO_PKG_VERSION"), "coins": config.coins }),
        )
        .await?;

    let scheduler = build_scheduler(&config, store.clone());
    scheduler.set_enabled(true).await?;

    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(scheduler.run())
    };

    info!("Scheduler running. Press Ctrl+C to shut down.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received; draining cycles...");
    scheduler.shutdown();
    let _ = runner.await;
    info!("Goodbye.");
    Ok(())
}

async fn stop(config: Config) -> Result<()> {
    let database = Database::new(&config.database_url).await?;
    let store = Store::new(database.pool.clone());
    store.set_scheduler_enabled(false).await?;
    info!("Scheduler toggle cleared; a running process will drain.");
    Ok(())
}

async fn emergency_stop_all(config: Config) -> Result<()> {
    let database = Database::new(&config.database_url).await?;
    let store = Arc::new(Store::new(database.pool.clone()));
    store.seed_system_profiles().await?;

    let scheduler = build_scheduler(&config, store);
    let affected = scheduler.emergency_stop_all().await?;
    info!(
        "Emergency stop all complete; {} models were live.",
        affected.len()
    );
    Ok(())
}
