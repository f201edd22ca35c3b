//! Recast Simulator
//!
//! Plays a scenario of host edits against a simulated document while the engine
//! keeps it converted, then prints the final markup and the engine metrics.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use recast_engine::{Engine, EngineConfig};
use recast_fx::{ExchangeRateApiProvider, FileStore, MemoryStore, RateCache, RateProvider, RateStore, StaticRateProvider};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// Recast Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "recast-simulator")]
#[command(about = "Drive the Recast engine against a simulated document")]
struct Args {
    /// Built-in scenario name (dashboard, churn) or path to a JSON scenario
    #[arg(short, long, default_value = "dashboard")]
    scenario: String,

    /// Offline exchange rate; defaults to the configured fallback rate
    #[arg(long, conflicts_with = "live")]
    rate: Option<Decimal>,

    /// Fetch the rate from the configured rate API
    #[arg(long)]
    live: bool,

    /// Persist the rate to this file instead of memory
    #[arg(long)]
    store: Option<PathBuf>,

    /// Fetch a new rate before starting, ignoring a fresh cached one
    #[arg(long)]
    refresh: bool,

    /// Random seed for churn steps
    #[arg(long)]
    seed: Option<u64>,

    /// Time to let pending passes finish after the last step, in milliseconds
    #[arg(long, default_value = "1500")]
    grace_ms: u64,

    /// Emit logs as JSON
    #[arg(long, env = "RECAST_JSON_LOGS")]
    json_logs: bool,

    /// Print metrics in Prometheus text format instead of JSON
    #[arg(long)]
    prometheus: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    info!(
        pair = %config.pair(),
        live = args.live,
        "Starting Recast Simulator"
    );

    let provider: Arc<dyn RateProvider> = if args.live {
        Arc::new(ExchangeRateApiProvider::new(config.rate_api_url.clone())?)
    } else {
        Arc::new(StaticRateProvider::new(args.rate.unwrap_or(config.fallback_rate)))
    };
    let store: Arc<dyn RateStore> = match &args.store {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };
    let cache = Arc::new(RateCache::new(provider, store, config.rate_cache()));
    let engine = Engine::new(config, cache)?;
    if args.refresh {
        let outcome = engine.force_refresh_rate().await;
        info!(rate = %outcome.current, source = ?outcome.source, "Rate refreshed");
    }

    let scenario = Scenario::load(&args.scenario)?;
    let mut controller = SimulationController::start(&scenario, engine, args.seed)?;
    let metrics = controller.metrics().clone();

    controller.run_scenario(&scenario).await?;
    let (report, html) = controller
        .finish(std::time::Duration::from_millis(args.grace_ms))
        .await?;

    println!("{}", html);
    if args.prometheus {
        print!("{}", metrics.to_prometheus());
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    info!(
        conversions_per_edit = report.conversions_per_edit(),
        "Done"
    );

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
