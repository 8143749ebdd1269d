use std::sync::Arc;

use anyhow::{Context, Result};
use arbitrage_engine::{
    alerts::TracingAlertSink,
    chain::{AccessorSource, RawTransactionSubmitter, ReadAccessor, RoundRobinSource, ThrottledAccessor},
    cli::Cli,
    config::AppConfig,
    dex::{EthersAccessor, HttpRelay},
    engine::{Engine, EngineDeps, EngineStreams},
    execution::{ExecutionOrchestrator, RelayFanout},
    feed::{DiscoveryFeed, JsonFileFeed, LiveReserveFeed},
    oracle::PriceBook,
    repository::{CandidateRepository, InMemoryRepository},
    utils,
};
use clap::Parser;
use ethers::signers::LocalWallet;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    utils::init_logging(cli.json_logs);

    let mut config = AppConfig::from_env().context("loading configuration")?;
    cli.apply(&mut config);
    tracing::info!(
        rpc_nodes = config.rpc.urls.len(),
        relays = config.relay_urls.len(),
        executors = config.executors.len(),
        dry_run = config.execution.dry_run,
        "[INIT] arbitrage-engine starting"
    );

    // Chain access -----------------------------------------------------------
    let mut accessors: Vec<Arc<dyn ReadAccessor>> = Vec::with_capacity(config.rpc.urls.len());
    for url in &config.rpc.urls {
        let node = Arc::new(EthersAccessor::new(url.as_str())?);
        accessors.push(Arc::new(ThrottledAccessor::new(
            node,
            config.rpc.window,
            config.rpc.fast_lane,
        )));
    }
    let reads: Arc<dyn AccessorSource> = Arc::new(RoundRobinSource::new(accessors)?);

    let mut relays: Vec<Arc<dyn RawTransactionSubmitter>> = Vec::with_capacity(config.relay_urls.len());
    for (i, url) in config.relay_urls.iter().enumerate() {
        relays.push(Arc::new(HttpRelay::new(format!("relay-{i}"), url.as_str())?));
    }

    // Execution --------------------------------------------------------------
    let wallet: LocalWallet = config
        .private_key
        .expose()
        .trim_start_matches("0x")
        .parse()
        .context("PRIVATE_KEY is not a valid secp256k1 key")?;
    let prices = Arc::new(PriceBook::new());
    let orchestrator = ExecutionOrchestrator::new(
        config.execution.clone(),
        wallet,
        config.executors.clone(),
        RelayFanout::new(relays, config.execution.relay_timeout),
        reads.clone(),
        prices.clone(),
    );

    // Discovery and storage --------------------------------------------------
    let file_feed = JsonFileFeed::new(&config.pools_file);
    let feed: Arc<dyn DiscoveryFeed> = if config.live_reserves {
        Arc::new(LiveReserveFeed::new(file_feed, reads.clone(), config.rpc.retry))
    } else {
        Arc::new(file_feed)
    };
    let repository: Arc<dyn CandidateRepository> = Arc::new(match &config.candidates_file {
        Some(path) => InMemoryRepository::with_snapshot(path),
        None => InMemoryRepository::new(),
    });

    let engine = Arc::new(Engine::new(
        config.engine.clone(),
        EngineDeps {
            feed,
            reads,
            prices,
            orchestrator,
            repository,
            alerts: Arc::new(TracingAlertSink),
        },
    )?);

    if cli.scan_only {
        let stats = engine.refresh().await?;
        let queued = engine.scan_full();
        tracing::info!(pools = stats.kept, queued, "[SCAN] single pass finished");
        for candidate in engine.queue().drain().into_iter().rev() {
            println!("{}", serde_json::to_string(&candidate.record())?);
        }
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[ENGINE] interrupt received, draining");
        }
        let _ = stop_tx.send(true);
    });

    engine.run(stop_rx, EngineStreams::default()).await?;
    Ok(())
}
