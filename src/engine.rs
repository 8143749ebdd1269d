//! Wires discovery, scanning, protection and execution into one process.
//!
//! Flow per candidate: scanner -> queue -> pipeline -> builder -> orchestrator,
//! ending in exactly one alert and one repository removal.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use ethers::types::{Address, H256};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::alerts::{Alert, AlertSink};
use crate::arbitrage::{
    CandidateConfig, CandidateFactory, CandidateQueue, CandidateStatus, Opportunity, OpportunityScanner,
    ScannerConfig, TradeCandidate,
};
use crate::builder::TradeBuilder;
use crate::chain::AccessorSource;
use crate::errors::AppError;
use crate::execution::ExecutionOrchestrator;
use crate::feed::DiscoveryFeed;
use crate::index::{IndexSnapshot, PoolIndex, RebuildStats};
use crate::models::{PoolUpdate, SwapIntent};
use crate::oracle::PriceBook;
use crate::protection::{
    ActivityTracker, CheckContext, CooldownTracker, ProtectionConfig, ProtectionPipeline,
    WalletReservations,
};
use crate::repository::CandidateRepository;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub refresh_interval: Duration,
    pub scan_interval: Duration,
    /// Candidates processed concurrently.
    pub workers: usize,
    pub queue_capacity: usize,
    /// Stablecoins pinned at $1 when deriving token prices.
    pub usd_anchors: Vec<Address>,
    pub scanner: ScannerConfig,
    pub candidate: CandidateConfig,
    pub protection: ProtectionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            scan_interval: Duration::from_secs(1),
            workers: 4,
            queue_capacity: 64,
            usd_anchors: Vec::new(),
            scanner: ScannerConfig::default(),
            candidate: CandidateConfig::default(),
            protection: ProtectionConfig::default(),
        }
    }
}

/// Collaborators built outside the engine.
pub struct EngineDeps {
    pub feed: Arc<dyn DiscoveryFeed>,
    pub reads: Arc<dyn AccessorSource>,
    /// Shared with the orchestrator so gas is priced off the same book.
    pub prices: Arc<PriceBook>,
    pub orchestrator: ExecutionOrchestrator,
    pub repository: Arc<dyn CandidateRepository>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Optional push streams consumed while running.
#[derive(Default)]
pub struct EngineStreams {
    pub pool_updates: Option<mpsc::Receiver<PoolUpdate>>,
    pub swap_intents: Option<mpsc::Receiver<SwapIntent>>,
}

pub struct Engine {
    config: EngineConfig,
    feed: Arc<dyn DiscoveryFeed>,
    prices: Arc<PriceBook>,
    index: PoolIndex,
    scanner: OpportunityScanner,
    factory: CandidateFactory,
    queue: CandidateQueue,
    pipeline: ProtectionPipeline,
    ctx: CheckContext,
    orchestrator: ExecutionOrchestrator,
    repository: Arc<dyn CandidateRepository>,
    alerts: Arc<dyn AlertSink>,
    cooldowns: Arc<CooldownTracker>,
    activity: Arc<ActivityTracker>,
    reservations: Arc<WalletReservations>,
    /// Fingerprints currently between pipeline and retirement.
    in_flight: DashSet<String>,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Result<Self, AppError> {
        let executor = deps
            .orchestrator
            .executors()
            .first()
            .map(|e| e.address)
            .ok_or_else(|| AppError::Config("at least one executor contract is required".into()))?;

        let cooldowns = Arc::new(CooldownTracker::new(config.protection.cooldown));
        let activity = Arc::new(ActivityTracker::new(config.protection.lookback));
        let reservations = Arc::new(WalletReservations::default());
        let pipeline = ProtectionPipeline::standard(
            &config.protection,
            executor,
            cooldowns.clone(),
            Some(activity.clone()),
            reservations.clone(),
        );
        let ctx = CheckContext {
            wallet: deps.orchestrator.wallet_address(),
            reads: deps.reads,
            prices: deps.prices.clone(),
        };

        Ok(Self {
            index: PoolIndex::new(config.scanner.min_liquidity_usd),
            scanner: OpportunityScanner::new(config.scanner.clone()),
            factory: CandidateFactory::new(config.candidate.clone(), deps.prices.clone()),
            queue: CandidateQueue::new(config.queue_capacity),
            feed: deps.feed,
            prices: deps.prices,
            pipeline,
            ctx,
            orchestrator: deps.orchestrator,
            repository: deps.repository,
            alerts: deps.alerts,
            cooldowns,
            activity,
            reservations,
            in_flight: DashSet::new(),
            config,
        })
    }

    pub fn index(&self) -> &PoolIndex {
        &self.index
    }

    pub fn queue(&self) -> &CandidateQueue {
        &self.queue
    }

    /// Pull the pool universe, re-derive prices and rebuild the index.
    pub async fn refresh(&self) -> Result<RebuildStats, AppError> {
        let pools = self.feed.fetch().await?;
        self.prices.refresh_from_pools(&pools, &self.config.usd_anchors);
        Ok(self.index.rebuild(pools, &self.prices))
    }

    /// Full pass over the current snapshot. Returns how many candidates were queued.
    pub fn scan_full(&self) -> usize {
        let snapshot = self.index.snapshot();
        let opportunities = self.scanner.scan(&snapshot);
        self.enqueue(opportunities, &snapshot)
    }

    /// Patch one pool and rescan only the routes through it.
    pub fn on_pool_update(&self, update: PoolUpdate) -> usize {
        if !self.index.apply_update(update.address, update.state, &self.prices) {
            return 0;
        }
        let snapshot = self.index.snapshot();
        let opportunities = self.scanner.scan_touching(&snapshot, update.address);
        self.enqueue(opportunities, &snapshot)
    }

    pub fn on_swap_intent(&self, intent: SwapIntent) {
        debug!(hash = ?intent.hash, to = ?intent.to, "[ENGINE] swap intent observed");
        self.activity.record(intent);
    }

    fn enqueue(&self, opportunities: Vec<Opportunity>, snapshot: &IndexSnapshot) -> usize {
        let mut queued = 0;
        for opportunity in opportunities {
            if self.in_flight.contains(&opportunity.fingerprint()) {
                continue;
            }
            let Some(candidate) = self.factory.build(opportunity, snapshot) else {
                continue;
            };
            let record = candidate.record();
            let admission = self.queue.push(candidate);
            for evicted in &admission.evicted {
                self.repository.delete(&evicted.fingerprint);
            }
            if admission.accepted {
                self.repository.put(record);
                queued += 1;
            }
        }
        if queued > 0 {
            debug!(queued, backlog = self.queue.len(), "[SCAN] candidates queued");
        }
        queued
    }

    /// Pop the best queued candidate and mark it in flight before anything
    /// else can rescan its route.
    pub async fn next_candidate(&self) -> Option<TradeCandidate> {
        let candidate = self.queue.pop().await?;
        self.in_flight.insert(candidate.fingerprint.clone());
        Some(candidate)
    }

    /// Take one candidate to a terminal outcome.
    pub async fn process(&self, mut candidate: TradeCandidate) -> CandidateStatus {
        self.in_flight.insert(candidate.fingerprint.clone());
        let verdict = self.pipeline.run(&mut candidate, &self.ctx).await;
        if !verdict.ok {
            let status = if verdict.infra_error {
                CandidateStatus::Failed
            } else {
                CandidateStatus::Skipped
            };
            let reason = format!(
                "{}: {}",
                verdict.failed_check.unwrap_or("pipeline"),
                verdict.reason.unwrap_or_default()
            );
            return self.retire(candidate, status, Some(reason), None);
        }

        let plan = match TradeBuilder::plan(&candidate) {
            Ok(plan) => plan,
            Err(err) => {
                return self.retire(candidate, CandidateStatus::Failed, Some(format!("build: {err}")), None);
            }
        };
        let report = self.orchestrator.execute(&candidate, &plan).await;
        let status = report.status();
        if status == CandidateStatus::Submitted {
            self.cooldowns.mark_submitted(&candidate.fingerprint);
        }
        self.retire(candidate, status, report.reason(), report.tx_hash())
    }

    fn retire(
        &self,
        mut candidate: TradeCandidate,
        status: CandidateStatus,
        reason: Option<String>,
        tx_hash: Option<H256>,
    ) -> CandidateStatus {
        candidate.status = status;
        self.in_flight.remove(&candidate.fingerprint);
        self.reservations.release(&candidate.fingerprint);
        self.repository.delete(&candidate.fingerprint);
        info!(
            candidate = %candidate,
            ?status,
            reason = reason.as_deref().unwrap_or(""),
            ?tx_hash,
            "[ENGINE] candidate retired"
        );
        self.alerts.emit(Alert {
            status: status.into(),
            fingerprint: Some(candidate.fingerprint.clone()),
            route: candidate.summary(),
            profit_usd: candidate.estimated_profit_usd,
            reason,
            tx_hash,
        });
        status
    }

    /// Retire everything still queued as skipped. Returns how many were retired.
    pub fn retire_backlog(&self) -> usize {
        let backlog = self.queue.drain();
        let count = backlog.len();
        for candidate in backlog {
            self.retire(candidate, CandidateStatus::Skipped, Some("shutdown".into()), None);
        }
        count
    }

    /// Run until `shutdown` turns true (or its sender goes away). In-flight
    /// candidates finish; queued ones are retired; the repository is flushed.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        streams: EngineStreams,
    ) -> Result<(), AppError> {
        match self.refresh().await {
            Ok(stats) => info!(pools = stats.kept, "[ENGINE] initial index ready"),
            Err(err) => warn!(error = %err, "[ENGINE] initial refresh failed"),
        }
        self.alerts.emit(Alert::info("engine started"));

        let mut tasks = JoinSet::new();
        tasks.spawn(self.clone().refresh_loop(shutdown.clone()));
        tasks.spawn(self.clone().scan_loop(shutdown.clone()));
        if let Some(updates) = streams.pool_updates {
            tasks.spawn(self.clone().update_loop(updates, shutdown.clone()));
        }
        if let Some(intents) = streams.swap_intents {
            tasks.spawn(self.clone().intent_loop(intents, shutdown.clone()));
        }
        let dispatcher = tokio::spawn(self.clone().dispatch());

        stopped(&mut shutdown).await;
        info!(backlog = self.queue.len(), "[ENGINE] shutdown requested");
        self.queue.close();
        while let Some(done) = tasks.join_next().await {
            if let Err(err) = done {
                error!(error = %err, "[ENGINE] background task ended abnormally");
            }
        }
        if let Err(err) = dispatcher.await {
            error!(error = %err, "[ENGINE] dispatcher ended abnormally");
        }
        let retired = self.retire_backlog();
        self.repository.flush()?;
        info!(retired, "[ENGINE] stopped");
        Ok(())
    }

    async fn refresh_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.refresh_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.refresh().await {
                        warn!(error = %err, "[ENGINE] refresh failed, keeping previous index");
                    }
                }
                _ = stopped(&mut shutdown) => break,
            }
        }
    }

    async fn scan_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan_full();
                    self.cooldowns.prune();
                    self.activity.prune();
                }
                _ = stopped(&mut shutdown) => break,
            }
        }
    }

    async fn update_loop(self: Arc<Self>, mut updates: mpsc::Receiver<PoolUpdate>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(update) => {
                        self.on_pool_update(update);
                    }
                    None => break,
                },
                _ = stopped(&mut shutdown) => break,
            }
        }
    }

    async fn intent_loop(self: Arc<Self>, mut intents: mpsc::Receiver<SwapIntent>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                intent = intents.recv() => match intent {
                    Some(intent) => self.on_swap_intent(intent),
                    None => break,
                },
                _ = stopped(&mut shutdown) => break,
            }
        }
    }

    /// Hand the best queued candidate to the next free worker.
    async fn dispatch(self: Arc<Self>) {
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut workers = JoinSet::new();
        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let Some(candidate) = self.next_candidate().await else {
                break;
            };
            let engine = self.clone();
            workers.spawn(async move {
                let _permit = permit;
                engine.process(candidate).await
            });
            while let Some(done) = workers.try_join_next() {
                log_worker(done);
            }
        }
        while let Some(done) = workers.join_next().await {
            log_worker(done);
        }
    }
}

/// Resolves once the shutdown flag is set or its sender is gone. The borrow
/// returned by `wait_for` is dropped here so callers stay `Send`.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn log_worker(done: Result<CandidateStatus, tokio::task::JoinError>) {
    if let Err(err) = done {
        error!(error = %err, "[ENGINE] worker ended abnormally");
    }
}
