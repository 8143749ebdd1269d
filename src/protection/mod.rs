//! Ordered, short-circuiting guard checks run before any candidate executes.
//!
//! Checks read the candidate and the shared context and answer with a
//! [`CheckOutcome`]. They never touch the candidate themselves: refinements
//! (gas pricing, a clamped size) travel back as a [`CandidateUpdate`] that the
//! pipeline applies before the next check runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::arbitrage::{CandidateStatus, TradeCandidate};
use crate::chain::AccessorSource;
use crate::errors::ChainError;
use crate::oracle::PriceBook;
use crate::utils::RetryPolicy;

pub mod checks;
pub mod tracking;

pub use checks::{
    ActivityCheck, BalanceCheck, CooldownCheck, GasCheck, ProfitCheck, ReserveClampCheck,
    SlippageCheck,
};
pub use tracking::{ActivityTracker, CooldownTracker, WalletReservations};

/// Ambient inputs every check may consult.
#[derive(Clone)]
pub struct CheckContext {
    pub wallet: Address,
    pub reads: Arc<dyn AccessorSource>,
    pub prices: Arc<PriceBook>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectionResult {
    pub ok: bool,
    pub reason: Option<String>,
    pub details: Value,
}

impl ProtectionResult {
    pub fn pass(details: Value) -> Self {
        Self {
            ok: true,
            reason: None,
            details,
        }
    }

    pub fn reject(reason: impl Into<String>, details: Value) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            details,
        }
    }
}

/// Refinement a check hands back to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateUpdate {
    Gas {
        gas_limit: U256,
        fee_per_gas: U256,
        cost_usd: f64,
    },
    ClampSize {
        loan_amount: U256,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub result: ProtectionResult,
    pub update: Option<CandidateUpdate>,
}

impl CheckOutcome {
    pub fn pass(details: Value) -> Self {
        Self {
            result: ProtectionResult::pass(details),
            update: None,
        }
    }

    pub fn reject(reason: impl Into<String>, details: Value) -> Self {
        Self {
            result: ProtectionResult::reject(reason, details),
            update: None,
        }
    }

    pub fn with_update(mut self, update: CandidateUpdate) -> Self {
        self.update = Some(update);
        self
    }
}

/// A single guard. `Err` is reserved for infrastructure failures; policy
/// rejections are `Ok` with `result.ok == false`.
#[async_trait]
pub trait ProtectionCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(
        &self,
        candidate: &TradeCandidate,
        ctx: &CheckContext,
    ) -> Result<CheckOutcome, ChainError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTrace {
    pub name: &'static str,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub ok: bool,
    pub failed_check: Option<&'static str>,
    pub reason: Option<String>,
    /// The failing step could not reach its data source.
    pub infra_error: bool,
    pub trace: Vec<StepTrace>,
    /// Share of the estimated profit reserved rather than reinvested.
    pub profit_lock_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ProtectionConfig {
    pub cooldown: Duration,
    pub lookback: Duration,
    pub max_slippage_pct: f64,
    pub min_profit_usd: f64,
    pub min_profit_bps: f64,
    pub oracle_max_age: Duration,
    pub max_fee_per_gas_gwei: u64,
    pub max_gas_limit: u64,
    pub gas_buffer_pct: u64,
    /// Wrapped native token used to price gas in USD.
    pub native_token: Address,
    pub flash_sources: Vec<Address>,
    pub max_impact_pct: f64,
    pub profit_lock_pct: f64,
    pub retry: RetryPolicy,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(3),
            lookback: Duration::from_secs(10),
            max_slippage_pct: 1.5,
            min_profit_usd: 10.0,
            min_profit_bps: 5.0,
            oracle_max_age: Duration::from_secs(180),
            max_fee_per_gas_gwei: 300,
            max_gas_limit: 1_500_000,
            gas_buffer_pct: 20,
            native_token: Address::zero(),
            flash_sources: Vec::new(),
            max_impact_pct: 1.0,
            profit_lock_pct: 10.0,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ProtectionPipeline {
    checks: Vec<Box<dyn ProtectionCheck>>,
    retry: RetryPolicy,
    profit_lock_pct: f64,
}

impl ProtectionPipeline {
    pub fn new(checks: Vec<Box<dyn ProtectionCheck>>, retry: RetryPolicy, profit_lock_pct: f64) -> Self {
        Self {
            checks,
            retry,
            profit_lock_pct,
        }
    }

    /// The seven standard checks in their fixed order. `executor` is the
    /// contract gas is estimated against.
    pub fn standard(
        config: &ProtectionConfig,
        executor: Address,
        cooldowns: Arc<CooldownTracker>,
        activity: Option<Arc<ActivityTracker>>,
        reservations: Arc<WalletReservations>,
    ) -> Self {
        let checks: Vec<Box<dyn ProtectionCheck>> = vec![
            Box::new(CooldownCheck::new(cooldowns)),
            Box::new(ActivityCheck::new(activity)),
            Box::new(SlippageCheck::from_pct(config.max_slippage_pct)),
            Box::new(ProfitCheck {
                min_profit_usd: config.min_profit_usd,
                min_profit_bps: config.min_profit_bps,
                max_price_age: config.oracle_max_age,
            }),
            Box::new(GasCheck {
                executor,
                native_token: config.native_token,
                max_fee_per_gas: U256::from(config.max_fee_per_gas_gwei) * U256::exp10(9),
                max_gas_limit: U256::from(config.max_gas_limit),
                buffer_pct: config.gas_buffer_pct,
                max_price_age: config.oracle_max_age,
            }),
            Box::new(BalanceCheck {
                flash_sources: config.flash_sources.clone(),
                reservations,
            }),
            Box::new(ReserveClampCheck::from_pct(config.max_impact_pct)),
        ];
        Self::new(checks, config.retry, config.profit_lock_pct)
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check in order, stopping at the first rejection. Updates are
    /// applied to `candidate` as they arrive.
    pub async fn run(&self, candidate: &mut TradeCandidate, ctx: &CheckContext) -> PipelineResult {
        let mut trace = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let started = Instant::now();
            let view: &TradeCandidate = candidate;
            let outcome = self
                .retry
                .run(check.name(), move || check.evaluate(view, ctx))
                .await;
            trace.push(StepTrace {
                name: check.name(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(check = check.name(), error = %err, fingerprint = %candidate.fingerprint, "[PIPELINE] check unavailable");
                    return failed(check.name(), err.to_string(), true, trace);
                }
            };
            if !outcome.result.ok {
                let reason = outcome.result.reason.unwrap_or_else(|| "rejected".to_string());
                debug!(check = check.name(), %reason, details = %outcome.result.details, "[PIPELINE] rejected");
                return failed(check.name(), reason, false, trace);
            }
            if let Some(update) = outcome.update {
                if let Err(reason) = apply_update(candidate, update) {
                    return failed(check.name(), reason, false, trace);
                }
            }
        }

        candidate.status = CandidateStatus::Approved;
        let profit_lock_usd = candidate
            .estimated_profit_usd
            .map(|p| p.max(0.0) * self.profit_lock_pct / 100.0);
        info!(candidate = %candidate, ?profit_lock_usd, "[PIPELINE] approved");
        PipelineResult {
            ok: true,
            failed_check: None,
            reason: None,
            infra_error: false,
            trace,
            profit_lock_usd,
        }
    }
}

fn failed(name: &'static str, reason: String, infra_error: bool, trace: Vec<StepTrace>) -> PipelineResult {
    PipelineResult {
        ok: false,
        failed_check: Some(name),
        reason: Some(reason),
        infra_error,
        trace,
        profit_lock_usd: None,
    }
}

fn apply_update(candidate: &mut TradeCandidate, update: CandidateUpdate) -> Result<(), String> {
    match update {
        CandidateUpdate::Gas {
            gas_limit,
            fee_per_gas,
            cost_usd,
        } => {
            if let Some(profit) = candidate.estimated_profit_usd.as_mut() {
                *profit += candidate.estimated_gas_cost_usd - cost_usd;
            }
            candidate.estimated_gas_cost_usd = cost_usd;
            candidate.gas_limit = Some(gas_limit);
            candidate.fee_per_gas = Some(fee_per_gas);
            Ok(())
        }
        CandidateUpdate::ClampSize { loan_amount } => {
            if candidate.resize(loan_amount) {
                debug!(fingerprint = %candidate.fingerprint, %loan_amount, "[PIPELINE] size clamped");
                Ok(())
            } else {
                Err("route does not quote at the clamped size".to_string())
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::chain::mock::MockAccessor;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        pass: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProtectionCheck for Counting {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn evaluate(
            &self,
            _candidate: &TradeCandidate,
            _ctx: &CheckContext,
        ) -> Result<CheckOutcome, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.pass {
                Ok(CheckOutcome::pass(json!({})))
            } else {
                Ok(CheckOutcome::reject("nope", json!({})))
            }
        }
    }

    struct Flaky {
        failures: AtomicUsize,
        error: ChainError,
    }

    #[async_trait]
    impl ProtectionCheck for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn evaluate(
            &self,
            _candidate: &TradeCandidate,
            _ctx: &CheckContext,
        ) -> Result<CheckOutcome, ChainError> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(self.error.clone())
            } else {
                Ok(CheckOutcome::pass(json!({})))
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            timeout: Duration::from_millis(200),
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn later_checks_never_run_after_a_rejection() {
        let counters: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let checks: Vec<Box<dyn ProtectionCheck>> = ["a", "b", "c", "d"]
            .into_iter()
            .zip(&counters)
            .map(|(name, calls)| {
                Box::new(Counting {
                    name,
                    pass: name != "b",
                    calls: calls.clone(),
                }) as Box<dyn ProtectionCheck>
            })
            .collect();
        let pipeline = ProtectionPipeline::new(checks, fast_retry(), 10.0);
        let mut candidate = candidate();
        let result = pipeline
            .run(&mut candidate, &context(Arc::new(MockAccessor::default())))
            .await;

        assert!(!result.ok);
        assert_eq!(result.failed_check, Some("b"));
        assert_eq!(result.reason.as_deref(), Some("nope"));
        assert_eq!(result.trace.len(), 2);
        let calls: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(calls, vec![1, 1, 0, 0]);
        assert_eq!(candidate.status, CandidateStatus::Pending);
    }

    #[tokio::test]
    async fn success_reports_trace_and_profit_lock() {
        let calls = Arc::new(AtomicUsize::new(0));
        let checks: Vec<Box<dyn ProtectionCheck>> = vec![Box::new(Counting {
            name: "only",
            pass: true,
            calls,
        })];
        let pipeline = ProtectionPipeline::new(checks, fast_retry(), 10.0);
        let mut candidate = candidate();
        candidate.estimated_profit_usd = Some(50.0);
        let result = pipeline
            .run(&mut candidate, &context(Arc::new(MockAccessor::default())))
            .await;
        assert!(result.ok);
        assert_eq!(result.trace.len(), 1);
        assert_eq!(result.trace[0].name, "only");
        assert_eq!(result.profit_lock_usd, Some(5.0));
        assert_eq!(candidate.status, CandidateStatus::Approved);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_once() {
        let checks: Vec<Box<dyn ProtectionCheck>> = vec![Box::new(Flaky {
            failures: AtomicUsize::new(1),
            error: ChainError::Timeout,
        })];
        let pipeline = ProtectionPipeline::new(checks, fast_retry(), 0.0);
        let mut candidate = candidate();
        let ctx = context(Arc::new(MockAccessor::default()));
        assert!(pipeline.run(&mut candidate, &ctx).await.ok);

        let checks: Vec<Box<dyn ProtectionCheck>> = vec![Box::new(Flaky {
            failures: AtomicUsize::new(2),
            error: ChainError::Connection("reset".into()),
        })];
        let pipeline = ProtectionPipeline::new(checks, fast_retry(), 0.0);
        let result = pipeline.run(&mut candidate, &ctx).await;
        assert!(!result.ok);
        assert!(result.infra_error);
        assert_eq!(result.failed_check, Some("flaky"));
    }

    #[test]
    fn gas_update_replaces_the_default_estimate() {
        let mut candidate = candidate();
        candidate.estimated_profit_usd = Some(40.0);
        apply_update(
            &mut candidate,
            CandidateUpdate::Gas {
                gas_limit: U256::from(300_000u64),
                fee_per_gas: U256::from(10u64),
                cost_usd: 7.0,
            },
        )
        .unwrap();
        assert_eq!(candidate.estimated_profit_usd, Some(35.0));
        assert_eq!(candidate.estimated_gas_cost_usd, 7.0);
        assert_eq!(candidate.gas_limit, Some(U256::from(300_000u64)));
    }

    #[test]
    fn standard_pipeline_order() {
        let pipeline = ProtectionPipeline::standard(
            &ProtectionConfig::default(),
            Address::from_low_u64_be(1),
            Arc::new(CooldownTracker::new(Duration::from_secs(3))),
            None,
            Arc::new(WalletReservations::default()),
        );
        assert_eq!(
            pipeline.check_names(),
            vec!["cooldown", "activity", "slippage", "profit", "gas", "balance", "reserve_clamp"]
        );
    }
}
