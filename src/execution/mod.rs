//! Signs and submits approved trades.
//!
//! Every executor contract gets its own attempt: gas gate, nonce, signature,
//! relay fan-out and an optional wait for the receipt. The candidate's outcome
//! is the aggregate of those attempts.

use std::sync::Arc;
use std::time::Duration;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, H256, TransactionRequest, U256};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::arbitrage::{CandidateStatus, TradeCandidate};
use crate::builder::{TradePlan, encode_execute};
use crate::chain::{AccessorSource, CallRequest, FeeData};
use crate::dex::calc;
use crate::oracle::PriceBook;
use crate::utils::RetryPolicy;

pub mod nonce;
pub mod relay;

pub use nonce::NonceManager;
pub use relay::{RelayFailure, RelayFanout, RelayReceipt};

/// A deployed flash-loan executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorContract {
    pub name: String,
    pub address: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    Confirmed,
    Reverted,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "value")]
pub enum AttemptOutcome {
    Submitted(H256),
    Skipped(String),
    Failed(String),
}

/// One executor contract tried for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionAttempt {
    pub executor: String,
    pub outcome: AttemptOutcome,
    pub nonce: Option<U256>,
    pub gas_cost_usd: Option<f64>,
    pub relay: Option<String>,
    pub confirmation: Option<Confirmation>,
}

impl ExecutionAttempt {
    fn new(executor: &ExecutorContract, outcome: AttemptOutcome) -> Self {
        Self {
            executor: executor.name.clone(),
            outcome,
            nonce: None,
            gas_cost_usd: None,
            relay: None,
            confirmation: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub attempts: Vec<ExecutionAttempt>,
}

impl ExecutionReport {
    /// Any submission wins; failure needs every attempt to have failed.
    pub fn status(&self) -> CandidateStatus {
        let submitted = self
            .attempts
            .iter()
            .any(|a| matches!(a.outcome, AttemptOutcome::Submitted(_)));
        if submitted {
            CandidateStatus::Submitted
        } else if !self.attempts.is_empty()
            && self
                .attempts
                .iter()
                .all(|a| matches!(a.outcome, AttemptOutcome::Failed(_)))
        {
            CandidateStatus::Failed
        } else {
            CandidateStatus::Skipped
        }
    }

    pub fn tx_hash(&self) -> Option<H256> {
        self.attempts.iter().find_map(|a| match a.outcome {
            AttemptOutcome::Submitted(hash) => Some(hash),
            _ => None,
        })
    }

    /// Skip and failure reasons, prefixed with the executor name.
    pub fn reason(&self) -> Option<String> {
        let reasons: Vec<String> = self
            .attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                AttemptOutcome::Skipped(r) | AttemptOutcome::Failed(r) => Some(format!("{}: {r}", a.executor)),
                AttemptOutcome::Submitted(_) => None,
            })
            .collect();
        (!reasons.is_empty()).then(|| reasons.join("; "))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub chain_id: u64,
    /// Sign but never relay.
    pub dry_run: bool,
    /// Keep trying the remaining executors after one submission.
    pub attempt_all_executors: bool,
    pub relay_timeout: Duration,
    /// Wait this long for a receipt after submission. `None` returns at once.
    pub confirm_timeout: Option<Duration>,
    pub confirm_poll: Duration,
    pub gas_buffer_pct: u64,
    pub native_token: Address,
    pub oracle_max_age: Duration,
    pub retry: RetryPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            dry_run: false,
            attempt_all_executors: false,
            relay_timeout: Duration::from_secs(4),
            confirm_timeout: None,
            confirm_poll: Duration::from_secs(2),
            gas_buffer_pct: 20,
            native_token: Address::zero(),
            oracle_max_age: Duration::from_secs(180),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ExecutionOrchestrator {
    config: ExecutionConfig,
    wallet: LocalWallet,
    executors: Vec<ExecutorContract>,
    relays: RelayFanout,
    nonces: NonceManager,
    reads: Arc<dyn AccessorSource>,
    prices: Arc<PriceBook>,
}

impl ExecutionOrchestrator {
    pub fn new(
        config: ExecutionConfig,
        wallet: LocalWallet,
        executors: Vec<ExecutorContract>,
        relays: RelayFanout,
        reads: Arc<dyn AccessorSource>,
        prices: Arc<PriceBook>,
    ) -> Self {
        let wallet = wallet.with_chain_id(config.chain_id);
        let nonces = NonceManager::new(wallet.address());
        Self {
            config,
            wallet,
            executors,
            relays,
            nonces,
            reads,
            prices,
        }
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    pub fn executors(&self) -> &[ExecutorContract] {
        &self.executors
    }

    pub async fn execute(&self, candidate: &TradeCandidate, plan: &TradePlan) -> ExecutionReport {
        let data = encode_execute(plan);
        let mut report = ExecutionReport::default();
        let fees = self
            .config
            .retry
            .run("fee_data", || {
                let reads = self.reads.acquire();
                async move { reads.fee_data().await }
            })
            .await;
        let fees = match fees {
            Ok(fees) => fees,
            Err(err) => {
                warn!(error = %err, fingerprint = %candidate.fingerprint, "[EXEC] fee data unavailable");
                for executor in &self.executors {
                    report.attempts.push(ExecutionAttempt::new(
                        executor,
                        AttemptOutcome::Failed(format!("fee data unavailable: {err}")),
                    ));
                }
                return report;
            }
        };

        for executor in &self.executors {
            let attempt = self.attempt(executor, candidate, &data, &fees).await;
            let submitted = matches!(attempt.outcome, AttemptOutcome::Submitted(_));
            report.attempts.push(attempt);
            if submitted && !self.config.attempt_all_executors {
                break;
            }
        }
        info!(
            fingerprint = %candidate.fingerprint,
            status = ?report.status(),
            tx_hash = ?report.tx_hash(),
            attempts = report.attempts.len(),
            "[EXEC] candidate finished"
        );
        report
    }

    async fn attempt(
        &self,
        executor: &ExecutorContract,
        candidate: &TradeCandidate,
        data: &Bytes,
        fees: &FeeData,
    ) -> ExecutionAttempt {
        let request = CallRequest {
            from: Some(self.wallet.address()),
            to: executor.address,
            data: data.clone(),
        };
        let estimate = self
            .config
            .retry
            .run("estimate_gas", || {
                let reads = self.reads.acquire();
                let request = &request;
                async move { reads.estimate_gas(request).await }
            })
            .await;
        let estimate = match estimate {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!(executor = %executor.name, error = %err, "[EXEC] estimate failed");
                return ExecutionAttempt::new(executor, AttemptOutcome::Failed(format!("gas estimation failed: {err}")));
            }
        };
        let gas_limit = estimate.saturating_mul(U256::from(100 + self.config.gas_buffer_pct)) / 100;
        let Some(fee_per_gas) = fees.fee_per_gas() else {
            return ExecutionAttempt::new(executor, AttemptOutcome::Failed("node returned no fee data".into()));
        };

        // gas gate
        let native_usd = match self.prices.fresh_usd(self.config.native_token, self.config.oracle_max_age) {
            Ok(price) => price,
            Err(err) => {
                return ExecutionAttempt::new(executor, AttemptOutcome::Skipped(format!("native price unusable: {err}")));
            }
        };
        let gas_cost_usd = calc::to_f64(gas_limit.saturating_mul(fee_per_gas), 18) * native_usd;
        let profit_before_gas = candidate.estimated_profit_usd.unwrap_or(0.0) + candidate.estimated_gas_cost_usd;
        if gas_cost_usd > profit_before_gas {
            info!(executor = %executor.name, gas_cost_usd, profit_before_gas, "[EXEC] gas exceeds profit, skipping");
            let mut attempt = ExecutionAttempt::new(
                executor,
                AttemptOutcome::Skipped(format!(
                    "gas ${gas_cost_usd:.2} exceeds profit ${profit_before_gas:.2}"
                )),
            );
            attempt.gas_cost_usd = Some(gas_cost_usd);
            return attempt;
        }

        let nonce = match self.nonces.next(self.reads.as_ref(), &self.config.retry).await {
            Ok(nonce) => nonce,
            Err(err) => {
                return ExecutionAttempt::new(executor, AttemptOutcome::Failed(format!("nonce unavailable: {err}")));
            }
        };
        let mut attempt = ExecutionAttempt::new(executor, AttemptOutcome::Skipped(String::new()));
        attempt.nonce = Some(nonce);
        attempt.gas_cost_usd = Some(gas_cost_usd);

        let tx = self.transaction(executor.address, data.clone(), gas_limit, fees, nonce);
        let raw = match self.wallet.sign_transaction_sync(&tx) {
            Ok(signature) => tx.rlp_signed(&signature),
            Err(err) => {
                self.nonces.release(nonce).await;
                attempt.outcome = AttemptOutcome::Failed(format!("signing failed: {err}"));
                return attempt;
            }
        };

        if self.config.dry_run {
            self.nonces.release(nonce).await;
            info!(executor = %executor.name, %nonce, bytes = raw.len(), "[EXEC] dry run, not relaying");
            attempt.outcome = AttemptOutcome::Skipped("dry run".into());
            return attempt;
        }

        let receipt = match self.relays.submit(&raw).await {
            Ok(receipt) => receipt,
            Err(failure) => {
                // the nonce never reached a mempool
                self.nonces.release(nonce).await;
                warn!(executor = %executor.name, %nonce, error = %failure, "[EXEC] submission failed");
                attempt.outcome = AttemptOutcome::Failed(failure.to_string());
                return attempt;
            }
        };
        info!(executor = %executor.name, %nonce, tx_hash = ?receipt.tx_hash, relay = %receipt.relay, "[EXEC] submitted");
        attempt.relay = Some(receipt.relay);
        attempt.outcome = AttemptOutcome::Submitted(receipt.tx_hash);

        if let Some(limit) = self.config.confirm_timeout {
            let confirmation = self.await_receipt(receipt.tx_hash, limit).await;
            if confirmation == Confirmation::Reverted {
                attempt.outcome = AttemptOutcome::Failed(format!("transaction {:?} reverted", receipt.tx_hash));
            }
            attempt.confirmation = Some(confirmation);
        }
        attempt
    }

    fn transaction(&self, to: Address, data: Bytes, gas: U256, fees: &FeeData, nonce: U256) -> TypedTransaction {
        let from = self.wallet.address();
        match (fees.max_fee_per_gas, fees.max_priority_fee_per_gas) {
            (Some(max_fee), Some(tip)) => Eip1559TransactionRequest::new()
                .from(from)
                .to(to)
                .data(data)
                .gas(gas)
                .max_fee_per_gas(max_fee)
                .max_priority_fee_per_gas(tip)
                .nonce(nonce)
                .chain_id(self.config.chain_id)
                .into(),
            _ => TransactionRequest::new()
                .from(from)
                .to(to)
                .data(data)
                .gas(gas)
                .gas_price(fees.gas_price.or(fees.max_fee_per_gas).unwrap_or_default())
                .nonce(nonce)
                .chain_id(self.config.chain_id)
                .into(),
        }
    }

    async fn await_receipt(&self, tx_hash: H256, limit: Duration) -> Confirmation {
        let poll = async {
            loop {
                let reads = self.reads.acquire();
                match reads.receipt_status(tx_hash).await {
                    Ok(Some(true)) => return Confirmation::Confirmed,
                    Ok(Some(false)) => return Confirmation::Reverted,
                    Ok(None) => {}
                    Err(err) => debug!(?tx_hash, error = %err, "[EXEC] receipt read failed"),
                }
                tokio::time::sleep(self.config.confirm_poll).await;
            }
        };
        match tokio::time::timeout(limit, poll).await {
            Ok(confirmation) => confirmation,
            Err(_) => {
                warn!(?tx_hash, "[EXEC] no receipt before timeout");
                Confirmation::TimedOut
            }
        }
    }
}
