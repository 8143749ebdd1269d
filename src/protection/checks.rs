//! The seven standard guards, in pipeline order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use futures::future::join_all;
use serde_json::json;

use super::tracking::{ActivityTracker, CooldownTracker, WalletReservations};
use super::{CandidateUpdate, CheckContext, CheckOutcome, ProtectionCheck};
use crate::arbitrage::{Funding, TradeCandidate};
use crate::builder::{TradeBuilder, encode_execute};
use crate::chain::CallRequest;
use crate::dex::calc::{self, mul_div, safe_input_for, slippage_gap_ppm};
use crate::dex::read_live_reserves;
use crate::errors::ChainError;

/// Rejects a route resubmitted inside its cooldown window.
pub struct CooldownCheck {
    tracker: Arc<CooldownTracker>,
}

impl CooldownCheck {
    pub fn new(tracker: Arc<CooldownTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl ProtectionCheck for CooldownCheck {
    fn name(&self) -> &'static str {
        "cooldown"
    }

    async fn evaluate(
        &self,
        candidate: &TradeCandidate,
        _ctx: &CheckContext,
    ) -> Result<CheckOutcome, ChainError> {
        Ok(match self.tracker.remaining(&candidate.fingerprint) {
            Some(left) => CheckOutcome::reject(
                format!("route in cooldown for another {}ms", left.as_millis()),
                json!({ "remaining_ms": left.as_millis() as u64 }),
            ),
            None => CheckOutcome::pass(json!({})),
        })
    }
}

/// Rejects routes touched by a recent unconfirmed swap. Passes when no
/// intent feed is wired in.
pub struct ActivityCheck {
    tracker: Option<Arc<ActivityTracker>>,
}

impl ActivityCheck {
    pub fn new(tracker: Option<Arc<ActivityTracker>>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl ProtectionCheck for ActivityCheck {
    fn name(&self) -> &'static str {
        "activity"
    }

    async fn evaluate(
        &self,
        candidate: &TradeCandidate,
        _ctx: &CheckContext,
    ) -> Result<CheckOutcome, ChainError> {
        let Some(tracker) = &self.tracker else {
            return Ok(CheckOutcome::pass(json!({ "feed": "absent" })));
        };
        Ok(match tracker.conflict(&candidate.legs) {
            Some(intent) => CheckOutcome::reject(
                format!("pending swap {:?} touches the route", intent.hash),
                json!({ "tx": format!("{:?}", intent.hash), "to": format!("{:?}", intent.to) }),
            ),
            None => CheckOutcome::pass(json!({ "pending": tracker.len() })),
        })
    }
}

/// Bounds the gap between the expected output and the on-chain minimum.
pub struct SlippageCheck {
    pub max_gap_ppm: u64,
}

impl SlippageCheck {
    pub fn from_pct(max_pct: f64) -> Self {
        Self {
            max_gap_ppm: (max_pct * 10_000.0).round() as u64,
        }
    }
}

#[async_trait]
impl ProtectionCheck for SlippageCheck {
    fn name(&self) -> &'static str {
        "slippage"
    }

    async fn evaluate(
        &self,
        candidate: &TradeCandidate,
        _ctx: &CheckContext,
    ) -> Result<CheckOutcome, ChainError> {
        let (expected, min_out) = (candidate.expected_out, candidate.min_out);
        let details = json!({ "expected_out": expected.to_string(), "min_out": min_out.to_string() });
        if expected.is_zero() {
            return Ok(CheckOutcome::reject("expected output is zero", details));
        }
        if min_out > expected {
            return Ok(CheckOutcome::reject("minimum output exceeds expected output", details));
        }
        let gap = slippage_gap_ppm(expected, min_out).unwrap_or(u64::MAX);
        if gap > self.max_gap_ppm {
            return Ok(CheckOutcome::reject(
                format!(
                    "slippage {:.2}% above limit {:.2}%",
                    gap as f64 / 10_000.0,
                    self.max_gap_ppm as f64 / 10_000.0
                ),
                details,
            ));
        }
        Ok(CheckOutcome::pass(details))
    }
}

/// Requires an absolute and a notional-relative profit.
pub struct ProfitCheck {
    pub min_profit_usd: f64,
    pub min_profit_bps: f64,
    pub max_price_age: Duration,
}

#[async_trait]
impl ProtectionCheck for ProfitCheck {
    fn name(&self) -> &'static str {
        "profit"
    }

    async fn evaluate(
        &self,
        candidate: &TradeCandidate,
        ctx: &CheckContext,
    ) -> Result<CheckOutcome, ChainError> {
        let (notional, profit) = match candidate.estimated_profit_usd {
            Some(profit) if candidate.loan_amount_usd > 0.0 => (candidate.loan_amount_usd, profit),
            _ => {
                let price = match ctx.prices.fresh_usd(candidate.loan_asset, self.max_price_age) {
                    Ok(price) => price,
                    Err(err) => {
                        return Ok(CheckOutcome::reject(
                            format!("loan asset price unusable: {err}"),
                            json!({}),
                        ));
                    }
                };
                let notional = calc::to_f64(candidate.loan_amount, candidate.loan_decimals) * price;
                (notional, notional * candidate.edge() - candidate.estimated_gas_cost_usd)
            }
        };
        let bps = if notional > 0.0 {
            profit / notional * 10_000.0
        } else {
            0.0
        };
        let details = json!({ "profit_usd": profit, "notional_usd": notional, "profit_bps": bps });
        if profit < self.min_profit_usd {
            return Ok(CheckOutcome::reject(
                format!("profit ${profit:.2} below ${:.2}", self.min_profit_usd),
                details,
            ));
        }
        if bps < self.min_profit_bps {
            return Ok(CheckOutcome::reject(
                format!("profit {bps:.1} bps below {:.1} bps", self.min_profit_bps),
                details,
            ));
        }
        Ok(CheckOutcome::pass(details))
    }
}

/// Estimates the executor call and enforces fee and gas ceilings.
pub struct GasCheck {
    pub executor: Address,
    pub native_token: Address,
    pub max_fee_per_gas: U256,
    pub max_gas_limit: U256,
    /// Headroom added on top of the node's estimate.
    pub buffer_pct: u64,
    pub max_price_age: Duration,
}

#[async_trait]
impl ProtectionCheck for GasCheck {
    fn name(&self) -> &'static str {
        "gas"
    }

    async fn evaluate(
        &self,
        candidate: &TradeCandidate,
        ctx: &CheckContext,
    ) -> Result<CheckOutcome, ChainError> {
        let plan = match TradeBuilder::plan(candidate) {
            Ok(plan) => plan,
            Err(err) => {
                return Ok(CheckOutcome::reject(format!("route cannot be encoded: {err}"), json!({})));
            }
        };
        let request = CallRequest {
            from: Some(ctx.wallet),
            to: self.executor,
            data: encode_execute(&plan),
        };
        let reads = ctx.reads.acquire();
        let (estimate, fees) = match futures::try_join!(reads.estimate_gas(&request), reads.fee_data()) {
            Ok(pair) => pair,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => {
                return Ok(CheckOutcome::reject(format!("gas estimation failed: {err}"), json!({})));
            }
        };

        let Some(fee_per_gas) = fees.fee_per_gas() else {
            return Ok(CheckOutcome::reject("node returned no fee data", json!({})));
        };
        let details = json!({
            "estimate": estimate.to_string(),
            "fee_per_gas": fee_per_gas.to_string(),
            "eip1559": fees.is_eip1559(),
        });
        if fee_per_gas > self.max_fee_per_gas {
            return Ok(CheckOutcome::reject(
                format!("fee per gas {fee_per_gas} above ceiling {}", self.max_fee_per_gas),
                details,
            ));
        }
        if estimate > self.max_gas_limit {
            return Ok(CheckOutcome::reject(
                format!("gas estimate {estimate} above ceiling {}", self.max_gas_limit),
                details,
            ));
        }
        let native_usd = match ctx.prices.fresh_usd(self.native_token, self.max_price_age) {
            Ok(price) => price,
            Err(err) => {
                return Ok(CheckOutcome::reject(format!("native price unusable: {err}"), details));
            }
        };
        let gas_limit = estimate.saturating_mul(U256::from(100 + self.buffer_pct)) / 100;
        let cost_usd = calc::to_f64(gas_limit.saturating_mul(fee_per_gas), 18) * native_usd;
        Ok(CheckOutcome::pass(details).with_update(CandidateUpdate::Gas {
            gas_limit,
            fee_per_gas,
            cost_usd,
        }))
    }
}

/// Wallet-funded trades need the wallet balance; loan-funded trades need one
/// flash-loan source holding the asset.
pub struct BalanceCheck {
    pub flash_sources: Vec<Address>,
    pub reservations: Arc<WalletReservations>,
}

#[async_trait]
impl ProtectionCheck for BalanceCheck {
    fn name(&self) -> &'static str {
        "balance"
    }

    async fn evaluate(
        &self,
        candidate: &TradeCandidate,
        ctx: &CheckContext,
    ) -> Result<CheckOutcome, ChainError> {
        let (asset, amount) = (candidate.loan_asset, candidate.loan_amount);
        let reads = ctx.reads.acquire();
        match candidate.funding {
            Funding::Wallet => {
                let reserved = self
                    .reservations
                    .reserve(&candidate.fingerprint, asset, amount, || {
                        reads.balance(ctx.wallet, Some(asset))
                    })
                    .await?;
                Ok(if reserved {
                    CheckOutcome::pass(json!({ "source": "wallet" }))
                } else {
                    CheckOutcome::reject(
                        "wallet balance does not cover the trade",
                        json!({ "required": amount.to_string() }),
                    )
                })
            }
            Funding::FlashLoan => {
                if self.flash_sources.is_empty() {
                    return Ok(CheckOutcome::reject("no flash-loan source configured", json!({})));
                }
                let balances =
                    join_all(self.flash_sources.iter().map(|s| reads.balance(*s, Some(asset)))).await;
                let mut transient = None;
                for (source, balance) in self.flash_sources.iter().zip(balances) {
                    match balance {
                        Ok(held) if held >= amount => {
                            return Ok(CheckOutcome::pass(json!({ "source": format!("{source:?}") })));
                        }
                        Ok(_) => {}
                        Err(err) if err.is_transient() => transient = transient.or(Some(err)),
                        Err(_) => {}
                    }
                }
                if let Some(err) = transient {
                    return Err(err);
                }
                Ok(CheckOutcome::reject(
                    "no flash-loan source holds enough of the loan asset",
                    json!({ "required": amount.to_string(), "sources": self.flash_sources.len() }),
                ))
            }
        }
    }
}

/// Clamps the loan so no leg moves its venue's live price by more than the
/// configured impact. Venues without a recognised reserve query are skipped.
pub struct ReserveClampCheck {
    pub max_impact_ppm: u64,
}

impl ReserveClampCheck {
    pub fn from_pct(max_pct: f64) -> Self {
        Self {
            max_impact_ppm: (max_pct * 10_000.0).round() as u64,
        }
    }
}

#[async_trait]
impl ProtectionCheck for ReserveClampCheck {
    fn name(&self) -> &'static str {
        "reserve_clamp"
    }

    async fn evaluate(
        &self,
        candidate: &TradeCandidate,
        ctx: &CheckContext,
    ) -> Result<CheckOutcome, ChainError> {
        let Some(bounds) = candidate.leg_bounds() else {
            return Ok(CheckOutcome::reject("route no longer quotes", json!({})));
        };
        let reads = ctx.reads.acquire();
        let mut allowed = candidate.loan_amount;
        let mut skipped = Vec::new();
        for (leg, (amount_in, _)) in candidate.legs.iter().zip(bounds) {
            let live = match read_live_reserves(reads.as_ref(), &leg.pool).await {
                Ok(Some(live)) => live,
                Ok(None) | Err(ChainError::Unsupported(_)) => {
                    skipped.push(format!("{:?}", leg.pool.address));
                    continue;
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    return Ok(CheckOutcome::reject(
                        format!("reserve read failed for {:?}: {err}", leg.pool.address),
                        json!({}),
                    ));
                }
            };
            let reserve_in = match leg.pool.token_index(leg.token_in) {
                Some(0) => live.0,
                _ => live.1,
            };
            let safe = safe_input_for(reserve_in, self.max_impact_ppm);
            if amount_in > safe {
                let scaled = mul_div(candidate.loan_amount, safe, amount_in).unwrap_or_default();
                allowed = allowed.min(scaled);
            }
        }

        let details = json!({ "skipped": skipped, "allowed": allowed.to_string() });
        if allowed.is_zero() {
            return Ok(CheckOutcome::reject("no safe trade size", details));
        }
        if allowed < candidate.loan_amount {
            return Ok(CheckOutcome::pass(details).with_update(CandidateUpdate::ClampSize {
                loan_amount: allowed,
            }));
        }
        Ok(CheckOutcome::pass(details))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::arbitrage::CandidateStatus;
    use crate::chain::FeeData;
    use crate::chain::mock::MockAccessor;
    use crate::dex::test_pools::token;
    use crate::models::{SwapIntent, VenueKind};
    use ethers::abi::{self, Token};
    use ethers::types::H256;
    use ethers::utils::id;

    async fn run(check: &dyn ProtectionCheck, candidate: &TradeCandidate, accessor: Arc<MockAccessor>) -> CheckOutcome {
        check.evaluate(candidate, &context(accessor)).await.unwrap()
    }

    fn mock() -> Arc<MockAccessor> {
        Arc::new(MockAccessor::default())
    }

    #[tokio::test]
    async fn cooldown_blocks_recent_routes() {
        let tracker = Arc::new(CooldownTracker::new(Duration::from_secs(3)));
        let check = CooldownCheck::new(tracker.clone());
        let candidate = candidate();
        assert!(run(&check, &candidate, mock()).await.result.ok);
        tracker.mark_submitted(&candidate.fingerprint);
        let outcome = run(&check, &candidate, mock()).await;
        assert!(!outcome.result.ok);
        assert!(outcome.result.reason.unwrap().contains("cooldown"));
    }

    #[tokio::test]
    async fn activity_without_feed_passes() {
        let candidate = candidate();
        assert!(run(&ActivityCheck::new(None), &candidate, mock()).await.result.ok);

        let tracker = Arc::new(ActivityTracker::new(Duration::from_secs(10)));
        tracker.record(SwapIntent {
            hash: H256::from_low_u64_be(9),
            from: Address::from_low_u64_be(0xbad),
            to: candidate.legs[0].pool.router,
            dex_kind: VenueKind::ConstantProductV2,
            token_in: token(2),
            token_out: token(1),
            amount_in: U256::exp10(18),
            min_out: U256::zero(),
        });
        let outcome = run(&ActivityCheck::new(Some(tracker)), &candidate, mock()).await;
        assert!(!outcome.result.ok);
    }

    #[tokio::test]
    async fn slippage_boundary() {
        let check = SlippageCheck::from_pct(1.5);
        let mut candidate = candidate();
        candidate.expected_out = U256::from(1_000u64);

        candidate.min_out = U256::from(984u64);
        assert!(!run(&check, &candidate, mock()).await.result.ok);

        candidate.min_out = U256::from(990u64);
        assert!(run(&check, &candidate, mock()).await.result.ok);

        candidate.min_out = U256::from(1_001u64);
        assert!(!run(&check, &candidate, mock()).await.result.ok);

        candidate.expected_out = U256::zero();
        candidate.min_out = U256::zero();
        assert!(!run(&check, &candidate, mock()).await.result.ok);
    }

    fn profit_check() -> ProfitCheck {
        ProfitCheck {
            min_profit_usd: 10.0,
            min_profit_bps: 5.0,
            max_price_age: Duration::from_secs(180),
        }
    }

    #[tokio::test]
    async fn direct_scenario_clears_profit_threshold() {
        // $10k notional at a 1.005% edge
        let candidate = candidate();
        let outcome = run(&profit_check(), &candidate, mock()).await;
        assert!(outcome.result.ok, "{:?}", outcome.result.reason);
        let profit = outcome.result.details["profit_usd"].as_f64().unwrap();
        assert!((profit - 98.5).abs() < 0.1, "profit was {profit}");
    }

    #[tokio::test]
    async fn stale_price_fails_closed() {
        let candidate = candidate();
        let ctx = context(mock());
        ctx.prices.set_at(
            candidate.loan_asset,
            1.0,
            std::time::Instant::now() - Duration::from_secs(600),
        );
        let outcome = profit_check().evaluate(&candidate, &ctx).await.unwrap();
        assert!(!outcome.result.ok);
        assert!(outcome.result.reason.unwrap().contains("price"));
    }

    #[tokio::test]
    async fn known_profit_is_used_directly() {
        let mut candidate = candidate();
        candidate.estimated_profit_usd = Some(4.0);
        assert!(!run(&profit_check(), &candidate, mock()).await.result.ok);
    }

    fn gas_check() -> GasCheck {
        GasCheck {
            executor: Address::from_low_u64_be(0xe0),
            native_token: token(2),
            max_fee_per_gas: U256::from(100u64) * U256::exp10(9),
            max_gas_limit: U256::from(1_000_000u64),
            buffer_pct: 20,
            max_price_age: Duration::from_secs(180),
        }
    }

    #[tokio::test]
    async fn gas_is_priced_and_fed_back() {
        let candidate = candidate();
        let outcome = run(&gas_check(), &candidate, mock()).await;
        assert!(outcome.result.ok);
        let Some(CandidateUpdate::Gas {
            gas_limit,
            fee_per_gas,
            cost_usd,
        }) = outcome.update
        else {
            panic!("gas check must return a gas update");
        };
        assert_eq!(gas_limit, U256::from(300_000u64));
        assert_eq!(fee_per_gas, U256::from(30_000_000_000u64));
        // 300k gas * 30 gwei = 0.009 native at $1
        assert!((cost_usd - 0.009).abs() < 1e-9);
    }

    #[tokio::test]
    async fn gas_limit_ceiling_applies_to_the_raw_estimate() {
        let candidate = candidate();

        let accessor = mock();
        *accessor.gas_estimate.lock() = Ok(U256::from(1_000_000u64));
        let outcome = run(&gas_check(), &candidate, accessor).await;
        assert!(outcome.result.ok, "rejected: {:?}", outcome.result.reason);
        let Some(CandidateUpdate::Gas { gas_limit, .. }) = outcome.update else {
            panic!("gas check must return a gas update");
        };
        // the buffer goes on top of an estimate sitting exactly at the ceiling
        assert_eq!(gas_limit, U256::from(1_200_000u64));

        let accessor = mock();
        *accessor.gas_estimate.lock() = Ok(U256::from(1_000_001u64));
        let outcome = run(&gas_check(), &candidate, accessor).await;
        assert!(!outcome.result.ok);
        assert!(outcome.result.reason.unwrap().contains("above ceiling"));
    }

    #[tokio::test]
    async fn gas_ceilings_and_failed_estimates_reject() {
        let candidate = candidate();

        let accessor = mock();
        *accessor.fee.lock() = Ok(FeeData {
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            gas_price: Some(U256::from(500u64) * U256::exp10(9)),
        });
        assert!(!run(&gas_check(), &candidate, accessor).await.result.ok);

        let accessor = mock();
        *accessor.gas_estimate.lock() = Ok(U256::from(2_000_000u64));
        assert!(!run(&gas_check(), &candidate, accessor).await.result.ok);

        let accessor = mock();
        *accessor.gas_estimate.lock() = Err(ChainError::Rpc("execution reverted".into()));
        let outcome = run(&gas_check(), &candidate, accessor).await;
        assert!(outcome.result.reason.unwrap().contains("estimation failed"));

        let accessor = mock();
        accessor.inject(ChainError::Timeout);
        let err = gas_check()
            .evaluate(&candidate, &context(accessor))
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::Timeout);
    }

    #[tokio::test]
    async fn flash_loan_needs_one_funded_source() {
        let candidate = candidate();
        let (dry, funded) = (Address::from_low_u64_be(0xa1), Address::from_low_u64_be(0xa2));
        let check = BalanceCheck {
            flash_sources: vec![dry, funded],
            reservations: Arc::new(WalletReservations::default()),
        };
        let accessor = mock();
        accessor.set_balance(funded, Some(candidate.loan_asset), candidate.loan_amount);
        assert!(run(&check, &candidate, accessor).await.result.ok);
        assert!(!run(&check, &candidate, mock()).await.result.ok);
    }

    #[tokio::test]
    async fn wallet_funding_reserves_balance() {
        let mut candidate = candidate();
        candidate.funding = Funding::Wallet;
        let reservations = Arc::new(WalletReservations::default());
        let check = BalanceCheck {
            flash_sources: Vec::new(),
            reservations: reservations.clone(),
        };
        let accessor = mock();
        accessor.set_balance(wallet(), Some(candidate.loan_asset), candidate.loan_amount);
        assert!(run(&check, &candidate, accessor.clone()).await.result.ok);
        assert_eq!(reservations.held_for(candidate.loan_asset), candidate.loan_amount);

        let mut other = candidate.clone();
        other.fingerprint = "0xother".into();
        assert!(!run(&check, &other, accessor).await.result.ok);
    }

    fn encoded_reserves(r0: U256, r1: U256) -> ethers::types::Bytes {
        abi::encode(&[Token::Uint(r0), Token::Uint(r1), Token::Uint(U256::zero())]).into()
    }

    #[tokio::test]
    async fn thin_live_reserves_clamp_the_size() {
        let candidate = candidate();
        let accessor = mock();
        let selector: [u8; 4] = id("getReserves()");
        // buy venue drained to 100k USDC; 1% impact allows ~1010 USDC in
        let thin = U256::from(100_000u64) * U256::exp10(18);
        accessor.set_call(candidate.legs[0].pool.address, selector, Ok(encoded_reserves(thin, thin)));
        let deep = U256::exp10(30);
        accessor.set_call(candidate.legs[1].pool.address, selector, Ok(encoded_reserves(deep, deep)));

        let outcome = run(&ReserveClampCheck::from_pct(1.0), &candidate, accessor).await;
        assert!(outcome.result.ok);
        let Some(CandidateUpdate::ClampSize { loan_amount }) = outcome.update else {
            panic!("expected a clamp");
        };
        assert!(loan_amount < candidate.loan_amount);
        assert_eq!(loan_amount, safe_input_for(thin, 10_000));
        assert_eq!(candidate.status, CandidateStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_reserve_query_is_skipped() {
        let mut candidate = candidate();
        let mut odd = (*candidate.legs[0].pool).clone();
        odd.kind = VenueKind::WeightedVault;
        odd.pool_id = None;
        candidate.legs[0].pool = Arc::new(odd);
        let accessor = mock();
        let deep = U256::exp10(30);
        accessor.set_call(
            candidate.legs[1].pool.address,
            id("getReserves()"),
            Ok(encoded_reserves(deep, deep)),
        );
        let outcome = run(&ReserveClampCheck::from_pct(1.0), &candidate, accessor).await;
        assert!(outcome.result.ok);
        assert!(outcome.update.is_none());
        assert_eq!(outcome.result.details["skipped"].as_array().unwrap().len(), 1);
    }
}
