//! Sizing and pricing of detected opportunities.

use std::sync::Arc;

use ethers::types::U256;
use tracing::debug;

use super::types::{CandidateStatus, Funding, Opportunity, TradeCandidate};
use crate::dex::{self, calc};
use crate::index::IndexSnapshot;
use crate::oracle::PriceBook;
use crate::utils::unix_millis;

#[derive(Debug, Clone)]
pub struct CandidateConfig {
    /// Target notional per trade.
    pub loan_usd: f64,
    /// Cap on the notional as a share of the thinnest leg's USD liquidity.
    pub max_pool_share: f64,
    /// Tolerance applied to every leg's minimum output.
    pub slippage_bps: u32,
    /// Gas cost assumed until the gas check prices the real transaction.
    pub default_gas_cost_usd: f64,
    pub funding: Funding,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            loan_usd: 10_000.0,
            max_pool_share: 0.05,
            slippage_bps: 50,
            default_gas_cost_usd: 5.0,
            funding: Funding::FlashLoan,
        }
    }
}

pub struct CandidateFactory {
    config: CandidateConfig,
    prices: Arc<PriceBook>,
}

impl CandidateFactory {
    pub fn new(config: CandidateConfig, prices: Arc<PriceBook>) -> Self {
        Self { config, prices }
    }

    /// Size `opportunity` and simulate it against `snapshot`. `None` when the
    /// loan asset cannot be priced or the route cannot be quoted.
    pub fn build(&self, opportunity: Opportunity, snapshot: &IndexSnapshot) -> Option<TradeCandidate> {
        let legs = opportunity.legs();
        let first = legs.first()?;
        let loan_asset = first.token_in;
        let loan_decimals = first.pool.decimals_of(loan_asset)?;
        let loan_price = self.prices.usd(loan_asset)?;

        let thinnest = legs
            .iter()
            .filter_map(|leg| snapshot.liquidity_of(leg.pool.address))
            .fold(f64::INFINITY, f64::min);
        let loan_usd = self.config.loan_usd.min(thinnest * self.config.max_pool_share);
        if !(loan_usd > 0.0) {
            return None;
        }
        let loan_amount = calc::from_f64(loan_usd / loan_price, loan_decimals)?;
        if loan_amount.is_zero() {
            return None;
        }

        let outputs = dex::simulate_route(&legs, loan_amount)?;
        let expected_out = *outputs.last()?;
        let estimated_slippage_pct = slippage_pct(&opportunity, loan_amount, expected_out);
        let gross = loan_usd * opportunity.edge();
        let gas = self.config.default_gas_cost_usd;
        let profit = gross - gas - loan_usd * estimated_slippage_pct / 100.0;

        let candidate = TradeCandidate {
            fingerprint: opportunity.fingerprint(),
            legs,
            funding: self.config.funding,
            loan_asset,
            loan_decimals,
            loan_amount_usd: loan_usd,
            loan_amount,
            expected_out,
            min_out: calc::min_out_for(expected_out, self.config.slippage_bps),
            slippage_bps: self.config.slippage_bps,
            estimated_slippage_pct,
            estimated_gas_cost_usd: gas,
            estimated_profit_usd: Some(profit),
            gas_limit: None,
            fee_per_gas: None,
            created_at_ms: unix_millis(),
            status: CandidateStatus::Pending,
            opportunity,
        };
        debug!(candidate = %candidate, "[SCAN] candidate sized");
        Some(candidate)
    }
}

/// Shortfall of the simulated return against the spot-implied return, in
/// percent. Covers venue fees and price impact.
fn slippage_pct(opportunity: &Opportunity, amount_in: U256, amount_out: U256) -> f64 {
    let ideal = match opportunity {
        Opportunity::Direct {
            price_buy,
            price_sell,
            ..
        } => price_sell / price_buy,
        Opportunity::Triangular { cycle_rate, .. } => *cycle_rate,
    };
    let realised = calc::to_f64(amount_out, 0) / calc::to_f64(amount_in, 0);
    if !(ideal > 0.0) || !realised.is_finite() {
        return 100.0;
    }
    ((ideal - realised) / ideal * 100.0).max(0.0)
}

impl TradeCandidate {
    /// Re-simulate at a new loan size, keeping the tolerance. Returns `false`
    /// (leaving the candidate untouched) when the route no longer quotes.
    pub fn resize(&mut self, loan_amount: U256) -> bool {
        let Some(outputs) = dex::simulate_route(&self.legs, loan_amount) else {
            return false;
        };
        let Some(expected_out) = outputs.last().copied() else {
            return false;
        };
        let ratio = calc::to_f64(loan_amount, 0) / calc::to_f64(self.loan_amount, 0);
        if ratio.is_finite() {
            self.loan_amount_usd *= ratio;
            if let Some(profit) = self.estimated_profit_usd.as_mut() {
                *profit *= ratio;
            }
        }
        self.loan_amount = loan_amount;
        self.expected_out = expected_out;
        self.min_out = calc::min_out_for(expected_out, self.slippage_bps);
        true
    }

    /// Minimum output per leg for the current loan size.
    pub fn leg_bounds(&self) -> Option<Vec<(U256, U256)>> {
        let outputs = dex::simulate_route(&self.legs, self.loan_amount)?;
        let mut amount_in = self.loan_amount;
        let mut bounds = Vec::with_capacity(outputs.len());
        for out in outputs {
            bounds.push((amount_in, calc::min_out_for(out, self.slippage_bps)));
            amount_in = out;
        }
        Some(bounds)
    }
}
