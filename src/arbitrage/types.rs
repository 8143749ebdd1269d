use std::fmt;
use std::sync::Arc;

use ethers::types::{Address, U256};
use ethers::utils::{hex, keccak256};
use serde::{Deserialize, Serialize};

use crate::models::{Leg, Pool};

/// Scanner configuration.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Minimum relative divergence (0.0025 = 0.25%) for an opportunity.
    pub min_edge: f64,
    /// Liquidity floor re-checked at scan time.
    pub min_liquidity_usd: f64,
    /// Tokens a triangular cycle may start from. Empty means any token.
    pub start_tokens: Vec<Address>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_edge: 0.0025,
            min_liquidity_usd: 300_000.0,
            start_tokens: Vec::new(),
        }
    }
}

/// A detected price divergence. Prices are `f64` and only used for ranking.
#[derive(Debug, Clone)]
pub enum Opportunity {
    /// Buy `token_out` with `token_in` on `venue_buy`, sell it back on `venue_sell`.
    /// Prices are `token_out` denominated in `token_in`.
    Direct {
        token_in: Address,
        token_out: Address,
        venue_buy: Arc<Pool>,
        venue_sell: Arc<Pool>,
        price_buy: f64,
        price_sell: f64,
        edge: f64,
    },
    /// `route[0] -> route[1] -> route[2] -> route[3]` with `route[3] == route[0]`.
    Triangular {
        route: [Address; 4],
        pools: [Arc<Pool>; 3],
        cycle_rate: f64,
        edge: f64,
    },
}

impl Opportunity {
    pub fn edge(&self) -> f64 {
        match self {
            Opportunity::Direct { edge, .. } | Opportunity::Triangular { edge, .. } => *edge,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Opportunity::Direct { .. } => "direct",
            Opportunity::Triangular { .. } => "triangular",
        }
    }

    /// Ordered hops of the trade.
    pub fn legs(&self) -> Vec<Leg> {
        match self {
            Opportunity::Direct {
                token_in,
                token_out,
                venue_buy,
                venue_sell,
                ..
            } => vec![
                Leg::new(venue_buy.clone(), *token_in, *token_out),
                Leg::new(venue_sell.clone(), *token_out, *token_in),
            ],
            Opportunity::Triangular { route, pools, .. } => pools
                .iter()
                .enumerate()
                .map(|(i, pool)| Leg::new(pool.clone(), route[i], route[i + 1]))
                .collect(),
        }
    }

    /// Token path including the return to the start token.
    pub fn route(&self) -> Vec<Address> {
        match self {
            Opportunity::Direct {
                token_in, token_out, ..
            } => vec![*token_in, *token_out, *token_in],
            Opportunity::Triangular { route, .. } => route.to_vec(),
        }
    }

    /// Deduplication key over the ordered kind/venue/token sequence.
    /// The same pools walked in the opposite direction hash differently.
    pub fn fingerprint(&self) -> String {
        let legs = self.legs();
        let mut buf = Vec::with_capacity(16 + legs.len() * 60);
        buf.extend_from_slice(self.kind_label().as_bytes());
        for leg in &legs {
            buf.extend_from_slice(leg.pool.address.as_bytes());
            buf.extend_from_slice(leg.token_in.as_bytes());
            buf.extend_from_slice(leg.token_out.as_bytes());
        }
        format!("0x{}", hex::encode(keccak256(&buf)))
    }

    /// Short human-readable route, e.g. `direct 0xaa..->0xbb.. via v2-1/v3-2`.
    pub fn summary(&self) -> String {
        let tokens: Vec<String> = self.route().iter().map(short_addr).collect();
        let venues: Vec<String> = self
            .legs()
            .iter()
            .map(|l| l.pool.dex_label.clone())
            .collect();
        format!(
            "{} {} via {}",
            self.kind_label(),
            tokens.join("->"),
            venues.join("/")
        )
    }
}

fn short_addr(addr: &Address) -> String {
    let full = format!("{addr:?}");
    format!("{}..{}", &full[..6], &full[full.len() - 4..])
}

/// How the first leg is funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Funding {
    FlashLoan,
    Wallet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Approved,
    Submitted,
    Skipped,
    Failed,
}

/// An opportunity sized and priced for execution.
#[derive(Debug, Clone)]
pub struct TradeCandidate {
    pub fingerprint: String,
    pub opportunity: Opportunity,
    pub legs: Vec<Leg>,
    pub funding: Funding,
    pub loan_asset: Address,
    pub loan_decimals: u8,
    pub loan_amount_usd: f64,
    /// Loan size in the loan asset's base units.
    pub loan_amount: U256,
    /// Simulated amount of the loan asset returned by the last leg.
    pub expected_out: U256,
    /// Lowest acceptable return, derived from `expected_out` and the tolerance.
    pub min_out: U256,
    /// Tolerance used to derive every leg's minimum output.
    pub slippage_bps: u32,
    pub estimated_slippage_pct: f64,
    pub estimated_gas_cost_usd: f64,
    /// `None` until something has estimated it.
    pub estimated_profit_usd: Option<f64>,
    pub gas_limit: Option<U256>,
    pub fee_per_gas: Option<U256>,
    pub created_at_ms: u64,
    pub status: CandidateStatus,
}

impl TradeCandidate {
    pub fn edge(&self) -> f64 {
        self.opportunity.edge()
    }

    pub fn summary(&self) -> String {
        self.opportunity.summary()
    }

    pub fn record(&self) -> CandidateRecord {
        CandidateRecord {
            fingerprint: self.fingerprint.clone(),
            kind: self.opportunity.kind_label().to_string(),
            route: self.opportunity.route(),
            venues: self.legs.iter().map(|l| l.pool.address).collect(),
            loan_asset: self.loan_asset,
            loan_amount: self.loan_amount,
            loan_amount_usd: self.loan_amount_usd,
            expected_out: self.expected_out,
            min_out: self.min_out,
            edge: self.edge(),
            estimated_slippage_pct: self.estimated_slippage_pct,
            estimated_gas_cost_usd: self.estimated_gas_cost_usd,
            estimated_profit_usd: self.estimated_profit_usd,
            status: self.status,
            created_at_ms: self.created_at_ms,
        }
    }
}

impl fmt::Display for TradeCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] edge={:.4}% profit=${:.2}",
            self.summary(),
            &self.fingerprint[..10.min(self.fingerprint.len())],
            self.edge() * 100.0,
            self.estimated_profit_usd.unwrap_or(0.0)
        )
    }
}

/// Persisted shape of a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub fingerprint: String,
    pub kind: String,
    pub route: Vec<Address>,
    pub venues: Vec<Address>,
    pub loan_asset: Address,
    pub loan_amount: U256,
    pub loan_amount_usd: f64,
    pub expected_out: U256,
    pub min_out: U256,
    pub edge: f64,
    pub estimated_slippage_pct: f64,
    pub estimated_gas_cost_usd: f64,
    pub estimated_profit_usd: Option<f64>,
    pub status: CandidateStatus,
    pub created_at_ms: u64,
}
