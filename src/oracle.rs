//! Token USD prices shared by the index, the candidate factory and the checks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ethers::types::Address;
use tracing::debug;

use crate::dex;
use crate::errors::PriceError;
use crate::models::Pool;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub usd: f64,
    pub updated_at: Instant,
}

/// Last-writer-wins price map with explicit freshness rules.
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: DashMap<Address, PriceQuote>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: Address, usd: f64) {
        self.set_at(token, usd, Instant::now());
    }

    pub fn set_at(&self, token: Address, usd: f64, updated_at: Instant) {
        self.prices.insert(token, PriceQuote { usd, updated_at });
    }

    pub fn quote(&self, token: Address) -> Option<PriceQuote> {
        self.prices.get(&token).map(|q| *q)
    }

    /// Positive price regardless of age. Used for valuation at index time.
    pub fn usd(&self, token: Address) -> Option<f64> {
        self.quote(token).map(|q| q.usd).filter(|p| *p > 0.0 && p.is_finite())
    }

    /// Price that is positive and no older than `max_age`.
    pub fn fresh_usd(&self, token: Address, max_age: Duration) -> Result<f64, PriceError> {
        let quote = self.quote(token).ok_or(PriceError::Missing(token))?;
        let age = quote.updated_at.elapsed();
        if age > max_age {
            return Err(PriceError::Stale {
                token,
                age_secs: age.as_secs(),
                max_age_secs: max_age.as_secs(),
            });
        }
        if !(quote.usd > 0.0) || !quote.usd.is_finite() {
            return Err(PriceError::NonPositive {
                token,
                usd: quote.usd,
            });
        }
        Ok(quote.usd)
    }

    /// Derive USD prices from pools quoted against USD anchors (stablecoins).
    ///
    /// Anchors are pinned at $1. Every other token takes the price implied by
    /// its deepest anchor pool. Returns how many tokens were priced.
    pub fn refresh_from_pools(&self, pools: &[Pool], anchors: &[Address]) -> usize {
        let now = Instant::now();
        for anchor in anchors {
            self.set_at(*anchor, 1.0, now);
        }
        // token -> (anchor-side depth in USD, price)
        let mut best: HashMap<Address, (f64, f64)> = HashMap::new();
        for pool in pools {
            for anchor in anchors {
                let Some(token) = pool.other_token(*anchor) else {
                    continue;
                };
                if anchors.contains(&token) {
                    continue;
                }
                let Some(price) = dex::unit_price(pool, token, *anchor) else {
                    continue;
                };
                let Some((r0, r1)) = dex::venue_reserves(pool) else {
                    continue;
                };
                let anchor_reserve = if pool.token0 == *anchor { r0 } else { r1 };
                let decimals = pool.decimals_of(*anchor).unwrap_or(18);
                let depth = dex::calc::to_f64(anchor_reserve, decimals);
                let entry = best.entry(token).or_insert((0.0, price));
                if depth > entry.0 {
                    *entry = (depth, price);
                }
            }
        }
        for (token, (_, price)) in &best {
            self.set_at(*token, *price, now);
        }
        debug!(priced = best.len(), "[ORACLE] derived prices from anchor pools");
        best.len()
    }
}
