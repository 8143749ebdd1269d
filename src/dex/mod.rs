//! Venue price model: one pricing and quoting rule per [`VenueKind`].
//!
//! Prices are decimals-adjusted `f64` values used for ranking and edge
//! computation. Quotes are integer amounts in token base units.
//!
//! Concentrated, weighted and stable venues are all quoted through the
//! constant-product formula on their (virtual) balances. That is a
//! best-effort estimate: it ignores tick crossings, pool weights and the
//! stable invariant. The slippage guard and the reserve clamp bound the error.

use ethers::types::{Address, U256};

use crate::models::{Leg, Pool, VenueKind};

pub mod calc;
pub mod client;
pub mod state;

pub use calc::{constant_product_out, min_out_for, mul_div, safe_input_for};
pub use client::{EthersAccessor, HttpRelay, read_live_reserves, read_live_state};
pub use state::ReserveState;

/// Balances the venue trades against, oriented as `(token0, token1)`.
/// `None` when the state shape does not belong to the venue kind or is empty.
pub fn venue_reserves(pool: &Pool) -> Option<(U256, U256)> {
    match (pool.kind, &pool.state) {
        (
            VenueKind::ConstantProductV2 | VenueKind::WeightedVault | VenueKind::StableSwap,
            ReserveState::Reserves { .. },
        )
        | (
            VenueKind::ConcentratedV3 | VenueKind::ElasticV3,
            ReserveState::Concentrated { .. },
        ) => pool.state.effective_reserves(),
        _ => None,
    }
}

/// `(reserve_in, reserve_out)` for a swap entering with `token_in`.
pub fn oriented_reserves(pool: &Pool, token_in: Address) -> Option<(U256, U256)> {
    let (r0, r1) = venue_reserves(pool)?;
    match pool.token_index(token_in)? {
        0 => Some((r0, r1)),
        _ => Some((r1, r0)),
    }
}

/// Price of one `base` token expressed in `quote` tokens.
pub fn unit_price(pool: &Pool, base: Address, quote: Address) -> Option<f64> {
    if base == quote || !pool.contains(base) || !pool.contains(quote) {
        return None;
    }
    let token0_in_token1 = match (pool.kind, &pool.state) {
        (
            VenueKind::ConstantProductV2 | VenueKind::WeightedVault | VenueKind::StableSwap,
            ReserveState::Reserves { reserve0, reserve1 },
        ) => calc::reserve_price(*reserve0, *reserve1, pool.decimals0, pool.decimals1)?,
        (
            VenueKind::ConcentratedV3 | VenueKind::ElasticV3,
            ReserveState::Concentrated { sqrt_price_x96, .. },
        ) => calc::sqrt_price_to_price(*sqrt_price_x96, pool.decimals0, pool.decimals1)?,
        _ => return None,
    };
    if base == pool.token0 {
        Some(token0_in_token1)
    } else {
        Some(1.0 / token0_in_token1)
    }
}

/// Output amount for swapping `amount_in` of `token_in` through the pool.
pub fn quote(pool: &Pool, amount_in: U256, token_in: Address) -> Option<U256> {
    let (reserve_in, reserve_out) = oriented_reserves(pool, token_in)?;
    match pool.kind {
        VenueKind::ConstantProductV2
        | VenueKind::ConcentratedV3
        | VenueKind::ElasticV3
        | VenueKind::WeightedVault
        | VenueKind::StableSwap => {
            constant_product_out(amount_in, reserve_in, reserve_out, pool.fee_bps)
        }
    }
}

/// Chain quotes through ordered legs. Returns the output of every leg.
pub fn simulate_route(legs: &[Leg], amount_in: U256) -> Option<Vec<U256>> {
    let mut outputs = Vec::with_capacity(legs.len());
    let mut amount = amount_in;
    for leg in legs {
        amount = quote(&leg.pool, amount, leg.token_in)?;
        if amount.is_zero() {
            return None;
        }
        outputs.push(amount);
    }
    Some(outputs)
}

/// Spot exchange rate of one `token_in` into the counter-token.
pub fn spot_rate(pool: &Pool, token_in: Address) -> Option<f64> {
    let token_out = pool.other_token(token_in)?;
    unit_price(pool, token_in, token_out)
}

/// USD value of the pool's balances. When only one side has a USD price the
/// pool is valued at twice that side; with no price it cannot be valued.
pub fn liquidity_usd<F>(pool: &Pool, price_of: F) -> Option<f64>
where
    F: Fn(Address) -> Option<f64>,
{
    let (r0, r1) = venue_reserves(pool)?;
    let side0 = price_of(pool.token0).map(|p| calc::to_f64(r0, pool.decimals0) * p);
    let side1 = price_of(pool.token1).map(|p| calc::to_f64(r1, pool.decimals1) * p);
    match (side0, side1) {
        (Some(a), Some(b)) => Some(a + b),
        (Some(v), None) | (None, Some(v)) => Some(v * 2.0),
        (None, None) => None,
    }
}
