//! Shared data structures used throughout the engine.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::dex::state::ReserveState;

/// Closed set of supported venue families. Pricing, quoting, reserve reads and
/// calldata encoding all match on this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    ConstantProductV2,
    ConcentratedV3,
    WeightedVault,
    StableSwap,
    ElasticV3,
}

impl VenueKind {
    /// Tag the on-chain executor dispatches on.
    pub fn tag(self) -> u8 {
        match self {
            VenueKind::ConstantProductV2 => 0,
            VenueKind::ConcentratedV3 => 1,
            VenueKind::WeightedVault => 2,
            VenueKind::StableSwap => 3,
            VenueKind::ElasticV3 => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VenueKind::ConstantProductV2 => "v2",
            VenueKind::ConcentratedV3 => "v3",
            VenueKind::WeightedVault => "vault",
            VenueKind::StableSwap => "stable",
            VenueKind::ElasticV3 => "elastic",
        }
    }
}

fn default_fee_bps() -> u32 {
    30
}

/// A liquidity venue instance as delivered by the discovery feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub kind: VenueKind,
    pub address: Address,
    /// Vault-style pools are addressed by id inside a shared vault.
    #[serde(default)]
    pub pool_id: Option<H256>,
    pub token0: Address,
    pub token1: Address,
    pub decimals0: u8,
    pub decimals1: u8,
    pub state: ReserveState,
    /// Swap fee in basis points (30 = 0.3%).
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u32,
    pub dex_label: String,
    /// Router for V2/V3/Elastic venues, the vault for weighted pools, the pool
    /// itself for stable pools.
    pub router: Address,
}

impl Pool {
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(self.token0, self.token1)
    }

    pub fn contains(&self, token: Address) -> bool {
        self.token0 == token || self.token1 == token
    }

    /// The counter-token of `token`, if `token` is in this pool.
    pub fn other_token(&self, token: Address) -> Option<Address> {
        if token == self.token0 {
            Some(self.token1)
        } else if token == self.token1 {
            Some(self.token0)
        } else {
            None
        }
    }

    /// Position of `token` in the pool (0 or 1).
    pub fn token_index(&self, token: Address) -> Option<usize> {
        if token == self.token0 {
            Some(0)
        } else if token == self.token1 {
            Some(1)
        } else {
            None
        }
    }

    pub fn decimals_of(&self, token: Address) -> Option<u8> {
        match self.token_index(token)? {
            0 => Some(self.decimals0),
            _ => Some(self.decimals1),
        }
    }
}

/// Unordered token pair, stored lower address first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey(pub Address, pub Address);

impl PairKey {
    pub fn new(a: Address, b: Address) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.0, self.1)
    }
}

/// One directed hop through a pool.
#[derive(Debug, Clone)]
pub struct Leg {
    pub pool: Arc<Pool>,
    pub token_in: Address,
    pub token_out: Address,
}

impl Leg {
    pub fn new(pool: Arc<Pool>, token_in: Address, token_out: Address) -> Self {
        Self {
            pool,
            token_in,
            token_out,
        }
    }
}

/// Reserve refresh for a single pool, usually triggered by a confirmed swap.
#[derive(Debug, Clone)]
pub struct PoolUpdate {
    pub address: Address,
    pub state: ReserveState,
}

/// A decoded pending swap seen in the mempool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapIntent {
    pub hash: H256,
    pub from: Address,
    pub to: Address,
    pub dex_kind: VenueKind,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub min_out: U256,
}

/// A swap intent with the time it was observed.
#[derive(Debug, Clone)]
pub struct ObservedIntent {
    pub intent: SwapIntent,
    pub seen_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_unordered() {
        let a = Address::from_low_u64_be(1);
        let b = Address::from_low_u64_be(2);
        assert_eq!(PairKey::new(a, b), PairKey::new(b, a));
        assert_eq!(PairKey::new(b, a).0, a);
    }

    #[test]
    fn pool_deserializes_with_default_fee() {
        let raw = r#"{
            "kind": "constant_product_v2",
            "address": "0x0000000000000000000000000000000000000010",
            "token0": "0x0000000000000000000000000000000000000001",
            "token1": "0x0000000000000000000000000000000000000002",
            "decimals0": 18,
            "decimals1": 6,
            "state": {"reserves": {"reserve0": "0x64", "reserve1": "0xc8"}},
            "dex_label": "uniswap-v2",
            "router": "0x0000000000000000000000000000000000000020"
        }"#;
        let pool: Pool = serde_json::from_str(raw).unwrap();
        assert_eq!(pool.fee_bps, 30);
        assert_eq!(pool.kind, VenueKind::ConstantProductV2);
        assert_eq!(pool.pool_id, None);
        assert_eq!(pool.decimals_of(pool.token1), Some(6));
    }
}
