use ethers::types::U256;
use serde::{Deserialize, Serialize};

use super::calc::{Q96, mul_div};

/// Raw on-chain state of a venue, as last seen by discovery or a swap update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReserveState {
    /// Token balances held by the pool (V2 pairs), the vault (weighted pools)
    /// or the pool itself (stable pools), in each token's base units.
    Reserves { reserve0: U256, reserve1: U256 },
    /// Concentrated-liquidity state: in-range liquidity `L` and `slot0.sqrtPriceX96`.
    Concentrated { liquidity: u128, sqrt_price_x96: U256 },
}

impl ReserveState {
    /// Token amounts the pool behaves like for a constant-product swap.
    ///
    /// For concentrated venues these are the virtual reserves of the current
    /// price range: `x = L * 2^96 / sqrtP` and `y = L * sqrtP / 2^96`. Ticks are
    /// ignored, so quotes taken from them drift from the real pool once a swap
    /// would cross a range boundary.
    pub fn effective_reserves(&self) -> Option<(U256, U256)> {
        match self {
            ReserveState::Reserves { reserve0, reserve1 } => {
                if reserve0.is_zero() || reserve1.is_zero() {
                    None
                } else {
                    Some((*reserve0, *reserve1))
                }
            }
            ReserveState::Concentrated {
                liquidity,
                sqrt_price_x96,
            } => {
                if *liquidity == 0 || sqrt_price_x96.is_zero() {
                    return None;
                }
                let l = U256::from(*liquidity);
                let x = mul_div(l, Q96, *sqrt_price_x96)?;
                let y = mul_div(l, *sqrt_price_x96, Q96)?;
                if x.is_zero() || y.is_zero() {
                    None
                } else {
                    Some((x, y))
                }
            }
        }
    }
}
