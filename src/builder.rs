//! Turns an approved candidate into the executor's call steps.
//!
//! Pure data transformation: no network access happens here.

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;

use crate::arbitrage::TradeCandidate;
use crate::dex;
use crate::dex::calc::min_out_for;
use crate::errors::BuildError;
use crate::models::{Leg, VenueKind};

/// Solidity signature of the executor entry point.
pub const EXECUTE_SIGNATURE: &str =
    "executeArbitrage(address,uint256,(uint8,address,address[],uint24,bytes,uint256,uint256)[])";

/// One venue call, tagged with the venue kind the executor dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapStep {
    pub kind: VenueKind,
    /// Router, vault or pool the executor calls.
    pub target: Address,
    pub path: Vec<Address>,
    /// Fee tier in hundredths of a basis point (uint24). Zero where unused.
    pub fee_tier: u32,
    pub aux_data: Bytes,
    pub amount_in: U256,
    pub min_out: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradePlan {
    pub loan_asset: Address,
    pub loan_amount: U256,
    pub steps: Vec<SwapStep>,
}

pub struct TradeBuilder;

impl TradeBuilder {
    pub fn plan(candidate: &TradeCandidate) -> Result<TradePlan, BuildError> {
        if candidate.legs.is_empty() {
            return Err(BuildError::EmptyRoute);
        }
        let mut steps = Vec::with_capacity(candidate.legs.len());
        let mut amount_in = candidate.loan_amount;
        for leg in &candidate.legs {
            let out = dex::quote(&leg.pool, amount_in, leg.token_in)
                .filter(|out| !out.is_zero())
                .ok_or(BuildError::QuoteUnavailable(leg.pool.address))?;
            steps.push(Self::step(leg, amount_in, min_out_for(out, candidate.slippage_bps))?);
            amount_in = out;
        }
        Ok(TradePlan {
            loan_asset: candidate.loan_asset,
            loan_amount: candidate.loan_amount,
            steps,
        })
    }

    fn step(leg: &Leg, amount_in: U256, min_out: U256) -> Result<SwapStep, BuildError> {
        let pool = &leg.pool;
        for token in [leg.token_in, leg.token_out] {
            if !pool.contains(token) {
                return Err(BuildError::TokenNotInPool {
                    token,
                    pool: pool.address,
                });
            }
        }
        let fee_tier = pool.fee_bps * 100;
        let (fee_tier, aux_data) = match pool.kind {
            VenueKind::ConstantProductV2 => (0, Bytes::new()),
            VenueKind::ConcentratedV3 | VenueKind::ElasticV3 => {
                (fee_tier, packed_path(leg.token_in, fee_tier, leg.token_out))
            }
            VenueKind::WeightedVault => {
                let id = pool.pool_id.ok_or(BuildError::MissingPoolId(pool.address))?;
                (0, Bytes::from(id.as_bytes().to_vec()))
            }
            VenueKind::StableSwap => {
                let i = pool.token_index(leg.token_in).unwrap_or_default();
                let j = pool.token_index(leg.token_out).unwrap_or_default();
                (0, stable_indices(i, j))
            }
        };
        Ok(SwapStep {
            kind: pool.kind,
            target: pool.router,
            path: vec![leg.token_in, leg.token_out],
            fee_tier,
            aux_data,
            amount_in,
            min_out,
        })
    }
}

/// `tokenIn ‖ uint24 fee ‖ tokenOut`, the concentrated-liquidity router path.
fn packed_path(token_in: Address, fee_tier: u32, token_out: Address) -> Bytes {
    let mut out = Vec::with_capacity(43);
    out.extend_from_slice(token_in.as_bytes());
    out.extend_from_slice(&fee_tier.to_be_bytes()[1..]);
    out.extend_from_slice(token_out.as_bytes());
    Bytes::from(out)
}

/// `abi.encode(int128 i, int128 j)`.
fn stable_indices(i: usize, j: usize) -> Bytes {
    Bytes::from(abi::encode(&[
        Token::Int(U256::from(i)),
        Token::Int(U256::from(j)),
    ]))
}

/// Calldata for the executor's `executeArbitrage`.
pub fn encode_execute(plan: &TradePlan) -> Bytes {
    let steps = plan
        .steps
        .iter()
        .map(|s| {
            Token::Tuple(vec![
                Token::Uint(U256::from(s.kind.tag())),
                Token::Address(s.target),
                Token::Array(s.path.iter().copied().map(Token::Address).collect()),
                Token::Uint(U256::from(s.fee_tier)),
                Token::Bytes(s.aux_data.to_vec()),
                Token::Uint(s.amount_in),
                Token::Uint(s.min_out),
            ])
        })
        .collect();
    let mut data = id(EXECUTE_SIGNATURE).to_vec();
    data.extend(abi::encode(&[
        Token::Address(plan.loan_asset),
        Token::Uint(plan.loan_amount),
        Token::Array(steps),
    ]));
    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::types::{CandidateStatus, Funding, Opportunity};
    use crate::dex::test_pools::*;
    use crate::models::Pool;
    use ethers::abi::ParamType;
    use ethers::types::H256;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn candidate_over(pools: [Pool; 3]) -> TradeCandidate {
        let (a, b, c) = (token(1), token(2), token(3));
        let pools = pools.map(Arc::new);
        let opportunity = Opportunity::Triangular {
            route: [a, b, c, a],
            pools: pools.clone(),
            cycle_rate: 1.01,
            edge: 0.01,
        };
        TradeCandidate {
            fingerprint: opportunity.fingerprint(),
            legs: opportunity.legs(),
            opportunity,
            funding: Funding::FlashLoan,
            loan_asset: a,
            loan_decimals: 18,
            loan_amount_usd: 100.0,
            loan_amount: U256::exp10(20),
            expected_out: U256::zero(),
            min_out: U256::zero(),
            slippage_bps: 100,
            estimated_slippage_pct: 0.0,
            estimated_gas_cost_usd: 0.0,
            estimated_profit_usd: None,
            gas_limit: None,
            fee_per_gas: None,
            created_at_ms: 0,
            status: CandidateStatus::Approved,
        }
    }

    fn mixed_route() -> TradeCandidate {
        let (a, b, c) = (token(1), token(2), token(3));
        let mut stable = v2_pool(102, a, c, 1.0, 1_000_000);
        stable.kind = VenueKind::StableSwap;
        candidate_over([
            v3_pool_at_unit_price(100, a, b, 10u128.pow(27)),
            vault_pool(101, b, c, 1_000_000),
            // token0 = a, so the trade c -> a is j=0, i=1
            stable,
        ])
    }

    #[test]
    fn one_step_per_leg_with_venue_aux_data() {
        let candidate = mixed_route();
        let plan = TradeBuilder::plan(&candidate).unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.loan_amount, candidate.loan_amount);

        let v3 = &plan.steps[0];
        assert_eq!(v3.kind, VenueKind::ConcentratedV3);
        assert_eq!(v3.fee_tier, 500);
        assert_eq!(v3.aux_data.len(), 43);
        assert_eq!(&v3.aux_data[20..23], &[0x00, 0x01, 0xf4]);
        assert_eq!(&v3.aux_data[..20], token(1).as_bytes());

        let vault = &plan.steps[1];
        assert_eq!(vault.target, Address::from_low_u64_be(99_999));
        assert_eq!(vault.aux_data.to_vec(), H256::from_low_u64_be(101).as_bytes().to_vec());

        let stable = &plan.steps[2];
        let decoded = abi::decode(&[ParamType::Int(128), ParamType::Int(128)], &stable.aux_data).unwrap();
        assert_eq!(decoded, vec![Token::Int(U256::one()), Token::Int(U256::zero())]);
    }

    #[test]
    fn amounts_chain_and_bounds_respect_tolerance() {
        let plan = TradeBuilder::plan(&mixed_route()).unwrap();
        for pair in plan.steps.windows(2) {
            // next leg spends the previous leg's simulated output
            assert!(pair[1].amount_in > pair[0].min_out);
        }
        for step in &plan.steps {
            assert!(step.min_out > U256::zero());
            assert!(step.min_out < step.amount_in * 2u64);
        }
    }

    #[test]
    fn vault_without_id_is_rejected() {
        let (a, b, c) = (token(1), token(2), token(3));
        let mut vault = vault_pool(101, b, c, 1_000_000);
        vault.pool_id = None;
        let candidate = candidate_over([
            v2_pool(100, a, b, 1.0, 1_000_000),
            vault,
            v2_pool(102, c, a, 1.0, 1_000_000),
        ]);
        assert_eq!(
            TradeBuilder::plan(&candidate),
            Err(BuildError::MissingPoolId(Address::from_low_u64_be(101)))
        );
    }

    #[test]
    fn execute_calldata_layout() {
        let plan = TradeBuilder::plan(&mixed_route()).unwrap();
        let data = encode_execute(&plan);
        assert_eq!(&data[..4], &id(EXECUTE_SIGNATURE));

        let step = ParamType::Tuple(vec![
            ParamType::Uint(8),
            ParamType::Address,
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Uint(24),
            ParamType::Bytes,
            ParamType::Uint(256),
            ParamType::Uint(256),
        ]);
        let decoded = abi::decode(
            &[
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Array(Box::new(step)),
            ],
            &data[4..],
        )
        .unwrap();
        assert_eq!(decoded[0], Token::Address(token(1)));
        let Token::Array(steps) = &decoded[2] else {
            panic!("steps must decode as an array");
        };
        assert_eq!(steps.len(), 3);
        let Token::Tuple(first) = &steps[0] else {
            panic!("step must decode as a tuple");
        };
        assert_eq!(first[0], Token::Uint(U256::from(VenueKind::ConcentratedV3.tag())));
    }
}
