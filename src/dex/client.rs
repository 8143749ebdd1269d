//! Chain plumbing for venues: the `ethers` backed accessor and relay, and the
//! per-kind live reserve queries used by the reserve clamp.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    abi::{self, ParamType, Token},
    contract::abigen,
    providers::{Http, Middleware, Provider},
    types::{
        Address, BlockNumber, Bytes, Eip1559TransactionRequest, H256, U256,
        transaction::eip2718::TypedTransaction,
    },
    utils::id,
};
use tracing::debug;

use super::state::ReserveState;
use crate::chain::{CallRequest, FeeData, RawTransactionSubmitter, ReadAccessor};
use crate::errors::{AppError, ChainError};
use crate::models::{Pool, VenueKind};

abigen!(
    IERC20,
    r"[
        function balanceOf(address owner) view returns (uint256)
    ]",
);

/// [`ReadAccessor`] over one HTTP JSON-RPC endpoint.
#[derive(Clone)]
pub struct EthersAccessor {
    provider: Arc<Provider<Http>>,
}

impl EthersAccessor {
    pub fn new(rpc_url: &str) -> Result<Self, AppError> {
        let provider = Arc::new(Provider::<Http>::try_from(rpc_url)?);
        Ok(Self { provider })
    }

    fn request(to: Address, data: Bytes, from: Option<Address>) -> TypedTransaction {
        let mut tx = Eip1559TransactionRequest::new().to(to).data(data);
        if let Some(from) = from {
            tx = tx.from(from);
        }
        tx.into()
    }
}

#[async_trait]
impl ReadAccessor for EthersAccessor {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        Ok(self.provider.call(&Self::request(to, data, None), None).await?)
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, ChainError> {
        let tx = Self::request(request.to, request.data.clone(), request.from);
        Ok(self.provider.estimate_gas(&tx, None).await?)
    }

    async fn fee_data(&self) -> Result<FeeData, ChainError> {
        match self.provider.estimate_eip1559_fees(None).await {
            Ok((max_fee, tip)) => Ok(FeeData {
                max_fee_per_gas: Some(max_fee),
                max_priority_fee_per_gas: Some(tip),
                gas_price: None,
            }),
            Err(err) => {
                debug!(error = %err, "[RPC] no fee market data, using legacy gas price");
                Ok(FeeData {
                    gas_price: Some(self.provider.get_gas_price().await?),
                    ..FeeData::default()
                })
            }
        }
    }

    async fn balance(&self, owner: Address, token: Option<Address>) -> Result<U256, ChainError> {
        match token {
            None => Ok(self.provider.get_balance(owner, None).await?),
            Some(token) => IERC20::new(token, self.provider.clone())
                .balance_of(owner)
                .call()
                .await
                .map_err(|e| ChainError::classify(e.to_string())),
        }
    }

    async fn pending_nonce(&self, account: Address) -> Result<U256, ChainError> {
        Ok(self
            .provider
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await?)
    }

    async fn receipt_status(&self, tx_hash: H256) -> Result<Option<bool>, ChainError> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        // receipts without a status field predate byzantium and only exist if mined ok
        Ok(receipt.map(|r| r.status.is_none_or(|s| s.as_u64() == 1)))
    }
}

/// Relay speaking `eth_sendRawTransaction` over HTTP.
pub struct HttpRelay {
    name: String,
    provider: Provider<Http>,
}

impl HttpRelay {
    pub fn new(name: impl Into<String>, url: &str) -> Result<Self, AppError> {
        Ok(Self {
            name: name.into(),
            provider: Provider::<Http>::try_from(url)?,
        })
    }
}

#[async_trait]
impl RawTransactionSubmitter for HttpRelay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, raw: Bytes) -> Result<H256, ChainError> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }
}

fn word(tokens: &[Token], i: usize) -> Result<U256, ChainError> {
    tokens
        .get(i)
        .and_then(|t| t.clone().into_uint())
        .ok_or_else(|| ChainError::Decode(format!("missing uint at position {i}")))
}

async fn call_decode(
    accessor: &dyn ReadAccessor,
    to: Address,
    signature: &str,
    args: &[Token],
    outputs: &[ParamType],
) -> Result<Vec<Token>, ChainError> {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(args));
    let raw = accessor.call(to, Bytes::from(data)).await?;
    Ok(abi::decode(outputs, &raw)?)
}

/// Current `(reserve0, reserve1)` of `pool` read from chain, virtual for
/// concentrated venues. `Ok(None)` when the venue has no query this engine
/// recognises or its range holds no liquidity.
pub async fn read_live_reserves(
    accessor: &dyn ReadAccessor,
    pool: &Pool,
) -> Result<Option<(U256, U256)>, ChainError> {
    Ok(match read_live_state(accessor, pool).await? {
        Some(ReserveState::Reserves { reserve0, reserve1 }) => Some((reserve0, reserve1)),
        Some(state) => state.effective_reserves(),
        None => None,
    })
}

/// Current state of `pool` in the shape its kind is priced from: balances for
/// reserve venues, `{liquidity, sqrtPriceX96}` for concentrated ones.
pub async fn read_live_state(
    accessor: &dyn ReadAccessor,
    pool: &Pool,
) -> Result<Option<ReserveState>, ChainError> {
    match pool.kind {
        VenueKind::ConstantProductV2 => {
            let out = call_decode(
                accessor,
                pool.address,
                "getReserves()",
                &[],
                &[ParamType::Uint(112), ParamType::Uint(112), ParamType::Uint(32)],
            )
            .await?;
            Ok(Some(reserves(word(&out, 0)?, word(&out, 1)?)))
        }
        VenueKind::ConcentratedV3 => {
            let (slot0, liquidity) = futures::try_join!(
                call_decode(accessor, pool.address, "slot0()", &[], &[ParamType::Uint(160)]),
                call_decode(accessor, pool.address, "liquidity()", &[], &[ParamType::Uint(128)]),
            )?;
            concentrated(word(&liquidity, 0)?, word(&slot0, 0)?)
        }
        VenueKind::ElasticV3 => {
            let (state, liquidity) = futures::try_join!(
                call_decode(accessor, pool.address, "getPoolState()", &[], &[ParamType::Uint(160)]),
                call_decode(
                    accessor,
                    pool.address,
                    "getLiquidityState()",
                    &[],
                    &[ParamType::Uint(128), ParamType::Uint(128), ParamType::Uint(128)],
                ),
            )?;
            let total = word(&liquidity, 0)?.saturating_add(word(&liquidity, 1)?);
            concentrated(total, word(&state, 0)?)
        }
        VenueKind::WeightedVault => {
            let Some(pool_id) = pool.pool_id else {
                return Ok(None);
            };
            let out = call_decode(
                accessor,
                pool.router,
                "getPoolTokens(bytes32)",
                &[Token::FixedBytes(pool_id.as_bytes().to_vec())],
                &[
                    ParamType::Array(Box::new(ParamType::Address)),
                    ParamType::Array(Box::new(ParamType::Uint(256))),
                    ParamType::Uint(256),
                ],
            )
            .await?;
            let tokens: Vec<Address> = out
                .first()
                .cloned()
                .and_then(Token::into_array)
                .unwrap_or_default()
                .into_iter()
                .filter_map(Token::into_address)
                .collect();
            let balances: Vec<U256> = out
                .get(1)
                .cloned()
                .and_then(Token::into_array)
                .unwrap_or_default()
                .into_iter()
                .filter_map(Token::into_uint)
                .collect();
            let balance_of = |token: Address| {
                tokens
                    .iter()
                    .position(|t| *t == token)
                    .and_then(|i| balances.get(i).copied())
                    .ok_or_else(|| ChainError::Decode(format!("vault pool lacks token {token:?}")))
            };
            Ok(Some(reserves(balance_of(pool.token0)?, balance_of(pool.token1)?)))
        }
        VenueKind::StableSwap => {
            let r0 = stable_balance(accessor, pool.address, 0).await?;
            let r1 = stable_balance(accessor, pool.address, 1).await?;
            Ok(Some(reserves(r0, r1)))
        }
    }
}

fn reserves(reserve0: U256, reserve1: U256) -> ReserveState {
    ReserveState::Reserves { reserve0, reserve1 }
}

fn concentrated(liquidity: U256, sqrt_price_x96: U256) -> Result<Option<ReserveState>, ChainError> {
    if liquidity > U256::from(u128::MAX) {
        return Err(ChainError::Decode("liquidity exceeds uint128".into()));
    }
    Ok(Some(ReserveState::Concentrated {
        liquidity: liquidity.as_u128(),
        sqrt_price_x96,
    }))
}

/// `balances(uint256)`, falling back to the older `balances(int128)` ABI.
async fn stable_balance(accessor: &dyn ReadAccessor, pool: Address, i: u64) -> Result<U256, ChainError> {
    let index = [Token::Uint(U256::from(i))];
    match call_decode(accessor, pool, "balances(uint256)", &index, &[ParamType::Uint(256)]).await {
        Ok(out) => word(&out, 0),
        Err(err) if err.is_transient() => Err(err),
        Err(_) => {
            let index = [Token::Int(U256::from(i))];
            let out = call_decode(accessor, pool, "balances(int128)", &index, &[ParamType::Uint(256)]).await?;
            word(&out, 0)
        }
    }
}
