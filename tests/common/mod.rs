//! Stand-ins for the chain shared by the scenario tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arbitrage_engine::chain::{AccessorSource, CallRequest, FeeData, RawTransactionSubmitter, ReadAccessor};
use arbitrage_engine::dex::calc;
use arbitrage_engine::dex::state::ReserveState;
use arbitrage_engine::errors::ChainError;
use arbitrage_engine::models::{Pool, VenueKind};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

pub const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn token(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

/// V2 pool pricing token0 at `price` token1, `depth` whole token0 units deep.
pub fn v2(addr: u64, t0: Address, t1: Address, price: f64, depth: u64) -> Pool {
    Pool {
        kind: VenueKind::ConstantProductV2,
        address: Address::from_low_u64_be(addr),
        pool_id: None,
        token0: t0,
        token1: t1,
        decimals0: 18,
        decimals1: 18,
        state: ReserveState::Reserves {
            reserve0: U256::from(depth) * U256::exp10(18),
            reserve1: calc::from_f64(depth as f64 * price, 18).unwrap_or_default(),
        },
        fee_bps: 30,
        dex_label: format!("v2-{addr}"),
        router: Address::from_low_u64_be(addr + 10_000),
    }
}

/// Node that answers every read with fixed values.
pub struct StubChain {
    pub nonce: U256,
    pub nonce_reads: AtomicUsize,
}

impl Default for StubChain {
    fn default() -> Self {
        Self {
            nonce: U256::from(3u64),
            nonce_reads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReadAccessor for StubChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(1)
    }

    async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, ChainError> {
        Err(ChainError::Rpc("execution reverted".into()))
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> Result<U256, ChainError> {
        Ok(U256::from(250_000u64))
    }

    async fn fee_data(&self) -> Result<FeeData, ChainError> {
        Ok(FeeData {
            max_fee_per_gas: Some(U256::from(30_000_000_000u64)),
            max_priority_fee_per_gas: Some(U256::from(1_000_000_000u64)),
            gas_price: None,
        })
    }

    async fn balance(&self, _owner: Address, _token: Option<Address>) -> Result<U256, ChainError> {
        Ok(U256::zero())
    }

    async fn pending_nonce(&self, _account: Address) -> Result<U256, ChainError> {
        self.nonce_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonce)
    }

    async fn receipt_status(&self, _tx_hash: H256) -> Result<Option<bool>, ChainError> {
        Ok(None)
    }
}

pub struct StubSource(pub Arc<StubChain>);

impl AccessorSource for StubSource {
    fn acquire(&self) -> Arc<dyn ReadAccessor> {
        self.0.clone()
    }
}

/// Relay that always gives the same answer, optionally after a delay.
pub struct ScriptedRelay {
    pub name: String,
    pub delay: Option<Duration>,
    pub response: Result<H256, ChainError>,
    pub sends: AtomicUsize,
}

impl ScriptedRelay {
    pub fn answering(name: &str, response: Result<H256, ChainError>) -> Self {
        Self {
            name: name.into(),
            delay: None,
            response,
            sends: AtomicUsize::new(0),
        }
    }

    pub fn stalled(name: &str) -> Self {
        Self {
            delay: Some(Duration::from_secs(3600)),
            ..Self::answering(name, Err(ChainError::Timeout))
        }
    }
}

#[async_trait]
impl RawTransactionSubmitter for ScriptedRelay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _raw: Bytes) -> Result<H256, ChainError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }
}
