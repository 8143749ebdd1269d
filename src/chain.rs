//! Chain access seams.
//!
//! The engine never talks to a node directly. Reads go through a
//! [`ReadAccessor`] handed out by an [`AccessorSource`] (node selection and
//! rotation live behind it), writes through [`RawTransactionSubmitter`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use tokio::sync::Semaphore;

use crate::errors::{AppError, ChainError};

/// Fee quote. EIP-1559 fields are preferred; `gas_price` is the legacy fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeData {
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub gas_price: Option<U256>,
}

impl FeeData {
    pub fn is_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some() && self.max_priority_fee_per_gas.is_some()
    }

    /// Worst-case wei paid per gas unit.
    pub fn fee_per_gas(&self) -> Option<U256> {
        if self.is_eip1559() {
            self.max_fee_per_gas
        } else {
            self.gas_price
        }
    }
}

/// Minimal call/estimate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

#[async_trait]
pub trait ReadAccessor: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, ChainError>;

    async fn fee_data(&self) -> Result<FeeData, ChainError>;

    /// Native balance when `token` is `None`, ERC-20 balance otherwise.
    async fn balance(&self, owner: Address, token: Option<Address>) -> Result<U256, ChainError>;

    /// Pending transaction count of `account`.
    async fn pending_nonce(&self, account: Address) -> Result<U256, ChainError>;

    /// `Some(true)` mined ok, `Some(false)` reverted, `None` not mined yet.
    async fn receipt_status(&self, tx_hash: H256) -> Result<Option<bool>, ChainError>;
}

/// Hands out accessors. Consecutive calls may return different backends,
/// which is what a retry relies on.
pub trait AccessorSource: Send + Sync {
    fn acquire(&self) -> Arc<dyn ReadAccessor>;
}

/// Cycles through a fixed set of accessors.
pub struct RoundRobinSource {
    accessors: Vec<Arc<dyn ReadAccessor>>,
    next: AtomicUsize,
}

impl RoundRobinSource {
    pub fn new(accessors: Vec<Arc<dyn ReadAccessor>>) -> Result<Self, AppError> {
        if accessors.is_empty() {
            return Err(AppError::Config("at least one read accessor is required".into()));
        }
        Ok(Self {
            accessors,
            next: AtomicUsize::new(0),
        })
    }
}

impl AccessorSource for RoundRobinSource {
    fn acquire(&self) -> Arc<dyn ReadAccessor> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.accessors.len();
        self.accessors[i].clone()
    }
}

/// Single transaction-relay endpoint.
#[async_trait]
pub trait RawTransactionSubmitter: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, raw: Bytes) -> Result<H256, ChainError>;
}

/// Admission control in front of a [`ReadAccessor`].
///
/// All reads share a fixed window of in-flight requests; waiters are served
/// in FIFO order. Block-number calls use their own small lane so heavy calls
/// cannot starve them.
pub struct ThrottledAccessor {
    inner: Arc<dyn ReadAccessor>,
    general: Semaphore,
    fast_lane: Semaphore,
}

impl ThrottledAccessor {
    pub fn new(inner: Arc<dyn ReadAccessor>, window: usize, fast_lane: usize) -> Self {
        Self {
            inner,
            general: Semaphore::new(window.max(1)),
            fast_lane: Semaphore::new(fast_lane.max(1)),
        }
    }

    async fn admit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, ChainError> {
        self.general
            .acquire()
            .await
            .map_err(|_| ChainError::Connection("admission window closed".into()))
    }
}

#[async_trait]
impl ReadAccessor for ThrottledAccessor {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let _permit = self
            .fast_lane
            .acquire()
            .await
            .map_err(|_| ChainError::Connection("fast lane closed".into()))?;
        self.inner.block_number().await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let _permit = self.admit().await?;
        self.inner.call(to, data).await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, ChainError> {
        let _permit = self.admit().await?;
        self.inner.estimate_gas(request).await
    }

    async fn fee_data(&self) -> Result<FeeData, ChainError> {
        let _permit = self.admit().await?;
        self.inner.fee_data().await
    }

    async fn balance(&self, owner: Address, token: Option<Address>) -> Result<U256, ChainError> {
        let _permit = self.admit().await?;
        self.inner.balance(owner, token).await
    }

    async fn pending_nonce(&self, account: Address) -> Result<U256, ChainError> {
        let _permit = self.admit().await?;
        self.inner.pending_nonce(account).await
    }

    async fn receipt_status(&self, tx_hash: H256) -> Result<Option<bool>, ChainError> {
        let _permit = self.admit().await?;
        self.inner.receipt_status(tx_hash).await
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use std::time::Duration;

    #[test]
    fn fee_data_prefers_eip1559() {
        let fees = FeeData {
            max_fee_per_gas: Some(U256::from(50u64)),
            max_priority_fee_per_gas: Some(U256::from(2u64)),
            gas_price: Some(U256::from(40u64)),
        };
        assert_eq!(fees.fee_per_gas(), Some(U256::from(50u64)));

        let legacy = FeeData {
            gas_price: Some(U256::from(40u64)),
            ..FeeData::default()
        };
        assert!(!legacy.is_eip1559());
        assert_eq!(legacy.fee_per_gas(), Some(U256::from(40u64)));
    }

    #[test]
    fn round_robin_requires_an_accessor() {
        assert!(RoundRobinSource::new(vec![]).is_err());
    }

    #[tokio::test]
    async fn admission_window_caps_concurrency() {
        let mock = Arc::new(MockAccessor::default());
        *mock.delay.lock() = Some(Duration::from_millis(20));
        let throttled = Arc::new(ThrottledAccessor::new(mock.clone(), 2, 1));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let t = throttled.clone();
            handles.push(tokio::spawn(async move { t.fee_data().await }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert!(mock.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(mock.requests.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn block_number_bypasses_saturated_window() {
        let mock = Arc::new(MockAccessor::default());
        let throttled = Arc::new(ThrottledAccessor::new(mock.clone(), 1, 1));
        // hold the only general permit
        let _held = throttled.general.acquire().await.unwrap();
        let block = tokio::time::timeout(Duration::from_millis(200), throttled.block_number())
            .await
            .expect("fast lane must not wait for the general window");
        assert_eq!(block.unwrap(), 1);
    }
}
