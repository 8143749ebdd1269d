//! Discovery feeds: where the pool universe comes from.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::chain::AccessorSource;
use crate::dex::read_live_state;
use crate::dex::state::ReserveState;
use crate::errors::{AppError, ChainError};
use crate::models::Pool;
use crate::utils::RetryPolicy;

/// Pull-style source of pool records. Each call returns the full universe.
#[async_trait]
pub trait DiscoveryFeed: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Pool>, AppError>;
}

/// Pools from a JSON array on disk, re-read on every fetch.
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DiscoveryFeed for JsonFileFeed {
    async fn fetch(&self) -> Result<Vec<Pool>, AppError> {
        let raw = tokio::fs::read(&self.path).await?;
        let pools: Vec<Pool> = serde_json::from_slice(&raw)?;
        debug!(path = %self.path.display(), pools = pools.len(), "[INDEX] pool file read");
        Ok(pools)
    }
}

/// Wraps another feed and overwrites every pool's state with a fresh chain
/// read. Pools whose read fails keep the state the inner feed reported.
pub struct LiveReserveFeed<F> {
    inner: F,
    reads: Arc<dyn AccessorSource>,
    retry: RetryPolicy,
}

impl<F: DiscoveryFeed> LiveReserveFeed<F> {
    pub fn new(inner: F, reads: Arc<dyn AccessorSource>, retry: RetryPolicy) -> Self {
        Self { inner, reads, retry }
    }

    async fn refresh(&self, pool: &Pool) -> Result<Option<ReserveState>, ChainError> {
        self.retry
            .run("reserves", || {
                let accessor = self.reads.acquire();
                async move { read_live_state(accessor.as_ref(), pool).await }
            })
            .await
    }
}

#[async_trait]
impl<F: DiscoveryFeed> DiscoveryFeed for LiveReserveFeed<F> {
    async fn fetch(&self) -> Result<Vec<Pool>, AppError> {
        let mut pools = self.inner.fetch().await?;
        let reads = join_all(pools.iter().map(|pool| self.refresh(pool))).await;
        let mut refreshed = 0usize;
        for (pool, read) in pools.iter_mut().zip(reads) {
            match read {
                Ok(Some(state)) => {
                    pool.state = state;
                    refreshed += 1;
                }
                Ok(None) => {}
                Err(err) => warn!(pool = ?pool.address, error = %err, "[INDEX] reserve refresh failed"),
            }
        }
        info!(refreshed, total = pools.len(), "[INDEX] live reserves applied");
        Ok(pools)
    }
}
