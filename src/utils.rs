//! Miscellaneous helper utilities.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

use crate::errors::ChainError;

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One retry policy for every component that reads the chain.
///
/// Each attempt is bounded by `timeout`. Only transient failures (timeouts,
/// dropped connections, rate limiting) are retried; the operation is
/// re-invoked so it can pick a fresh accessor.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            timeout: Duration::from_secs(3),
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => ChainError::Timeout,
            };
            if !err.is_transient() || attempt >= attempts {
                return Err(err);
            }
            debug!(label, attempt, error = %err, "[RETRY] transient failure, retrying");
            tokio::time::sleep(self.backoff * attempt).await;
            attempt += 1;
        }
    }
}
