use std::collections::BTreeSet;

use ethers::types::{Address, U256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chain::AccessorSource;
use crate::errors::ChainError;
use crate::utils::RetryPolicy;

/// Hands out nonces for one sending account.
///
/// Callers queue on a FIFO mutex. The first caller reads the pending
/// transaction count; everyone after that gets the previous value plus one.
/// Nonces handed back through [`NonceManager::release`] are reissued lowest
/// first, so a failed send never leaves a gap and never duplicates a nonce
/// another caller still holds.
pub struct NonceManager {
    account: Address,
    state: Mutex<NonceState>,
}

#[derive(Default)]
struct NonceState {
    next: Option<U256>,
    released: BTreeSet<U256>,
}

impl NonceManager {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            state: Mutex::new(NonceState::default()),
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub async fn next(&self, reads: &dyn AccessorSource, retry: &RetryPolicy) -> Result<U256, ChainError> {
        let mut state = self.state.lock().await;
        if let Some(nonce) = state.released.pop_first() {
            debug!(account = ?self.account, %nonce, "[EXEC] reissuing released nonce");
            return Ok(nonce);
        }
        let nonce = match state.next {
            Some(nonce) => nonce,
            None => {
                let account = self.account;
                let base = retry
                    .run("pending_nonce", || {
                        let accessor = reads.acquire();
                        async move { accessor.pending_nonce(account).await }
                    })
                    .await?;
                info!(account = ?account, %base, "[EXEC] nonce base loaded");
                base
            }
        };
        state.next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Hand back a nonce that never reached the network. The newest nonce
    /// rolls the counter back; older ones wait to be reissued.
    pub async fn release(&self, nonce: U256) {
        let mut state = self.state.lock().await;
        if state.next != Some(nonce + U256::one()) {
            state.released.insert(nonce);
            debug!(account = ?self.account, %nonce, "[EXEC] nonce released");
            return;
        }
        let mut next = nonce;
        while !next.is_zero() && state.released.remove(&(next - U256::one())) {
            next -= U256::one();
        }
        state.next = Some(next);
        debug!(account = ?self.account, %next, "[EXEC] nonce counter rolled back");
    }
}
