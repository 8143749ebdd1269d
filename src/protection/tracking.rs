//! Shared state behind the cooldown, activity and balance checks.

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ethers::types::{Address, H256, U256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::ChainError;
use crate::models::{Leg, ObservedIntent, PairKey, SwapIntent};

/// Last accepted submission per route fingerprint.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last: DashMap<String, Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: DashMap::new(),
        }
    }

    pub fn mark_submitted(&self, fingerprint: &str) {
        self.mark_at(fingerprint, Instant::now());
    }

    pub fn mark_at(&self, fingerprint: &str, at: Instant) {
        self.last.insert(fingerprint.to_string(), at);
    }

    /// Time left before `fingerprint` may be submitted again.
    pub fn remaining(&self, fingerprint: &str) -> Option<Duration> {
        let last = *self.last.get(fingerprint)?;
        self.window.checked_sub(last.elapsed()).filter(|d| !d.is_zero())
    }

    pub fn prune(&self) {
        self.last.retain(|_, at| at.elapsed() < self.window);
    }
}

/// Recently observed, still unconfirmed swap intents.
#[derive(Debug)]
pub struct ActivityTracker {
    lookback: Duration,
    pending: DashMap<H256, ObservedIntent>,
}

impl ActivityTracker {
    pub fn new(lookback: Duration) -> Self {
        Self {
            lookback,
            pending: DashMap::new(),
        }
    }

    pub fn record(&self, intent: SwapIntent) {
        self.record_at(intent, Instant::now());
    }

    pub fn record_at(&self, intent: SwapIntent, seen_at: Instant) {
        self.pending
            .insert(intent.hash, ObservedIntent { intent, seen_at });
    }

    /// The intent landed; it no longer competes with us.
    pub fn confirm(&self, hash: H256) {
        self.pending.remove(&hash);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// First pending intent within the lookback that touches one of `legs`:
    /// sent to a leg's router or pool, or swapping the same pair on the same
    /// venue kind.
    pub fn conflict(&self, legs: &[Leg]) -> Option<SwapIntent> {
        self.pending.iter().find_map(|entry| {
            if entry.seen_at.elapsed() > self.lookback {
                return None;
            }
            let intent = &entry.intent;
            let pair = PairKey::new(intent.token_in, intent.token_out);
            legs.iter()
                .any(|leg| {
                    intent.to == leg.pool.router
                        || intent.to == leg.pool.address
                        || (intent.dex_kind == leg.pool.kind && pair == leg.pool.pair_key())
                })
                .then(|| intent.clone())
        })
    }

    pub fn prune(&self) {
        let before = self.pending.len();
        self.pending
            .retain(|_, seen| seen.seen_at.elapsed() <= self.lookback);
        let dropped = before.saturating_sub(self.pending.len());
        if dropped > 0 {
            debug!(dropped, "[PIPELINE] expired swap intents");
        }
    }
}

/// Wallet-funded amounts promised to approved candidates that have not
/// finished executing. Reservations are made one at a time so two
/// candidates can never both count the same balance.
#[derive(Debug, Default)]
pub struct WalletReservations {
    turn: Mutex<()>,
    held: DashMap<String, (Address, U256)>,
}

impl WalletReservations {
    pub fn held_for(&self, asset: Address) -> U256 {
        self.held
            .iter()
            .filter(|e| e.value().0 == asset)
            .fold(U256::zero(), |acc, e| acc.saturating_add(e.value().1))
    }

    /// Read the balance and reserve `amount` of `asset` for `fingerprint` in
    /// one exclusive turn. A repeated call for the same fingerprint replaces
    /// its earlier reservation.
    pub async fn reserve<F, Fut>(
        &self,
        fingerprint: &str,
        asset: Address,
        amount: U256,
        read_balance: F,
    ) -> Result<bool, ChainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<U256, ChainError>>,
    {
        let _turn = self.turn.lock().await;
        let balance = read_balance().await?;
        let own = self
            .held
            .get(fingerprint)
            .filter(|e| e.0 == asset)
            .map(|e| e.1)
            .unwrap_or_default();
        let others = self.held_for(asset).saturating_sub(own);
        if balance.saturating_sub(others) < amount {
            return Ok(false);
        }
        self.held.insert(fingerprint.to_string(), (asset, amount));
        Ok(true)
    }

    pub fn release(&self, fingerprint: &str) {
        self.held.remove(fingerprint);
    }
}
