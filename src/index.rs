//! In-memory pool index.
//!
//! The index publishes immutable [`IndexSnapshot`]s. A scan pass holds one
//! snapshot for its whole duration while refreshes and swap updates publish
//! new ones behind it.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::Address;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::dex::{self, ReserveState};
use crate::models::{PairKey, Pool};
use crate::oracle::PriceBook;

#[derive(Debug, Default)]
pub struct IndexSnapshot {
    pools: Vec<Arc<Pool>>,
    liquidity_usd: Vec<f64>,
    by_address: HashMap<Address, usize>,
    by_pair: HashMap<PairKey, Vec<usize>>,
    by_token: HashMap<Address, Vec<usize>>,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pool(&self, address: Address) -> Option<&Arc<Pool>> {
        self.by_address.get(&address).map(|i| &self.pools[*i])
    }

    pub fn liquidity_of(&self, address: Address) -> Option<f64> {
        self.by_address.get(&address).map(|i| self.liquidity_usd[*i])
    }

    /// Pair groups with every member pool.
    pub fn pair_groups(&self) -> impl Iterator<Item = (&PairKey, Vec<&Arc<Pool>>)> {
        self.by_pair
            .iter()
            .map(|(key, ids)| (key, ids.iter().map(|i| &self.pools[*i]).collect()))
    }

    pub fn pair_group(&self, key: &PairKey) -> Vec<&Arc<Pool>> {
        self.by_pair
            .get(key)
            .map(|ids| ids.iter().map(|i| &self.pools[*i]).collect())
            .unwrap_or_default()
    }

    /// Pools containing `token`.
    pub fn pools_with(&self, token: Address) -> Vec<&Arc<Pool>> {
        self.by_token
            .get(&token)
            .map(|ids| ids.iter().map(|i| &self.pools[*i]).collect())
            .unwrap_or_default()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Address> {
        self.by_token.keys()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    pub kept: usize,
    pub dropped_low_liquidity: usize,
    pub dropped_unpriced: usize,
}

pub struct PoolIndex {
    min_liquidity_usd: f64,
    current: RwLock<Arc<IndexSnapshot>>,
}

impl PoolIndex {
    pub fn new(min_liquidity_usd: f64) -> Self {
        Self {
            min_liquidity_usd,
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
        }
    }

    pub fn min_liquidity_usd(&self) -> f64 {
        self.min_liquidity_usd
    }

    /// Consistent view for one scan pass.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    /// Replace the whole index with `pools`, dropping venues that cannot be
    /// valued or sit below the liquidity floor.
    pub fn rebuild(&self, pools: Vec<Pool>, prices: &PriceBook) -> RebuildStats {
        let mut stats = RebuildStats::default();
        let mut snapshot = IndexSnapshot::default();
        for pool in pools {
            let Some(usd) = dex::liquidity_usd(&pool, |t| prices.usd(t)) else {
                stats.dropped_unpriced += 1;
                continue;
            };
            if usd < self.min_liquidity_usd {
                stats.dropped_low_liquidity += 1;
                continue;
            }
            if snapshot.by_address.contains_key(&pool.address) {
                continue;
            }
            let id = snapshot.pools.len();
            snapshot.by_address.insert(pool.address, id);
            snapshot.by_pair.entry(pool.pair_key()).or_default().push(id);
            snapshot.by_token.entry(pool.token0).or_default().push(id);
            snapshot.by_token.entry(pool.token1).or_default().push(id);
            snapshot.liquidity_usd.push(usd);
            snapshot.pools.push(Arc::new(pool));
            stats.kept += 1;
        }
        *self.current.write() = Arc::new(snapshot);
        info!(
            kept = stats.kept,
            dropped_low_liquidity = stats.dropped_low_liquidity,
            dropped_unpriced = stats.dropped_unpriced,
            "[INDEX] rebuilt"
        );
        stats
    }

    /// Patch one pool's reserves. Views are shared with the previous snapshot's
    /// layout; only the pool and its liquidity value change. Returns `false`
    /// for pools that are not indexed.
    pub fn apply_update(&self, address: Address, state: ReserveState, prices: &PriceBook) -> bool {
        let mut guard = self.current.write();
        let Some(&id) = guard.by_address.get(&address) else {
            return false;
        };
        let mut pool = (*guard.pools[id]).clone();
        pool.state = state;
        let usd = dex::liquidity_usd(&pool, |t| prices.usd(t)).unwrap_or(0.0);

        let mut next = IndexSnapshot {
            pools: guard.pools.clone(),
            liquidity_usd: guard.liquidity_usd.clone(),
            by_address: guard.by_address.clone(),
            by_pair: guard.by_pair.clone(),
            by_token: guard.by_token.clone(),
        };
        next.pools[id] = Arc::new(pool);
        next.liquidity_usd[id] = usd;
        *guard = Arc::new(next);
        debug!(pool = ?address, liquidity_usd = usd, "[INDEX] pool updated");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::test_pools::*;
    use ethers::types::U256;

    fn priced_book() -> PriceBook {
        let book = PriceBook::new();
        book.set(token(1), 1.0);
        book.set(token(2), 1.0);
        book
    }

    #[test]
    fn low_liquidity_pools_are_excluded() {
        let index = PoolIndex::new(300_000.0);
        let deep = v2_pool(100, token(1), token(2), 1.0, 250_000); // $500k
        let thin = v2_pool(101, token(1), token(2), 0.99, 25_000); // ~$50k
        let stats = index.rebuild(vec![deep, thin], &priced_book());
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.dropped_low_liquidity, 1);

        let snap = index.snapshot();
        assert!(snap.pool(Address::from_low_u64_be(101)).is_none());
        assert_eq!(snap.pair_group(&PairKey::new(token(1), token(2))).len(), 1);
        assert_eq!(snap.pools_with(token(1)).len(), 1);
    }

    #[test]
    fn unpriced_pools_fail_closed() {
        let index = PoolIndex::new(1.0);
        let pool = v2_pool(100, token(7), token(8), 1.0, 1_000);
        let stats = index.rebuild(vec![pool], &priced_book());
        assert_eq!(stats.dropped_unpriced, 1);
        assert!(index.snapshot().is_empty());
    }

    #[test]
    fn update_publishes_new_snapshot_without_touching_old() {
        let index = PoolIndex::new(1.0);
        let pool = v2_pool(100, token(1), token(2), 1.0, 1_000);
        index.rebuild(vec![pool], &priced_book());
        let before = index.snapshot();

        let state = ReserveState::Reserves {
            reserve0: U256::exp10(18) * 10u64,
            reserve1: U256::exp10(18) * 10u64,
        };
        assert!(index.apply_update(Address::from_low_u64_be(100), state.clone(), &priced_book()));
        let after = index.snapshot();

        let addr = Address::from_low_u64_be(100);
        assert_ne!(before.pool(addr).unwrap().state, state);
        assert_eq!(after.pool(addr).unwrap().state, state);
        assert!(after.liquidity_of(addr).unwrap() < before.liquidity_of(addr).unwrap());
        assert!(!index.apply_update(Address::from_low_u64_be(555), state, &priced_book()));
    }
}
