//! Direct and triangular opportunity search over an index snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use ethers::types::Address;
use tracing::debug;

use super::types::{Opportunity, ScannerConfig};
use crate::dex;
use crate::index::IndexSnapshot;
use crate::models::{PairKey, Pool};

/// Relative divergence of two prices against their mean. Zero iff equal.
pub fn direct_edge(price_a: f64, price_b: f64) -> f64 {
    let mid = (price_a + price_b) / 2.0;
    if !(mid > 0.0) {
        return 0.0;
    }
    (price_a - price_b).abs() / mid
}

pub struct OpportunityScanner {
    config: ScannerConfig,
}

impl OpportunityScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Full pass: every pair group and every start token.
    pub fn scan(&self, snapshot: &IndexSnapshot) -> Vec<Opportunity> {
        let mut out = self.scan_direct(snapshot);
        out.extend(self.scan_triangular(snapshot));
        debug!(found = out.len(), pools = snapshot.len(), "[SCAN] full pass");
        out
    }

    pub fn scan_direct(&self, snapshot: &IndexSnapshot) -> Vec<Opportunity> {
        snapshot
            .pair_groups()
            .flat_map(|(key, members)| self.direct_in_group(snapshot, key, &members))
            .collect()
    }

    pub fn scan_triangular(&self, snapshot: &IndexSnapshot) -> Vec<Opportunity> {
        let starts: Vec<Address> = if self.config.start_tokens.is_empty() {
            snapshot.tokens().copied().collect()
        } else {
            self.config.start_tokens.clone()
        };
        starts
            .into_iter()
            .flat_map(|start| self.cycles_from(snapshot, start))
            .collect()
    }

    /// Incremental pass after `pool` changed: its pair group plus the cycles
    /// running through it. Rotations starting at the third token of a cycle
    /// are left to the next full pass when no start tokens are configured.
    pub fn scan_touching(&self, snapshot: &IndexSnapshot, pool: Address) -> Vec<Opportunity> {
        let Some(changed) = snapshot.pool(pool).cloned() else {
            return Vec::new();
        };
        let key = changed.pair_key();
        let mut out = self.direct_in_group(snapshot, &key, &snapshot.pair_group(&key));

        let starts: Vec<Address> = if self.config.start_tokens.is_empty() {
            vec![changed.token0, changed.token1]
        } else {
            self.config.start_tokens.clone()
        };
        for start in starts {
            out.extend(self.cycles_from(snapshot, start).into_iter().filter(|opp| {
                matches!(opp, Opportunity::Triangular { pools, .. }
                    if pools.iter().any(|p| p.address == pool))
            }));
        }
        out
    }

    fn liquid(&self, snapshot: &IndexSnapshot, pool: &Pool) -> bool {
        snapshot
            .liquidity_of(pool.address)
            .is_some_and(|usd| usd >= self.config.min_liquidity_usd)
    }

    /// Orientation for a pair: start from a configured start token when only
    /// one side is one, otherwise from the higher-sorted token.
    fn orient(&self, key: &PairKey) -> (Address, Address) {
        let starts = &self.config.start_tokens;
        if starts.contains(&key.0) && !starts.contains(&key.1) {
            (key.0, key.1)
        } else {
            (key.1, key.0)
        }
    }

    fn direct_in_group(
        &self,
        snapshot: &IndexSnapshot,
        key: &PairKey,
        members: &[&Arc<Pool>],
    ) -> Vec<Opportunity> {
        let (token_in, token_out) = self.orient(key);
        // price of token_out in token_in per venue
        let priced: Vec<(&Arc<Pool>, f64)> = members
            .iter()
            .filter(|p| self.liquid(snapshot, p))
            .filter_map(|p| dex::unit_price(p, token_out, token_in).map(|price| (*p, price)))
            .collect();
        if priced.len() < 2 {
            return Vec::new();
        }

        let mut chosen: HashSet<(usize, usize)> = HashSet::new();
        for (i, (_, price_i)) in priced.iter().enumerate() {
            let best = priced
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, (_, price_j))| (j, direct_edge(*price_i, *price_j)))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((j, edge)) = best {
                if edge > self.config.min_edge {
                    chosen.insert((i.min(j), i.max(j)));
                }
            }
        }

        chosen
            .into_iter()
            .map(|(i, j)| {
                let (a, b) = (&priced[i], &priced[j]);
                let (buy, sell) = if a.1 <= b.1 { (a, b) } else { (b, a) };
                Opportunity::Direct {
                    token_in,
                    token_out,
                    venue_buy: buy.0.clone(),
                    venue_sell: sell.0.clone(),
                    price_buy: buy.1,
                    price_sell: sell.1,
                    edge: direct_edge(buy.1, sell.1),
                }
            })
            .collect()
    }

    /// Bounded 3-hop search `start -> b -> c -> start` through distinct pools.
    fn cycles_from(&self, snapshot: &IndexSnapshot, start: Address) -> Vec<Opportunity> {
        let mut out = Vec::new();
        for p1 in snapshot.pools_with(start) {
            if !self.liquid(snapshot, p1) {
                continue;
            }
            let Some(b) = p1.other_token(start) else { continue };
            let Some(r1) = dex::spot_rate(p1, start) else { continue };

            for p2 in snapshot.pools_with(b) {
                if p2.address == p1.address || !self.liquid(snapshot, p2) {
                    continue;
                }
                let Some(c) = p2.other_token(b) else { continue };
                if c == start {
                    continue;
                }
                let Some(r2) = dex::spot_rate(p2, b) else { continue };

                for p3 in snapshot.pair_group(&PairKey::new(c, start)) {
                    if p3.address == p1.address
                        || p3.address == p2.address
                        || !self.liquid(snapshot, p3)
                    {
                        continue;
                    }
                    let Some(r3) = dex::spot_rate(p3, c) else { continue };
                    let cycle_rate = r1 * r2 * r3;
                    let edge = cycle_rate - 1.0;
                    if edge > self.config.min_edge {
                        out.push(Opportunity::Triangular {
                            route: [start, b, c, start],
                            pools: [p1.clone(), p2.clone(), p3.clone()],
                            cycle_rate,
                            edge,
                        });
                    }
                }
            }
        }
        out
    }
}
