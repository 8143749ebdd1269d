//! Bounded, edge-ordered hand-off between the scanner and the workers.

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::types::TradeCandidate;

/// Result of offering a candidate to the queue.
#[derive(Debug, Default)]
pub struct Admission {
    /// The offered candidate is now queued (possibly replacing a lower-edge
    /// entry with the same fingerprint).
    pub accepted: bool,
    /// Candidates pushed out by capacity. They never reach a worker.
    pub evicted: Vec<TradeCandidate>,
}

#[derive(Default)]
struct QueueState {
    // ascending edge; the best candidate sits at the end
    items: Vec<TradeCandidate>,
    closed: bool,
}

/// Priority queue keyed by edge. On overflow the lowest edge goes first.
pub struct CandidateQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl CandidateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, candidate: TradeCandidate) -> Admission {
        let mut admission = Admission::default();
        {
            let mut state = self.state.lock();
            if state.closed {
                return admission;
            }
            if let Some(pos) = state
                .items
                .iter()
                .position(|c| c.fingerprint == candidate.fingerprint)
            {
                if state.items[pos].edge() >= candidate.edge() {
                    return admission;
                }
                state.items.remove(pos);
            }

            let edge = candidate.edge();
            let fingerprint = candidate.fingerprint.clone();
            let at = state.items.partition_point(|c| c.edge() < edge);
            state.items.insert(at, candidate);
            while state.items.len() > self.capacity {
                admission.evicted.push(state.items.remove(0));
            }
            admission.accepted = !admission
                .evicted
                .iter()
                .any(|c| c.fingerprint == fingerprint);
        }
        if admission.accepted {
            self.notify.notify_one();
        }
        admission
    }

    /// Highest-edge candidate, waiting if the queue is empty. `None` once the
    /// queue is closed; leftovers are collected with [`drain`](Self::drain).
    pub async fn pop(&self) -> Option<TradeCandidate> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(candidate) = state.items.pop() {
                    return Some(candidate);
                }
            }
            notified.await;
        }
    }

    /// Stop accepting and wake every waiter. Queued candidates stay until
    /// [`drain`](Self::drain) is called.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn drain(&self) -> Vec<TradeCandidate> {
        std::mem::take(&mut self.state.lock().items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::types::{CandidateStatus, Funding, Opportunity};
    use crate::dex::test_pools::*;
    use ethers::types::U256;
    use std::sync::Arc;
    use std::time::Duration;

    fn candidate(fingerprint: &str, edge: f64) -> TradeCandidate {
        let pool = Arc::new(v2_pool(100, token(1), token(2), 1.0, 1_000));
        TradeCandidate {
            fingerprint: fingerprint.to_string(),
            opportunity: Opportunity::Direct {
                token_in: token(2),
                token_out: token(1),
                venue_buy: pool.clone(),
                venue_sell: pool.clone(),
                price_buy: 1.0,
                price_sell: 1.0 + edge,
                edge,
            },
            legs: Vec::new(),
            funding: Funding::FlashLoan,
            loan_asset: token(2),
            loan_decimals: 18,
            loan_amount_usd: 1_000.0,
            loan_amount: U256::exp10(21),
            expected_out: U256::exp10(21),
            min_out: U256::exp10(21),
            slippage_bps: 50,
            estimated_slippage_pct: 0.0,
            estimated_gas_cost_usd: 0.0,
            estimated_profit_usd: None,
            gas_limit: None,
            fee_per_gas: None,
            created_at_ms: 0,
            status: CandidateStatus::Pending,
        }
    }

    #[tokio::test]
    async fn pops_in_descending_edge_order() {
        let queue = CandidateQueue::new(8);
        for (fp, edge) in [("a", 0.01), ("b", 0.03), ("c", 0.02)] {
            assert!(queue.push(candidate(fp, edge)).accepted);
        }
        let order: Vec<String> = [
            queue.pop().await.unwrap(),
            queue.pop().await.unwrap(),
            queue.pop().await.unwrap(),
        ]
        .into_iter()
        .map(|c| c.fingerprint)
        .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn overflow_drops_lowest_edge() {
        let queue = CandidateQueue::new(2);
        queue.push(candidate("a", 0.02));
        queue.push(candidate("b", 0.03));
        let admission = queue.push(candidate("c", 0.01));
        assert!(!admission.accepted);
        assert_eq!(admission.evicted[0].fingerprint, "c");

        let admission = queue.push(candidate("d", 0.05));
        assert!(admission.accepted);
        assert_eq!(admission.evicted.len(), 1);
        assert_eq!(admission.evicted[0].fingerprint, "a");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn duplicate_fingerprint_keeps_higher_edge() {
        let queue = CandidateQueue::new(4);
        queue.push(candidate("a", 0.02));
        assert!(!queue.push(candidate("a", 0.01)).accepted);
        assert!(queue.push(candidate("a", 0.04)).accepted);
        let items = queue.drain();
        assert_eq!(items.len(), 1);
        assert!((items[0].edge() - 0.04).abs() < 1e-12);
    }

    #[tokio::test]
    async fn close_wakes_waiting_workers() {
        let queue = Arc::new(CandidateQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(popped.is_none());
        assert!(!queue.push(candidate("late", 0.5)).accepted);
    }

    #[tokio::test]
    async fn waiting_worker_receives_pushed_candidate() {
        let queue = Arc::new(CandidateQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(candidate("a", 0.02));
        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.unwrap().fingerprint, "a");
    }
}
