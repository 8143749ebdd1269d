use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Bytes, H256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::chain::RawTransactionSubmitter;
use crate::errors::ChainError;

static TX_HASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]{64}").expect("valid regex"));

/// Relay answers meaning the transaction is already in some mempool.
const DUPLICATE_MARKERS: [&str; 2] = ["already known", "nonce too low"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReceipt {
    pub relay: String,
    pub tx_hash: H256,
    /// The relay reported a duplicate rather than accepting the payload.
    pub duplicate: bool,
}

/// Every relay refused or timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFailure {
    pub attempts: Vec<(String, String)>,
}

impl fmt::Display for RelayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "no relays configured");
        }
        let parts: Vec<String> = self
            .attempts
            .iter()
            .map(|(relay, reason)| format!("{relay}: {reason}"))
            .collect();
        write!(f, "all relays failed ({})", parts.join("; "))
    }
}

/// Tries relays in order until one accepts the signed payload.
pub struct RelayFanout {
    relays: Vec<Arc<dyn RawTransactionSubmitter>>,
    per_relay_timeout: Duration,
}

impl RelayFanout {
    pub fn new(relays: Vec<Arc<dyn RawTransactionSubmitter>>, per_relay_timeout: Duration) -> Self {
        Self {
            relays,
            per_relay_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub async fn submit(&self, raw: &Bytes) -> Result<RelayReceipt, RelayFailure> {
        let mut attempts = Vec::new();
        for relay in &self.relays {
            let name = relay.name().to_string();
            let sent = tokio::time::timeout(self.per_relay_timeout, relay.send(raw.clone())).await;
            match sent {
                Ok(Ok(tx_hash)) => {
                    info!(relay = %name, ?tx_hash, "[RELAY] accepted");
                    return Ok(RelayReceipt {
                        relay: name,
                        tx_hash,
                        duplicate: false,
                    });
                }
                Ok(Err(err)) => {
                    if let Some(tx_hash) = duplicate_hash(&err, raw) {
                        info!(relay = %name, ?tx_hash, error = %err, "[RELAY] already in mempool");
                        return Ok(RelayReceipt {
                            relay: name,
                            tx_hash,
                            duplicate: true,
                        });
                    }
                    warn!(relay = %name, error = %err, "[RELAY] rejected");
                    attempts.push((name, err.to_string()));
                }
                Err(_) => {
                    debug!(relay = %name, timeout_ms = self.per_relay_timeout.as_millis() as u64, "[RELAY] timed out");
                    attempts.push((name, ChainError::Timeout.to_string()));
                }
            }
        }
        Err(RelayFailure { attempts })
    }
}

/// Hash of a transaction some node already holds, or `None` when `err` is a
/// real rejection. Falls back to hashing the payload when the message carries
/// no hash.
fn duplicate_hash(err: &ChainError, raw: &Bytes) -> Option<H256> {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if !DUPLICATE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return None;
    }
    let from_message = TX_HASH
        .find(&message)
        .and_then(|m| m.as_str().parse::<H256>().ok());
    Some(from_message.unwrap_or_else(|| H256::from(keccak256(raw))))
}
