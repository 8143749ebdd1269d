//! Outbound alert records. Delivery is someone else's job; the engine only
//! hands finished records to an [`AlertSink`].

use ethers::types::H256;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::arbitrage::CandidateStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Submitted,
    Skip,
    Fail,
    Info,
}

impl From<CandidateStatus> for AlertStatus {
    fn from(status: CandidateStatus) -> Self {
        match status {
            CandidateStatus::Submitted => AlertStatus::Submitted,
            CandidateStatus::Failed => AlertStatus::Fail,
            CandidateStatus::Skipped => AlertStatus::Skip,
            CandidateStatus::Pending | CandidateStatus::Approved => AlertStatus::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub status: AlertStatus,
    pub fingerprint: Option<String>,
    pub route: String,
    pub profit_usd: Option<f64>,
    pub reason: Option<String>,
    pub tx_hash: Option<H256>,
}

impl Alert {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            status: AlertStatus::Info,
            fingerprint: None,
            route: message.into(),
            profit_usd: None,
            reason: None,
            tx_hash: None,
        }
    }
}

pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: Alert);
}

/// Writes alerts to the log.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, alert: Alert) {
        let profit = alert.profit_usd.unwrap_or(0.0);
        match alert.status {
            AlertStatus::Fail => warn!(
                route = %alert.route,
                profit_usd = profit,
                reason = alert.reason.as_deref().unwrap_or(""),
                "[ALERT] fail"
            ),
            status => info!(
                ?status,
                route = %alert.route,
                profit_usd = profit,
                reason = alert.reason.as_deref().unwrap_or(""),
                tx_hash = ?alert.tx_hash,
                "[ALERT]"
            ),
        }
    }
}

/// Forwards alerts over an unbounded channel. Dropped receivers are ignored.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn emit(&self, alert: Alert) {
        let _ = self.tx.send(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_onto_alerts() {
        assert_eq!(AlertStatus::from(CandidateStatus::Submitted), AlertStatus::Submitted);
        assert_eq!(AlertStatus::from(CandidateStatus::Skipped), AlertStatus::Skip);
        assert_eq!(AlertStatus::from(CandidateStatus::Failed), AlertStatus::Fail);
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelAlertSink::new();
        sink.emit(Alert::info("engine started"));
        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.status, AlertStatus::Info);
        assert_eq!(alert.route, "engine started");
        assert_eq!(serde_json::to_value(&alert).unwrap()["status"], "info");
    }
}
