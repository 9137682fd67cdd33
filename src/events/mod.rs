//! Core event bus and event payload types
//!
//! One bus per core instance: lifecycle, tracker and bridge activity all
//! publish to a single ordered broadcast stream. Listeners run without
//! blocking the publisher; the bus does not serialize across sources, so
//! consumers may only rely on causal ordering within one submission's
//! own stage sequence.

pub mod meta;

use crate::error::WalletError;
use crate::tracker::WalletSnapshot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// New block header seen on a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub number: u64,
    pub timestamp: u64,
}

/// Auction-contract status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionStatus {
    /// Tokens still mintable in the current auction window
    pub token_remaining: String,
    /// Current auction price in the chain's base unit
    pub current_price: String,
    pub genesis_time: u64,
    pub daily_auction_start_time: u64,
}

/// Events flowing over the core bus. Names are stable strings consumed
/// by embedding applications.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// Activates tracking for a wallet id and its address set (consumed)
    OpenWallets {
        wallet_id: String,
        addresses: Vec<String>,
    },

    /// Full per-wallet address-state snapshot
    WalletStateChanged { snapshot: WalletSnapshot },

    /// Recoverable per-operation failure
    WalletError { message: String },

    /// Fatal failure
    Error { message: String },

    /// New block header on a watched chain
    CoinBlock { chain: String, header: BlockHeader },

    /// Exchange-rate update from the rate provider
    CoinPriceUpdated {
        token: String,
        currency: String,
        price: f64,
        at: DateTime<Utc>,
    },

    /// Auction-contract status update
    AuctionStatusUpdated { status: AuctionStatus },
}

impl CoreEvent {
    /// Stable event name
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::OpenWallets { .. } => "open-wallets",
            CoreEvent::WalletStateChanged { .. } => "wallet-state-changed",
            CoreEvent::WalletError { .. } => "wallet-error",
            CoreEvent::Error { .. } => "error",
            CoreEvent::CoinBlock { .. } => "coin-block",
            CoreEvent::CoinPriceUpdated { .. } => "coin-price-updated",
            CoreEvent::AuctionStatusUpdated { .. } => "auction-status-updated",
        }
    }
}

/// Broadcast bus owned by a core instance. Cloning shares the underlying
/// channel; there is no process-wide singleton.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish. A send with no live subscribers is not
    /// an error.
    pub fn publish(&self, event: CoreEvent) {
        debug!(event = event.name(), "bus publish");
        crate::metrics::record_event_published(event.name());
        let _ = self.tx.send(event);
    }

    /// Route an operation failure onto the bus: recoverable failures
    /// become `wallet-error`, everything else is fatal.
    pub fn publish_failure(&self, err: &WalletError) {
        if err.is_recoverable() {
            self.publish(CoreEvent::WalletError {
                message: err.to_string(),
            });
        } else {
            self.publish(CoreEvent::Error {
                message: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_stable() {
        let header = BlockHeader {
            hash: "0xabc".into(),
            number: 7,
            timestamp: 1_700_000_000,
        };
        assert_eq!(
            CoreEvent::CoinBlock {
                chain: "ETH".into(),
                header
            }
            .name(),
            "coin-block"
        );
        assert_eq!(
            CoreEvent::WalletError {
                message: "x".into()
            }
            .name(),
            "wallet-error"
        );
        assert_eq!(
            CoreEvent::OpenWallets {
                wallet_id: "1".into(),
                addresses: vec![]
            }
            .name(),
            "open-wallets"
        );
    }

    #[tokio::test]
    async fn recoverable_failures_surface_as_wallet_error() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish_failure(&WalletError::BroadcastRejected("underpriced".into()));
        bus.publish_failure(&WalletError::Internal("bad state".into()));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.name(), "wallet-error");
        assert_eq!(second.name(), "error");
    }
}
