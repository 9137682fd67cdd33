//! Background watchers
//!
//! Independent polling activities that publish into the core bus: new
//! block headers, exchange-rate updates and auction status. Each runs as
//! its own task; the bus does not serialize across them.

use super::{AccountChainClient, RateProvider};
use crate::auction::AuctionEstimator;
use crate::events::{CoreEvent, EventBus};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Publishes a `coin-block` event for every new head and lets the
/// tracker refresh balances off the same event.
pub struct BlockWatcher {
    chain: String,
    client: Arc<dyn AccountChainClient>,
    bus: EventBus,
    poll_interval: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl BlockWatcher {
    pub fn new(
        chain: impl Into<String>,
        client: Arc<dyn AccountChainClient>,
        bus: EventBus,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            chain: chain.into(),
            client,
            bus,
            poll_interval: Duration::from_millis(poll_interval_ms),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn run(&self) {
        let mut last_seen: u64 = 0;
        info!(chain = %self.chain, "block watcher started");

        loop {
            if *self.shutdown.read().await {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;

            let header = match self.client.latest_block().await {
                Ok(header) => header,
                Err(err) => {
                    warn!(chain = %self.chain, %err, "head poll failed");
                    continue;
                }
            };

            if header.number <= last_seen {
                continue;
            }
            last_seen = header.number;
            debug!(chain = %self.chain, number = header.number, "new head");
            crate::metrics::record_block_seen(&self.chain, header.number);
            self.bus.publish(CoreEvent::CoinBlock {
                chain: self.chain.clone(),
                header,
            });
        }

        info!(chain = %self.chain, "block watcher stopped");
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

/// Publishes `coin-price-updated` events from the rate provider.
pub struct PricePoller {
    token: String,
    currency: String,
    provider: Arc<dyn RateProvider>,
    bus: EventBus,
    poll_interval: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl PricePoller {
    pub fn new(
        token: impl Into<String>,
        currency: impl Into<String>,
        provider: Arc<dyn RateProvider>,
        bus: EventBus,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            token: token.into(),
            currency: currency.into(),
            provider,
            bus,
            poll_interval: Duration::from_millis(poll_interval_ms),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn run(&self) {
        loop {
            if *self.shutdown.read().await {
                break;
            }

            match self
                .provider
                .fetch_rate(&self.token, &self.currency)
                .await
            {
                Ok(price) => {
                    self.bus.publish(CoreEvent::CoinPriceUpdated {
                        token: self.token.clone(),
                        currency: self.currency.clone(),
                        price,
                        at: Utc::now(),
                    });
                }
                Err(err) => {
                    warn!(token = %self.token, %err, "rate poll failed");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

/// Publishes `auction-status-updated` events from the auctions contract.
pub struct AuctionWatcher {
    estimator: Arc<AuctionEstimator>,
    bus: EventBus,
    poll_interval: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl AuctionWatcher {
    pub fn new(estimator: Arc<AuctionEstimator>, bus: EventBus, poll_interval_ms: u64) -> Self {
        Self {
            estimator,
            bus,
            poll_interval: Duration::from_millis(poll_interval_ms),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn run(&self) {
        loop {
            if *self.shutdown.read().await {
                break;
            }

            match self.estimator.auction_status().await {
                Ok(status) => {
                    self.bus
                        .publish(CoreEvent::AuctionStatusUpdated { status });
                }
                Err(err) => {
                    warn!(%err, "auction status poll failed");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockAccountChainClient, MockRateProvider};
    use crate::events::BlockHeader;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn block_watcher_publishes_each_new_head_once() {
        let mut client = MockAccountChainClient::new();
        let counter = Arc::new(AtomicU64::new(0));
        let calls = counter.clone();
        client.expect_latest_block().returning(move || {
            // Heads: 5, 5, 6 - the repeated head must not re-publish
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let number = if n < 2 { 5 } else { 6 };
            Ok(BlockHeader {
                hash: format!("0x{:x}", number),
                number,
                timestamp: 0,
            })
        });

        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let watcher = Arc::new(BlockWatcher::new("ETH", Arc::new(client), bus, 1));

        let task = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.run().await })
        };

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        watcher.stop().await;
        task.abort();

        match (first, second) {
            (
                CoreEvent::CoinBlock { header: a, .. },
                CoreEvent::CoinBlock { header: b, .. },
            ) => {
                assert_eq!(a.number, 5);
                assert_eq!(b.number, 6);
            }
            other => panic!("expected two coin-block events, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn price_poller_publishes_rates() {
        let mut provider = MockRateProvider::new();
        provider
            .expect_fetch_rate()
            .returning(|_, _| Ok(1234.5));

        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let poller = Arc::new(PricePoller::new(
            "ETH",
            "USD",
            Arc::new(provider),
            bus,
            1,
        ));

        let task = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run().await })
        };

        let event = rx.recv().await.unwrap();
        poller.stop().await;
        task.abort();

        match event {
            CoreEvent::CoinPriceUpdated {
                token,
                currency,
                price,
                ..
            } => {
                assert_eq!(token, "ETH");
                assert_eq!(currency, "USD");
                assert!((price - 1234.5).abs() < f64::EPSILON);
            }
            other => panic!("expected coin-price-updated, got {:?}", other),
        }
    }
}
