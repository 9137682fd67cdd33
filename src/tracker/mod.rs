//! Per-address transaction ledger
//!
//! The tracker owns the per-wallet address-state map for the lifetime of
//! a core instance; no other component mutates it. It decorates
//! submission handles, merges lifecycle events into the ledger and
//! emits consolidated `wallet-state-changed` snapshots.
//!
//! Merges for one address are serialized through that address's lock;
//! merges for different addresses proceed independently. Confirmed
//! entries are append-only: a snapshot never omits a previously merged
//! transaction, though pending entries may be replaced as more data
//! becomes available.

use crate::chain::{AccountChainAdapter, AccountChainClient};
use crate::error::WalletResult;
use crate::events::meta::{self, MetaAction};
use crate::events::{CoreEvent, EventBus};
use crate::tx::lifecycle::{SubmissionEvent, SubmissionHandle, TxReceipt};

use dashmap::DashMap;
use ethers::types::U256;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Raw fields of a tracked transaction
#[derive(Debug, Clone, Serialize)]
pub struct TxSummary {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: U256,
}

/// One ledger entry for an address
#[derive(Debug, Clone, Serialize)]
pub struct TrackedTransaction {
    pub transaction: TxSummary,
    /// `None` until mined; immutable once set
    pub receipt: Option<TxReceipt>,
    pub meta: MetaAction,
}

/// External-facing view of one address
#[derive(Debug, Clone, Default, Serialize)]
pub struct WalletAddressState {
    /// Chain-confirmed balance; pending transactions never alter it
    pub balance: U256,
    /// Token balances keyed by contract address
    pub token_balances: HashMap<String, U256>,
    pub transactions: Vec<TrackedTransaction>,
}

/// Full per-wallet state snapshot carried by `wallet-state-changed`
#[derive(Debug, Clone, Serialize)]
pub struct WalletSnapshot {
    pub wallet_id: String,
    pub addresses: HashMap<String, WalletAddressState>,
}

impl WalletSnapshot {
    /// JSON form for embedding applications that bridge the bus out of
    /// process.
    pub fn to_json(&self) -> crate::error::WalletResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| crate::error::WalletError::Internal(e.to_string()))
    }
}

pub struct TransactionTracker {
    bus: EventBus,
    client: Arc<dyn AccountChainClient>,
    /// Wallet id -> tracked addresses
    wallets: DashMap<String, Vec<String>>,
    /// Address -> owning wallet id
    address_wallet: DashMap<String, String>,
    /// Address -> serialized ledger
    ledgers: DashMap<String, Arc<Mutex<WalletAddressState>>>,
    shutdown: Arc<RwLock<bool>>,
}

impl TransactionTracker {
    pub fn new(bus: EventBus, client: Arc<dyn AccountChainClient>) -> Self {
        Self {
            bus,
            client,
            wallets: DashMap::new(),
            address_wallet: DashMap::new(),
            ledgers: DashMap::new(),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Activate tracking for a wallet's addresses and emit an initial
    /// snapshot.
    pub async fn open_wallets(&self, wallet_id: &str, addresses: Vec<String>) {
        for address in &addresses {
            self.address_wallet
                .insert(address.clone(), wallet_id.to_string());
            self.ledgers
                .entry(address.clone())
                .or_insert_with(|| Arc::new(Mutex::new(WalletAddressState::default())));
        }
        self.wallets.insert(wallet_id.to_string(), addresses);
        info!(wallet_id, "wallet tracking opened");

        self.refresh_balances(wallet_id).await;
        self.emit_snapshot(wallet_id).await;
    }

    /// Decorate a submission handle: lifecycle events flow into the
    /// ledger while the handle passes through to the caller unchanged.
    pub fn log_transaction(
        self: &Arc<Self>,
        handle: SubmissionHandle,
        wallet_id: &str,
        address: &str,
        template: MetaAction,
    ) -> SubmissionHandle {
        let tracker = self.clone();
        let wallet_id = wallet_id.to_string();
        let address = address.to_string();
        let mut rx = handle.subscribe();
        // The broadcast may already have been acknowledged before this
        // decoration; seed the pending entry from the assigned hash
        let pre_assigned = handle.hash();

        tokio::spawn(async move {
            if let Some(hash) = pre_assigned {
                let entry = TrackedTransaction {
                    transaction: summarize(&template, &hash, &address),
                    receipt: None,
                    meta: template.clone(),
                };
                tracker.merge(&wallet_id, &address, entry).await;
                tracker.emit_snapshot(&wallet_id).await;
            }

            while let Ok(event) = rx.recv().await {
                match event {
                    SubmissionEvent::Hash { hash } => {
                        let entry = TrackedTransaction {
                            transaction: summarize(&template, &hash, &address),
                            receipt: None,
                            meta: template.clone(),
                        };
                        tracker.merge(&wallet_id, &address, entry).await;
                        tracker.emit_snapshot(&wallet_id).await;
                    }
                    SubmissionEvent::Confirmation { .. } => {}
                    SubmissionEvent::Receipt { receipt } => {
                        match meta::parse(&template, &receipt) {
                            Ok(meta) => {
                                let entry = TrackedTransaction {
                                    transaction: summarize(
                                        &meta,
                                        &receipt.transaction_hash,
                                        &address,
                                    ),
                                    receipt: Some(receipt),
                                    meta,
                                };
                                tracker.merge(&wallet_id, &address, entry).await;
                                tracker.emit_snapshot(&wallet_id).await;
                            }
                            Err(err) => {
                                error!(%err, "receipt meta decoding failed");
                                tracker.bus.publish_failure(&err);
                            }
                        }
                        break;
                    }
                    SubmissionEvent::Error { message } => {
                        warn!(%message, "tracked submission failed");
                        tracker.bus.publish(CoreEvent::WalletError { message });
                        break;
                    }
                }
            }
        });

        handle
    }

    /// Merge one entry into an address ledger. Idempotent by transaction
    /// hash: re-delivery of the same receipt does not duplicate the
    /// entry, and a receipt already recorded is never overwritten.
    async fn merge(&self, wallet_id: &str, address: &str, entry: TrackedTransaction) {
        let ledger = self
            .ledgers
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(WalletAddressState::default())))
            .clone();
        self.address_wallet
            .entry(address.to_string())
            .or_insert_with(|| wallet_id.to_string());

        let mut state = ledger.lock().await;
        match state
            .transactions
            .iter_mut()
            .find(|t| t.transaction.hash == entry.transaction.hash)
        {
            Some(existing) => {
                if existing.receipt.is_some() {
                    debug!(hash = %entry.transaction.hash, "duplicate receipt ignored");
                    return;
                }
                *existing = entry;
            }
            None => state.transactions.push(entry),
        }
        crate::metrics::record_tx_merged();
    }

    /// Re-read chain balances for a wallet's addresses. Triggered on new
    /// block headers, independently of transaction merges.
    async fn refresh_balances(&self, wallet_id: &str) {
        let Some(addresses) = self.wallets.get(wallet_id).map(|a| a.clone()) else {
            return;
        };

        // Addresses refresh independently of each other
        let refreshes = addresses.into_iter().map(|address| async move {
            // Balance refresh covers the account chain; other address
            // formats are skipped here
            let Ok(parsed) = AccountChainAdapter::parse_address(&address) else {
                return;
            };
            match self.client.balance(parsed).await {
                Ok(balance) => {
                    if let Some(ledger) = self.ledgers.get(&address) {
                        ledger.value().lock().await.balance = balance;
                    }
                }
                Err(err) => {
                    warn!(%address, %err, "balance refresh failed");
                }
            }
        });
        join_all(refreshes).await;
    }

    async fn emit_snapshot(&self, wallet_id: &str) {
        if let Some(snapshot) = self.snapshot(wallet_id).await {
            self.bus.publish(CoreEvent::WalletStateChanged { snapshot });
        }
    }

    /// Current consolidated state for a wallet.
    pub async fn snapshot(&self, wallet_id: &str) -> Option<WalletSnapshot> {
        let addresses = self.wallets.get(wallet_id).map(|a| a.clone())?;

        let mut states = HashMap::new();
        for address in addresses {
            let state = match self.ledgers.get(&address) {
                Some(ledger) => ledger.value().lock().await.clone(),
                None => WalletAddressState::default(),
            };
            states.insert(address, state);
        }

        Some(WalletSnapshot {
            wallet_id: wallet_id.to_string(),
            addresses: states,
        })
    }

    /// Consume bus events: `open-wallets` activates tracking, new block
    /// headers trigger balance refreshes for every open wallet.
    pub async fn run(&self) -> WalletResult<()> {
        let mut rx = self.bus.subscribe();
        info!("transaction tracker started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            match rx.recv().await {
                Ok(CoreEvent::OpenWallets {
                    wallet_id,
                    addresses,
                }) => {
                    self.open_wallets(&wallet_id, addresses).await;
                }
                Ok(CoreEvent::CoinBlock { .. }) => {
                    let wallet_ids: Vec<String> =
                        self.wallets.iter().map(|e| e.key().clone()).collect();
                    for wallet_id in wallet_ids {
                        self.refresh_balances(&wallet_id).await;
                        self.emit_snapshot(&wallet_id).await;
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tracker lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("transaction tracker stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}

/// Derive the raw transaction fields recorded alongside a meta action.
fn summarize(meta: &MetaAction, hash: &str, origin_address: &str) -> TxSummary {
    match meta {
        MetaAction::Transfer {
            from, to, value, ..
        } => TxSummary {
            hash: hash.to_string(),
            from: format!("{:?}", from),
            to: format!("{:?}", to),
            value: *value,
        },
        MetaAction::Export {
            destination_recipient,
            amount_to_burn,
            ..
        } => TxSummary {
            hash: hash.to_string(),
            from: origin_address.to_string(),
            to: format!("{:?}", destination_recipient),
            value: *amount_to_burn,
        },
        MetaAction::ImportRequest {
            destination_recipient,
            value,
            ..
        } => TxSummary {
            hash: hash.to_string(),
            from: origin_address.to_string(),
            to: format!("{:?}", destination_recipient),
            value: *value,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockAccountChainClient;
    use crate::events::BlockHeader;
    use crate::tx::lifecycle;
    use ethers::types::Address;

    const ADDR: &str = "0x1111111111111111111111111111111111111111";

    fn coin_template() -> MetaAction {
        MetaAction::Transfer {
            token: None,
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            value: U256::from(1_000u64),
            contract_call_failed: false,
        }
    }

    fn receipt(hash: &str) -> TxReceipt {
        TxReceipt {
            transaction_hash: hash.to_string(),
            block_hash: "0xb10c".into(),
            block_number: 10,
            block_timestamp: 1_700_000_000,
            success: true,
            logs: vec![],
        }
    }

    fn tracker_with(client: MockAccountChainClient) -> (Arc<TransactionTracker>, EventBus) {
        let bus = EventBus::new(64);
        let tracker = Arc::new(TransactionTracker::new(bus.clone(), Arc::new(client)));
        (tracker, bus)
    }

    #[tokio::test]
    async fn duplicate_receipts_merge_to_one_entry() {
        let (tracker, _bus) = tracker_with(MockAccountChainClient::new());
        tracker.open_wallets("w1", vec![ADDR.into()]).await;

        let entry = TrackedTransaction {
            transaction: TxSummary {
                hash: "0xdup".into(),
                from: ADDR.into(),
                to: "0x22".into(),
                value: U256::from(5u64),
            },
            receipt: Some(receipt("0xdup")),
            meta: coin_template(),
        };

        tracker.merge("w1", ADDR, entry.clone()).await;
        tracker.merge("w1", ADDR, entry).await;

        let snapshot = tracker.snapshot("w1").await.unwrap();
        assert_eq!(snapshot.addresses[ADDR].transactions.len(), 1);
    }

    #[tokio::test]
    async fn pending_entry_is_replaced_by_its_receipt() {
        let (tracker, _bus) = tracker_with(MockAccountChainClient::new());
        tracker.open_wallets("w1", vec![ADDR.into()]).await;

        let pending = TrackedTransaction {
            transaction: TxSummary {
                hash: "0xabc".into(),
                from: ADDR.into(),
                to: "0x22".into(),
                value: U256::from(5u64),
            },
            receipt: None,
            meta: coin_template(),
        };
        tracker.merge("w1", ADDR, pending.clone()).await;

        let mut confirmed = pending.clone();
        confirmed.receipt = Some(receipt("0xabc"));
        tracker.merge("w1", ADDR, confirmed).await;

        // A later pending re-delivery must not clear the receipt
        tracker.merge("w1", ADDR, pending).await;

        let snapshot = tracker.snapshot("w1").await.unwrap();
        let txs = &snapshot.addresses[ADDR].transactions;
        assert_eq!(txs.len(), 1);
        assert!(txs[0].receipt.is_some());
    }

    #[tokio::test]
    async fn snapshots_serialize_for_out_of_process_consumers() {
        let (tracker, _bus) = tracker_with(MockAccountChainClient::new());
        tracker.open_wallets("w1", vec![ADDR.into()]).await;

        let entry = TrackedTransaction {
            transaction: TxSummary {
                hash: "0xjson".into(),
                from: ADDR.into(),
                to: "0x22".into(),
                value: U256::from(5u64),
            },
            receipt: Some(receipt("0xjson")),
            meta: coin_template(),
        };
        tracker.merge("w1", ADDR, entry).await;

        let json = tracker
            .snapshot("w1")
            .await
            .unwrap()
            .to_json()
            .unwrap();
        assert_eq!(json["wallet_id"], "w1");
        assert_eq!(
            json["addresses"][ADDR]["transactions"][0]["transaction"]["hash"],
            "0xjson"
        );
    }

    #[tokio::test]
    async fn logged_handle_flows_into_the_ledger() {
        let (tracker, bus) = tracker_with(MockAccountChainClient::new());
        tracker.open_wallets("w1", vec![ADDR.into()]).await;
        let mut events = bus.subscribe();

        let (feed, handle) = lifecycle::open();
        let returned =
            tracker.log_transaction(handle.clone(), "w1", ADDR, coin_template());
        assert_eq!(returned.hash(), handle.hash());

        feed.hash("0xlive");
        feed.receipt(receipt("0xlive"));

        // Wait for the snapshot carrying the receipted entry
        let mut found = false;
        for _ in 0..10 {
            if let Ok(CoreEvent::WalletStateChanged { snapshot }) = events.recv().await {
                let txs = &snapshot.addresses[ADDR].transactions;
                if txs.iter().any(|t| t.receipt.is_some()) {
                    found = true;
                    break;
                }
            }
        }
        assert!(found);

        let snapshot = tracker.snapshot("w1").await.unwrap();
        assert_eq!(snapshot.addresses[ADDR].transactions.len(), 1);
    }

    #[tokio::test]
    async fn failed_submission_publishes_wallet_error() {
        let (tracker, bus) = tracker_with(MockAccountChainClient::new());
        tracker.open_wallets("w1", vec![ADDR.into()]).await;
        let mut events = bus.subscribe();

        let (feed, handle) = lifecycle::open();
        tracker.log_transaction(handle, "w1", ADDR, coin_template());
        feed.error("nonce too low");

        let mut saw_wallet_error = false;
        for _ in 0..10 {
            match events.recv().await {
                Ok(CoreEvent::WalletError { message }) => {
                    assert!(message.contains("nonce too low"));
                    saw_wallet_error = true;
                    break;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        assert!(saw_wallet_error);
    }

    #[tokio::test]
    async fn new_blocks_refresh_balances_without_touching_transactions() {
        let mut client = MockAccountChainClient::new();
        client
            .expect_balance()
            .returning(|_| Ok(U256::from(42_000u64)));
        let (tracker, bus) = tracker_with(client);

        let run_task = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.run().await })
        };
        // Let the run loop subscribe before publishing
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        bus.publish(CoreEvent::OpenWallets {
            wallet_id: "w1".into(),
            addresses: vec![ADDR.into()],
        });

        let mut events = bus.subscribe();
        bus.publish(CoreEvent::CoinBlock {
            chain: "ETH".into(),
            header: BlockHeader {
                hash: "0xh".into(),
                number: 99,
                timestamp: 0,
            },
        });

        let mut refreshed = false;
        for _ in 0..10 {
            match events.recv().await {
                Ok(CoreEvent::WalletStateChanged { snapshot }) => {
                    if snapshot.addresses[ADDR].balance == U256::from(42_000u64) {
                        refreshed = true;
                        break;
                    }
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        assert!(refreshed);

        tracker.stop().await;
        run_task.abort();
    }
}
