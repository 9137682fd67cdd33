//! Transaction-lifecycle and cross-chain bridging core for a
//! multi-chain wallet runtime
//!
//! Gives an embedding application one uniform, event-driven view of
//! "send a value transfer" and "move a fungible token from chain A to
//! chain B", whether the underlying ledger is account-based or
//! UTXO-based. The core normalizes chain-specific submission semantics
//! into a single lifecycle state machine and builds the
//! cryptographically linked burn/import proofs the bridge contracts
//! require.
//!
//! The composition root lives outside this crate: it supplies the
//! transport clients and signing collaborators, spawns the background
//! watchers and owns process lifecycle.

pub mod auction;
pub mod bridge;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod tracker;
pub mod tx;

pub use auction::AuctionEstimator;
pub use bridge::{BridgeProtocol, ExportParams, ImportParams};
pub use chain::{
    AccountChainAdapter, AccountChainClient, ChainAdapter, RateProvider, TransferRequest,
    UtxoChainAdapter, UtxoChainClient, UtxoSigner,
};
pub use config::Settings;
pub use error::{WalletError, WalletResult};
pub use events::{CoreEvent, EventBus};
pub use tracker::TransactionTracker;
pub use tx::lifecycle::{SubmissionEvent, SubmissionHandle, SubmissionStage};

use crate::bridge::proof::BurnReceipt;
use crate::chain::account::{PastEvent, PastEventQuery};
use crate::config::ContractRegistry;
use crate::events::meta::MetaAction;

use ethers::abi::{encode, Abi, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use std::sync::Arc;
use tracing::info;

/// One assembled core instance: adapters, tracker, bridge and estimator
/// wired to a single event bus.
pub struct WalletCore {
    bus: EventBus,
    account: Arc<AccountChainAdapter>,
    utxo: Arc<UtxoChainAdapter>,
    tracker: Arc<TransactionTracker>,
    bridge: Arc<BridgeProtocol>,
    auction: Arc<AuctionEstimator>,
    contracts: ContractRegistry,
}

impl WalletCore {
    /// Wire a core instance from configuration and the external
    /// transport/signing collaborators.
    pub fn new(
        settings: &Settings,
        account_client: Arc<dyn AccountChainClient>,
        destination_client: Arc<dyn AccountChainClient>,
        utxo_client: Arc<dyn UtxoChainClient>,
        utxo_signer: Arc<dyn UtxoSigner>,
    ) -> WalletResult<Self> {
        let bus = EventBus::new(settings.tracker.event_channel_capacity);

        let contracts = ContractRegistry::from_config(&settings.account_chain.contracts)?;
        let destination_contracts =
            ContractRegistry::from_config(&settings.destination_chain.contracts)?;

        let account = Arc::new(AccountChainAdapter::new(
            account_client.clone(),
            settings.account_chain.clone(),
        ));
        let destination = Arc::new(AccountChainAdapter::new(
            destination_client.clone(),
            settings.destination_chain.clone(),
        ));
        let utxo = Arc::new(UtxoChainAdapter::new(
            utxo_client,
            utxo_signer,
            settings.utxo_chain.clone(),
        ));

        let auction = Arc::new(AuctionEstimator::new(
            account_client.clone(),
            contracts.get("auctions")?,
            contracts.get("converter")?,
            settings.bridge.gas_limit_buffer_percent,
        ));
        let destination_auction = Arc::new(AuctionEstimator::new(
            destination_client,
            destination_contracts.get("auctions")?,
            destination_contracts.get("converter")?,
            settings.bridge.gas_limit_buffer_percent,
        ));

        let tracker = Arc::new(TransactionTracker::new(bus.clone(), account_client));

        let bridge = Arc::new(BridgeProtocol::new(
            account.clone(),
            destination,
            contracts.clone(),
            destination_contracts,
            destination_auction,
            tracker.clone(),
            settings.bridge.clone(),
        ));

        info!(
            source = %settings.account_chain.name,
            destination = %settings.destination_chain.name,
            "wallet core assembled"
        );

        Ok(Self {
            bus,
            account,
            utxo,
            tracker,
            bridge,
            auction,
            contracts,
        })
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn tracker(&self) -> Arc<TransactionTracker> {
        self.tracker.clone()
    }

    pub fn account_adapter(&self) -> Arc<AccountChainAdapter> {
        self.account.clone()
    }

    pub fn utxo_adapter(&self) -> Arc<UtxoChainAdapter> {
        self.utxo.clone()
    }

    pub fn auction_estimator(&self) -> Arc<AuctionEstimator> {
        self.auction.clone()
    }

    /// Activate tracking for a wallet's addresses.
    pub async fn open_wallets(&self, wallet_id: &str, addresses: Vec<String>) {
        self.tracker.open_wallets(wallet_id, addresses).await;
    }

    /// Derive the account-chain address for a seed.
    pub fn create_address(&self, seed: &str) -> WalletResult<String> {
        self.account.create_address(seed)
    }

    /// Derive the account-chain private key for a seed.
    pub fn create_private_key(&self, seed: &str) -> WalletResult<String> {
        self.account.create_private_key(seed)
    }

    /// Send native coin on the account chain, tracked in the wallet's
    /// ledger.
    pub async fn send_coin(
        &self,
        private_key: &str,
        wallet_id: &str,
        request: TransferRequest,
    ) -> WalletResult<SubmissionHandle> {
        request.validate()?;
        let from = request.from.clone();
        let template = MetaAction::Transfer {
            token: None,
            from: AccountChainAdapter::parse_address(&request.from)?,
            to: AccountChainAdapter::parse_address(&request.to)?,
            value: request.value,
            contract_call_failed: false,
        };

        let handle = self.account.send_coin(private_key, request).await?;
        Ok(self
            .tracker
            .log_transaction(handle, wallet_id, &from, template))
    }

    /// Send MET tokens on the account chain (an ERC20 transfer against
    /// the MET token contract), tracked in the wallet's ledger.
    pub async fn send_met(
        &self,
        private_key: &str,
        wallet_id: &str,
        request: TransferRequest,
    ) -> WalletResult<SubmissionHandle> {
        request.validate()?;
        let met_token = self.contracts.get("metToken")?;
        let to = AccountChainAdapter::parse_address(&request.to)?;

        let mut data = id("transfer(address,uint256)").to_vec();
        data.extend_from_slice(&encode(&[Token::Address(to), Token::Uint(request.value)]));

        let handle = self
            .account
            .submit(
                private_key,
                met_token,
                U256::zero(),
                Bytes::from(data),
                request.gas_limit,
                request.gas_price,
            )
            .await?;

        let template = MetaAction::Transfer {
            token: Some(met_token),
            from: AccountChainAdapter::parse_address(&request.from)?,
            to,
            value: request.value,
            contract_call_failed: false,
        };
        Ok(self
            .tracker
            .log_transaction(handle, wallet_id, &request.from, template))
    }

    /// Export (burn) MET on the source chain.
    pub async fn export_met(
        &self,
        private_key: &str,
        params: ExportParams,
    ) -> WalletResult<SubmissionHandle> {
        self.bridge.export_met(private_key, params).await
    }

    /// Import (mint) previously exported MET on the destination chain.
    pub async fn import_met(
        &self,
        private_key: &str,
        params: ImportParams,
    ) -> WalletResult<SubmissionHandle> {
        self.bridge.import_met(private_key, params).await
    }

    pub async fn estimate_export_gas(&self, params: &ExportParams) -> WalletResult<U256> {
        self.bridge.estimate_export_gas(params).await
    }

    pub async fn estimate_import_gas(&self, params: &ImportParams) -> WalletResult<U256> {
        self.bridge.estimate_import_gas(params).await
    }

    /// Tokens the converter would return for `value` coin.
    pub async fn get_convert_coin_estimate(&self, value: U256) -> WalletResult<U256> {
        self.auction.get_convert_coin_estimate(value).await
    }

    pub async fn get_convert_coin_gas_limit(
        &self,
        from: &str,
        value: U256,
    ) -> WalletResult<U256> {
        let from = AccountChainAdapter::parse_address(from)?;
        self.auction.get_convert_coin_gas_limit(from, value).await
    }

    pub async fn get_auction_gas_limit(&self, from: &str, value: U256) -> WalletResult<U256> {
        let from = AccountChainAdapter::parse_address(from)?;
        self.auction.get_auction_gas_limit(from, value).await
    }

    /// Buy MET in the current auction: a value-bearing transaction to
    /// the auctions contract, tracked like a transfer.
    pub async fn buy_metronome(
        &self,
        private_key: &str,
        wallet_id: &str,
        request: TransferRequest,
    ) -> WalletResult<SubmissionHandle> {
        if request.value.is_zero() {
            return Err(WalletError::InvalidInput(
                "auction purchase value must be positive".into(),
            ));
        }
        let auctions = self.auction.auctions_address();

        let handle = self
            .account
            .submit(
                private_key,
                auctions,
                request.value,
                Bytes::default(),
                request.gas_limit,
                request.gas_price,
            )
            .await?;

        let template = MetaAction::Transfer {
            token: None,
            from: AccountChainAdapter::parse_address(&request.from)?,
            to: auctions,
            value: request.value,
            contract_call_failed: false,
        };
        Ok(self
            .tracker
            .log_transaction(handle, wallet_id, &request.from, template))
    }

    /// Configured address of a named contract.
    pub fn get_contract_address(&self, name: &str) -> WalletResult<Address> {
        self.contracts.get(name)
    }

    /// Scan and decode historical contract events.
    pub async fn get_past_events(
        &self,
        abi: &Abi,
        contract_address: Address,
        event_name: &str,
        query: PastEventQuery,
    ) -> WalletResult<Vec<PastEvent>> {
        self.account
            .past_events(abi, contract_address, event_name, query)
            .await
    }

    /// Reconstruct a burn receipt from a mined export transaction's
    /// tracked meta, for callers that need to retry an import.
    pub fn burn_receipt_from_meta(meta: &MetaAction) -> WalletResult<BurnReceipt> {
        match meta {
            MetaAction::Export {
                burn: Some(burn), ..
            } => Ok(burn.clone()),
            MetaAction::Export { burn: None, .. } => Err(WalletError::InvalidInput(
                "export has no receipt yet".into(),
            )),
            _ => Err(WalletError::InvalidInput(
                "meta is not an export action".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        MockAccountChainClient, MockUtxoChainClient, MockUtxoSigner,
    };
    use crate::config::{
        AccountChainConfig, BridgeConfig, TrackerConfig, UtxoChainConfig,
    };
    use std::collections::HashMap;

    fn contracts(prefix: u8) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (i, name) in ["metToken", "auctions", "converter", "tokenPorter"]
            .iter()
            .enumerate()
        {
            map.insert(
                name.to_string(),
                format!("{:?}", Address::repeat_byte(prefix + i as u8)),
            );
        }
        map
    }

    fn settings() -> Settings {
        Settings {
            account_chain: AccountChainConfig {
                name: "ETH".into(),
                chain_id: 3,
                confirmation_blocks: 1,
                poll_interval_ms: 50,
                contracts: contracts(0x10),
            },
            destination_chain: AccountChainConfig {
                name: "ETC".into(),
                chain_id: 61,
                confirmation_blocks: 1,
                poll_interval_ms: 50,
                contracts: contracts(0x20),
            },
            utxo_chain: UtxoChainConfig {
                name: "QTC".into(),
                fee_rate: None,
                dust_threshold: 546,
                poll_interval_ms: 50,
            },
            bridge: BridgeConfig {
                origin_chain: "ETH".into(),
                auction_tick_secs: 60,
                gas_limit_buffer_percent: 20,
            },
            tracker: TrackerConfig {
                event_channel_capacity: 64,
            },
        }
    }

    fn core(account: MockAccountChainClient) -> WalletCore {
        WalletCore::new(
            &settings(),
            Arc::new(account),
            Arc::new(MockAccountChainClient::new()),
            Arc::new(MockUtxoChainClient::new()),
            Arc::new(MockUtxoSigner::new()),
        )
        .unwrap()
    }

    #[test]
    fn contract_addresses_resolve_by_name() {
        let core = core(MockAccountChainClient::new());
        assert_eq!(
            core.get_contract_address("metToken").unwrap(),
            Address::repeat_byte(0x10)
        );
        assert!(core.get_contract_address("unknown").is_err());
    }

    #[test]
    fn derived_keys_match_derived_addresses() {
        let core = core(MockAccountChainClient::new());
        let address = core.create_address("my seed").unwrap();
        let key = core.create_private_key("my seed").unwrap();
        assert!(address.starts_with("0x"));
        assert!(key.starts_with("0x") && key.len() == 66);
    }

    #[tokio::test]
    async fn send_met_targets_the_token_contract() {
        let mut account = MockAccountChainClient::new();
        account.expect_next_nonce().returning(|_| Ok(0));
        account.expect_send_raw_transaction().returning(|raw| {
            assert!(!raw.is_empty());
            Ok(ethers::types::H256::repeat_byte(0xAB))
        });
        account
            .expect_transaction_receipt()
            .returning(|_| Ok(None));

        let core = core(account);
        let key = core.create_private_key("sender seed").unwrap();
        let from = core.create_address("sender seed").unwrap();

        let handle = core
            .send_met(
                &key,
                "w1",
                TransferRequest {
                    from,
                    to: "0x2222222222222222222222222222222222222222".into(),
                    value: U256::from(500u64),
                    gas_limit: Some(U256::from(60_000u64)),
                    gas_price: Some(U256::from(1_000_000_000u64)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(handle.hash().is_some());
    }

    #[tokio::test]
    async fn zero_value_auction_purchase_is_rejected() {
        let core = core(MockAccountChainClient::new());
        let err = core
            .buy_metronome(
                "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
                "w1",
                TransferRequest {
                    from: "0x1111111111111111111111111111111111111111".into(),
                    to: String::new(),
                    value: U256::zero(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_input_error());
    }
}
