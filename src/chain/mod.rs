//! Chain capability abstractions
//!
//! This module defines:
//! - The uniform `ChainAdapter` capability (address/key derivation, raw
//!   signed broadcast) implemented by the account-chain and UTXO-chain
//!   variants
//! - The transport-facing client traits; the concrete node/indexer RPC
//!   plumbing is an external collaborator implementing them
//! - Background watchers publishing block/price/auction events

pub mod account;
pub mod utxo;
pub mod watcher;

pub use account::AccountChainAdapter;
pub use utxo::{Utxo, UtxoChainAdapter};
pub use watcher::{AuctionWatcher, BlockWatcher, PricePoller};

use crate::error::{WalletError, WalletResult};
use crate::events::BlockHeader;
use crate::tx::lifecycle::{SubmissionHandle, TxReceipt};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
#[cfg(test)]
use mockall::automock;

/// A caller's intent to move value. Chain-specific knobs are optional;
/// the adapter applies its own defaults.
#[derive(Debug, Clone, Default)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub value: U256,
    /// Account-chain gas limit override
    pub gas_limit: Option<U256>,
    /// Account-chain gas price override
    pub gas_price: Option<U256>,
    /// UTXO-chain fee rate override, units per byte
    pub fee_rate: Option<u64>,
    pub extra_data: Option<Bytes>,
}

impl TransferRequest {
    /// Input checks performed before any network round-trip.
    pub fn validate(&self) -> WalletResult<()> {
        if self.value.is_zero() {
            return Err(WalletError::InvalidInput(
                "transfer value must be positive".into(),
            ));
        }
        if self.from.is_empty() || self.to.is_empty() {
            return Err(WalletError::InvalidAddress(
                "from and to addresses are required".into(),
            ));
        }
        Ok(())
    }
}

/// Uniform capability set implemented by every chain variant.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Derive the wallet address for a seed.
    fn create_address(&self, seed: &str) -> WalletResult<String>;

    /// Derive the private key for a seed, hex encoded.
    fn create_private_key(&self, seed: &str) -> WalletResult<String>;

    /// Sign and broadcast a value transfer. Resolves once the broadcast
    /// has been handed to the node; lifecycle milestones arrive on the
    /// returned handle.
    async fn send_coin(
        &self,
        private_key: &str,
        request: TransferRequest,
    ) -> WalletResult<SubmissionHandle>;
}

/// Log query bounds for event scans
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub address: Option<Address>,
    /// topic0 (event signature) filter
    pub topic0: Option<H256>,
    pub from_block: u64,
    pub to_block: Option<u64>,
}

/// A log returned by a range scan, with its inclusion coordinates
#[derive(Debug, Clone)]
pub struct ScannedLog {
    pub log: crate::tx::lifecycle::ReceiptLog,
    pub block_number: u64,
    pub transaction_hash: String,
}

/// Transport boundary for the account-based chain. The node RPC
/// implementation normalizes receipts before handing them back.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccountChainClient: Send + Sync {
    /// Next nonce for an account, fetched immediately before signing.
    async fn next_nonce(&self, address: Address) -> WalletResult<u64>;

    async fn balance(&self, address: Address) -> WalletResult<U256>;

    async fn gas_price(&self) -> WalletResult<U256>;

    /// Broadcast a raw signed transaction; resolves to its hash.
    async fn send_raw_transaction(&self, raw: Bytes) -> WalletResult<H256>;

    async fn transaction_receipt(&self, hash: H256) -> WalletResult<Option<TxReceipt>>;

    async fn latest_block(&self) -> WalletResult<BlockHeader>;

    /// Read-only contract call.
    async fn call(&self, to: Address, data: Bytes) -> WalletResult<Bytes>;

    /// Node-side gas estimate for a prospective call.
    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: Bytes,
    ) -> WalletResult<U256>;

    async fn logs(&self, filter: LogFilter) -> WalletResult<Vec<ScannedLog>>;
}

/// Transport boundary for the UTXO-based chain.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UtxoChainClient: Send + Sync {
    /// Spendable outputs for an address.
    async fn unspent_outputs(&self, address: &str) -> WalletResult<Vec<utxo::Utxo>>;

    /// Broadcast a raw signed transaction; resolves to its txid.
    async fn broadcast(&self, raw: Vec<u8>) -> WalletResult<String>;

    /// Confirmation count for a txid; `None` while unconfirmed.
    async fn confirmations(&self, txid: &str) -> WalletResult<Option<u64>>;

    async fn balance(&self, address: &str) -> WalletResult<u64>;
}

/// Signing collaborator for the UTXO chain. Key handling and signature
/// primitives are assumed correct and supplied externally.
#[cfg_attr(test, automock)]
pub trait UtxoSigner: Send + Sync {
    fn derive_address(&self, seed: &str) -> WalletResult<String>;

    fn derive_private_key(&self, seed: &str) -> WalletResult<String>;

    /// Produce the raw signed transaction bytes for a spend plan.
    fn sign_spend(&self, private_key: &str, plan: &utxo::SpendPlan) -> WalletResult<Vec<u8>>;
}

/// Exchange-rate collaborator queried by the price poller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rate(&self, token: &str, currency: &str) -> WalletResult<f64>;
}
