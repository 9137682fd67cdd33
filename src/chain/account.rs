//! Account-based chain adapter
//!
//! Value transfer is a single signed transaction with an explicit gas
//! price and limit. The nonce is chain-assigned per account and is
//! fetched immediately before signing to avoid collision with in-flight
//! transactions from the same account. Two concurrent sends from one
//! address can still race the same nonce; serializing sends per `from`
//! address is a caller obligation this core does not enforce.

use super::{AccountChainClient, ChainAdapter, LogFilter, TransferRequest};
use crate::config::AccountChainConfig;
use crate::error::{WalletError, WalletResult};
use crate::tx::gas::GasEstimator;
use crate::tx::lifecycle::{self, SubmissionFeed, SubmissionHandle};

use async_trait::async_trait;
use ethers::abi::{Abi, RawLog, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::keccak256;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Gas limit of a plain value transfer carrying no data
const PLAIN_TRANSFER_GAS: u64 = 21_000;

/// Consecutive receipt-poll transport failures tolerated before the
/// lifecycle terminates with an error
const MAX_POLL_FAILURES: u32 = 30;

/// A decoded historical contract event
#[derive(Debug, Clone)]
pub struct PastEvent {
    pub block_number: u64,
    pub transaction_hash: String,
    pub name: String,
    pub params: Vec<(String, Token)>,
}

/// Options for a past-event scan
#[derive(Debug, Clone, Default)]
pub struct PastEventQuery {
    pub from_block: u64,
    pub to_block: Option<u64>,
    /// Retain only events whose named parameters equal these values
    pub filter: HashMap<String, Token>,
}

pub struct AccountChainAdapter {
    client: Arc<dyn AccountChainClient>,
    config: AccountChainConfig,
    gas: GasEstimator,
}

impl AccountChainAdapter {
    pub fn new(client: Arc<dyn AccountChainClient>, config: AccountChainConfig) -> Self {
        Self {
            client,
            config,
            gas: GasEstimator::default(),
        }
    }

    pub fn client(&self) -> Arc<dyn AccountChainClient> {
        self.client.clone()
    }

    pub fn chain_name(&self) -> &str {
        &self.config.name
    }

    fn wallet_from_seed(seed: &str) -> WalletResult<LocalWallet> {
        if seed.trim().is_empty() {
            return Err(WalletError::InvalidInput("empty seed".into()));
        }
        LocalWallet::from_bytes(&keccak256(seed.as_bytes()))
            .map_err(|e| WalletError::InvalidAddress(format!("seed derivation failed: {}", e)))
    }

    fn wallet_from_key(private_key: &str) -> WalletResult<LocalWallet> {
        private_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| WalletError::Signing(format!("invalid private key: {}", e)))
    }

    pub fn parse_address(raw: &str) -> WalletResult<Address> {
        Address::from_str(raw)
            .map_err(|e| WalletError::InvalidAddress(format!("{}: {}", raw, e)))
    }

    /// Nonce-fetch, sign and broadcast one call, then drive its
    /// lifecycle in the background. Shared by plain transfers, token
    /// transfers and the bridge halves.
    pub async fn submit(
        &self,
        private_key: &str,
        to: Address,
        value: U256,
        data: Bytes,
        gas_limit: Option<U256>,
        gas_price: Option<U256>,
    ) -> WalletResult<SubmissionHandle> {
        let wallet = Self::wallet_from_key(private_key)?.with_chain_id(self.config.chain_id);
        let from = wallet.address();

        let gas_price = match gas_price {
            Some(price) => price,
            None => self.gas.buffered_price(self.client.gas_price().await?),
        };

        let gas_limit = match gas_limit {
            Some(limit) => limit,
            None if data.is_empty() => U256::from(PLAIN_TRANSFER_GAS),
            None => {
                let estimated = self
                    .client
                    .estimate_gas(from, to, value, data.clone())
                    .await?;
                self.gas.buffered_limit(estimated)
            }
        };

        // Fetched last so the window for a concurrent in-flight send to
        // take the same nonce is as small as possible.
        let nonce = self.client.next_nonce(from).await?;
        debug!(%from, nonce, "assigned nonce");

        let tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(to)
            .value(value)
            .data(data)
            .nonce(nonce)
            .gas(gas_limit)
            .gas_price(gas_price)
            .into();

        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| WalletError::Signing(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let (feed, handle) = lifecycle::open();

        match self.client.send_raw_transaction(raw).await {
            Ok(hash) => {
                info!(hash = %format!("{:?}", hash), "transaction broadcast");
                crate::metrics::record_tx_submitted(&self.config.name);
                feed.hash(format!("{:?}", hash));
                self.spawn_receipt_watch(hash, feed);
            }
            Err(err) => {
                warn!(%err, "broadcast rejected");
                feed.error(err.to_string());
                return Err(err);
            }
        }

        Ok(handle)
    }

    /// Poll for the receipt and republish lifecycle milestones.
    fn spawn_receipt_watch(&self, hash: H256, feed: SubmissionFeed) {
        let client = self.client.clone();
        let confirmation_blocks = self.config.confirmation_blocks;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        tokio::spawn(async move {
            let mut failures: u32 = 0;
            let mut last_reported: u64 = 0;

            loop {
                tokio::time::sleep(poll_interval).await;

                let receipt = match client.transaction_receipt(hash).await {
                    Ok(found) => {
                        failures = 0;
                        found
                    }
                    Err(err) => {
                        failures += 1;
                        if failures >= MAX_POLL_FAILURES {
                            feed.error(format!("receipt polling gave up: {}", err));
                            return;
                        }
                        continue;
                    }
                };

                let Some(receipt) = receipt else { continue };

                let head = match client.latest_block().await {
                    Ok(header) => header.number,
                    Err(_) => receipt.block_number,
                };
                let confirmations = head.saturating_sub(receipt.block_number) + 1;

                if confirmations > last_reported {
                    last_reported = confirmations;
                    feed.confirmation(confirmations);
                }

                if confirmations >= confirmation_blocks {
                    if receipt.success {
                        feed.receipt(receipt);
                    } else {
                        feed.error(
                            WalletError::ChainRejected {
                                tx_hash: receipt.transaction_hash.clone(),
                                message: "reverted on chain".into(),
                            }
                            .to_string(),
                        );
                    }
                    return;
                }
            }
        });
    }

    /// Scan historical contract events and decode them against an ABI.
    pub async fn past_events(
        &self,
        abi: &Abi,
        contract_address: Address,
        event_name: &str,
        query: PastEventQuery,
    ) -> WalletResult<Vec<PastEvent>> {
        let event = abi
            .event(event_name)
            .map_err(|e| WalletError::InvalidInput(format!("unknown event {}: {}", event_name, e)))?;

        let filter = LogFilter {
            address: Some(contract_address),
            topic0: Some(event.signature()),
            from_block: query.from_block,
            to_block: query.to_block,
        };

        let mut decoded = Vec::new();
        for scanned in self.client.logs(filter).await? {
            let raw = RawLog {
                topics: scanned.log.topics.clone(),
                data: scanned.log.data.to_vec(),
            };
            let parsed = match event.parse_log(raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(%err, "skipping undecodable log");
                    continue;
                }
            };

            let params: Vec<(String, Token)> = parsed
                .params
                .into_iter()
                .map(|p| (p.name, p.value))
                .collect();

            let matches = query
                .filter
                .iter()
                .all(|(name, want)| params.iter().any(|(n, v)| n == name && v == want));
            if !matches {
                continue;
            }

            decoded.push(PastEvent {
                block_number: scanned.block_number,
                transaction_hash: scanned.transaction_hash,
                name: event_name.to_string(),
                params,
            });
        }

        Ok(decoded)
    }
}

#[async_trait]
impl ChainAdapter for AccountChainAdapter {
    fn create_address(&self, seed: &str) -> WalletResult<String> {
        let wallet = Self::wallet_from_seed(seed)?;
        Ok(format!("{:?}", wallet.address()))
    }

    fn create_private_key(&self, seed: &str) -> WalletResult<String> {
        Self::wallet_from_seed(seed)?;
        Ok(format!("0x{}", hex::encode(keccak256(seed.as_bytes()))))
    }

    async fn send_coin(
        &self,
        private_key: &str,
        request: TransferRequest,
    ) -> WalletResult<SubmissionHandle> {
        request.validate()?;
        let to = Self::parse_address(&request.to)?;

        self.submit(
            private_key,
            to,
            request.value,
            request.extra_data.clone().unwrap_or_default(),
            request.gas_limit,
            request.gas_price,
        )
        .await
    }
}
