//! UTXO-based chain adapter
//!
//! Value transfer selects unspent outputs and pays a fee of
//! `feeRate x estimatedByteSize`. The default fee rate satisfies the
//! network's minimum relay fee for a typical single-input/single-output
//! transaction; callers may override it per transfer.

use super::{ChainAdapter, TransferRequest, UtxoChainClient, UtxoSigner};
use crate::config::{UtxoChainConfig, DEFAULT_UTXO_FEE_RATE};
use crate::error::{WalletError, WalletResult};
use crate::tx::lifecycle::{self, SubmissionFeed, SubmissionHandle, TxReceipt};

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Byte cost of one input in the size estimate
const INPUT_BYTES: u64 = 148;
/// Byte cost of one output
const OUTPUT_BYTES: u64 = 34;
/// Fixed transaction overhead
const OVERHEAD_BYTES: u64 = 10;

/// Consecutive confirmation-poll failures tolerated before giving up
const MAX_POLL_FAILURES: u32 = 30;

/// One spendable output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Value in the chain's smallest unit
    pub value: u64,
}

/// A planned output of a spend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub address: String,
    pub value: u64,
}

/// Inputs, outputs and fee of one spend, ready for signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendPlan {
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<PlannedOutput>,
    pub fee: u64,
}

/// Estimated serialized size for a given input/output count.
pub fn estimate_tx_bytes(inputs: usize, outputs: usize) -> u64 {
    inputs as u64 * INPUT_BYTES + outputs as u64 * OUTPUT_BYTES + OVERHEAD_BYTES
}

/// Select inputs largest-first until they cover `value` plus the fee for
/// the resulting transaction size. Produces a change output back to
/// `change_address` unless the remainder falls below the dust threshold,
/// in which case it is folded into the fee.
pub fn plan_spend(
    mut available: Vec<Utxo>,
    to: &str,
    change_address: &str,
    value: u64,
    fee_rate: u64,
    dust_threshold: u64,
) -> WalletResult<SpendPlan> {
    available.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected: Vec<Utxo> = Vec::new();
    let mut gathered: u64 = 0;

    for utxo in available {
        gathered += utxo.value;
        selected.push(utxo);

        // Fee assuming a change output; sizing with change first avoids
        // underpaying when change turns out to be needed.
        let fee_with_change = fee_rate * estimate_tx_bytes(selected.len(), 2);
        if gathered < value.saturating_add(fee_with_change) {
            continue;
        }

        let change = gathered - value - fee_with_change;
        let mut outputs = vec![PlannedOutput {
            address: to.to_string(),
            value,
        }];

        if change >= dust_threshold {
            outputs.push(PlannedOutput {
                address: change_address.to_string(),
                value: change,
            });
            return Ok(SpendPlan {
                inputs: selected,
                outputs,
                fee: fee_with_change,
            });
        }

        // Sub-dust remainder: single-output transaction, remainder
        // joins the fee
        let fee = fee_rate * estimate_tx_bytes(selected.len(), 1) + change;
        return Ok(SpendPlan {
            inputs: selected,
            outputs,
            fee,
        });
    }

    Err(WalletError::InsufficientFunds {
        have: gathered.to_string(),
        need: value.to_string(),
    })
}

pub struct UtxoChainAdapter {
    client: Arc<dyn UtxoChainClient>,
    signer: Arc<dyn UtxoSigner>,
    config: UtxoChainConfig,
}

impl UtxoChainAdapter {
    pub fn new(
        client: Arc<dyn UtxoChainClient>,
        signer: Arc<dyn UtxoSigner>,
        config: UtxoChainConfig,
    ) -> Self {
        Self {
            client,
            signer,
            config,
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.config.name
    }

    fn fee_rate(&self, request: &TransferRequest) -> u64 {
        request
            .fee_rate
            .or(self.config.fee_rate)
            .unwrap_or(DEFAULT_UTXO_FEE_RATE)
    }

    /// Watch for the first confirmation, then deliver the receipt. This
    /// adapter does not distinguish confirmation depth from receipt, so
    /// no advisory confirmation events are emitted.
    fn spawn_confirmation_watch(&self, txid: String, feed: SubmissionFeed) {
        let client = self.client.clone();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        tokio::spawn(async move {
            let mut failures: u32 = 0;
            loop {
                tokio::time::sleep(poll_interval).await;

                match client.confirmations(&txid).await {
                    Ok(Some(depth)) if depth >= 1 => {
                        feed.receipt(TxReceipt {
                            transaction_hash: txid.clone(),
                            block_hash: String::new(),
                            block_number: 0,
                            block_timestamp: Utc::now().timestamp() as u64,
                            success: true,
                            logs: vec![],
                        });
                        return;
                    }
                    Ok(_) => {
                        failures = 0;
                    }
                    Err(err) => {
                        failures += 1;
                        if failures >= MAX_POLL_FAILURES {
                            feed.error(format!("confirmation polling gave up: {}", err));
                            return;
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl ChainAdapter for UtxoChainAdapter {
    fn create_address(&self, seed: &str) -> WalletResult<String> {
        self.signer.derive_address(seed)
    }

    fn create_private_key(&self, seed: &str) -> WalletResult<String> {
        self.signer.derive_private_key(seed)
    }

    async fn send_coin(
        &self,
        private_key: &str,
        request: TransferRequest,
    ) -> WalletResult<SubmissionHandle> {
        request.validate()?;
        if request.value > U256::from(u64::MAX) {
            return Err(WalletError::InvalidInput(
                "value exceeds the UTXO chain's unit range".into(),
            ));
        }
        let value = request.value.as_u64();
        let fee_rate = self.fee_rate(&request);

        let available = self.client.unspent_outputs(&request.from).await?;
        let plan = plan_spend(
            available,
            &request.to,
            &request.from,
            value,
            fee_rate,
            self.config.dust_threshold,
        )?;
        debug!(
            inputs = plan.inputs.len(),
            fee = plan.fee,
            fee_rate,
            "spend planned"
        );

        let raw = self.signer.sign_spend(private_key, &plan)?;

        let (feed, handle) = lifecycle::open();
        match self.client.broadcast(raw).await {
            Ok(txid) => {
                info!(%txid, "utxo transaction broadcast");
                crate::metrics::record_tx_submitted(&self.config.name);
                feed.hash(txid.clone());
                self.spawn_confirmation_watch(txid, feed);
            }
            Err(err) => {
                warn!(%err, "utxo broadcast rejected");
                feed.error(err.to_string());
                return Err(err);
            }
        }

        Ok(handle)
    }
}
