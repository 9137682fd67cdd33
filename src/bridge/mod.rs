//! Burn/mint bridge protocol
//!
//! Two independent halves. Export burns supply on the source chain:
//! resolve fee, fetch nonce, sign, broadcast, track. Import mints on the
//! destination chain: fetch auction context, assemble the proof, fetch
//! nonce, sign, broadcast, track. The destination-chain context read
//! must succeed before anything is signed; a failed read aborts the
//! import with no partial signature.
//!
//! Gas estimation for both halves substitutes a read-only estimate call
//! built from the same data builder as the signed call, so estimate and
//! send can never drift apart in parameter order.

pub mod proof;

use crate::auction::{call_data, AuctionEstimator};
use crate::chain::AccountChainAdapter;
use crate::config::{BridgeConfig, ContractRegistry};
use crate::error::{WalletError, WalletResult};
use crate::events::meta::MetaAction;
use crate::tracker::TransactionTracker;
use crate::tx::lifecycle::SubmissionHandle;

use chrono::Utc;
use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use proof::{chain_tag_to_bytes8, BurnReceipt, ImportProof};
use std::sync::Arc;
use tracing::{debug, info};

const EXPORT_SIG: &str = "export(bytes8,address,address,uint256,uint256,bytes)";
const IMPORT_SIG: &str = "importMET(bytes8,bytes8,address[],bytes,bytes32[],uint256,uint256[],bytes32)";
const EXPORT_FEE_SIG: &str = "exportFee(uint256)";

/// Parameters of an export (burn) on the source chain
#[derive(Debug, Clone)]
pub struct ExportParams {
    pub wallet_id: String,
    /// Source-chain address the burn is sent from
    pub from: String,
    pub destination_chain: String,
    pub destination_met_address: Address,
    pub destination_recipient: Address,
    pub value: U256,
    /// Caller-supplied fee; resolved from the token porter when absent
    pub fee: Option<U256>,
    pub extra_data: Bytes,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
}

/// Parameters of an import (mint) on the destination chain
#[derive(Debug, Clone)]
pub struct ImportParams {
    pub wallet_id: String,
    /// Destination-chain address submitting the import
    pub from: String,
    pub destination_met_address: Address,
    /// The burn receipt this import proves
    pub burn: BurnReceipt,
    pub extra_data: Bytes,
    pub merkle_root: H256,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
}

pub struct BridgeProtocol {
    source: Arc<AccountChainAdapter>,
    destination: Arc<AccountChainAdapter>,
    source_contracts: ContractRegistry,
    destination_contracts: ContractRegistry,
    destination_auction: Arc<AuctionEstimator>,
    tracker: Arc<TransactionTracker>,
    config: BridgeConfig,
}

impl BridgeProtocol {
    pub fn new(
        source: Arc<AccountChainAdapter>,
        destination: Arc<AccountChainAdapter>,
        source_contracts: ContractRegistry,
        destination_contracts: ContractRegistry,
        destination_auction: Arc<AuctionEstimator>,
        tracker: Arc<TransactionTracker>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            source,
            destination,
            source_contracts,
            destination_contracts,
            destination_auction,
            tracker,
            config,
        }
    }

    /// Burn `value` tokens on the source chain for minting on
    /// `destination_chain`.
    pub async fn export_met(
        &self,
        private_key: &str,
        params: ExportParams,
    ) -> WalletResult<SubmissionHandle> {
        if params.value.is_zero() {
            return Err(WalletError::InvalidInput(
                "export value must be positive".into(),
            ));
        }

        let fee = self.resolve_export_fee(&params).await?;
        let data = export_call_data(&params, fee)?;
        let met_token = self.source_contracts.get("metToken")?;

        info!(
            value = %params.value,
            %fee,
            destination = %params.destination_chain,
            "exporting tokens"
        );

        let handle = self
            .source
            .submit(
                private_key,
                met_token,
                U256::zero(),
                data,
                params.gas_limit,
                params.gas_price,
            )
            .await?;

        crate::metrics::record_bridge_export();

        let template = MetaAction::Export {
            destination_chain: params.destination_chain.clone(),
            destination_recipient: params.destination_recipient,
            amount_to_burn: params.value,
            fee,
            burn: None,
            contract_call_failed: false,
        };
        Ok(self
            .tracker
            .log_transaction(handle, &params.wallet_id, &params.from, template))
    }

    /// Gas estimate for an export, built from the identical call data
    /// the signed path uses.
    pub async fn estimate_export_gas(&self, params: &ExportParams) -> WalletResult<U256> {
        let fee = self.resolve_export_fee(params).await?;
        let data = export_call_data(params, fee)?;
        let from = AccountChainAdapter::parse_address(&params.from)?;
        let met_token = self.source_contracts.get("metToken")?;

        self.source
            .client()
            .estimate_gas(from, met_token, U256::zero(), data)
            .await
    }

    /// Mint previously burnt tokens on the destination chain.
    pub async fn import_met(
        &self,
        private_key: &str,
        params: ImportParams,
    ) -> WalletResult<SubmissionHandle> {
        // Read-before-write: auction timing must be fetched before
        // anything is signed. A failed fetch aborts the import here.
        let import_proof = self.assemble_proof(&params).await?;
        let data = import_call_data(&import_proof)?;
        let met_token = self.destination_contracts.get("metToken")?;

        info!(
            value = %import_proof.value,
            burn_sequence = %import_proof.burn_sequence,
            origin = %import_proof.origin_chain,
            "importing tokens"
        );

        let handle = self
            .destination
            .submit(
                private_key,
                met_token,
                U256::zero(),
                data,
                params.gas_limit,
                params.gas_price,
            )
            .await?;

        crate::metrics::record_bridge_import();

        let template = MetaAction::ImportRequest {
            origin_chain: import_proof.origin_chain.clone(),
            current_burn_hash: params.burn.current_burn_hash,
            destination_recipient: AccountChainAdapter::parse_address(&params.from)?,
            value: params.burn.amount_burnt,
            fee: params.burn.fee,
            contract_call_failed: false,
        };
        Ok(self
            .tracker
            .log_transaction(handle, &params.wallet_id, &params.from, template))
    }

    /// Gas estimate for an import, built from the identical call data
    /// the signed path uses.
    pub async fn estimate_import_gas(&self, params: &ImportParams) -> WalletResult<U256> {
        let import_proof = self.assemble_proof(params).await?;
        let data = import_call_data(&import_proof)?;
        let from = AccountChainAdapter::parse_address(&params.from)?;
        let met_token = self.destination_contracts.get("metToken")?;

        self.destination
            .client()
            .estimate_gas(from, met_token, U256::zero(), data)
            .await
    }

    /// Proof assembly: deterministic over the burn receipt and fetched
    /// auction context, so a retried import reproduces the same payload.
    async fn assemble_proof(&self, params: &ImportParams) -> WalletResult<ImportProof> {
        let context = self.destination_auction.auction_context().await?;
        let from = AccountChainAdapter::parse_address(&params.from)?;
        let now = Utc::now().timestamp() as u64;

        Ok(ImportProof::assemble(
            &self.config.origin_chain,
            self.destination.chain_name(),
            params.destination_met_address,
            from,
            params.extra_data.clone(),
            &params.burn,
            context,
            now,
            self.config.auction_tick_secs,
            params.merkle_root,
        ))
    }

    /// Caller-supplied fee, or the token porter's quote for this value.
    async fn resolve_export_fee(&self, params: &ExportParams) -> WalletResult<U256> {
        if let Some(fee) = params.fee {
            return Ok(fee);
        }

        let porter = self.source_contracts.get("tokenPorter")?;
        let data = call_data(EXPORT_FEE_SIG, &[Token::Uint(params.value)]);
        let returned = self.source.client().call(porter, data).await?;
        let tokens = decode(&[ParamType::Uint(256)], &returned)
            .map_err(|e| WalletError::EventDecoding(format!("export fee: {}", e)))?;
        let fee = tokens[0]
            .clone()
            .into_uint()
            .ok_or_else(|| WalletError::EventDecoding("export fee uint expected".into()))?;
        debug!(%fee, "export fee resolved from token porter");
        Ok(fee)
    }
}

/// ABI call data for the export call. Single builder shared by the
/// signed path and the gas estimate.
pub fn export_call_data(params: &ExportParams, fee: U256) -> WalletResult<Bytes> {
    let tokens = vec![
        Token::FixedBytes(chain_tag_to_bytes8(&params.destination_chain)?.to_vec()),
        Token::Address(params.destination_met_address),
        Token::Address(params.destination_recipient),
        Token::Uint(params.value),
        Token::Uint(fee),
        Token::Bytes(params.extra_data.to_vec()),
    ];
    Ok(call_data(EXPORT_SIG, &tokens))
}

/// ABI call data for the import call. Single builder shared by the
/// signed path and the gas estimate.
pub fn import_call_data(import_proof: &ImportProof) -> WalletResult<Bytes> {
    Ok(call_data(IMPORT_SIG, &import_proof.to_call_tokens()?))
}
