//! Read-only auction and converter estimation helpers
//!
//! Stateless contract reads against the auctions and autonomous
//! converter contracts. No retries beyond the transport's own policy;
//! failures propagate unchanged.

use crate::bridge::proof::AuctionContext;
use crate::chain::AccountChainClient;
use crate::error::{WalletError, WalletResult};
use crate::events::AuctionStatus;
use crate::tx::gas::GasEstimator;

use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use std::sync::Arc;

pub struct AuctionEstimator {
    client: Arc<dyn AccountChainClient>,
    auctions: Address,
    converter: Address,
    gas: GasEstimator,
}

impl AuctionEstimator {
    pub fn new(
        client: Arc<dyn AccountChainClient>,
        auctions: Address,
        converter: Address,
        gas_limit_buffer_percent: u64,
    ) -> Self {
        Self {
            client,
            auctions,
            converter,
            gas: GasEstimator::new(gas_limit_buffer_percent),
        }
    }

    /// Tokens the converter would currently return for `value` coin.
    pub async fn get_convert_coin_estimate(&self, value: U256) -> WalletResult<U256> {
        let data = call_data("getMetForEthResult(uint256)", &[Token::Uint(value)]);
        let returned = self.client.call(self.converter, data).await?;
        decode_uint(&returned)
    }

    /// Gas limit for a conversion of `value` coin from `from`.
    pub async fn get_convert_coin_gas_limit(
        &self,
        from: Address,
        value: U256,
    ) -> WalletResult<U256> {
        // Minimum-return argument in the same position the signed
        // conversion call uses
        let data = call_data("convertEthToMet(uint256)", &[Token::Uint(U256::one())]);
        let estimated = self
            .client
            .estimate_gas(from, self.converter, value, data)
            .await?;
        Ok(self.gas.buffered_limit(estimated))
    }

    /// Gas limit for an auction purchase of `value` coin from `from`.
    pub async fn get_auction_gas_limit(&self, from: Address, value: U256) -> WalletResult<U256> {
        let estimated = self
            .client
            .estimate_gas(from, self.auctions, value, Bytes::default())
            .await?;
        Ok(self.gas.buffered_limit(estimated))
    }

    /// Auctions contract address (the target of a purchase transaction).
    pub fn auctions_address(&self) -> Address {
        self.auctions
    }

    /// Auction timing parameters an import call must be consistent with.
    /// Any read failure aborts the caller before it signs anything.
    pub async fn auction_context(&self) -> WalletResult<AuctionContext> {
        let genesis_time = self.read_uint("genesisTime()").await?;
        let daily_auction_start_time = self.read_uint("dailyAuctionStartTime()").await?;
        Ok(AuctionContext {
            genesis_time: genesis_time.as_u64(),
            daily_auction_start_time: daily_auction_start_time.as_u64(),
        })
    }

    /// Current auction status for the status watcher.
    pub async fn auction_status(&self) -> WalletResult<AuctionStatus> {
        let token_remaining = self.read_uint("mintable()").await?;
        let current_price = self.read_uint("currentPrice()").await?;
        let context = self.auction_context().await?;
        Ok(AuctionStatus {
            token_remaining: token_remaining.to_string(),
            current_price: current_price.to_string(),
            genesis_time: context.genesis_time,
            daily_auction_start_time: context.daily_auction_start_time,
        })
    }

    async fn read_uint(&self, signature: &str) -> WalletResult<U256> {
        let data = call_data(signature, &[]);
        let returned =
            self.client
                .call(self.auctions, data)
                .await
                .map_err(|e| match e {
                    WalletError::Transport { message, .. } => {
                        WalletError::ContextUnavailable(format!("{}: {}", signature, message))
                    }
                    other => other,
                })?;
        decode_uint(&returned)
    }
}

/// Selector-prefixed ABI call data.
pub fn call_data(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend_from_slice(&encode(tokens));
    Bytes::from(data)
}

fn decode_uint(raw: &Bytes) -> WalletResult<U256> {
    let tokens = decode(&[ParamType::Uint(256)], raw)
        .map_err(|e| WalletError::EventDecoding(format!("uint return: {}", e)))?;
    tokens[0]
        .clone()
        .into_uint()
        .ok_or_else(|| WalletError::EventDecoding("uint return expected".into()))
}
