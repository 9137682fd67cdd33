//! Error types for the wallet core

use thiserror::Error;

/// Main error type for wallet-core operations
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: String, need: String },

    #[error("Broadcast rejected by node: {0}")]
    BroadcastRejected(String),

    #[error("Transport failure during {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("Chain rejected transaction {tx_hash}: {message}")]
    ChainRejected { tx_hash: String, message: String },

    #[error("Destination-chain context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Nonce error for {address}: {message}")]
    Nonce { address: String, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Event decoding error: {0}")]
    EventDecoding(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Errors that surface as a per-operation `wallet-error` bus event
    /// rather than a fatal `error`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WalletError::InvalidInput(_)
                | WalletError::InvalidAddress(_)
                | WalletError::InsufficientFunds { .. }
                | WalletError::BroadcastRejected(_)
                | WalletError::Transport { .. }
                | WalletError::ChainRejected { .. }
                | WalletError::ContextUnavailable(_)
                | WalletError::Nonce { .. }
                | WalletError::GasEstimation(_)
        )
    }

    /// Errors rejected before any network round-trip.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            WalletError::InvalidInput(_) | WalletError::InvalidAddress(_)
        )
    }

    /// Shorthand for transport failures.
    pub fn transport(operation: &str, err: impl std::fmt::Display) -> Self {
        WalletError::Transport {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for wallet-core operations
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors_map_to_wallet_error_events() {
        assert!(WalletError::BroadcastRejected("nonce too low".into()).is_recoverable());
        assert!(WalletError::ContextUnavailable("auctions unreachable".into()).is_recoverable());
        assert!(!WalletError::Internal("poisoned".into()).is_recoverable());
        assert!(!WalletError::Config("missing chain table".into()).is_recoverable());
    }
}
