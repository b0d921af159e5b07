//! Error types for the delivery relayer core

use crate::types::ChainId;
use ethers::types::{H256, U256};
use std::time::Duration;
use thiserror::Error;

/// Main error type for relayer operations
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain {chain} is not registered for the active environment")]
    UnknownChain { chain: ChainId },

    #[error("Provider unreachable for chain {chain}: {message}")]
    ProviderUnreachable { chain: ChainId, message: String },

    #[error("No signed attestation available after {elapsed:?}")]
    AttestationUnavailable { elapsed: Duration },

    #[error("Malformed attestation: {0}")]
    AttestationMalformed(String),

    #[error("No delivery request log found for transaction {tx_hash:?}")]
    NoDeliveryRequestFound { tx_hash: H256 },

    #[error("Insufficient funds: delivery quote is {required}, supplied value is {supplied}")]
    InsufficientFunds { required: U256, supplied: U256 },

    #[error("Gas limit below the delivery provider floor: {reason}")]
    InsufficientGasLimit { reason: String },

    #[error("Delivery reverted: {reason}")]
    DeliveryReverted { reason: String },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Nonce conflict on chain {chain}: allocated {allocated}, chain reports {on_chain}")]
    NonceConflict {
        chain: ChainId,
        allocated: u64,
        on_chain: u64,
    },

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },
}

impl RelayerError {
    /// Check if error is retryable
    ///
    /// Only transport failures qualify. Decode failures, reverts, and funding
    /// preconditions must never be retried blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ProviderUnreachable { .. } | RelayerError::Timeout { .. }
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
