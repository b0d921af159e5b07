//! Cross-chain message delivery relayer protocol layer
//!
//! Client-side building blocks for a cross-chain delivery protocol on EVM
//! chains: quote the price of delivering a message to another chain, fetch
//! the guardian-signed attestation (VAA) for a published message, submit
//! manual deliveries and paid redeliveries, and reconstruct the lifecycle of
//! a delivery from the logs both chains emit.
//!
//! The crate is transport-stateless: every query recomputes its answer from
//! chain state, and submissions are single attempts whose retry policy
//! belongs to the caller.

pub mod attestation;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod price;
pub mod status;
pub mod tx;
pub mod types;
pub mod vaa;

pub use attestation::{AttestationFetcher, AttestationTransport, SignedAttestation};
pub use chain::{ChainProvider, ChainProviderRegistry};
pub use config::{Environment, Settings};
pub use delivery::{DeliverySubmitter, RedeliverySubmitter, ResendOptions};
pub use error::{RelayerError, RelayerResult};
pub use price::{ContractReader, PriceOracle, QuoteOptions, RegistryReader};
pub use status::{stringify, InfoOptions, StatusTracker};
pub use tx::{NonceManager, Submitter, TransactionSender};
pub use types::{
    ChainId, DeliveryEvent, DeliveryInfo, DeliveryInstruction, DeliveryStatus,
    RedeliveryInstruction, RefundStatus, TargetChainStatus, VaaKey,
};
