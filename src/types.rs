//! Core value types shared across the relayer
//!
//! Everything here is plain value data: keys identifying emitted messages,
//! decoded delivery instructions, and the status taxonomy reported for
//! delivery attempts on the target chain.

use crate::error::{RelayerError, RelayerResult};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wormhole-style chain identifier (u16 on the wire), unique within one
/// network environment. Distinct from the EVM chain id used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u16);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ChainId {
    fn from(id: u16) -> Self {
        ChainId(id)
    }
}

/// Identifies one emitted message: (emitter chain, emitter address, sequence).
///
/// The emitter address is always carried in its 32-byte wire representation;
/// narrower native addresses are left-padded with zeroes. The triple
/// round-trips identically between construction and the receiver contract's
/// on-chain key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaaKey {
    pub emitter_chain: ChainId,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
}

impl VaaKey {
    pub fn new(emitter_chain: ChainId, emitter_address: [u8; 32], sequence: u64) -> Self {
        Self {
            emitter_chain,
            emitter_address,
            sequence,
        }
    }

    /// Build a key from a chain-native emitter address (20-32 bytes wide),
    /// left-padding to the 32-byte wire representation.
    pub fn from_native(
        emitter_chain: ChainId,
        native_address: &[u8],
        sequence: u64,
    ) -> RelayerResult<Self> {
        Ok(Self {
            emitter_chain,
            emitter_address: pad_emitter(native_address)?,
            sequence,
        })
    }

    /// Recover the 20-byte EVM address from the padded representation.
    /// Fails if the padding bytes are not zero.
    pub fn emitter_evm_address(&self) -> RelayerResult<Address> {
        if self.emitter_address[..12].iter().any(|b| *b != 0) {
            return Err(RelayerError::DecodeError(format!(
                "emitter address {} is not a padded EVM address",
                hex::encode(self.emitter_address)
            )));
        }
        Ok(Address::from_slice(&self.emitter_address[12..]))
    }

    /// Hex form of the emitter address, as expected by guardian endpoints.
    pub fn emitter_hex(&self) -> String {
        hex::encode(self.emitter_address)
    }
}

/// Left-pad a 1-32 byte native address into the 32-byte wire width.
pub fn pad_emitter(native_address: &[u8]) -> RelayerResult<[u8; 32]> {
    if native_address.is_empty() || native_address.len() > 32 {
        return Err(RelayerError::DecodeError(format!(
            "emitter address must be 1-32 bytes, got {}",
            native_address.len()
        )));
    }
    let mut padded = [0u8; 32];
    padded[32 - native_address.len()..].copy_from_slice(native_address);
    Ok(padded)
}

/// Outcome of one delivery attempt on the target chain.
///
/// An attempt starts at `Pending` and moves to exactly one terminal variant.
/// A delivery that triggers a forward is tracked as a separate attempt
/// chained to the parent event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Request log exists but source finality has not been reached, so no
    /// signed attestation can exist yet.
    WaitingForVaa,
    /// Request observed, no receipt observed within the scanned range.
    Pending,
    DeliverySuccess,
    /// The receiver contract call reverted.
    ReceiverFailure,
    /// The receiver triggered a new outbound forward and it was delivered.
    ForwardRequestSuccess,
    /// The forwarded message failed to deliver.
    ForwardRequestFailure,
    /// The relayer declined to attempt delivery (insufficient budget).
    ThrownAway,
}

impl DeliveryStatus {
    /// Map the status code embedded in a delivery receipt log.
    pub fn from_wire(code: u8) -> RelayerResult<Self> {
        match code {
            0 => Ok(DeliveryStatus::DeliverySuccess),
            1 => Ok(DeliveryStatus::ReceiverFailure),
            2 => Ok(DeliveryStatus::ForwardRequestFailure),
            3 => Ok(DeliveryStatus::ForwardRequestSuccess),
            other => Err(RelayerError::DecodeError(format!(
                "unknown delivery status code {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending | DeliveryStatus::WaitingForVaa)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::WaitingForVaa => "Waiting for VAA",
            DeliveryStatus::Pending => "Pending Delivery",
            DeliveryStatus::DeliverySuccess => "Delivery Success",
            DeliveryStatus::ReceiverFailure => "Receiver Failure",
            DeliveryStatus::ForwardRequestSuccess => "Forward Request Success",
            DeliveryStatus::ForwardRequestFailure => "Forward Request Failure",
            DeliveryStatus::ThrownAway => "Thrown Away",
        };
        f.write_str(s)
    }
}

/// Refund outcome embedded in a delivery receipt log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundStatus {
    RefundSent,
    RefundFail,
    CrossChainRefundSent,
    CrossChainRefundFailProviderNotSupported,
    CrossChainRefundFailNotEnough,
    NoRefundRequested,
}

impl RefundStatus {
    pub fn from_wire(code: u8) -> RelayerResult<Self> {
        match code {
            0 => Ok(RefundStatus::RefundSent),
            1 => Ok(RefundStatus::RefundFail),
            2 => Ok(RefundStatus::CrossChainRefundSent),
            3 => Ok(RefundStatus::CrossChainRefundFailProviderNotSupported),
            4 => Ok(RefundStatus::CrossChainRefundFailNotEnough),
            5 => Ok(RefundStatus::NoRefundRequested),
            other => Err(RelayerError::DecodeError(format!(
                "unknown refund status code {other}"
            ))),
        }
    }
}

/// Decoded payload of a delivery-request log, plus the envelope fields
/// (source chain and sequence) it was emitted under. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInstruction {
    pub source_chain: ChainId,
    pub source_sequence: u64,
    pub target_chain: ChainId,
    pub target_address: [u8; 32],
    pub sender_address: [u8; 32],
    pub payload: Vec<u8>,
    pub requested_receiver_value: U256,
    pub extra_receiver_value: U256,
    pub gas_limit: U256,
    pub target_chain_refund_per_gas_unused: U256,
    pub refund_chain: ChainId,
    pub refund_address: [u8; 32],
    pub refund_delivery_provider: [u8; 32],
    pub source_delivery_provider: [u8; 32],
    /// Additional attestations to present alongside the delivery VAA.
    pub vaa_keys: Vec<VaaKey>,
}

/// Decoded payload of a redelivery-request log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeliveryInstruction {
    pub delivery_vaa_key: VaaKey,
    pub target_chain: ChainId,
    pub new_requested_receiver_value: U256,
    pub new_gas_limit: U256,
    pub new_refund_per_gas_unused: U256,
}

/// One observed (or derived) delivery attempt on the target chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub status: DeliveryStatus,
    pub transaction_hash: Option<H256>,
    pub vaa_hash: H256,
    pub source_chain: ChainId,
    pub source_sequence: u64,
    pub gas_used: U256,
    pub refund_status: Option<RefundStatus>,
    /// Revert string reported by the receiver contract, when one exists.
    pub revert_string: Option<String>,
    pub block_number: u64,
    pub log_index: u64,
    /// Forward attempt triggered by this delivery, resolved recursively.
    pub forward: Option<Box<DeliveryInfo>>,
}

/// Delivery attempts observed on one target chain, ordered by
/// (block number, log index) ascending. Append-only: a redelivery appends a
/// new event to the same VaaKey's history, it never mutates a prior event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetChainStatus {
    pub chain_id: ChainId,
    pub events: Vec<DeliveryEvent>,
}

/// Externally-reported delivery summary. Recomputed fresh on each query;
/// target-chain state can change between polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub source_chain: ChainId,
    pub source_transaction_hash: H256,
    pub source_delivery_sequence_number: u64,
    pub instruction: DeliveryInstruction,
    pub target_chain_status: TargetChainStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitter_padding_round_trips_for_evm_addresses() {
        let native: [u8; 20] = [0xab; 20];
        let key = VaaKey::from_native(ChainId(2), &native, 42).unwrap();
        assert_eq!(&key.emitter_address[..12], &[0u8; 12]);
        assert_eq!(&key.emitter_address[12..], &native);
        assert_eq!(
            key.emitter_evm_address().unwrap(),
            Address::from_slice(&native)
        );
    }

    #[test]
    fn emitter_padding_is_identity_for_full_width() {
        let wide = [0x11u8; 32];
        let key = VaaKey::from_native(ChainId(1), &wide, 7).unwrap();
        assert_eq!(key.emitter_address, wide);
    }

    #[test]
    fn emitter_padding_rejects_oversized_input() {
        let too_wide = [0u8; 33];
        assert!(matches!(
            VaaKey::from_native(ChainId(1), &too_wide, 0),
            Err(RelayerError::DecodeError(_))
        ));
        assert!(matches!(
            VaaKey::from_native(ChainId(1), &[], 0),
            Err(RelayerError::DecodeError(_))
        ));
    }

    #[test]
    fn non_evm_emitter_does_not_narrow() {
        let key = VaaKey::new(ChainId(1), [0xff; 32], 1);
        assert!(key.emitter_evm_address().is_err());
    }

    #[test]
    fn status_codes_map_exhaustively() {
        assert_eq!(
            DeliveryStatus::from_wire(0).unwrap(),
            DeliveryStatus::DeliverySuccess
        );
        assert_eq!(
            DeliveryStatus::from_wire(1).unwrap(),
            DeliveryStatus::ReceiverFailure
        );
        assert_eq!(
            DeliveryStatus::from_wire(2).unwrap(),
            DeliveryStatus::ForwardRequestFailure
        );
        assert_eq!(
            DeliveryStatus::from_wire(3).unwrap(),
            DeliveryStatus::ForwardRequestSuccess
        );
        assert!(DeliveryStatus::from_wire(4).is_err());
    }

    #[test]
    fn refund_codes_map_exhaustively() {
        for code in 0..=5u8 {
            assert!(RefundStatus::from_wire(code).is_ok());
        }
        assert!(RefundStatus::from_wire(6).is_err());
    }

    #[test]
    fn status_display_matches_reported_strings() {
        assert_eq!(
            DeliveryStatus::DeliverySuccess.to_string(),
            "Delivery Success"
        );
        assert_eq!(
            DeliveryStatus::ForwardRequestFailure.to_string(),
            "Forward Request Failure"
        );
        assert_eq!(DeliveryStatus::Pending.to_string(), "Pending Delivery");
    }
}
