//! Attestation (VAA) and instruction payload decoding
//!
//! Binary layouts here are fixed by the core bridge and relayer contracts and
//! must be decoded bit-exactly. Any length mismatch, unknown discriminator,
//! or trailing bytes is a hard decode failure; ambiguous bytes are never
//! guessed at.

use crate::error::{RelayerError, RelayerResult};
use crate::types::{ChainId, DeliveryInstruction, RedeliveryInstruction, VaaKey};
use ethers::types::{H256, U256};
use sha3::{Digest, Keccak256};

const DELIVERY_PAYLOAD_ID: u8 = 1;
const REDELIVERY_PAYLOAD_ID: u8 = 2;
const VAA_KEY_TYPE: u8 = 1;
const EXECUTION_INFO_VERSION_EVM_V1: u8 = 0;

/// Length of one guardian signature entry: index byte + 65-byte signature.
const SIGNATURE_ENTRY_LEN: usize = 66;

/// A structurally decoded signed attestation.
///
/// Signature verification is an oracle-side concern; this type only carries
/// the envelope fields and the payload, plus the digest used to correlate
/// delivery receipts.
#[derive(Debug, Clone)]
pub struct Vaa {
    pub version: u8,
    pub guardian_set_index: u32,
    pub signature_count: u8,
    pub timestamp: u32,
    pub nonce: u32,
    pub emitter_chain: ChainId,
    pub emitter_address: [u8; 32],
    pub sequence: u64,
    pub consistency_level: u8,
    pub payload: Vec<u8>,
    /// Double-keccak digest of the body, as derived on-chain.
    pub hash: H256,
}

impl Vaa {
    pub fn key(&self) -> VaaKey {
        VaaKey::new(self.emitter_chain, self.emitter_address, self.sequence)
    }
}

/// Parse attestation bytes. Structural failures surface as
/// [`RelayerError::AttestationMalformed`].
pub fn parse(bytes: &[u8]) -> RelayerResult<Vaa> {
    parse_inner(bytes).map_err(|e| match e {
        RelayerError::DecodeError(msg) => RelayerError::AttestationMalformed(msg),
        other => other,
    })
}

fn parse_inner(bytes: &[u8]) -> RelayerResult<Vaa> {
    let mut r = ByteReader::new(bytes);
    let version = r.read_u8()?;
    let guardian_set_index = r.read_u32()?;
    let signature_count = r.read_u8()?;
    r.skip(signature_count as usize * SIGNATURE_ENTRY_LEN)?;

    let body = r.remaining().to_vec();
    let timestamp = r.read_u32()?;
    let nonce = r.read_u32()?;
    let emitter_chain = ChainId(r.read_u16()?);
    let emitter_address = r.read_bytes32()?;
    let sequence = r.read_u64()?;
    let consistency_level = r.read_u8()?;
    let payload = r.remaining().to_vec();

    Ok(Vaa {
        version,
        guardian_set_index,
        signature_count,
        timestamp,
        nonce,
        emitter_chain,
        emitter_address,
        sequence,
        consistency_level,
        payload,
        hash: double_keccak(&body),
    })
}

/// Digest of a VAA body as the receiver contract derives it:
/// keccak-256 applied twice.
pub fn double_keccak(body: &[u8]) -> H256 {
    let inner = Keccak256::digest(body);
    H256::from_slice(&Keccak256::digest(inner))
}

/// Reconstruct the delivery VAA digest from request-log fields. The body is
/// the packed envelope followed by the raw payload.
pub fn hash_from_log_fields(
    timestamp: u32,
    nonce: u32,
    emitter_chain: ChainId,
    emitter_address: &[u8; 32],
    sequence: u64,
    consistency_level: u8,
    payload: &[u8],
) -> H256 {
    let mut body = Vec::with_capacity(51 + payload.len());
    body.extend_from_slice(&timestamp.to_be_bytes());
    body.extend_from_slice(&nonce.to_be_bytes());
    body.extend_from_slice(&emitter_chain.0.to_be_bytes());
    body.extend_from_slice(emitter_address);
    body.extend_from_slice(&sequence.to_be_bytes());
    body.push(consistency_level);
    body.extend_from_slice(payload);
    double_keccak(&body)
}

/// Decode a delivery instruction from a request payload, filling in the
/// envelope fields it was emitted under.
pub fn decode_delivery_instruction(
    payload: &[u8],
    source_chain: ChainId,
    source_sequence: u64,
) -> RelayerResult<DeliveryInstruction> {
    let mut r = ByteReader::new(payload);
    let payload_id = r.read_u8()?;
    if payload_id != DELIVERY_PAYLOAD_ID {
        return Err(RelayerError::DecodeError(format!(
            "expected delivery payload id {DELIVERY_PAYLOAD_ID}, got {payload_id}"
        )));
    }

    let target_chain = ChainId(r.read_u16()?);
    let target_address = r.read_bytes32()?;
    let inner_payload = r.read_length_prefixed()?;
    let requested_receiver_value = r.read_u256()?;
    let extra_receiver_value = r.read_u256()?;
    let execution_info = r.read_length_prefixed()?;
    let (gas_limit, target_chain_refund_per_gas_unused) =
        decode_execution_info(&execution_info)?;
    let refund_chain = ChainId(r.read_u16()?);
    let refund_address = r.read_bytes32()?;
    let refund_delivery_provider = r.read_bytes32()?;
    let source_delivery_provider = r.read_bytes32()?;
    let sender_address = r.read_bytes32()?;

    let key_count = r.read_u8()?;
    let mut vaa_keys = Vec::with_capacity(key_count as usize);
    for _ in 0..key_count {
        vaa_keys.push(read_vaa_key(&mut r)?);
    }
    r.expect_exhausted()?;

    Ok(DeliveryInstruction {
        source_chain,
        source_sequence,
        target_chain,
        target_address,
        sender_address,
        payload: inner_payload,
        requested_receiver_value,
        extra_receiver_value,
        gas_limit,
        target_chain_refund_per_gas_unused,
        refund_chain,
        refund_address,
        refund_delivery_provider,
        source_delivery_provider,
        vaa_keys,
    })
}

/// Decode a redelivery instruction payload.
pub fn decode_redelivery_instruction(payload: &[u8]) -> RelayerResult<RedeliveryInstruction> {
    let mut r = ByteReader::new(payload);
    let payload_id = r.read_u8()?;
    if payload_id != REDELIVERY_PAYLOAD_ID {
        return Err(RelayerError::DecodeError(format!(
            "expected redelivery payload id {REDELIVERY_PAYLOAD_ID}, got {payload_id}"
        )));
    }
    let delivery_vaa_key = read_vaa_key(&mut r)?;
    let target_chain = ChainId(r.read_u16()?);
    let new_requested_receiver_value = r.read_u256()?;
    let execution_info = r.read_length_prefixed()?;
    let (new_gas_limit, new_refund_per_gas_unused) = decode_execution_info(&execution_info)?;
    r.expect_exhausted()?;

    Ok(RedeliveryInstruction {
        delivery_vaa_key,
        target_chain,
        new_requested_receiver_value,
        new_gas_limit,
        new_refund_per_gas_unused,
    })
}

fn decode_execution_info(bytes: &[u8]) -> RelayerResult<(U256, U256)> {
    let mut r = ByteReader::new(bytes);
    let version = r.read_u8()?;
    if version != EXECUTION_INFO_VERSION_EVM_V1 {
        return Err(RelayerError::DecodeError(format!(
            "unknown execution info version {version}"
        )));
    }
    let gas_limit = r.read_u256()?;
    let refund_per_gas_unused = r.read_u256()?;
    r.expect_exhausted()?;
    Ok((gas_limit, refund_per_gas_unused))
}

fn read_vaa_key(r: &mut ByteReader<'_>) -> RelayerResult<VaaKey> {
    let key_type = r.read_u8()?;
    if key_type != VAA_KEY_TYPE {
        return Err(RelayerError::DecodeError(format!(
            "unknown message key type {key_type}"
        )));
    }
    let chain = ChainId(r.read_u16()?);
    let emitter = r.read_bytes32()?;
    let sequence = r.read_u64()?;
    Ok(VaaKey::new(chain, emitter, sequence))
}

/// Big-endian cursor over an immutable byte slice.
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> RelayerResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(RelayerError::DecodeError(format!(
                "unexpected end of input: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> RelayerResult<()> {
        self.take(n).map(|_| ())
    }

    fn read_u8(&mut self) -> RelayerResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> RelayerResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> RelayerResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> RelayerResult<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    fn read_u256(&mut self) -> RelayerResult<U256> {
        Ok(U256::from_big_endian(self.take(32)?))
    }

    fn read_bytes32(&mut self) -> RelayerResult<[u8; 32]> {
        let b = self.take(32)?;
        let mut buf = [0u8; 32];
        buf.copy_from_slice(b);
        Ok(buf)
    }

    /// u32 length prefix followed by that many bytes.
    fn read_length_prefixed(&mut self) -> RelayerResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn expect_exhausted(&self) -> RelayerResult<()> {
        if self.pos != self.data.len() {
            return Err(RelayerError::DecodeError(format!(
                "{} trailing bytes after payload",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod encode {
    //! Wire encoders, test-only: production code never re-encodes these
    //! layouts, but the decoders are verified against hand-built bytes.

    use super::*;

    pub fn vaa(
        emitter_chain: ChainId,
        emitter_address: [u8; 32],
        sequence: u64,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(1u8); // version
        out.extend_from_slice(&0u32.to_be_bytes()); // guardian set index
        out.push(1u8); // one signature
        out.extend_from_slice(&[0u8; SIGNATURE_ENTRY_LEN]);
        out.extend_from_slice(&100u32.to_be_bytes()); // timestamp
        out.extend_from_slice(&0u32.to_be_bytes()); // nonce
        out.extend_from_slice(&emitter_chain.0.to_be_bytes());
        out.extend_from_slice(&emitter_address);
        out.extend_from_slice(&sequence.to_be_bytes());
        out.push(15u8); // consistency level
        out.extend_from_slice(payload);
        out
    }

    pub fn execution_info(gas_limit: U256, refund_per_gas: U256) -> Vec<u8> {
        let mut out = vec![EXECUTION_INFO_VERSION_EVM_V1];
        let mut buf = [0u8; 32];
        gas_limit.to_big_endian(&mut buf);
        out.extend_from_slice(&buf);
        refund_per_gas.to_big_endian(&mut buf);
        out.extend_from_slice(&buf);
        out
    }

    pub fn vaa_key(key: &VaaKey) -> Vec<u8> {
        let mut out = vec![VAA_KEY_TYPE];
        out.extend_from_slice(&key.emitter_chain.0.to_be_bytes());
        out.extend_from_slice(&key.emitter_address);
        out.extend_from_slice(&key.sequence.to_be_bytes());
        out
    }

    pub fn delivery_instruction(ix: &DeliveryInstruction) -> Vec<u8> {
        let mut out = vec![DELIVERY_PAYLOAD_ID];
        out.extend_from_slice(&ix.target_chain.0.to_be_bytes());
        out.extend_from_slice(&ix.target_address);
        out.extend_from_slice(&(ix.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&ix.payload);
        let mut buf = [0u8; 32];
        ix.requested_receiver_value.to_big_endian(&mut buf);
        out.extend_from_slice(&buf);
        ix.extra_receiver_value.to_big_endian(&mut buf);
        out.extend_from_slice(&buf);
        let exec = execution_info(ix.gas_limit, ix.target_chain_refund_per_gas_unused);
        out.extend_from_slice(&(exec.len() as u32).to_be_bytes());
        out.extend_from_slice(&exec);
        out.extend_from_slice(&ix.refund_chain.0.to_be_bytes());
        out.extend_from_slice(&ix.refund_address);
        out.extend_from_slice(&ix.refund_delivery_provider);
        out.extend_from_slice(&ix.source_delivery_provider);
        out.extend_from_slice(&ix.sender_address);
        out.push(ix.vaa_keys.len() as u8);
        for key in &ix.vaa_keys {
            out.extend_from_slice(&vaa_key(key));
        }
        out
    }
}
