//! On-chain call and log encodings for the relayer and core bridge contracts
//!
//! The contracts themselves are external collaborators; this module pins the
//! call signatures and log layouts the core invokes and observes. Selectors
//! and topics are derived from the signature strings at first use, never
//! hand-transcribed.

use crate::error::{RelayerError, RelayerResult};
use crate::types::{ChainId, VaaKey};
use ethers::abi::{self, ParamType, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Log, TransactionRequest, H256, U256};
use ethers::utils::{id, keccak256};
use lazy_static::lazy_static;

lazy_static! {
    /// Core bridge: LogMessagePublished(address indexed sender, uint64 sequence,
    /// uint32 nonce, bytes payload, uint8 consistencyLevel)
    pub static ref LOG_MESSAGE_PUBLISHED_TOPIC: H256 = H256::from(keccak256(
        "LogMessagePublished(address,uint64,uint32,bytes,uint8)"
    ));

    /// Relayer: Delivery(address indexed recipientContract, uint16 indexed
    /// sourceChain, uint64 indexed sequence, bytes32 deliveryVaaHash,
    /// uint8 status, uint256 gasUsed, uint8 refundStatus,
    /// bytes additionalStatusInfo, bytes overridesInfo)
    pub static ref DELIVERY_TOPIC: H256 = H256::from(keccak256(
        "Delivery(address,uint16,uint64,bytes32,uint8,uint256,uint8,bytes,bytes)"
    ));
}

/// Topic value for an indexed uint16/uint64 parameter (right-aligned).
pub fn uint_topic(value: u64) -> H256 {
    H256::from_low_u64_be(value)
}

fn call_data(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend_from_slice(&abi::encode(tokens));
    Bytes::from(data)
}

fn read_call(to: Address, data: Bytes) -> TypedTransaction {
    TypedTransaction::Legacy(TransactionRequest::new().to(to).data(data))
}

/// `getDefaultDeliveryProvider()` on the relayer contract.
pub fn default_delivery_provider_call(relayer: Address) -> TypedTransaction {
    read_call(relayer, call_data("getDefaultDeliveryProvider()", &[]))
}

/// `quoteEVMDeliveryPrice(uint16,uint256,uint256,address)` on the relayer
/// contract: two-hop quote for gas budget plus receiver value conversion.
pub fn quote_delivery_price_call(
    relayer: Address,
    target_chain: ChainId,
    receiver_value: U256,
    gas_limit: U256,
    delivery_provider: Address,
) -> TypedTransaction {
    read_call(
        relayer,
        call_data(
            "quoteEVMDeliveryPrice(uint16,uint256,uint256,address)",
            &[
                Token::Uint(U256::from(target_chain.0)),
                Token::Uint(receiver_value),
                Token::Uint(gas_limit),
                Token::Address(delivery_provider),
            ],
        ),
    )
}

/// `messageFee()` on the core bridge.
pub fn message_fee_call(core_bridge: Address) -> TypedTransaction {
    read_call(core_bridge, call_data("messageFee()", &[]))
}

/// `deliver(bytes[],bytes,address,bytes)` on the target chain relayer:
/// presents the delivery VAA plus all additional attestations.
pub fn deliver_call(
    relayer: Address,
    additional_vaas: Vec<Vec<u8>>,
    delivery_vaa: Vec<u8>,
    relayer_refund_address: Address,
    value: U256,
    gas_limit: U256,
) -> TypedTransaction {
    let data = call_data(
        "deliver(bytes[],bytes,address,bytes)",
        &[
            Token::Array(additional_vaas.into_iter().map(Token::Bytes).collect()),
            Token::Bytes(delivery_vaa),
            Token::Address(relayer_refund_address),
            Token::Bytes(Vec::new()), // no delivery overrides
        ],
    );
    TypedTransaction::Legacy(
        TransactionRequest::new()
            .to(relayer)
            .data(data)
            .value(value)
            .gas(gas_limit),
    )
}

/// `resendToEvm((uint16,bytes32,uint64),uint16,uint256,uint256,address)` on
/// the source chain relayer: paid redelivery request referencing a prior
/// delivery by its VAA key.
pub fn resend_call(
    relayer: Address,
    key: &VaaKey,
    target_chain: ChainId,
    new_receiver_value: U256,
    new_gas_limit: U256,
    delivery_provider: Address,
    value: U256,
    gas_limit: U256,
) -> TypedTransaction {
    let data = call_data(
        "resendToEvm((uint16,bytes32,uint64),uint16,uint256,uint256,address)",
        &[
            Token::Tuple(vec![
                Token::Uint(U256::from(key.emitter_chain.0)),
                Token::FixedBytes(key.emitter_address.to_vec()),
                Token::Uint(U256::from(key.sequence)),
            ]),
            Token::Uint(U256::from(target_chain.0)),
            Token::Uint(new_receiver_value),
            Token::Uint(new_gas_limit),
            Token::Address(delivery_provider),
        ],
    );
    TypedTransaction::Legacy(
        TransactionRequest::new()
            .to(relayer)
            .data(data)
            .value(value)
            .gas(gas_limit),
    )
}

/// Decode an `address` return value.
pub fn decode_address_return(data: &[u8]) -> RelayerResult<Address> {
    let tokens = abi::decode(&[ParamType::Address], data)
        .map_err(|e| RelayerError::DecodeError(format!("address return: {e}")))?;
    tokens[0]
        .clone()
        .into_address()
        .ok_or_else(|| RelayerError::DecodeError("address return: wrong token".to_string()))
}

/// Decode a single `uint256` return value.
pub fn decode_uint_return(data: &[u8]) -> RelayerResult<U256> {
    let tokens = abi::decode(&[ParamType::Uint(256)], data)
        .map_err(|e| RelayerError::DecodeError(format!("uint return: {e}")))?;
    tokens[0]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::DecodeError("uint return: wrong token".to_string()))
}

/// Decode the `(uint256 nativePriceQuote, uint256 refundPerGasUnused)` return
/// of the delivery price quote.
pub fn decode_quote_return(data: &[u8]) -> RelayerResult<(U256, U256)> {
    let tokens = abi::decode(&[ParamType::Uint(256), ParamType::Uint(256)], data)
        .map_err(|e| RelayerError::DecodeError(format!("quote return: {e}")))?;
    let native = tokens[0]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::DecodeError("quote return: wrong token".to_string()))?;
    let refund_per_gas = tokens[1]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::DecodeError("quote return: wrong token".to_string()))?;
    Ok((native, refund_per_gas))
}

/// A decoded core-bridge message publication log.
#[derive(Debug, Clone)]
pub struct MessagePublishedLog {
    pub emitter: Address,
    pub sequence: u64,
    pub nonce: u32,
    pub payload: Vec<u8>,
    pub consistency_level: u8,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: Option<H256>,
}

/// Decode a `LogMessagePublished` log. Any layout mismatch is fatal.
pub fn decode_message_published(log: &Log) -> RelayerResult<MessagePublishedLog> {
    if log.topics.len() != 2 || log.topics[0] != *LOG_MESSAGE_PUBLISHED_TOPIC {
        return Err(RelayerError::DecodeError(
            "not a LogMessagePublished log".to_string(),
        ));
    }
    let emitter = Address::from_slice(&log.topics[1].as_bytes()[12..]);

    let tokens = abi::decode(
        &[
            ParamType::Uint(64),
            ParamType::Uint(32),
            ParamType::Bytes,
            ParamType::Uint(8),
        ],
        &log.data,
    )
    .map_err(|e| RelayerError::DecodeError(format!("LogMessagePublished data: {e}")))?;

    let sequence = tokens[0]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::DecodeError("sequence token".to_string()))?
        .as_u64();
    let nonce = tokens[1]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::DecodeError("nonce token".to_string()))?
        .as_u32();
    let payload = tokens[2]
        .clone()
        .into_bytes()
        .ok_or_else(|| RelayerError::DecodeError("payload token".to_string()))?;
    let consistency_level = tokens[3]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::DecodeError("consistency token".to_string()))?
        .as_u32() as u8;

    Ok(MessagePublishedLog {
        emitter,
        sequence,
        nonce,
        payload,
        consistency_level,
        block_number: log.block_number.map(|b| b.as_u64()).unwrap_or(0),
        log_index: log.log_index.map(|i| i.as_u64()).unwrap_or(0),
        transaction_hash: log.transaction_hash,
    })
}

/// A decoded delivery receipt log from the target chain relayer.
#[derive(Debug, Clone)]
pub struct DeliveryLog {
    pub recipient: Address,
    pub source_chain: ChainId,
    pub sequence: u64,
    pub delivery_vaa_hash: H256,
    pub status_code: u8,
    pub gas_used: U256,
    pub refund_code: u8,
    pub additional_status_info: Vec<u8>,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: Option<H256>,
}

/// Decode a `Delivery` log. Any layout mismatch is fatal.
pub fn decode_delivery_log(log: &Log) -> RelayerResult<DeliveryLog> {
    if log.topics.len() != 4 || log.topics[0] != *DELIVERY_TOPIC {
        return Err(RelayerError::DecodeError("not a Delivery log".to_string()));
    }
    let recipient = Address::from_slice(&log.topics[1].as_bytes()[12..]);
    let source_chain = ChainId(log.topics[2].to_low_u64_be() as u16);
    let sequence = log.topics[3].to_low_u64_be();

    let tokens = abi::decode(
        &[
            ParamType::FixedBytes(32),
            ParamType::Uint(8),
            ParamType::Uint(256),
            ParamType::Uint(8),
            ParamType::Bytes,
            ParamType::Bytes,
        ],
        &log.data,
    )
    .map_err(|e| RelayerError::DecodeError(format!("Delivery data: {e}")))?;

    let hash_bytes = tokens[0]
        .clone()
        .into_fixed_bytes()
        .ok_or_else(|| RelayerError::DecodeError("vaa hash token".to_string()))?;
    let status_code = tokens[1]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::DecodeError("status token".to_string()))?
        .as_u32() as u8;
    let gas_used = tokens[2]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::DecodeError("gas used token".to_string()))?;
    let refund_code = tokens[3]
        .clone()
        .into_uint()
        .ok_or_else(|| RelayerError::DecodeError("refund token".to_string()))?
        .as_u32() as u8;
    let additional_status_info = tokens[4]
        .clone()
        .into_bytes()
        .ok_or_else(|| RelayerError::DecodeError("status info token".to_string()))?;

    Ok(DeliveryLog {
        recipient,
        source_chain,
        sequence,
        delivery_vaa_hash: H256::from_slice(&hash_bytes),
        status_code,
        gas_used,
        refund_code,
        additional_status_info,
        block_number: log.block_number.map(|b| b.as_u64()).unwrap_or(0),
        log_index: log.log_index.map(|i| i.as_u64()).unwrap_or(0),
        transaction_hash: log.transaction_hash,
    })
}
