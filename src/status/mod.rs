//! Delivery lifecycle tracking across source and target chains
//!
//! Reconciles state split across two independently-finalized ledgers: the
//! delivery request is a log on the source chain, the outcome a log on the
//! target chain, and neither side knows about the other. Each query
//! recomputes the summary from scratch; nothing is cached because new blocks
//! and new attempts can land between polls.

use crate::chain::ChainProviderRegistry;
use crate::config::RelayerConfig;
use crate::contracts::{self, DeliveryLog, MessagePublishedLog};
use crate::error::{RelayerError, RelayerResult};
use crate::types::{
    pad_emitter, ChainId, DeliveryEvent, DeliveryInfo, DeliveryStatus, RefundStatus,
    TargetChainStatus,
};
use crate::vaa;

use ethers::types::{Filter, H256, U256};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::debug;

/// Optional tracking parameters
#[derive(Debug, Clone, Default)]
pub struct InfoOptions {
    /// Override for the bounded target-chain scan range (blocks). Defaults
    /// to the configured `block_scan_range`.
    pub block_scan_range: Option<u64>,
    /// Which delivery-request log of the transaction to track, when one
    /// transaction emitted several. Defaults to the first.
    pub source_sequence_index: usize,
}

/// Derives the lifecycle summary for a delivery from a source transaction
/// hash.
pub struct StatusTracker {
    registry: Arc<ChainProviderRegistry>,
    config: RelayerConfig,
}

impl StatusTracker {
    pub fn new(registry: Arc<ChainProviderRegistry>, config: RelayerConfig) -> Self {
        Self { registry, config }
    }

    /// Locate the delivery request emitted by `source_tx`, then scan the
    /// target chain for matching delivery receipts and reduce them into a
    /// [`DeliveryInfo`].
    ///
    /// A transaction with no delivery-request log (reverted, or simply
    /// unrelated) fails with [`RelayerError::NoDeliveryRequestFound`]; that
    /// is distinct from a tracked request whose attestation is still
    /// pending, which reports a `WaitingForVaa` event.
    pub async fn get_delivery_info(
        &self,
        source: ChainId,
        source_tx: H256,
        opts: &InfoOptions,
    ) -> RelayerResult<DeliveryInfo> {
        self.resolve(source, source_tx, opts.clone(), 0).await
    }

    fn resolve(
        &self,
        source: ChainId,
        source_tx: H256,
        opts: InfoOptions,
        depth: u32,
    ) -> BoxFuture<'_, RelayerResult<DeliveryInfo>> {
        async move {
            let provider = self.registry.provider(source)?;
            let receipt = provider
                .get_transaction_receipt(source_tx)
                .await?
                .ok_or(RelayerError::NoDeliveryRequestFound { tx_hash: source_tx })?;
            if receipt.status == Some(0u64.into()) {
                return Err(RelayerError::NoDeliveryRequestFound { tx_hash: source_tx });
            }

            let relayer = provider.relayer_address();
            let core_bridge = provider.core_bridge_address();

            let mut requests: Vec<MessagePublishedLog> = Vec::new();
            for log in &receipt.logs {
                if log.address != core_bridge
                    || log.topics.first() != Some(&*contracts::LOG_MESSAGE_PUBLISHED_TOPIC)
                {
                    continue;
                }
                let published = contracts::decode_message_published(log)?;
                if published.emitter == relayer {
                    requests.push(published);
                }
            }

            let request = requests
                .into_iter()
                .nth(opts.source_sequence_index)
                .ok_or(RelayerError::NoDeliveryRequestFound { tx_hash: source_tx })?;

            let instruction =
                vaa::decode_delivery_instruction(&request.payload, source, request.sequence)?;

            // The attestation digest is reconstructible from the request log
            // plus its block timestamp.
            let request_block = receipt
                .block_number
                .map(|b| b.as_u64())
                .unwrap_or(request.block_number);
            let source_timestamp = provider
                .get_block(request_block)
                .await?
                .map(|b| b.timestamp.as_u64())
                .unwrap_or(0);
            let emitter = pad_emitter(relayer.as_bytes())?;
            let vaa_hash = vaa::hash_from_log_fields(
                source_timestamp as u32,
                request.nonce,
                source,
                &emitter,
                request.sequence,
                request.consistency_level,
                &request.payload,
            );

            debug!(
                "Tracking delivery chain {} seq {} (vaa hash {:?}) -> chain {}",
                source, request.sequence, vaa_hash, instruction.target_chain
            );

            let target = instruction.target_chain;
            let target_provider = self.registry.provider(target)?;
            let latest = target_provider.get_block_number().await?;
            let range = opts
                .block_scan_range
                .unwrap_or(self.config.block_scan_range);
            let filter = Filter::new()
                .address(target_provider.relayer_address())
                .topic0(*contracts::DELIVERY_TOPIC)
                .topic2(contracts::uint_topic(source.0 as u64))
                .topic3(contracts::uint_topic(request.sequence))
                .from_block(latest.saturating_sub(range))
                .to_block(latest);

            let mut receipts = Vec::new();
            for log in target_provider.get_logs(&filter).await? {
                let decoded = contracts::decode_delivery_log(&log)?;
                if decoded.delivery_vaa_hash == vaa_hash {
                    receipts.push(decoded);
                }
            }
            sort_receipts(&mut receipts);

            let mut events = Vec::with_capacity(receipts.len().max(1));
            for delivery in receipts {
                let status = DeliveryStatus::from_wire(delivery.status_code)?;
                let refund_status = RefundStatus::from_wire(delivery.refund_code)?;

                // A forward is a separate attempt chained to this one: the
                // delivery transaction emitted its own outbound request.
                let forward = match (status, delivery.transaction_hash) {
                    (
                        DeliveryStatus::ForwardRequestSuccess
                        | DeliveryStatus::ForwardRequestFailure,
                        Some(tx_hash),
                    ) if depth < self.config.max_forward_depth => {
                        match self
                            .resolve(target, tx_hash, forward_opts(&opts), depth + 1)
                            .await
                        {
                            Ok(info) => Some(Box::new(info)),
                            // The forward request may not have produced a
                            // request log we can see yet.
                            Err(RelayerError::NoDeliveryRequestFound { .. }) => None,
                            Err(e) => return Err(e),
                        }
                    }
                    _ => None,
                };

                events.push(DeliveryEvent {
                    status,
                    transaction_hash: delivery.transaction_hash,
                    vaa_hash,
                    source_chain: source,
                    source_sequence: request.sequence,
                    gas_used: delivery.gas_used,
                    refund_status: Some(refund_status),
                    revert_string: revert_string_from(&delivery.additional_status_info),
                    block_number: delivery.block_number,
                    log_index: delivery.log_index,
                    forward,
                });
            }

            if events.is_empty() {
                let source_latest = provider.get_block_number().await?;
                let source_final =
                    request_block + provider.confirmation_blocks() <= source_latest;
                let target_timestamp = target_provider
                    .get_block(latest)
                    .await?
                    .map(|b| b.timestamp.as_u64())
                    .unwrap_or(source_timestamp);
                let status = derive_unobserved_status(
                    source_final,
                    target_timestamp.saturating_sub(source_timestamp),
                    self.config.thrown_away_after_secs,
                );
                events.push(DeliveryEvent {
                    status,
                    transaction_hash: None,
                    vaa_hash,
                    source_chain: source,
                    source_sequence: request.sequence,
                    gas_used: U256::zero(),
                    refund_status: None,
                    revert_string: None,
                    block_number: 0,
                    log_index: 0,
                    forward: None,
                });
            }

            Ok(DeliveryInfo {
                source_chain: source,
                source_transaction_hash: source_tx,
                source_delivery_sequence_number: request.sequence,
                instruction,
                target_chain_status: TargetChainStatus {
                    chain_id: target,
                    events,
                },
            })
        }
        .boxed()
    }
}

fn forward_opts(opts: &InfoOptions) -> InfoOptions {
    InfoOptions {
        block_scan_range: opts.block_scan_range,
        source_sequence_index: 0,
    }
}

/// Canonical event order: target-chain block number ascending, ties broken
/// by log index ascending.
fn sort_receipts(receipts: &mut [DeliveryLog]) {
    receipts.sort_by_key(|r| (r.block_number, r.log_index));
}

/// Status for a request with no observed receipt: the attestation cannot
/// exist before source finality; after that the attempt is pending until the
/// request is old enough that the relayer has evidently declined it.
fn derive_unobserved_status(
    source_final: bool,
    request_age_secs: u64,
    thrown_away_after_secs: u64,
) -> DeliveryStatus {
    if !source_final {
        DeliveryStatus::WaitingForVaa
    } else if request_age_secs > thrown_away_after_secs {
        DeliveryStatus::ThrownAway
    } else {
        DeliveryStatus::Pending
    }
}

/// Render the receiver's revert data: UTF-8 when it is readable, hex
/// otherwise, absent when empty.
fn revert_string_from(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    match std::str::from_utf8(data) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => Some(s.to_string()),
        _ => Some(format!("0x{}", hex::encode(data))),
    }
}

/// Human-readable delivery summary. Presentation only; the structured
/// [`DeliveryInfo`] is the contract.
pub fn stringify(info: &DeliveryInfo) -> String {
    let mut out = String::new();
    stringify_into(&mut out, info, 0);
    out
}

fn stringify_into(out: &mut String, info: &DeliveryInfo, indent: usize) {
    use std::fmt::Write;
    let pad = "  ".repeat(indent);
    let _ = writeln!(
        out,
        "{pad}Delivery request (chain {} seq {}, tx {:?})",
        info.source_chain, info.source_delivery_sequence_number, info.source_transaction_hash
    );
    let _ = writeln!(
        out,
        "{pad}  target chain {}, gas limit {}, receiver value {}",
        info.instruction.target_chain,
        info.instruction.gas_limit,
        info.instruction.requested_receiver_value
    );
    for (i, event) in info.target_chain_status.events.iter().enumerate() {
        let _ = write!(out, "{pad}  attempt {}: {}", i + 1, event.status);
        if let Some(tx) = event.transaction_hash {
            let _ = write!(out, " (tx {tx:?}, block {})", event.block_number);
        }
        if let Some(ref reason) = event.revert_string {
            let _ = write!(out, " [{reason}]");
        }
        let _ = writeln!(out);
        if let Some(ref forward) = event.forward {
            stringify_into(out, forward, indent + 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeliveryInstruction, VaaKey};
    use ethers::types::Address;

    fn receipt(block: u64, index: u64) -> DeliveryLog {
        DeliveryLog {
            recipient: Address::zero(),
            source_chain: ChainId(2),
            sequence: 42,
            delivery_vaa_hash: H256::zero(),
            status_code: 0,
            gas_used: U256::zero(),
            refund_code: 5,
            additional_status_info: Vec::new(),
            block_number: block,
            log_index: index,
            transaction_hash: None,
        }
    }

    #[test]
    fn receipts_sort_by_block_then_log_index() {
        let mut receipts = vec![receipt(9, 1), receipt(3, 7), receipt(9, 0), receipt(1, 2)];
        sort_receipts(&mut receipts);
        let order: Vec<(u64, u64)> = receipts
            .iter()
            .map(|r| (r.block_number, r.log_index))
            .collect();
        assert_eq!(order, vec![(1, 2), (3, 7), (9, 0), (9, 1)]);
    }

    #[test]
    fn unobserved_status_progression() {
        assert_eq!(
            derive_unobserved_status(false, 0, 7200),
            DeliveryStatus::WaitingForVaa
        );
        assert_eq!(
            derive_unobserved_status(true, 60, 7200),
            DeliveryStatus::Pending
        );
        assert_eq!(
            derive_unobserved_status(true, 7201, 7200),
            DeliveryStatus::ThrownAway
        );
    }

    #[test]
    fn revert_data_renders_readably() {
        assert_eq!(revert_string_from(b""), None);
        assert_eq!(
            revert_string_from(b"NotAnEvmContract").as_deref(),
            Some("NotAnEvmContract")
        );
        assert_eq!(
            revert_string_from(&[0x08, 0xc3, 0x79, 0xa0]).as_deref(),
            Some("0x08c379a0")
        );
    }

    #[test]
    fn stringify_renders_chained_forwards() {
        let instruction = DeliveryInstruction {
            source_chain: ChainId(2),
            source_sequence: 42,
            target_chain: ChainId(4),
            target_address: [0; 32],
            sender_address: [0; 32],
            payload: Vec::new(),
            requested_receiver_value: U256::zero(),
            extra_receiver_value: U256::zero(),
            gas_limit: U256::from(500_000u64),
            target_chain_refund_per_gas_unused: U256::zero(),
            refund_chain: ChainId(2),
            refund_address: [0; 32],
            refund_delivery_provider: [0; 32],
            source_delivery_provider: [0; 32],
            vaa_keys: vec![VaaKey::new(ChainId(2), [0; 32], 1)],
        };
        let child = DeliveryInfo {
            source_chain: ChainId(4),
            source_transaction_hash: H256::repeat_byte(2),
            source_delivery_sequence_number: 7,
            instruction: instruction.clone(),
            target_chain_status: TargetChainStatus {
                chain_id: ChainId(2),
                events: vec![DeliveryEvent {
                    status: DeliveryStatus::DeliverySuccess,
                    transaction_hash: Some(H256::repeat_byte(3)),
                    vaa_hash: H256::zero(),
                    source_chain: ChainId(4),
                    source_sequence: 7,
                    gas_used: U256::zero(),
                    refund_status: Some(RefundStatus::NoRefundRequested),
                    revert_string: None,
                    block_number: 12,
                    log_index: 0,
                    forward: None,
                }],
            },
        };
        let info = DeliveryInfo {
            source_chain: ChainId(2),
            source_transaction_hash: H256::repeat_byte(1),
            source_delivery_sequence_number: 42,
            instruction,
            target_chain_status: TargetChainStatus {
                chain_id: ChainId(4),
                events: vec![DeliveryEvent {
                    status: DeliveryStatus::ForwardRequestSuccess,
                    transaction_hash: Some(H256::repeat_byte(2)),
                    vaa_hash: H256::zero(),
                    source_chain: ChainId(2),
                    source_sequence: 42,
                    gas_used: U256::from(100u64),
                    refund_status: Some(RefundStatus::NoRefundRequested),
                    revert_string: None,
                    block_number: 10,
                    log_index: 1,
                    forward: Some(Box::new(child)),
                }],
            },
        };

        let rendered = stringify(&info);
        assert!(rendered.contains("Forward Request Success"));
        assert!(rendered.contains("Delivery Success"));
        assert!(rendered.contains("seq 42"));
        assert!(rendered.contains("seq 7"));
    }
}
