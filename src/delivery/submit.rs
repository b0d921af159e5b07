//! Manual delivery: present a signed attestation to the target chain

use crate::attestation::AttestationFetcher;
use crate::chain::ChainProviderRegistry;
use crate::config::Environment;
use crate::contracts;
use crate::error::{RelayerError, RelayerResult};
use crate::tx::Submitter;
use crate::vaa;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{TransactionReceipt, U256};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Gas headroom on top of the instruction's receiver budget, covering the
/// relayer contract's own dispatch and refund bookkeeping.
const DELIVERY_GAS_OVERHEAD: u64 = 500_000;

/// Submits the on-chain call that presents a signed attestation (plus any
/// additional attestations it references) to the target chain's receiver
/// contract.
pub struct DeliverySubmitter {
    registry: Arc<ChainProviderRegistry>,
    fetcher: AttestationFetcher,
    sender: Arc<dyn Submitter>,
    /// Ceiling for fetching the additional attestations a delivery names.
    attestation_deadline: Duration,
}

impl DeliverySubmitter {
    pub fn new(
        registry: Arc<ChainProviderRegistry>,
        fetcher: AttestationFetcher,
        sender: Arc<dyn Submitter>,
        attestation_deadline: Duration,
    ) -> Self {
        Self {
            registry,
            fetcher,
            sender,
            attestation_deadline,
        }
    }

    /// Deliver an attestation. At-most-one-attempt: a revert surfaces as
    /// [`RelayerError::DeliveryReverted`] and redelivery is the caller's
    /// decision.
    pub async fn deliver(
        &self,
        attestation: &[u8],
        signer: &LocalWallet,
        guardian_rpc: &str,
        environment: Environment,
        cancel: &CancellationToken,
    ) -> RelayerResult<TransactionReceipt> {
        if environment != self.registry.environment() {
            return Err(RelayerError::Config(format!(
                "environment {environment} does not match registry environment {}",
                self.registry.environment()
            )));
        }

        let parsed = vaa::parse(attestation)?;
        let instruction = vaa::decode_delivery_instruction(
            &parsed.payload,
            parsed.emitter_chain,
            parsed.sequence,
        )?;
        let target = instruction.target_chain;
        let provider = self.registry.provider(target)?;

        debug!(
            "Delivering VAA {} (chain {} seq {}) to chain {} with {} additional attestations",
            parsed.hash,
            parsed.emitter_chain,
            parsed.sequence,
            target,
            instruction.vaa_keys.len()
        );

        let endpoints = vec![guardian_rpc.to_string()];
        let additional = try_join_all(instruction.vaa_keys.iter().map(|key| {
            let endpoints = endpoints.clone();
            async move {
                self.fetcher
                    .fetch(&endpoints, key, self.attestation_deadline, cancel)
                    .await
                    .map(|a| a.bytes)
            }
        }))
        .await?;

        // The receiver is credited with both receiver value components; the
        // transaction must carry them.
        let value = instruction
            .requested_receiver_value
            .checked_add(instruction.extra_receiver_value)
            .ok_or_else(|| RelayerError::DecodeError("receiver value overflow".to_string()))?;
        let gas_limit = instruction
            .gas_limit
            .checked_add(U256::from(DELIVERY_GAS_OVERHEAD))
            .ok_or_else(|| RelayerError::DecodeError("gas limit overflow".to_string()))?;

        let tx = contracts::deliver_call(
            provider.relayer_address(),
            additional,
            attestation.to_vec(),
            signer.address(),
            value,
            gas_limit,
        );

        let receipt = self.sender.send_and_confirm(target, signer, tx, cancel).await?;
        info!(
            "Delivered VAA {} on chain {} in tx {:?}",
            parsed.hash, target, receipt.transaction_hash
        );
        Ok(receipt)
    }
}
