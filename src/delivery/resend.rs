//! Paid redelivery of a previously requested delivery

use crate::attestation::AttestationFetcher;
use crate::chain::ChainProviderRegistry;
use crate::config::Environment;
use crate::contracts;
use crate::error::{RelayerError, RelayerResult};
use crate::price::{PriceOracle, QuoteOptions};
use crate::tx::Submitter;
use crate::types::{ChainId, VaaKey};
use crate::vaa;

use ethers::signers::LocalWallet;
use ethers::types::{Address, TransactionReceipt, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default gas limit for the redelivery-request transaction itself.
const RESEND_GAS_LIMIT: u64 = 500_000;

/// Optional redelivery parameters
#[derive(Debug, Clone)]
pub struct ResendOptions {
    /// Native value attached to the redelivery transaction. Must cover the
    /// freshly computed quote.
    pub value: U256,
    /// Gas limit for the redelivery-request transaction on the source chain.
    pub gas_limit: Option<U256>,
    /// Override relayer contract address on the source chain.
    pub wormhole_relayer: Option<Address>,
    /// Ceiling for fetching the prior delivery's attestation.
    pub attestation_deadline: Duration,
}

/// Submits a paid redelivery request on the source chain, referencing a
/// prior delivery by its VAA key.
pub struct RedeliverySubmitter {
    registry: Arc<ChainProviderRegistry>,
    oracle: PriceOracle,
    fetcher: AttestationFetcher,
    sender: Arc<dyn Submitter>,
}

impl RedeliverySubmitter {
    pub fn new(
        registry: Arc<ChainProviderRegistry>,
        oracle: PriceOracle,
        fetcher: AttestationFetcher,
        sender: Arc<dyn Submitter>,
    ) -> Self {
        Self {
            registry,
            oracle,
            fetcher,
            sender,
        }
    }

    /// Request redelivery of `vaa_key` with a new budget.
    ///
    /// The price is re-quoted immediately before submission and checked
    /// against `opts.value` locally, so an underfunded request fails with
    /// [`RelayerError::InsufficientFunds`] before anything is broadcast.
    /// The on-chain provider price can still move between this quote and
    /// block inclusion; that residual race is accepted. Returns once the
    /// source-chain transaction has one confirmation; downstream completion
    /// is observed via the status tracker. Never auto-retried: escalating
    /// spend is a caller policy decision.
    #[allow(clippy::too_many_arguments)]
    pub async fn resend(
        &self,
        signer: &LocalWallet,
        source: ChainId,
        target: ChainId,
        environment: Environment,
        vaa_key: VaaKey,
        new_gas_limit: U256,
        new_receiver_value: U256,
        delivery_provider: Address,
        attestation_endpoints: &[String],
        opts: &ResendOptions,
        cancel: &CancellationToken,
    ) -> RelayerResult<TransactionReceipt> {
        if environment != self.registry.environment() {
            return Err(RelayerError::Config(format!(
                "environment {environment} does not match registry environment {}",
                self.registry.environment()
            )));
        }
        let provider = self.registry.provider(source)?;
        self.registry.ensure_registered(target)?;

        // The key must reference a real delivery request: fetch its
        // attestation and require a delivery instruction payload.
        let prior = self
            .fetcher
            .fetch(attestation_endpoints, &vaa_key, opts.attestation_deadline, cancel)
            .await?;
        let prior_vaa = vaa::parse(&prior.bytes)?;
        vaa::decode_delivery_instruction(
            &prior_vaa.payload,
            prior_vaa.emitter_chain,
            prior_vaa.sequence,
        )
        .map_err(|_| {
            RelayerError::DecodeError(format!(
                "attestation for chain {} seq {} is not a delivery request",
                vaa_key.emitter_chain, vaa_key.sequence
            ))
        })?;

        let quote = self
            .oracle
            .quote(
                source,
                target,
                new_gas_limit,
                &QuoteOptions {
                    receiver_value: new_receiver_value,
                    delivery_provider: Some(delivery_provider),
                    wormhole_relayer: opts.wormhole_relayer,
                },
            )
            .await?;
        ensure_covers(quote, opts.value)?;

        let relayer = opts
            .wormhole_relayer
            .unwrap_or_else(|| provider.relayer_address());
        let tx = contracts::resend_call(
            relayer,
            &vaa_key,
            target,
            new_receiver_value,
            new_gas_limit,
            delivery_provider,
            opts.value,
            opts.gas_limit.unwrap_or_else(|| U256::from(RESEND_GAS_LIMIT)),
        );

        let receipt = self.sender.send_and_confirm(source, signer, tx, cancel).await?;
        info!(
            "Redelivery requested for chain {} seq {} in tx {:?}",
            vaa_key.emitter_chain, vaa_key.sequence, receipt.transaction_hash
        );
        Ok(receipt)
    }
}

/// Local funding precondition, checked before any broadcast.
fn ensure_covers(required: U256, supplied: U256) -> RelayerResult<()> {
    if supplied < required {
        return Err(RelayerError::InsufficientFunds { required, supplied });
    }
    Ok(())
}
