//! Signed transaction submission with a bounded confirmation wait

use crate::chain::{provider::revert_reason, ChainProviderRegistry};
use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::tx::NonceManager;
use crate::types::ChainId;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{TransactionReceipt, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Submission layer: one signed transaction in, its first confirmation out.
/// Tests substitute an implementation that records attempts instead of
/// touching a chain.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn send_and_confirm(
        &self,
        chain: ChainId,
        signer: &LocalWallet,
        tx: TypedTransaction,
        cancel: &CancellationToken,
    ) -> RelayerResult<TransactionReceipt>;
}

/// Submits one signed transaction and waits for its first confirmation.
///
/// There is no retry here: delivery and redelivery are at-most-one-attempt
/// operations, and escalation is a caller policy decision.
pub struct TransactionSender {
    registry: Arc<ChainProviderRegistry>,
    nonces: NonceManager,
    config: RelayerConfig,
}

impl TransactionSender {
    pub fn new(registry: Arc<ChainProviderRegistry>, config: RelayerConfig) -> Self {
        Self {
            registry,
            nonces: NonceManager::new(),
            config,
        }
    }

    /// Poll for the receipt with exponential backoff, bounded by the
    /// configured attempt count.
    async fn wait_for_receipt(
        &self,
        chain: ChainId,
        tx_hash: ethers::types::H256,
        cancel: &CancellationToken,
    ) -> RelayerResult<TransactionReceipt> {
        let provider = self.registry.provider(chain)?;
        let mut interval = Duration::from_millis(self.config.confirmation_poll_interval_ms);
        let interval_cap = interval * 8;

        for attempt in 0..self.config.confirmation_poll_attempts {
            match provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status == Some(U64::zero()) {
                        return Err(RelayerError::DeliveryReverted {
                            reason: format!("transaction {tx_hash:?} reverted on-chain"),
                        });
                    }
                    debug!(
                        "Transaction {:?} confirmed on chain {} (attempt {})",
                        tx_hash, chain, attempt
                    );
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => warn!("Receipt poll failed on chain {}: {}", chain, e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RelayerError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
            interval = (interval * 2).min(interval_cap);
        }

        Err(RelayerError::Timeout {
            operation: format!("confirmation of {tx_hash:?} on chain {chain}"),
        })
    }
}

#[async_trait]
impl Submitter for TransactionSender {
    /// Sign `tx`, broadcast it, and wait until it is accepted into a block.
    ///
    /// The preflight `eth_call` surfaces reverts with a reason string before
    /// any gas is spent; a transaction that still reverts on-chain is
    /// reported as [`RelayerError::DeliveryReverted`] without a reason.
    async fn send_and_confirm(
        &self,
        chain: ChainId,
        signer: &LocalWallet,
        mut tx: TypedTransaction,
        cancel: &CancellationToken,
    ) -> RelayerResult<TransactionReceipt> {
        let provider = self.registry.provider(chain)?;
        let wallet = signer.clone().with_chain_id(provider.evm_chain_id());

        tx.set_from(wallet.address());
        tx.set_chain_id(provider.evm_chain_id());
        if tx.gas_price().is_none() {
            let gas_price = provider.get_gas_price().await?;
            tx.set_gas_price(gas_price);
        }

        // Preflight: a read-only execution of the same call.
        provider.call(&tx).await.map(|_| ())?;

        let lane = self.nonces.lane(wallet.address(), chain);
        let tx_hash = {
            let mut lane = lane.lock().await;
            let nonce = lane.allocate(&provider, wallet.address()).await?;
            tx.set_nonce(nonce);

            let signature = wallet
                .sign_transaction(&tx)
                .await
                .map_err(|e| RelayerError::Signer(e.to_string()))?;
            let raw = tx.rlp_signed(&signature);

            match provider.send_raw_transaction(raw).await {
                Ok(hash) => {
                    lane.record_submitted(nonce);
                    hash
                }
                Err(e) => {
                    lane.release(nonce);
                    let message = e.to_string();
                    if message.contains("nonce too low") {
                        let lookup = provider.get_transaction_count(wallet.address()).await;
                        return Err(nonce_conflict(chain, nonce, lookup));
                    }
                    if let Some(reason) = revert_reason(&message) {
                        return Err(RelayerError::DeliveryReverted { reason });
                    }
                    return Err(e);
                }
            }
        };

        info!("Transaction sent on chain {}: {:?}", chain, tx_hash);
        self.wait_for_receipt(chain, tx_hash, cancel).await
    }
}

/// Build the nonce-conflict report from a follow-up transaction-count read.
/// If that read itself fails, surface the read failure instead of fabricating
/// an on-chain value.
fn nonce_conflict(chain: ChainId, allocated: u64, lookup: RelayerResult<u64>) -> RelayerError {
    match lookup {
        Ok(on_chain) => RelayerError::NonceConflict {
            chain,
            allocated,
            on_chain,
        },
        Err(read_err) => read_err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_conflict_reports_the_chain_view_when_readable() {
        let err = nonce_conflict(ChainId(2), 9, Ok(11));
        match err {
            RelayerError::NonceConflict {
                chain,
                allocated,
                on_chain,
            } => {
                assert_eq!(chain, ChainId(2));
                assert_eq!(allocated, 9);
                assert_eq!(on_chain, 11);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn nonce_conflict_surfaces_a_failed_count_read() {
        let err = nonce_conflict(
            ChainId(2),
            9,
            Err(RelayerError::ProviderUnreachable {
                chain: ChainId(2),
                message: "connection refused".to_string(),
            }),
        );
        assert!(matches!(err, RelayerError::ProviderUnreachable { .. }));
    }
}
