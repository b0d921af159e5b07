//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainProviderConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::types::ChainId;

use ethers::prelude::Middleware;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Block, Bytes, Filter, Log, TransactionReceipt, H256, U256};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider RPC wrapper for one chain
///
/// Read-only calls are safe to interleave from any number of tasks; the
/// provider itself holds no per-operation state beyond the failover cursor.
pub struct ChainProvider {
    chain: ChainId,
    evm_chain_id: u64,
    relayer_address: Address,
    core_bridge_address: Address,
    confirmation_blocks: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a provider from a chain configuration
    pub fn connect(config: &ChainProviderConfig) -> RelayerResult<Self> {
        let chain = ChainId(config.chain_id);
        let relayer_address = parse_address(&config.relayer_address, "relayer_address")?;
        let core_bridge_address =
            parse_address(&config.core_bridge_address, "core_bridge_address")?;

        let mut http_providers = Vec::new();
        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", chain, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::Config(format!(
                "chain {chain} has no valid RPC providers"
            )));
        }

        Ok(Self {
            chain,
            evm_chain_id: config.evm_chain_id,
            relayer_address,
            core_bridge_address,
            confirmation_blocks: config.confirmation_blocks,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain, next);
    }

    fn unreachable(&self, message: impl Into<String>) -> RelayerError {
        RelayerError::ProviderUnreachable {
            chain: self.chain,
            message: message.into(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!("Failed to get block number from chain {}: {}", self.chain, e);
                    self.failover();
                }
            }
        }
        Err(self.unreachable("all providers failed"))
    }

    /// Get a block header (used for its timestamp)
    pub async fn get_block(&self, block_number: u64) -> RelayerResult<Option<Block<H256>>> {
        self.http()
            .get_block(block_number)
            .await
            .map_err(|e| self.unreachable(e.to_string()))
    }

    /// Get transaction receipt
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> RelayerResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.unreachable(e.to_string()))
    }

    /// Get logs for a filter with failover
    pub async fn get_logs(&self, filter: &Filter) -> RelayerResult<Vec<Log>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs from chain {}: {}", self.chain, e);
                    self.failover();
                }
            }
        }
        Err(self.unreachable("all providers failed to get logs"))
    }

    /// Read-only contract call. Execution reverts are reported as
    /// [`RelayerError::DeliveryReverted`] with the node's reason string;
    /// transport failures rotate through the provider list first.
    pub async fn call(&self, tx: &TypedTransaction) -> RelayerResult<Bytes> {
        for _ in 0..self.http_providers.len() {
            match self.http().call(tx, None).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    let message = e.to_string();
                    if let Some(reason) = revert_reason(&message) {
                        return Err(RelayerError::DeliveryReverted { reason });
                    }
                    warn!("eth_call failed on chain {}: {}", self.chain, message);
                    self.failover();
                }
            }
        }
        Err(self.unreachable("all providers failed eth_call"))
    }

    /// Broadcast a signed transaction, returning its hash
    pub async fn send_raw_transaction(&self, raw: Bytes) -> RelayerResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.unreachable(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    /// On-chain transaction count (next nonce) for an account
    pub async fn get_transaction_count(&self, address: Address) -> RelayerResult<u64> {
        self.http()
            .get_transaction_count(address, None)
            .await
            .map(|n| n.as_u64())
            .map_err(|e| self.unreachable(e.to_string()))
    }

    /// Current node gas price (legacy). Gas-price strategy beyond this is a
    /// caller concern.
    pub async fn get_gas_price(&self) -> RelayerResult<U256> {
        self.http()
            .get_gas_price()
            .await
            .map_err(|e| self.unreachable(e.to_string()))
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Native EVM chain id for transaction signing
    pub fn evm_chain_id(&self) -> u64 {
        self.evm_chain_id
    }

    /// Relayer contract address on this chain
    pub fn relayer_address(&self) -> Address {
        self.relayer_address
    }

    /// Core bridge contract address on this chain
    pub fn core_bridge_address(&self) -> Address {
        self.core_bridge_address
    }

    /// Blocks required before an emitted message is considered final
    pub fn confirmation_blocks(&self) -> u64 {
        self.confirmation_blocks
    }
}

fn parse_address(s: &str, field: &str) -> RelayerResult<Address> {
    Address::from_str(s).map_err(|e| RelayerError::Config(format!("invalid {field} {s:?}: {e}")))
}

/// Extract a revert reason from a JSON-RPC error string, if the error is an
/// execution revert rather than a transport failure.
pub fn revert_reason(message: &str) -> Option<String> {
    let lowered = message.to_ascii_lowercase();
    let pos = lowered.find("execution reverted").or_else(|| {
        lowered
            .find("revert")
            .filter(|_| lowered.contains("vm exception") || lowered.contains("reverted"))
    })?;
    let tail = message[pos..].trim_start_matches("execution reverted");
    let tail = tail.trim_start_matches(':').trim();
    if tail.is_empty() {
        Some("execution reverted".to_string())
    } else {
        Some(tail.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_reason_extracts_message() {
        assert_eq!(
            revert_reason("execution reverted: InsufficientValue").as_deref(),
            Some("InsufficientValue")
        );
        assert_eq!(
            revert_reason("execution reverted").as_deref(),
            Some("execution reverted")
        );
        assert!(revert_reason("connection refused").is_none());
    }
}
