//! Delivery price quoting against the source chain's delivery provider
//!
//! A quote is a point-in-time estimate, not a reservation: the provider's
//! pricing oracle can update between calls.

use crate::chain::ChainProviderRegistry;
use crate::contracts;
use crate::error::{RelayerError, RelayerResult};
use crate::types::ChainId;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use tracing::debug;

/// One read-only contract call against one chain. Production reads go
/// through the registry's provider handles; tests answer from a pricing
/// table.
#[async_trait]
pub trait ContractReader: Send + Sync {
    async fn read(&self, chain: ChainId, tx: &TypedTransaction) -> RelayerResult<Bytes>;
}

/// Registry-backed reader used outside of tests.
pub struct RegistryReader {
    registry: Arc<ChainProviderRegistry>,
}

impl RegistryReader {
    pub fn new(registry: Arc<ChainProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ContractReader for RegistryReader {
    async fn read(&self, chain: ChainId, tx: &TypedTransaction) -> RelayerResult<Bytes> {
        self.registry.provider(chain)?.call(tx).await
    }
}

/// Optional quote parameters
#[derive(Debug, Clone, Default)]
pub struct QuoteOptions {
    /// Additional native-currency credit to deliver to the receiver,
    /// denominated in target-chain currency. Defaults to zero.
    pub receiver_value: U256,
    /// Override delivery provider; defaults to the source chain's default
    /// provider as reported by the relayer contract.
    pub delivery_provider: Option<Address>,
    /// Override relayer contract address on the source chain.
    pub wormhole_relayer: Option<Address>,
}

/// Read-only fee oracle: converts a target-chain execution budget into
/// source-chain native currency.
pub struct PriceOracle {
    registry: Arc<ChainProviderRegistry>,
    reader: Arc<dyn ContractReader>,
}

impl PriceOracle {
    pub fn new(registry: Arc<ChainProviderRegistry>) -> Self {
        let reader = Arc::new(RegistryReader::new(registry.clone()));
        Self { registry, reader }
    }

    /// Use a custom call layer (tests inject pricing tables here)
    pub fn with_reader(
        registry: Arc<ChainProviderRegistry>,
        reader: Arc<dyn ContractReader>,
    ) -> Self {
        Self { registry, reader }
    }

    /// Quote the source-chain fee to deliver `gas_limit` of execution (plus
    /// `opts.receiver_value`) on `target`. Returned in the source chain's
    /// smallest native unit. Implemented entirely with `eth_call`.
    pub async fn quote(
        &self,
        source: ChainId,
        target: ChainId,
        gas_limit: U256,
        opts: &QuoteOptions,
    ) -> RelayerResult<U256> {
        let provider = self.registry.provider(source)?;
        self.registry.ensure_registered(target)?;

        if gas_limit.is_zero() {
            return Err(RelayerError::InsufficientGasLimit {
                reason: "gas limit must be positive".to_string(),
            });
        }

        let relayer = opts
            .wormhole_relayer
            .unwrap_or_else(|| provider.relayer_address());

        let delivery_provider = match opts.delivery_provider {
            Some(address) => address,
            None => {
                let ret = self
                    .reader
                    .read(source, &contracts::default_delivery_provider_call(relayer))
                    .await?;
                contracts::decode_address_return(&ret)?
            }
        };

        let quote_ret = self
            .reader
            .read(
                source,
                &contracts::quote_delivery_price_call(
                    relayer,
                    target,
                    opts.receiver_value,
                    gas_limit,
                    delivery_provider,
                ),
            )
            .await
            .map_err(classify_quote_revert)?;
        let (native_quote, _refund_per_gas_unused) = contracts::decode_quote_return(&quote_ret)?;

        let fee_ret = self
            .reader
            .read(
                source,
                &contracts::message_fee_call(provider.core_bridge_address()),
            )
            .await?;
        let message_fee = contracts::decode_uint_return(&fee_ret)?;

        let total = native_quote
            .checked_add(message_fee)
            .ok_or_else(|| RelayerError::DecodeError("quote overflow".to_string()))?;
        debug!(
            "Quote {} -> {}: gas {} + receiver value {} = {}",
            source, target, gas_limit, opts.receiver_value, total
        );
        Ok(total)
    }
}

/// The provider contract rejects budgets below its floor with a revert;
/// report that as the dedicated gas-limit error rather than a generic revert.
fn classify_quote_revert(err: RelayerError) -> RelayerError {
    match err {
        RelayerError::DeliveryReverted { reason } => {
            let lowered = reason.to_ascii_lowercase();
            if lowered.contains("gas") || lowered.contains("budget") {
                RelayerError::InsufficientGasLimit { reason }
            } else {
                RelayerError::DeliveryReverted { reason }
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainProviderConfig, Environment};
    use ethers::abi::{self, Token};
    use ethers::utils::id;

    fn test_registry() -> Arc<ChainProviderRegistry> {
        let registry = ChainProviderRegistry::new(Environment::Devnet);
        for chain_id in [2u16, 4] {
            registry
                .register(ChainProviderConfig {
                    chain_id,
                    evm_chain_id: 1337,
                    rpc_urls: vec!["http://localhost:8545".to_string()],
                    relayer_address: "0x53855d4b64E9A3CF59A84bc768adA716B5536BC5".to_string(),
                    core_bridge_address: "0xC89Ce4735882C9F0f0FE26686c53074E09B0D550".to_string(),
                    confirmation_blocks: 1,
                })
                .unwrap();
        }
        Arc::new(registry)
    }

    /// Answers contract reads from a linear per-gas pricing curve.
    struct PricingTable {
        base: u64,
        per_gas: u64,
        message_fee: u64,
    }

    #[async_trait]
    impl ContractReader for PricingTable {
        async fn read(&self, _chain: ChainId, tx: &TypedTransaction) -> RelayerResult<Bytes> {
            let data = tx.data().cloned().unwrap_or_default();
            if data.len() < 4 {
                return Err(RelayerError::DecodeError("empty calldata".to_string()));
            }
            if &data[..4] == id("getDefaultDeliveryProvider()").as_slice() {
                return Ok(abi::encode(&[Token::Address(Address::repeat_byte(0x02))]).into());
            }
            if &data[..4] == id("quoteEVMDeliveryPrice(uint16,uint256,uint256,address)").as_slice()
            {
                let gas_limit = U256::from_big_endian(&data[68..100]);
                let native = U256::from(self.base) + gas_limit * U256::from(self.per_gas);
                return Ok(abi::encode(&[
                    Token::Uint(native),
                    Token::Uint(U256::from(self.per_gas)),
                ])
                .into());
            }
            if &data[..4] == id("messageFee()").as_slice() {
                return Ok(abi::encode(&[Token::Uint(U256::from(self.message_fee))]).into());
            }
            Err(RelayerError::DecodeError("unexpected call".to_string()))
        }
    }

    #[tokio::test]
    async fn quote_is_positive_and_monotonic_in_gas_limit() {
        let oracle = PriceOracle::with_reader(
            test_registry(),
            Arc::new(PricingTable {
                base: 10_000,
                per_gas: 3,
                message_fee: 100,
            }),
        );
        let opts = QuoteOptions::default();

        let quote = oracle
            .quote(ChainId(2), ChainId(4), U256::from(500_000u64), &opts)
            .await
            .unwrap();
        let doubled = oracle
            .quote(ChainId(2), ChainId(4), U256::from(1_000_000u64), &opts)
            .await
            .unwrap();

        assert!(quote > U256::zero());
        assert!(doubled >= quote);
    }

    #[tokio::test]
    async fn quote_rejects_unregistered_target() {
        let oracle = PriceOracle::with_reader(
            test_registry(),
            Arc::new(PricingTable {
                base: 1,
                per_gas: 1,
                message_fee: 0,
            }),
        );
        let err = oracle
            .quote(
                ChainId(2),
                ChainId(99),
                U256::from(500_000u64),
                &QuoteOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::UnknownChain { .. }));
    }

    #[test]
    fn gas_floor_reverts_are_classified() {
        let err = classify_quote_revert(RelayerError::DeliveryReverted {
            reason: "ExceedsMaximumBudget".to_string(),
        });
        assert!(matches!(err, RelayerError::InsufficientGasLimit { .. }));

        let err = classify_quote_revert(RelayerError::DeliveryReverted {
            reason: "SomethingElse".to_string(),
        });
        assert!(matches!(err, RelayerError::DeliveryReverted { .. }));
    }
}
