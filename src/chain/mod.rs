//! Chain module - connection handles for reading state/logs and submitting
//! transactions
//!
//! The registry is an explicit configuration object passed into each
//! component at construction. There is no process-wide chain table; tests
//! inject their own registries.

pub mod provider;

pub use provider::ChainProvider;

use crate::config::{Environment, Settings};
use crate::error::{RelayerError, RelayerResult};
use crate::types::ChainId;

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Maps a chain identifier to its connection handle, scoped to one network
/// environment. All handles used together share the environment tag.
pub struct ChainProviderRegistry {
    environment: Environment,
    providers: DashMap<ChainId, Arc<ChainProvider>>,
}

impl ChainProviderRegistry {
    /// Create an empty registry for one environment
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            providers: DashMap::new(),
        }
    }

    /// Build a registry with every chain from loaded settings
    pub fn from_settings(settings: &Settings) -> RelayerResult<Self> {
        let registry = Self::new(settings.environment);
        for (name, chain_config) in &settings.chains {
            info!(
                "Initializing chain {} (ID: {})",
                name, chain_config.chain_id
            );
            registry.register(chain_config.clone())?;
        }
        Ok(registry)
    }

    /// Register a chain handle. Replaces any previous handle for the id.
    pub fn register(&self, config: crate::config::ChainProviderConfig) -> RelayerResult<()> {
        let provider = ChainProvider::connect(&config)?;
        self.providers
            .insert(provider.chain(), Arc::new(provider));
        Ok(())
    }

    /// Get the provider handle for a chain
    pub fn provider(&self, chain: ChainId) -> RelayerResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain)
            .map(|p| p.clone())
            .ok_or(RelayerError::UnknownChain { chain })
    }

    /// Fail unless the chain is registered
    pub fn ensure_registered(&self, chain: ChainId) -> RelayerResult<()> {
        if self.providers.contains_key(&chain) {
            Ok(())
        } else {
            Err(RelayerError::UnknownChain { chain })
        }
    }

    /// Environment this registry is scoped to
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// All registered chain IDs
    pub fn chains(&self) -> Vec<ChainId> {
        self.providers.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainProviderConfig;

    fn test_chain_config(chain_id: u16) -> ChainProviderConfig {
        ChainProviderConfig {
            chain_id,
            evm_chain_id: 1337,
            rpc_urls: vec!["http://localhost:8545".to_string()],
            relayer_address: "0x53855d4b64E9A3CF59A84bc768adA716B5536BC5".to_string(),
            core_bridge_address: "0xC89Ce4735882C9F0f0FE26686c53074E09B0D550".to_string(),
            confirmation_blocks: 1,
        }
    }

    #[test]
    fn unregistered_chain_is_unknown() {
        let registry = ChainProviderRegistry::new(Environment::Devnet);
        registry.register(test_chain_config(2)).unwrap();

        assert!(registry.provider(ChainId(2)).is_ok());
        assert!(matches!(
            registry.provider(ChainId(4)),
            Err(RelayerError::UnknownChain { chain: ChainId(4) })
        ));
        assert!(registry.ensure_registered(ChainId(4)).is_err());
    }

    #[test]
    fn invalid_contract_address_is_a_config_error() {
        let registry = ChainProviderRegistry::new(Environment::Devnet);
        let mut config = test_chain_config(2);
        config.relayer_address = "not-an-address".to_string();
        assert!(matches!(
            registry.register(config),
            Err(RelayerError::Config(_))
        ));
    }
}
