//! Configuration for the delivery relayer
//!
//! All components take explicit configuration objects at construction; there
//! is no process-wide registry. Settings can be loaded from TOML files with
//! environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;

/// Network environment tag. All chain handles used together must share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Mainnet,
    Testnet,
    Devnet,
}

impl Environment {
    /// Default guardian REST endpoints for this environment, ordered by
    /// preference. Callers may always supply their own list.
    pub fn default_guardian_endpoints(&self) -> Vec<String> {
        match self {
            Environment::Mainnet => vec![
                "https://wormhole-v2-mainnet-api.certus.one".to_string(),
                "https://wormhole-v2-mainnet-api.mcf.rocks".to_string(),
                "https://wormhole-v2-mainnet-api.chainlayer.network".to_string(),
            ],
            Environment::Testnet => {
                vec!["https://wormhole-v2-testnet-api.certus.one".to_string()]
            }
            Environment::Devnet => vec!["http://localhost:7071".to_string()],
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Environment::Mainnet => "mainnet",
            Environment::Testnet => "testnet",
            Environment::Devnet => "devnet",
        };
        f.write_str(s)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub environment: Environment,
    #[serde(default)]
    pub relayer: RelayerConfig,
    pub chains: HashMap<String, ChainProviderConfig>,
}

/// Tunables for polling, scanning, and backoff. Nothing is hardcoded at call
/// sites; every bound lives here so tests and operators can adjust them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// How many recent target-chain blocks the status tracker scans for
    /// delivery receipts. Bounds the cost of one `get_delivery_info` call.
    pub block_scan_range: u64,
    /// Per-endpoint timeout for one attestation fetch attempt.
    pub attestation_attempt_timeout_ms: u64,
    /// Base delay between full passes over the attestation endpoint list.
    pub backoff_base_ms: u64,
    /// Ceiling for the exponential backoff delay.
    pub backoff_max_ms: u64,
    /// Initial interval between receipt polls after a submission.
    pub confirmation_poll_interval_ms: u64,
    /// Maximum receipt polls before a submission wait times out.
    pub confirmation_poll_attempts: u32,
    /// Maximum depth when resolving chained forward deliveries.
    pub max_forward_depth: u32,
    /// Age (seconds, by target-chain block time) after which a request with
    /// no receipt is reported as thrown away rather than pending.
    pub thrown_away_after_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            block_scan_range: 2048,
            attestation_attempt_timeout_ms: 5_000,
            backoff_base_ms: 250,
            backoff_max_ms: 8_000,
            confirmation_poll_interval_ms: 1_000,
            confirmation_poll_attempts: 60,
            max_forward_depth: 4,
            thrown_away_after_secs: 7_200,
        }
    }
}

/// Connection and contract addresses for one chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainProviderConfig {
    /// Wormhole-style chain id (u16, unique per environment).
    pub chain_id: u16,
    /// Native EVM chain id, used for transaction signing.
    pub evm_chain_id: u64,
    /// HTTP RPC endpoints, tried in order with failover.
    pub rpc_urls: Vec<String>,
    /// Relayer contract address on this chain.
    pub relayer_address: String,
    /// Core bridge contract address on this chain.
    pub core_bridge_address: String,
    /// Blocks required before an emitted message is considered final.
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
}

fn default_confirmation_blocks() -> u64 {
    1
}

impl Settings {
    /// Load settings from a TOML file with `${ENV_VAR}` substitution.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("At least one chain must be configured");
        }

        for (name, chain) in &self.chains {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.relayer_address.is_empty() {
                anyhow::bail!("Chain {} has no relayer contract address", name);
            }
            if chain.core_bridge_address.is_empty() {
                anyhow::bail!("Chain {} has no core bridge address", name);
            }
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("RELAYER_TEST_VAR", "test_value");
        let input = "url = \"https://rpc.example.com/${RELAYER_TEST_VAR}\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://rpc.example.com/test_value\"");
    }

    #[test]
    fn settings_parse_and_validate() {
        let toml_str = r#"
            environment = "devnet"

            [relayer]
            block_scan_range = 512

            [chains.ethereum]
            chain_id = 2
            evm_chain_id = 1337
            rpc_urls = ["http://localhost:8545"]
            relayer_address = "0x53855d4b64E9A3CF59A84bc768adA716B5536BC5"
            core_bridge_address = "0xC89Ce4735882C9F0f0FE26686c53074E09B0D550"
        "#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.environment, Environment::Devnet);
        assert_eq!(settings.relayer.block_scan_range, 512);
        // untouched knobs keep their defaults
        assert_eq!(settings.relayer.max_forward_depth, 4);
        assert_eq!(settings.chains["ethereum"].confirmation_blocks, 1);
    }

    #[test]
    fn settings_reject_missing_rpc_urls() {
        let toml_str = r#"
            environment = "devnet"

            [chains.bsc]
            chain_id = 4
            evm_chain_id = 1397
            rpc_urls = []
            relayer_address = "0x53855d4b64E9A3CF59A84bc768adA716B5536BC5"
            core_bridge_address = "0xC89Ce4735882C9F0f0FE26686c53074E09B0D550"
        "#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert!(settings.validate().is_err());
    }
}
