//! Signed attestation retrieval from guardian oracle endpoints
//!
//! Endpoints are tried in caller-supplied order; a full pass over the list
//! is followed by bounded exponential backoff until a caller-supplied
//! wall-clock deadline. There is no default deadline: guardian signing
//! latency depends on source chain finality, so callers must pick a ceiling
//! that matches the chain they are waiting on.

use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::types::VaaKey;
use crate::vaa;

use async_trait::async_trait;
use ethers::types::H256;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Raw attestation bytes plus the digest used to correlate delivery receipts.
#[derive(Debug, Clone)]
pub struct SignedAttestation {
    pub bytes: Vec<u8>,
    pub vaa_hash: H256,
}

/// One attempt against one oracle endpoint. `Ok(None)` means the attestation
/// is not signed yet (keep waiting); `Err` means the endpoint itself failed.
#[async_trait]
pub trait AttestationTransport: Send + Sync {
    async fn get_signed_vaa(
        &self,
        endpoint: &str,
        key: &VaaKey,
    ) -> RelayerResult<Option<Vec<u8>>>;
}

#[derive(Deserialize)]
struct SignedVaaResponse {
    #[serde(rename = "vaaBytes")]
    vaa_bytes: String,
}

/// Guardian REST transport:
/// `GET {endpoint}/v1/signed_vaa/{chain}/{emitter}/{sequence}`
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttestationTransport for HttpTransport {
    async fn get_signed_vaa(
        &self,
        endpoint: &str,
        key: &VaaKey,
    ) -> RelayerResult<Option<Vec<u8>>> {
        let url = format!(
            "{}/v1/signed_vaa/{}/{}/{}",
            endpoint.trim_end_matches('/'),
            key.emitter_chain,
            key.emitter_hex(),
            key.sequence
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            RelayerError::ProviderUnreachable {
                chain: key.emitter_chain,
                message: format!("guardian endpoint {endpoint}: {e}"),
            }
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RelayerError::ProviderUnreachable {
                chain: key.emitter_chain,
                message: format!("guardian endpoint {endpoint}: HTTP {}", response.status()),
            });
        }

        let body: SignedVaaResponse = response.json().await.map_err(|e| {
            RelayerError::AttestationMalformed(format!("guardian response: {e}"))
        })?;

        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.vaa_bytes)
            .map_err(|e| RelayerError::AttestationMalformed(format!("vaaBytes base64: {e}")))?;
        Ok(Some(bytes))
    }
}

/// Retrieves signed attestations, retrying across endpoints until a deadline.
pub struct AttestationFetcher {
    config: RelayerConfig,
    transport: Arc<dyn AttestationTransport>,
}

impl AttestationFetcher {
    pub fn new(config: RelayerConfig) -> Self {
        Self {
            config,
            transport: Arc::new(HttpTransport::new()),
        }
    }

    /// Use a custom transport (tests inject mock endpoints here)
    pub fn with_transport(config: RelayerConfig, transport: Arc<dyn AttestationTransport>) -> Self {
        Self { config, transport }
    }

    /// Fetch the signed attestation for `key`.
    ///
    /// Walks `endpoints` in order with a per-attempt timeout and no delay
    /// between endpoints; after exhausting the list, sleeps with exponential
    /// backoff (bounded by config) and retries until `deadline` has elapsed.
    /// Cancellation aborts between attempts and mid-sleep.
    pub async fn fetch(
        &self,
        endpoints: &[String],
        key: &VaaKey,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> RelayerResult<SignedAttestation> {
        if endpoints.is_empty() {
            return Err(RelayerError::Config(
                "no attestation endpoints supplied".to_string(),
            ));
        }

        let started = Instant::now();
        let attempt_timeout = Duration::from_millis(self.config.attestation_attempt_timeout_ms);
        let mut backoff = Duration::from_millis(self.config.backoff_base_ms);
        let backoff_cap = Duration::from_millis(self.config.backoff_max_ms);

        loop {
            for endpoint in endpoints {
                if cancel.is_cancelled() {
                    return Err(RelayerError::Cancelled);
                }

                match timeout(attempt_timeout, self.transport.get_signed_vaa(endpoint, key)).await
                {
                    Ok(Ok(Some(bytes))) => {
                        let parsed = vaa::parse(&bytes)?;
                        debug!(
                            "Fetched attestation for chain {} seq {} from {}",
                            key.emitter_chain, key.sequence, endpoint
                        );
                        return Ok(SignedAttestation {
                            bytes,
                            vaa_hash: parsed.hash,
                        });
                    }
                    Ok(Ok(None)) => {
                        debug!(
                            "Attestation for chain {} seq {} not yet available at {}",
                            key.emitter_chain, key.sequence, endpoint
                        );
                    }
                    Ok(Err(e)) => {
                        warn!("Attestation endpoint {} failed: {}", endpoint, e);
                    }
                    Err(_) => {
                        warn!(
                            "Attestation endpoint {} timed out after {:?}",
                            endpoint, attempt_timeout
                        );
                    }
                }
            }

            if started.elapsed() >= deadline {
                return Err(RelayerError::AttestationUnavailable {
                    elapsed: started.elapsed(),
                });
            }

            let remaining = deadline.saturating_sub(started.elapsed());
            let sleep = backoff.min(remaining);
            tokio::select! {
                _ = cancel.cancelled() => return Err(RelayerError::Cancelled),
                _ = tokio::time::sleep(sleep) => {}
            }
            backoff = (backoff * 2).min(backoff_cap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{pad_emitter, ChainId};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport that reports not-found a fixed number of times before
    /// returning the attestation.
    struct FlakyTransport {
        not_found_first: u32,
        attempts: AtomicU32,
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl AttestationTransport for FlakyTransport {
        async fn get_signed_vaa(
            &self,
            _endpoint: &str,
            _key: &VaaKey,
        ) -> RelayerResult<Option<Vec<u8>>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.not_found_first {
                Ok(None)
            } else {
                Ok(Some(self.bytes.clone()))
            }
        }
    }

    fn fast_config() -> RelayerConfig {
        RelayerConfig {
            attestation_attempt_timeout_ms: 100,
            backoff_base_ms: 1,
            backoff_max_ms: 4,
            ..RelayerConfig::default()
        }
    }

    fn test_key() -> VaaKey {
        let native = hex::decode("53855d4b64e9a3cf59a84bc768ada716b5536bc5").unwrap();
        VaaKey::new(ChainId(2), pad_emitter(&native).unwrap(), 42)
    }

    #[tokio::test]
    async fn succeeds_after_three_not_found_responses() {
        let key = test_key();
        let vaa_bytes = crate::vaa::encode::vaa(key.emitter_chain, key.emitter_address, 42, b"p");
        let transport = Arc::new(FlakyTransport {
            not_found_first: 3,
            attempts: AtomicU32::new(0),
            bytes: vaa_bytes.clone(),
        });
        let fetcher = AttestationFetcher::with_transport(fast_config(), transport.clone());

        let attestation = fetcher
            .fetch(
                &["http://guardian.test".to_string()],
                &key,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(attestation.bytes, vaa_bytes);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn deadline_exhaustion_is_attestation_unavailable() {
        let transport = Arc::new(FlakyTransport {
            not_found_first: u32::MAX,
            attempts: AtomicU32::new(0),
            bytes: Vec::new(),
        });
        let fetcher = AttestationFetcher::with_transport(fast_config(), transport);

        let err = fetcher
            .fetch(
                &["http://guardian.test".to_string()],
                &test_key(),
                Duration::from_millis(20),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RelayerError::AttestationUnavailable { .. }));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let transport = Arc::new(FlakyTransport {
            not_found_first: u32::MAX,
            attempts: AtomicU32::new(0),
            bytes: Vec::new(),
        });
        let fetcher = AttestationFetcher::with_transport(fast_config(), transport);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher
            .fetch(
                &["http://guardian.test".to_string()],
                &test_key(),
                Duration::from_secs(60),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RelayerError::Cancelled));
    }

    #[tokio::test]
    async fn malformed_bytes_are_rejected() {
        let transport = Arc::new(FlakyTransport {
            not_found_first: 0,
            attempts: AtomicU32::new(0),
            bytes: vec![1, 2, 3],
        });
        let fetcher = AttestationFetcher::with_transport(fast_config(), transport);

        let err = fetcher
            .fetch(
                &["http://guardian.test".to_string()],
                &test_key(),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RelayerError::AttestationMalformed(_)));
    }

    #[tokio::test]
    async fn empty_endpoint_list_is_a_config_error() {
        let fetcher = AttestationFetcher::new(fast_config());
        let err = fetcher
            .fetch(
                &[],
                &test_key(),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::Config(_)));
    }
}
