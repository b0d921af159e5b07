//! Per-signer nonce serialization
//!
//! Concurrent submissions from the same signing key must not race on nonce
//! assignment. Each (signer, chain) pair owns a lane guarded by an async
//! mutex; the caller holds the lane lock across allocation, signing, and
//! broadcast so two tasks can never sign with the same nonce.

use crate::chain::ChainProvider;
use crate::error::RelayerResult;
use crate::types::ChainId;

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Nonce state for one (signer, chain) pair
#[derive(Default)]
pub struct NonceLane {
    /// Next nonce to use, once known. `None` until first allocation.
    next: Option<u64>,
}

impl NonceLane {
    /// Allocate the next nonce, syncing with the chain's view.
    ///
    /// The on-chain transaction count can run ahead of local state when the
    /// signer is used elsewhere; it never runs behind our own pending
    /// submissions, which we track in `next`.
    pub async fn allocate(
        &mut self,
        provider: &ChainProvider,
        signer: Address,
    ) -> RelayerResult<u64> {
        let on_chain = provider.get_transaction_count(signer).await?;
        let nonce = match self.next {
            Some(local) if local > on_chain => local,
            _ => on_chain,
        };
        debug!(
            "Allocated nonce {} for signer {:?} on chain {}",
            nonce,
            signer,
            provider.chain()
        );
        Ok(nonce)
    }

    /// Record a successfully broadcast nonce
    pub fn record_submitted(&mut self, nonce: u64) {
        self.next = Some(nonce + 1);
    }

    /// Release a nonce whose submission failed, so it can be reused
    pub fn release(&mut self, nonce: u64) {
        if self.next == Some(nonce + 1) {
            self.next = Some(nonce);
        }
    }
}

/// Lanes for all (signer, chain) pairs seen by this process
pub struct NonceManager {
    lanes: DashMap<(Address, ChainId), Arc<Mutex<NonceLane>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self {
            lanes: DashMap::new(),
        }
    }

    /// Get (or create) the lane for a signer on a chain. The caller locks it
    /// for the whole allocate-sign-broadcast sequence.
    pub fn lane(&self, signer: Address, chain: ChainId) -> Arc<Mutex<NonceLane>> {
        self.lanes
            .entry((signer, chain))
            .or_insert_with(|| Arc::new(Mutex::new(NonceLane::default())))
            .clone()
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_rolls_back_only_the_latest_nonce() {
        let mut lane = NonceLane::default();
        lane.record_submitted(5);
        assert_eq!(lane.next, Some(6));

        // releasing an older nonce is a no-op
        lane.release(3);
        assert_eq!(lane.next, Some(6));

        lane.release(5);
        assert_eq!(lane.next, Some(5));
    }

    #[test]
    fn lanes_are_shared_per_signer_and_chain() {
        let manager = NonceManager::new();
        let signer = Address::repeat_byte(0x01);
        let a = manager.lane(signer, ChainId(2));
        let b = manager.lane(signer, ChainId(2));
        let c = manager.lane(signer, ChainId(4));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
