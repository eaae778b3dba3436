//! Per-signer nonce assignment
//!
//! Counters live in memory only; they start at zero and are corrected against
//! the chain's pending count on every poll. The durable record of which
//! nonces are outstanding is the tx store.

use crate::chain::{ChainInteractor, CountTag};
use crate::error::RelayResult;

use dashmap::DashMap;
use ethers::types::Address;
use tracing::warn;

/// In-memory per-signer nonce counters.
pub struct NonceAllocator {
    counters: DashMap<Address, u64>,
}

impl NonceAllocator {
    /// Counters start at zero for every configured signer.
    pub fn new(signers: impl IntoIterator<Item = Address>) -> Self {
        let counters = DashMap::new();
        for signer in signers {
            counters.insert(signer, 0);
        }
        Self { counters }
    }

    /// Next nonce for `signer`.
    ///
    /// If the chain's pending count is ahead of the local counter, the chain
    /// knows of a transaction the relay does not: adopt the chain's count (a
    /// "nonce fix") and warn.
    pub async fn poll(
        &self,
        chain: &dyn ChainInteractor,
        signer: Address,
    ) -> RelayResult<u64> {
        let pending = chain.transaction_count(signer, CountTag::Pending).await?;

        let mut counter = self.counters.entry(signer).or_insert(0);
        if pending > *counter {
            warn!(
                signer = ?signer,
                local = *counter,
                chain = pending,
                "nonce fix: chain pending count ahead of local counter"
            );
            crate::metrics::record_nonce_fix(signer);
            *counter = pending;
        }

        Ok(*counter)
    }

    /// Advance the counter after a successful store write.
    pub fn commit(&self, signer: Address) {
        *self.counters.entry(signer).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;

    #[tokio::test]
    async fn first_poll_adopts_chain_count() {
        let chain = MockChain::new(33);
        let signer = Address::random();
        chain.set_pending_count(signer, 5);

        let nonces = NonceAllocator::new([signer]);
        assert_eq!(nonces.poll(&chain, signer).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn commit_increments_counter() {
        let chain = MockChain::new(33);
        let signer = Address::random();
        chain.set_pending_count(signer, 5);

        let nonces = NonceAllocator::new([signer]);
        nonces.poll(&chain, signer).await.unwrap();
        nonces.commit(signer);

        assert_eq!(nonces.poll(&chain, signer).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn chain_ahead_triggers_nonce_fix() {
        let chain = MockChain::new(33);
        let signer = Address::random();
        chain.set_pending_count(signer, 3);

        let nonces = NonceAllocator::new([signer]);
        nonces.poll(&chain, signer).await.unwrap();

        // The chain learns of transactions the relay never sent.
        chain.set_pending_count(signer, 7);
        assert_eq!(nonces.poll(&chain, signer).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn chain_behind_keeps_local_counter() {
        let chain = MockChain::new(33);
        let signer = Address::random();
        chain.set_pending_count(signer, 5);

        let nonces = NonceAllocator::new([signer]);
        nonces.poll(&chain, signer).await.unwrap();
        nonces.commit(signer);
        nonces.commit(signer);

        // Chain still reports 5; local counter has moved on.
        assert_eq!(nonces.poll(&chain, signer).await.unwrap(), 7);
    }
}
