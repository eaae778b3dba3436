//! Transaction orchestration: send, reprice, confirm
//!
//! `TransactionManager` owns the nonce allocator and the tx store, and holds
//! shared handles to the chain and both key managers. Sends run inside a
//! per-signer critical section so no two concurrent sends assign the same
//! nonce, and every assigned nonce is durably recorded before the signed
//! bytes reach the network.

use super::builder;
use super::gas::GasPolicy;
use super::nonce::NonceAllocator;
use super::store::{ServerAction, StoredTransaction, TxStore};
use crate::chain::{ChainInteractor, CountTag};
use crate::error::{RelayError, RelayResult};
use crate::keys::KeyManager;

use dashmap::DashMap;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A request to put a call on-chain.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub signer: Address,
    pub destination: Address,
    /// Wei attached to the call. Defaults to zero.
    pub value: U256,
    pub gas_limit: u64,
    /// When absent, the current network gas price is used.
    pub gas_price: Option<U256>,
    pub creation_block_number: u64,
    pub server_action: ServerAction,
    /// ABI-encoded call data, opaque to the relay. Defaults to empty.
    pub call_data: Bytes,
}

/// Outcome of a successful send or resend.
#[derive(Debug, Clone)]
pub struct SentTransaction {
    pub tx_hash: H256,
    pub signed_bytes: Bytes,
}

/// Orchestrates sending, repricing and confirmation of relay transactions.
pub struct TransactionManager {
    chain: Arc<dyn ChainInteractor>,
    store: Arc<TxStore>,
    manager_keys: Arc<KeyManager>,
    worker_keys: Arc<KeyManager>,
    nonces: NonceAllocator,
    /// One nonce mutex per signer, held across poll, sign, put and commit.
    nonce_locks: DashMap<Address, Arc<Mutex<()>>>,
    gas_policy: GasPolicy,
    confirmations_needed: u64,
    pending_timeout_blocks: u64,
}

impl TransactionManager {
    pub fn new(
        chain: Arc<dyn ChainInteractor>,
        store: Arc<TxStore>,
        manager_keys: Arc<KeyManager>,
        worker_keys: Arc<KeyManager>,
        gas_policy: GasPolicy,
        confirmations_needed: u64,
        pending_transaction_timeout_blocks: u64,
    ) -> Self {
        let signers: Vec<Address> = manager_keys
            .addresses()
            .into_iter()
            .chain(worker_keys.addresses())
            .collect();

        Self {
            chain,
            store,
            manager_keys,
            worker_keys,
            nonces: NonceAllocator::new(signers),
            nonce_locks: DashMap::new(),
            gas_policy,
            confirmations_needed,
            pending_timeout_blocks: pending_transaction_timeout_blocks,
        }
    }

    /// Every address the relay can sign for.
    pub fn signers(&self) -> Vec<Address> {
        let mut signers = self.manager_keys.addresses();
        signers.extend(self.worker_keys.addresses());
        signers
    }

    fn key_manager_for(&self, signer: Address) -> RelayResult<&KeyManager> {
        if self.manager_keys.is_signer(signer) {
            Ok(&self.manager_keys)
        } else if self.worker_keys.is_signer(signer) {
            Ok(&self.worker_keys)
        } else {
            Err(RelayError::UnknownSigner(signer))
        }
    }

    fn nonce_lock(&self, signer: Address) -> Arc<Mutex<()>> {
        self.nonce_locks
            .entry(signer)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Sign, persist and broadcast a new transaction.
    pub async fn send(&self, request: SendRequest) -> RelayResult<SentTransaction> {
        let gas_price = match request.gas_price {
            Some(price) => price,
            None => self.chain.gas_price().await?,
        };

        let keys = self.key_manager_for(request.signer)?;

        let lock = self.nonce_lock(request.signer);
        let guard = lock.lock().await;

        let nonce = self.nonces.poll(self.chain.as_ref(), request.signer).await?;

        let unsigned = builder::build_unsigned(
            request.destination,
            request.value,
            request.gas_limit,
            gas_price,
            request.call_data.clone(),
            nonce,
            &self.chain.raw_tx_options(),
        );
        let signed = keys.sign_transaction(request.signer, &unsigned).await?;

        let stored = StoredTransaction {
            tx_id: builder::tx_id_of(&signed),
            from: request.signer,
            to: request.destination,
            nonce,
            gas_limit: request.gas_limit,
            gas_price,
            value: request.value,
            data: request.call_data,
            server_action: request.server_action,
            creation_block_number: request.creation_block_number,
            boost_block_number: None,
            mined_block_number: None,
            attempts: 1,
        };

        self.store.put(&stored, false).await?;
        self.nonces.commit(request.signer);

        // Broadcast is network I/O and must not extend the critical section.
        drop(guard);

        let sent = self.broadcast(&stored, signed).await?;
        crate::metrics::record_tx_sent(request.signer, request.server_action.as_str());
        Ok(sent)
    }

    /// Replace a stuck transaction with a higher-priced one on the same nonce.
    ///
    /// Not nonce-locked: the nonce is already owned by the row being replaced.
    /// Callers must not invoke this concurrently for the same `(from, nonce)`.
    pub async fn resend(
        &self,
        stored: &StoredTransaction,
        current_block: u64,
        new_gas_price: U256,
        capped: bool,
    ) -> RelayResult<SentTransaction> {
        let keys = self.key_manager_for(stored.from)?;

        if capped {
            warn!(
                tx_id = ?stored.tx_id,
                gas_price = %new_gas_price,
                "gas price capped at configured maximum"
            );
            crate::metrics::record_gas_price_capped();
        }

        // The boosted transaction is rebuilt without the original value.
        let unsigned = builder::build_unsigned(
            stored.to,
            U256::zero(),
            stored.gas_limit,
            new_gas_price,
            stored.data.clone(),
            stored.nonce,
            &self.chain.raw_tx_options(),
        );
        let signed = keys.sign_transaction(stored.from, &unsigned).await?;

        let boosted = StoredTransaction {
            tx_id: builder::tx_id_of(&signed),
            value: U256::zero(),
            gas_price: new_gas_price,
            boost_block_number: Some(current_block),
            attempts: stored.attempts + 1,
            ..stored.clone()
        };

        self.store.put(&boosted, true).await?;

        let sent = self.broadcast(&boosted, signed).await?;
        crate::metrics::record_boost(stored.from);
        Ok(sent)
    }

    async fn broadcast(
        &self,
        stored: &StoredTransaction,
        signed: Bytes,
    ) -> RelayResult<SentTransaction> {
        info!(
            tx_id = ?stored.tx_id,
            from = ?stored.from,
            to = ?stored.to,
            value = %stored.value,
            nonce = stored.nonce,
            gas_price = %stored.gas_price,
            gas_limit = stored.gas_limit,
            data_len = stored.data.len(),
            attempts = stored.attempts,
            "broadcasting transaction"
        );

        let returned = match self.chain.broadcast_raw_transaction(signed.clone()).await {
            Ok(hash) => hash,
            Err(e) => {
                crate::metrics::record_broadcast_failure();
                return Err(e);
            }
        };

        if returned != stored.tx_id {
            crate::metrics::record_broadcast_failure();
            return Err(RelayError::HashMismatch {
                local: stored.tx_id,
                returned,
            });
        }

        Ok(SentTransaction {
            tx_hash: returned,
            signed_bytes: signed,
        })
    }

    /// Reconcile the store against on-chain confirmations and prune rows that
    /// are mined deeply enough.
    ///
    /// Rows are visited in ascending `(from, nonce)` order: once nonce K is
    /// confirmed, every earlier nonce for that signer is implicitly confirmed
    /// and a single prefix removal covers them all.
    pub async fn reap_confirmed(&self, block_number: u64) -> RelayResult<()> {
        let rows = self.store.get_all().await?;

        for row in rows {
            let should_recheck = match row.mined_block_number {
                None => true,
                Some(mined) => block_number.saturating_sub(mined) >= self.confirmations_needed,
            };
            if !should_recheck {
                continue;
            }

            let receipt = match self.chain.transaction(row.tx_id).await {
                Ok(Some(tx)) => tx,
                Ok(None) => {
                    debug!(tx_id = ?row.tx_id, "transaction not known to the chain yet");
                    continue;
                }
                Err(e) => {
                    warn!(tx_id = ?row.tx_id, error = %e, "failed to fetch transaction, skipping");
                    continue;
                }
            };

            let Some(mined_at) = receipt.block_number else {
                debug!(tx_id = ?row.tx_id, "transaction known but not mined");
                continue;
            };
            let mined_at = mined_at.as_u64();
            let confirmations = block_number.saturating_sub(mined_at);

            if Some(mined_at) != row.mined_block_number {
                if let Some(previous) = row.mined_block_number {
                    warn!(
                        tx_id = ?row.tx_id,
                        previous,
                        current = mined_at,
                        "mined block changed, possible reorg"
                    );
                }
                if confirmations < self.confirmations_needed {
                    let mut updated = row.clone();
                    updated.mined_block_number = Some(mined_at);
                    self.store.put(&updated, true).await?;
                    continue;
                }
            }

            let removed = self
                .store
                .remove_txs_until_nonce(receipt.from, receipt.nonce.as_u64())
                .await?;
            info!(
                from = ?receipt.from,
                nonce = receipt.nonce.as_u64(),
                removed,
                confirmations,
                "pruned confirmed transactions"
            );
            crate::metrics::record_confirmed(receipt.from, removed);
        }

        Ok(())
    }

    /// Reprice the signer's stale transactions.
    ///
    /// Returns `old_tx_id -> resend outcome` for every row that was boosted.
    pub async fn boost_pending(
        &self,
        signer: Address,
        current_block: u64,
    ) -> RelayResult<HashMap<H256, SentTransaction>> {
        let mut boosted = HashMap::new();

        let rows = self.store.get_all_by_signer(signer).await?;
        let Some(oldest) = rows.first() else {
            return Ok(boosted);
        };

        let chain_nonce = self.chain.transaction_count(signer, CountTag::Latest).await?;
        if oldest.nonce < chain_nonce {
            // Already mined, not yet confirmed. Reaping will prune it.
            debug!(
                signer = ?signer,
                nonce = oldest.nonce,
                chain_nonce,
                "oldest pending transaction is mined, deferring to confirmation sweep"
            );
            return Ok(boosted);
        }

        let reference_block = oldest
            .boost_block_number
            .unwrap_or(oldest.creation_block_number);
        if current_block.saturating_sub(reference_block) < self.pending_timeout_blocks {
            return Ok(boosted);
        }

        let (new_gas_price, capped) = self.gas_policy.next_gas_price(oldest.gas_price);
        info!(
            signer = ?signer,
            oldest_nonce = oldest.nonce,
            new_gas_price = %new_gas_price,
            capped,
            "repricing stale transactions"
        );

        for row in rows.iter().filter(|r| r.gas_price < new_gas_price) {
            let sent = self.resend(row, current_block, new_gas_price, capped).await?;
            boosted.insert(row.tx_id, sent);
        }

        Ok(boosted)
    }

    /// Gas estimate for `call` with the configured safety margin, or the
    /// default gas limit when estimation fails. Never propagates chain errors.
    pub async fn estimate_gas(
        &self,
        method_name: &str,
        mut call: TypedTransaction,
        from: Address,
    ) -> u64 {
        call.set_from(from);

        match self.chain.estimate_gas(&call).await {
            Ok(estimated) => self.gas_policy.with_estimate_margin(estimated.as_u64()),
            Err(e) => {
                warn!(
                    method = method_name,
                    error = %e,
                    "gas estimation failed, using default gas limit"
                );
                self.gas_policy.default_gas_limit()
            }
        }
    }
}
