//! JSON-RPC chain access with multi-URL failover

use super::{ChainInteractor, CountTag, RawTxOptions};
use crate::config::ChainConfig;
use crate::error::{RelayError, RelayResult};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, Transaction, H256, U256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP provider wrapper that rotates to the next configured RPC URL when a
/// call fails.
pub struct RpcChainInteractor {
    chain_id: u64,
    providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
}

impl RpcChainInteractor {
    pub fn new(config: &ChainConfig) -> RelayResult<Self> {
        let mut providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    providers.push(provider);
                    debug!("Added RPC provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(RelayError::ChainRpc("No valid RPC providers".to_string()));
        }

        Ok(Self {
            chain_id: config.chain_id,
            providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    fn provider(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("RPC failover to provider {}", next);
    }

    /// Run `op` against the active provider, rotating through the remaining
    /// ones on failure.
    async fn with_failover<T, F, Fut>(&self, op: F) -> RelayResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.providers.len() {
            match op(self.provider().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("RPC call failed: {}", e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(RelayError::ChainRpc(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "All providers failed".to_string()),
        ))
    }
}

#[async_trait]
impl ChainInteractor for RpcChainInteractor {
    async fn gas_price(&self) -> RelayResult<U256> {
        self.with_failover(|p| async move { p.get_gas_price().await })
            .await
    }

    async fn transaction_count(&self, addr: Address, tag: CountTag) -> RelayResult<u64> {
        let block = match tag {
            CountTag::Latest => BlockNumber::Latest,
            CountTag::Pending => BlockNumber::Pending,
        };
        let count = self
            .with_failover(|p| async move { p.get_transaction_count(addr, Some(block.into())).await })
            .await?;
        Ok(count.as_u64())
    }

    async fn broadcast_raw_transaction(&self, raw: Bytes) -> RelayResult<H256> {
        // No failover here: a second submission of the same bytes is harmless
        // but a transport error may mean the first one went through.
        let pending = self
            .provider()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| RelayError::ChainRpc(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn transaction(&self, hash: H256) -> RelayResult<Option<Transaction>> {
        self.with_failover(|p| async move { p.get_transaction(hash).await })
            .await
    }

    async fn estimate_gas(&self, call: &TypedTransaction) -> RelayResult<U256> {
        let call = call.clone();
        self.with_failover(|p| {
            let call = call.clone();
            async move { p.estimate_gas(&call, None).await }
        })
        .await
    }

    async fn block_number(&self) -> RelayResult<u64> {
        let block = self
            .with_failover(|p| async move { p.get_block_number().await })
            .await?;
        Ok(block.as_u64())
    }

    fn raw_tx_options(&self) -> RawTxOptions {
        RawTxOptions {
            chain_id: self.chain_id,
        }
    }
}
