//! Chain access seam
//!
//! The transaction core talks to the chain through [`ChainInteractor`]; the
//! production implementation in [`rpc`] wraps HTTP JSON-RPC providers with
//! failover.

pub mod rpc;

pub use rpc::RpcChainInteractor;

use crate::error::RelayResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Transaction, H256, U256};

/// Which transaction count to ask the chain for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountTag {
    /// Only mined transactions.
    Latest,
    /// Mined plus mempool.
    Pending,
}

/// Chain-wide options every raw transaction carries.
#[derive(Debug, Clone, Copy)]
pub struct RawTxOptions {
    pub chain_id: u64,
}

/// Everything the transaction core needs from the chain.
#[async_trait]
pub trait ChainInteractor: Send + Sync {
    /// Current network gas price in wei.
    async fn gas_price(&self) -> RelayResult<U256>;

    /// Outgoing transaction count for `addr`.
    async fn transaction_count(&self, addr: Address, tag: CountTag) -> RelayResult<u64>;

    /// Submit signed RLP bytes; returns the hash the node computed.
    async fn broadcast_raw_transaction(&self, raw: Bytes) -> RelayResult<H256>;

    /// Look up a transaction by hash. `None` if the node does not know it.
    async fn transaction(&self, hash: H256) -> RelayResult<Option<Transaction>>;

    /// Gas estimate for `call`.
    async fn estimate_gas(&self, call: &TypedTransaction) -> RelayResult<U256>;

    /// Current head block number.
    async fn block_number(&self) -> RelayResult<u64>;

    /// Options stamped onto every raw transaction.
    fn raw_tx_options(&self) -> RawTxOptions;
}
