//! Error types for the relay

use ethers::types::{Address, H256};
use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Corrupt stored transaction: {0}")]
    CorruptRow(String),

    #[error("Duplicate nonce {nonce} for signer {signer:?}")]
    DuplicateNonce { signer: Address, nonce: u64 },

    #[error("No key manager owns signer {0:?}")]
    UnknownSigner(Address),

    #[error("Broadcast returned {returned:?}, locally computed tx id {local:?}")]
    HashMismatch { local: H256, returned: H256 },

    #[error("Chain RPC error: {0}")]
    ChainRpc(String),

    #[error("Wallet error: {0}")]
    Wallet(String),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
