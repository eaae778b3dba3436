//! Transaction management core: persistence, nonce assignment, repricing and
//! orchestration

mod builder;
mod gas;
mod manager;
mod nonce;
mod store;

pub use gas::GasPolicy;
pub use manager::{SendRequest, SentTransaction, TransactionManager};
pub use nonce::NonceAllocator;
pub use store::{ServerAction, StoredTransaction, TxStore};
