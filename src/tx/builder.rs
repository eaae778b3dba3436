//! Canonical transaction construction and tx id derivation

use crate::chain::RawTxOptions;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::keccak256;

/// Build the canonical unsigned legacy transaction the relay broadcasts.
/// The chain id from `opts` makes the signature EIP-155 replay-protected.
pub fn build_unsigned(
    to: Address,
    value: U256,
    gas_limit: u64,
    gas_price: U256,
    data: Bytes,
    nonce: u64,
    opts: &RawTxOptions,
) -> TypedTransaction {
    let request = TransactionRequest::new()
        .to(to)
        .value(value)
        .gas(gas_limit)
        .gas_price(gas_price)
        .data(data)
        .nonce(nonce)
        .chain_id(opts.chain_id);

    TypedTransaction::Legacy(request)
}

/// The transaction id is the keccak-256 hash of the signed RLP bytes.
pub fn tx_id_of(signed: &Bytes) -> H256 {
    H256::from(keccak256(signed))
}
