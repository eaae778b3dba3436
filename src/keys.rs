//! Signing key management for the manager and worker identities
//!
//! Private keys are loaded once at startup and never leave the process.

use crate::error::{RelayError, RelayResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};

/// Holds a set of signing keys bound to one chain id.
///
/// The relay runs two of these: one for the manager identity and one for the
/// worker identities.
pub struct KeyManager {
    wallets: Vec<LocalWallet>,
}

impl KeyManager {
    /// Build from raw hex private keys.
    pub fn from_keys(keys: &[String], chain_id: u64) -> RelayResult<Self> {
        if keys.is_empty() {
            return Err(RelayError::Wallet("No signing keys provided".to_string()));
        }

        let mut wallets = Vec::with_capacity(keys.len());
        for key in keys {
            let wallet = key
                .trim()
                .parse::<LocalWallet>()
                .map_err(|e| RelayError::Wallet(format!("Invalid private key: {}", e)))?
                .with_chain_id(chain_id);
            wallets.push(wallet);
        }

        Ok(Self { wallets })
    }

    /// Build from an environment variable holding comma-separated hex keys.
    pub fn from_env(var: &str, chain_id: u64) -> RelayResult<Self> {
        let raw = std::env::var(var)
            .map_err(|_| RelayError::Wallet(format!("Environment variable {} not set", var)))?;

        let keys: Vec<String> = raw
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        Self::from_keys(&keys, chain_id)
    }

    /// Address of the i-th key, if present.
    pub fn address(&self, i: usize) -> Option<Address> {
        self.wallets.get(i).map(|w| w.address())
    }

    /// All addresses held by this manager.
    pub fn addresses(&self) -> Vec<Address> {
        self.wallets.iter().map(|w| w.address()).collect()
    }

    /// Whether one of the held keys controls `addr`.
    pub fn is_signer(&self, addr: Address) -> bool {
        self.wallets.iter().any(|w| w.address() == addr)
    }

    /// Sign `tx` with the key controlling `addr` and return the signed RLP bytes.
    pub async fn sign_transaction(
        &self,
        addr: Address,
        tx: &TypedTransaction,
    ) -> RelayResult<Bytes> {
        let wallet = self
            .wallets
            .iter()
            .find(|w| w.address() == addr)
            .ok_or(RelayError::UnknownSigner(addr))?;

        let signature = wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| RelayError::Wallet(e.to_string()))?;

        Ok(tx.rlp_signed(&signature))
    }
}
