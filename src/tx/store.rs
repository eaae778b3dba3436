//! Durable persistence of in-flight transactions
//!
//! Rows are keyed by `(from, nonce)` and live in a single SQLite file under
//! the configured workdir. The file is the only crash-recovery source: a
//! successful `put` is durable before it returns.

use crate::error::{RelayError, RelayResult};

use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Why the relay sent a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerAction {
    RelayCall,
    SetHashApproval,
    DepositWithdraw,
    ValueTransfer,
}

impl ServerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerAction::RelayCall => "relay_call",
            ServerAction::SetHashApproval => "set_hash_approval",
            ServerAction::DepositWithdraw => "deposit_withdraw",
            ServerAction::ValueTransfer => "value_transfer",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "relay_call" => Some(ServerAction::RelayCall),
            "set_hash_approval" => Some(ServerAction::SetHashApproval),
            "deposit_withdraw" => Some(ServerAction::DepositWithdraw),
            "value_transfer" => Some(ServerAction::ValueTransfer),
            _ => None,
        }
    }
}

/// One in-flight chain transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredTransaction {
    /// keccak-256 of the signed bytes.
    pub tx_id: H256,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    /// In wei.
    pub gas_price: U256,
    /// In wei.
    pub value: U256,
    pub data: Bytes,
    pub server_action: ServerAction,
    /// Block height when first broadcast.
    pub creation_block_number: u64,
    /// Block height of the most recent repricing.
    pub boost_block_number: Option<u64>,
    /// Block height at which a receipt was first observed.
    pub mined_block_number: Option<u64>,
    /// Broadcasts including boosts. Always >= 1.
    pub attempts: u32,
}

const STORE_FILE: &str = "txstore.db";

/// Durable store of [`StoredTransaction`] rows.
pub struct TxStore {
    pool: SqlitePool,
}

impl TxStore {
    /// Open (or create) the store file under `workdir`.
    ///
    /// In `dev_mode` any existing store file is deleted first; in normal mode
    /// the store is never truncated except by [`TxStore::remove_txs_until_nonce`].
    pub async fn open(workdir: &Path, dev_mode: bool) -> RelayResult<Self> {
        let path = workdir.join(STORE_FILE);

        if dev_mode && path.exists() {
            // The WAL sidecar files go with the store file.
            for suffix in ["", "-wal", "-shm"] {
                let file = workdir.join(format!("{}{}", STORE_FILE, suffix));
                if file.exists() {
                    std::fs::remove_file(&file)
                        .map_err(|e| RelayError::Config(format!("Failed to wipe tx store: {}", e)))?;
                }
            }
            info!("dev_mode: removed existing tx store at {:?}", path);
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        // A single connection keeps all store operations serializable.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relay_transactions (
                from_addr TEXT NOT NULL,
                nonce INTEGER NOT NULL,
                tx_id TEXT NOT NULL,
                to_addr TEXT NOT NULL,
                gas_limit INTEGER NOT NULL,
                gas_price TEXT NOT NULL,
                value TEXT NOT NULL,
                data BLOB NOT NULL,
                server_action TEXT NOT NULL,
                creation_block_number INTEGER NOT NULL,
                boost_block_number INTEGER,
                mined_block_number INTEGER,
                attempts INTEGER NOT NULL,
                PRIMARY KEY (from_addr, nonce)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Insert a row. With `replace_existing` the old `(from, nonce)` row is
    /// atomically overwritten; without it an existing row fails with
    /// `DuplicateNonce`.
    pub async fn put(&self, tx: &StoredTransaction, replace_existing: bool) -> RelayResult<()> {
        let sql = if replace_existing {
            r#"
            INSERT OR REPLACE INTO relay_transactions
                (from_addr, nonce, tx_id, to_addr, gas_limit, gas_price, value, data,
                 server_action, creation_block_number, boost_block_number,
                 mined_block_number, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#
        } else {
            r#"
            INSERT INTO relay_transactions
                (from_addr, nonce, tx_id, to_addr, gas_limit, gas_price, value, data,
                 server_action, creation_block_number, boost_block_number,
                 mined_block_number, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#
        };

        let result = sqlx::query(sql)
            .bind(format!("{:#x}", tx.from))
            .bind(tx.nonce as i64)
            .bind(format!("{:#x}", tx.tx_id))
            .bind(format!("{:#x}", tx.to))
            .bind(tx.gas_limit as i64)
            .bind(tx.gas_price.to_string())
            .bind(tx.value.to_string())
            .bind(tx.data.to_vec())
            .bind(tx.server_action.as_str())
            .bind(tx.creation_block_number as i64)
            .bind(tx.boost_block_number.map(|b| b as i64))
            .bind(tx.mined_block_number.map(|b| b as i64))
            .bind(tx.attempts as i64)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                debug!(
                    "Stored tx {:?} (from {:?}, nonce {})",
                    tx.tx_id, tx.from, tx.nonce
                );
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RelayError::DuplicateNonce {
                    signer: tx.from,
                    nonce: tx.nonce,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All rows, ascending by `(from, nonce)`.
    pub async fn get_all(&self) -> RelayResult<Vec<StoredTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM relay_transactions ORDER BY from_addr ASC, nonce ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    /// Rows for one signer, ascending by nonce.
    pub async fn get_all_by_signer(&self, from: Address) -> RelayResult<Vec<StoredTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM relay_transactions WHERE from_addr = $1 ORDER BY nonce ASC",
        )
        .bind(format!("{:#x}", from))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    /// Delete every row for `from` with `nonce <= inclusive_nonce`.
    /// Returns the number of rows removed.
    pub async fn remove_txs_until_nonce(
        &self,
        from: Address,
        inclusive_nonce: u64,
    ) -> RelayResult<u64> {
        let result = sqlx::query(
            "DELETE FROM relay_transactions WHERE from_addr = $1 AND nonce <= $2",
        )
        .bind(format!("{:#x}", from))
        .bind(inclusive_nonce as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> RelayResult<StoredTransaction> {
    let from_addr: String = row.get("from_addr");
    let to_addr: String = row.get("to_addr");
    let tx_id: String = row.get("tx_id");
    let gas_price: String = row.get("gas_price");
    let value: String = row.get("value");
    let data: Vec<u8> = row.get("data");
    let action: String = row.get("server_action");

    Ok(StoredTransaction {
        tx_id: H256::from_str(&tx_id)
            .map_err(|e| RelayError::CorruptRow(format!("tx_id {}: {}", tx_id, e)))?,
        from: Address::from_str(&from_addr)
            .map_err(|e| RelayError::CorruptRow(format!("from {}: {}", from_addr, e)))?,
        to: Address::from_str(&to_addr)
            .map_err(|e| RelayError::CorruptRow(format!("to {}: {}", to_addr, e)))?,
        nonce: row.get::<i64, _>("nonce") as u64,
        gas_limit: row.get::<i64, _>("gas_limit") as u64,
        gas_price: U256::from_dec_str(&gas_price)
            .map_err(|e| RelayError::CorruptRow(format!("gas_price {}: {}", gas_price, e)))?,
        value: U256::from_dec_str(&value)
            .map_err(|e| RelayError::CorruptRow(format!("value {}: {}", value, e)))?,
        data: Bytes::from(data),
        server_action: ServerAction::parse(&action)
            .ok_or_else(|| RelayError::CorruptRow(format!("server_action {}", action)))?,
        creation_block_number: row.get::<i64, _>("creation_block_number") as u64,
        boost_block_number: row.get::<Option<i64>, _>("boost_block_number").map(|b| b as u64),
        mined_block_number: row.get::<Option<i64>, _>("mined_block_number").map(|b| b as u64),
        attempts: row.get::<i64, _>("attempts") as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tx(from: Address, nonce: u64) -> StoredTransaction {
        StoredTransaction {
            tx_id: H256::random(),
            from,
            to: Address::random(),
            nonce,
            gas_limit: 21_000,
            gas_price: U256::from(1_000_000_000u64),
            value: U256::zero(),
            data: Bytes::from(vec![0xde, 0xad]),
            server_action: ServerAction::RelayCall,
            creation_block_number: 100,
            boost_block_number: None,
            mined_block_number: None,
            attempts: 1,
        }
    }

    async fn open_store(dir: &TempDir) -> TxStore {
        TxStore::open(dir.path(), false).await.unwrap()
    }

    #[tokio::test]
    async fn put_and_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let tx = sample_tx(Address::random(), 5);
        store.put(&tx, false).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all, vec![tx]);
    }

    #[tokio::test]
    async fn duplicate_nonce_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let from = Address::random();
        store.put(&sample_tx(from, 5), false).await.unwrap();

        let err = store.put(&sample_tx(from, 5), false).await.unwrap_err();
        assert!(matches!(err, RelayError::DuplicateNonce { nonce: 5, .. }));
    }

    #[tokio::test]
    async fn replace_overwrites_atomically() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let from = Address::random();
        store.put(&sample_tx(from, 5), false).await.unwrap();

        let mut boosted = sample_tx(from, 5);
        boosted.attempts = 2;
        boosted.boost_block_number = Some(110);
        store.put(&boosted, true).await.unwrap();

        let rows = store.get_all_by_signer(from).await.unwrap();
        assert_eq!(rows, vec![boosted]);
    }

    #[tokio::test]
    async fn rows_come_back_ordered() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let a = Address::random();
        let b = Address::random();
        for nonce in [7u64, 5, 6] {
            store.put(&sample_tx(a, nonce), false).await.unwrap();
            store.put(&sample_tx(b, nonce), false).await.unwrap();
        }

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 6);
        let keys: Vec<_> = all.iter().map(|t| (t.from, t.nonce)).collect();
        let mut sorted = keys.clone();
        sorted.sort_by_key(|(from, nonce)| (format!("{:#x}", from), *nonce));
        assert_eq!(keys, sorted);

        let for_a = store.get_all_by_signer(a).await.unwrap();
        let nonces: Vec<_> = for_a.iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn remove_until_nonce_prunes_prefix() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let from = Address::random();
        let other = Address::random();
        for nonce in 5..=7 {
            store.put(&sample_tx(from, nonce), false).await.unwrap();
        }
        store.put(&sample_tx(other, 5), false).await.unwrap();

        let removed = store.remove_txs_until_nonce(from, 6).await.unwrap();
        assert_eq!(removed, 2);

        let remaining = store.get_all_by_signer(from).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].nonce, 7);

        // Other signers are untouched.
        assert_eq!(store.get_all_by_signer(other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn every_server_action_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let from = Address::random();
        let actions = [
            ServerAction::RelayCall,
            ServerAction::SetHashApproval,
            ServerAction::DepositWithdraw,
            ServerAction::ValueTransfer,
        ];
        for (nonce, action) in actions.iter().enumerate() {
            let mut tx = sample_tx(from, nonce as u64);
            tx.server_action = *action;
            store.put(&tx, false).await.unwrap();
        }

        let stored: Vec<_> = store
            .get_all_by_signer(from)
            .await
            .unwrap()
            .iter()
            .map(|t| t.server_action)
            .collect();
        assert_eq!(stored, actions);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let tx = sample_tx(Address::random(), 5);

        {
            let store = open_store(&dir).await;
            store.put(&tx, false).await.unwrap();
        }

        let store = open_store(&dir).await;
        assert_eq!(store.get_all().await.unwrap(), vec![tx]);
    }

    #[tokio::test]
    async fn dev_mode_wipes_store() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_store(&dir).await;
            store.put(&sample_tx(Address::random(), 5), false).await.unwrap();
        }

        let store = TxStore::open(dir.path(), true).await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }
}
