//! SQLite record store.
//!
//! Persists ledger and transaction records to a single SQLite file via
//! `sqlx`. Ledger records are unique by `ledger_index`; transaction records
//! are append-only. Timestamps are stored as Unix milliseconds.
//!
//! # Usage
//! ```rust,no_run
//! use ledgerstream_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./ledgerstream.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use ledgerstream_core::error::IngestError;
use ledgerstream_core::store::RecordStore;
use ledgerstream_core::types::{StoredLedgerRecord, StoredTransactionRecord};

/// SQLite-backed record store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ledgerstream.db"`) or a full
    /// SQLite URL (`"sqlite:./ledgerstream.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IngestError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(IngestError::storage)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    pub async fn in_memory() -> Result<Self, IngestError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(IngestError::storage)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), IngestError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(IngestError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ledgers (
                ledger_index INTEGER PRIMARY KEY,
                ledger_hash  TEXT    NOT NULL,
                txn_count    INTEGER NOT NULL,
                fee_base     INTEGER NOT NULL,
                total_coins  TEXT    NOT NULL,
                close_time   INTEGER,
                created_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(IngestError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transactions (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                account          TEXT    NOT NULL,
                transaction_type TEXT    NOT NULL,
                fee              TEXT    NOT NULL,
                taker_gets       TEXT    NOT NULL,
                taker_pays       TEXT    NOT NULL,
                date             INTEGER,
                owner_funds      TEXT    NOT NULL,
                validated        INTEGER NOT NULL,
                status           TEXT    NOT NULL,
                ledger_hash      TEXT    NOT NULL,
                ledger_index     INTEGER NOT NULL,
                tx_hash          TEXT    NOT NULL,
                created_at       INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(IngestError::storage)?;

        // Retention sweeps scan by age.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledgers_created ON ledgers (created_at);")
            .execute(&self.pool)
            .await
            .map_err(IngestError::storage)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions (account);")
            .execute(&self.pool)
            .await
            .map_err(IngestError::storage)?;

        Ok(())
    }

    /// Total number of stored ledger records.
    pub async fn ledger_count(&self) -> Result<u64, IngestError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM ledgers")
            .fetch_one(&self.pool)
            .await
            .map_err(IngestError::storage)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }

    /// Transaction records sent by `account`, oldest first.
    pub async fn transactions_for(
        &self,
        account: &str,
    ) -> Result<Vec<StoredTransactionRecord>, IngestError> {
        let rows = sqlx::query(
            "SELECT account, transaction_type, fee, taker_gets, taker_pays, date, owner_funds,
                    validated, status, ledger_hash, ledger_index, tx_hash, created_at
             FROM transactions WHERE account = ? ORDER BY id",
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await
        .map_err(IngestError::storage)?;

        Ok(rows.iter().map(transaction_from_row).collect())
    }
}

fn millis_to_time(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn ledger_from_row(r: &SqliteRow) -> StoredLedgerRecord {
    StoredLedgerRecord {
        ledger_index: r.get::<i64, _>("ledger_index") as u64,
        ledger_hash: r.get("ledger_hash"),
        txn_count: r.get("txn_count"),
        fee_base: r.get::<i64, _>("fee_base") as u64,
        total_coins: r.get("total_coins"),
        close_time: r.get::<Option<i64>, _>("close_time").map(millis_to_time),
        created_at: millis_to_time(r.get("created_at")),
    }
}

fn transaction_from_row(r: &SqliteRow) -> StoredTransactionRecord {
    StoredTransactionRecord {
        account: r.get("account"),
        transaction_type: r.get("transaction_type"),
        fee: r.get("fee"),
        taker_gets: r.get("taker_gets"),
        taker_pays: r.get("taker_pays"),
        date: r.get::<Option<i64>, _>("date").map(millis_to_time),
        owner_funds: r.get("owner_funds"),
        validated: r.get("validated"),
        status: r.get("status"),
        ledger_hash: r.get("ledger_hash"),
        ledger_index: r.get::<i64, _>("ledger_index") as u64,
        tx_hash: r.get("tx_hash"),
        created_at: millis_to_time(r.get("created_at")),
    }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl RecordStore for SqliteStorage {
    async fn find_ledger(&self, ledger_index: u64) -> Result<Option<StoredLedgerRecord>, IngestError> {
        let row = sqlx::query(
            "SELECT ledger_index, ledger_hash, txn_count, fee_base, total_coins, close_time, created_at
             FROM ledgers WHERE ledger_index = ?",
        )
        .bind(ledger_index as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(IngestError::storage)?;

        Ok(row.as_ref().map(ledger_from_row))
    }

    async fn insert_ledger(&self, record: &StoredLedgerRecord) -> Result<bool, IngestError> {
        let result = sqlx::query(
            "INSERT INTO ledgers
             (ledger_index, ledger_hash, txn_count, fee_base, total_coins, close_time, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(ledger_index) DO NOTHING",
        )
        .bind(record.ledger_index as i64)
        .bind(&record.ledger_hash)
        .bind(record.txn_count)
        .bind(record.fee_base as i64)
        .bind(&record.total_coins)
        .bind(record.close_time.map(|t| t.timestamp_millis()))
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(IngestError::storage)?;

        let inserted = result.rows_affected() == 1;
        debug!(ledger_index = record.ledger_index, inserted, "ledger write");
        Ok(inserted)
    }

    async fn insert_transaction(&self, record: &StoredTransactionRecord) -> Result<(), IngestError> {
        sqlx::query(
            "INSERT INTO transactions
             (account, transaction_type, fee, taker_gets, taker_pays, date, owner_funds,
              validated, status, ledger_hash, ledger_index, tx_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.account)
        .bind(&record.transaction_type)
        .bind(&record.fee)
        .bind(&record.taker_gets)
        .bind(&record.taker_pays)
        .bind(record.date.map(|t| t.timestamp_millis()))
        .bind(&record.owner_funds)
        .bind(record.validated)
        .bind(&record.status)
        .bind(&record.ledger_hash)
        .bind(record.ledger_index as i64)
        .bind(&record.tx_hash)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(IngestError::storage)?;

        debug!(account = %record.account, tx_hash = %record.tx_hash, "transaction stored");
        Ok(())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, IngestError> {
        let result = sqlx::query("DELETE FROM ledgers WHERE created_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(IngestError::storage)?;
        Ok(result.rows_affected())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
