//! The storage seam behind the persistence gate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IngestError;
use crate::types::{StoredLedgerRecord, StoredTransactionRecord};

/// Durable storage for ledger and transaction records.
///
/// Implementations include `InMemoryStorage` and `SqliteStorage`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up the stored record for a ledger index.
    async fn find_ledger(&self, ledger_index: u64) -> Result<Option<StoredLedgerRecord>, IngestError>;

    /// Insert a ledger record.
    ///
    /// Returns `false` without writing if a record with the same index exists.
    async fn insert_ledger(&self, record: &StoredLedgerRecord) -> Result<bool, IngestError>;

    /// Append a transaction record.
    async fn insert_transaction(&self, record: &StoredTransactionRecord) -> Result<(), IngestError>;

    /// Delete ledger records created before `cutoff`. Returns the number removed.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, IngestError>;
}
