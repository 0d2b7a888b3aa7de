//! In-memory record store.
//!
//! Keeps ledger and transaction records in RAM. Used by tests and by the
//! binary when `DATABASE_URL=memory`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use ledgerstream_core::error::IngestError;
use ledgerstream_core::store::RecordStore;
use ledgerstream_core::types::{StoredLedgerRecord, StoredTransactionRecord};

/// In-memory record store. All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    ledgers: Mutex<HashMap<u64, StoredLedgerRecord>>,
    transactions: Mutex<Vec<StoredTransactionRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger_count(&self) -> usize {
        self.ledgers.lock().unwrap().len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }

    /// All transaction records sent by `account`, in insertion order.
    pub fn transactions_for(&self, account: &str) -> Vec<StoredTransactionRecord> {
        self.transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.account == account)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryStorage {
    async fn find_ledger(&self, ledger_index: u64) -> Result<Option<StoredLedgerRecord>, IngestError> {
        Ok(self.ledgers.lock().unwrap().get(&ledger_index).cloned())
    }

    async fn insert_ledger(&self, record: &StoredLedgerRecord) -> Result<bool, IngestError> {
        let mut ledgers = self.ledgers.lock().unwrap();
        if ledgers.contains_key(&record.ledger_index) {
            return Ok(false);
        }
        ledgers.insert(record.ledger_index, record.clone());
        Ok(true)
    }

    async fn insert_transaction(&self, record: &StoredTransactionRecord) -> Result<(), IngestError> {
        self.transactions.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, IngestError> {
        let mut ledgers = self.ledgers.lock().unwrap();
        let before = ledgers.len();
        ledgers.retain(|_, r| r.created_at >= cutoff);
        Ok((before - ledgers.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ledger(index: u64, created_at: DateTime<Utc>) -> StoredLedgerRecord {
        StoredLedgerRecord {
            ledger_index: index,
            ledger_hash: format!("HASH{index}"),
            txn_count: 3,
            fee_base: 10,
            total_coins: "99999999999999".into(),
            close_time: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn insert_is_unique_by_index() {
        let store = InMemoryStorage::new();
        let now = Utc::now();
        assert!(store.insert_ledger(&ledger(7, now)).await.unwrap());
        assert!(!store.insert_ledger(&ledger(7, now)).await.unwrap());
        assert_eq!(store.ledger_count(), 1);
        assert_eq!(store.find_ledger(7).await.unwrap().unwrap().ledger_hash, "HASH7");
        assert!(store.find_ledger(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_old_ledgers() {
        let store = InMemoryStorage::new();
        let now = Utc::now();
        store.insert_ledger(&ledger(1, now - Duration::days(40))).await.unwrap();
        store.insert_ledger(&ledger(2, now)).await.unwrap();

        let removed = store.purge_expired(now - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.find_ledger(1).await.unwrap().is_none());
        assert!(store.find_ledger(2).await.unwrap().is_some());
    }
}
