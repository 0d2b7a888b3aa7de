//! Persistence gate: completeness check, dedup by ledger index, insert.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use ledgerstream_core::error::IngestError;
use ledgerstream_core::store::RecordStore;
use ledgerstream_core::types::{
    AccountTransactionEvent, ClosedLedgerEvent, StoredLedgerRecord, StoredTransactionRecord,
};

/// What the gate did with a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum PersistOutcome {
    Inserted,
    SkippedDuplicate,
    SkippedIncomplete(String),
}

/// Validates records and writes them through a [`RecordStore`].
///
/// Storage errors are returned to the caller; the gate never retries.
#[derive(Clone)]
pub struct PersistenceGate {
    store: Arc<dyn RecordStore>,
}

impl PersistenceGate {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn persist_ledger(&self, event: ClosedLedgerEvent) -> Result<PersistOutcome, IngestError> {
        let ledger_index = event.ledger_index;
        if let Err(e) = check_ledger(&event) {
            tracing::info!(ledger_index, error = %e, "ledger record discarded");
            return Ok(PersistOutcome::SkippedIncomplete(reason_of(e)));
        }

        let existing = self.store.find_ledger(ledger_index).await.map_err(|e| {
            tracing::error!(ledger_index, error = %e, "ledger lookup failed");
            e
        })?;
        if existing.is_some() {
            let dup = IngestError::Duplicate { ledger_index };
            tracing::debug!(error = %dup, "ledger skipped");
            return Ok(PersistOutcome::SkippedDuplicate);
        }

        let record = StoredLedgerRecord::from_event(event, Utc::now());
        let inserted = self.store.insert_ledger(&record).await.map_err(|e| {
            tracing::error!(ledger_index, error = %e, "ledger insert failed");
            e
        })?;

        // Lost a race with another writer between lookup and insert.
        if !inserted {
            let dup = IngestError::Duplicate { ledger_index };
            tracing::debug!(error = %dup, "ledger skipped on insert");
            return Ok(PersistOutcome::SkippedDuplicate);
        }

        tracing::info!(ledger_index, "ledger stored");
        Ok(PersistOutcome::Inserted)
    }

    /// Transactions are append-only: every complete event is inserted.
    pub async fn persist_transaction(
        &self,
        event: AccountTransactionEvent,
    ) -> Result<PersistOutcome, IngestError> {
        if let Err(e) = check_transaction(&event) {
            tracing::info!(error = %e, "transaction record discarded");
            return Ok(PersistOutcome::SkippedIncomplete(reason_of(e)));
        }

        let record = StoredTransactionRecord::from_event(event, Utc::now());
        self.store.insert_transaction(&record).await.map_err(|e| {
            tracing::error!(account = %record.account, error = %e, "transaction insert failed");
            e
        })?;

        tracing::info!(account = %record.account, tx_hash = %record.tx_hash, "transaction stored");
        Ok(PersistOutcome::Inserted)
    }
}

fn check_ledger(event: &ClosedLedgerEvent) -> Result<(), IngestError> {
    let reason = if event.ledger_index == 0 {
        "ledger_index is 0"
    } else if event.ledger_hash.is_empty() {
        "ledger_hash is empty"
    } else if event.txn_count <= 0 {
        "txn_count is not positive"
    } else if event.total_coins.is_empty() {
        "total_coins is empty"
    } else {
        return Ok(());
    };
    Err(IngestError::Validation { reason: reason.into() })
}

fn check_transaction(event: &AccountTransactionEvent) -> Result<(), IngestError> {
    let reason = if event.transaction.account.is_empty() {
        "Account is empty"
    } else if event.transaction.transaction_type.is_empty() {
        "TransactionType is empty"
    } else {
        return Ok(());
    };
    Err(IngestError::Validation { reason: reason.into() })
}

fn reason_of(e: IngestError) -> String {
    match e {
        IngestError::Validation { reason } => reason,
        other => other.to_string(),
    }
}
