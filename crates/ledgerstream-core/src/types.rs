//! Push events and their stored record forms.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Seconds between the Unix epoch and the ledger network epoch (2000-01-01T00:00:00Z).
pub const NETWORK_EPOCH_OFFSET: i64 = 946_684_800;

/// Convert ledger-network epoch seconds into a UTC timestamp.
pub fn network_time(secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?.checked_add(NETWORK_EPOCH_OFFSET)?;
    DateTime::from_timestamp(secs, 0)
}

// ─── ClosedLedgerEvent ───────────────────────────────────────────────────────

/// A `ledgerClosed` push message.
///
/// Fields missing from the payload decode to their zero value so that the
/// persistence gate, not the decoder, decides what is incomplete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosedLedgerEvent {
    #[serde(default)]
    pub ledger_index: u64,
    #[serde(default)]
    pub ledger_hash: String,
    #[serde(default)]
    pub txn_count: i64,
    #[serde(default)]
    pub fee_base: u64,
    /// Close time in ledger-network epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_time: Option<u64>,
    /// Total supply in drops; filled in by enrichment.
    #[serde(default)]
    pub total_coins: String,
}

// ─── AccountTransactionEvent ─────────────────────────────────────────────────

/// A currency amount: native drops as a numeric string, an issued amount,
/// or any other amount object the network introduces, kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CurrencyAmount {
    Native(String),
    Issued(IssuedAmount),
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedAmount {
    pub currency: String,
    pub issuer: String,
    pub value: String,
}

impl CurrencyAmount {
    /// Canonical string form used in stored records.
    ///
    /// Native amounts keep their drops string; every other form serializes
    /// as JSON with sorted keys.
    pub fn canonical(&self) -> String {
        match self {
            Self::Native(drops) => drops.clone(),
            Self::Issued(a) => serde_json::json!({
                "currency": a.currency,
                "issuer": a.issuer,
                "value": a.value,
            })
            .to_string(),
            Self::Other(v) => sorted_keys(v).to_string(),
        }
    }
}

fn sorted_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted_keys(v)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

/// The transaction body inside a `transaction` push message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionBody {
    #[serde(rename = "Account", default)]
    pub account: String,
    #[serde(rename = "TransactionType", default)]
    pub transaction_type: String,
    #[serde(rename = "Fee", default)]
    pub fee: String,
    #[serde(rename = "Destination", default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(rename = "TakerGets", default, skip_serializing_if = "Option::is_none")]
    pub taker_gets: Option<CurrencyAmount>,
    #[serde(rename = "TakerPays", default, skip_serializing_if = "Option::is_none")]
    pub taker_pays: Option<CurrencyAmount>,
    /// Ledger-network epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_funds: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// A `transaction` push message delivered for subscribed accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTransactionEvent {
    #[serde(alias = "tx_json")]
    pub transaction: TransactionBody,
    #[serde(default)]
    pub engine_result: Option<String>,
    #[serde(default)]
    pub ledger_hash: String,
    #[serde(default)]
    pub ledger_index: u64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub validated: bool,
    /// Transaction metadata; `AffectedNodes` names every account touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl AccountTransactionEvent {
    /// Returns `true` if `account` sent, received, or was otherwise affected
    /// by this transaction.
    pub fn involves(&self, account: &str) -> bool {
        self.affected_accounts().contains(account)
    }

    /// Sender, destination, and the owners of every ledger entry in
    /// `meta.AffectedNodes`.
    pub fn affected_accounts(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        out.insert(self.transaction.account.as_str());
        if let Some(dest) = &self.transaction.destination {
            out.insert(dest.as_str());
        }

        let nodes = self
            .meta
            .as_ref()
            .and_then(|m| m.get("AffectedNodes"))
            .and_then(Value::as_array);
        for node in nodes.into_iter().flatten() {
            // {"ModifiedNode": {..}} / {"CreatedNode": {..}} / {"DeletedNode": {..}}
            for entry in node.as_object().into_iter().flat_map(|o| o.values()) {
                for section in ["NewFields", "FinalFields", "PreviousFields"] {
                    if let Some(fields) = entry.get(section) {
                        collect_owners(fields, &mut out);
                    }
                }
            }
        }

        out.remove("");
        out
    }
}

fn collect_owners<'a>(fields: &'a Value, out: &mut BTreeSet<&'a str>) {
    for key in ["Account", "Owner", "Destination"] {
        if let Some(account) = fields.get(key).and_then(Value::as_str) {
            out.insert(account);
        }
    }
    // Trust lines name their two sides through the limit issuers.
    for key in ["HighLimit", "LowLimit"] {
        let issuer = fields.get(key).and_then(|l| l.get("issuer"));
        if let Some(account) = issuer.and_then(Value::as_str) {
            out.insert(account);
        }
    }
}

// ─── Stored records ──────────────────────────────────────────────────────────

/// Durable form of a closed ledger. Unique by `ledger_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLedgerRecord {
    pub ledger_index: u64,
    pub ledger_hash: String,
    pub txn_count: i64,
    pub fee_base: u64,
    pub total_coins: String,
    pub close_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoredLedgerRecord {
    pub fn from_event(event: ClosedLedgerEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            ledger_index: event.ledger_index,
            ledger_hash: event.ledger_hash,
            txn_count: event.txn_count,
            fee_base: event.fee_base,
            total_coins: event.total_coins,
            close_time: event.ledger_time.and_then(network_time),
            created_at,
        }
    }
}

/// Durable form of an account transaction. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransactionRecord {
    pub account: String,
    pub transaction_type: String,
    pub fee: String,
    pub taker_gets: String,
    pub taker_pays: String,
    pub date: Option<DateTime<Utc>>,
    pub owner_funds: String,
    pub validated: bool,
    pub status: String,
    pub ledger_hash: String,
    pub ledger_index: u64,
    pub tx_hash: String,
    pub created_at: DateTime<Utc>,
}

impl StoredTransactionRecord {
    /// Normalize a push event into its stored form.
    pub fn from_event(event: AccountTransactionEvent, created_at: DateTime<Utc>) -> Self {
        let tx = event.transaction;
        Self {
            taker_gets: tx.taker_gets.as_ref().map(CurrencyAmount::canonical).unwrap_or_default(),
            taker_pays: tx.taker_pays.as_ref().map(CurrencyAmount::canonical).unwrap_or_default(),
            date: tx.date.and_then(network_time),
            account: tx.account,
            transaction_type: tx.transaction_type,
            fee: tx.fee,
            owner_funds: tx.owner_funds.unwrap_or_default(),
            validated: event.validated,
            status: event.status,
            ledger_hash: event.ledger_hash,
            ledger_index: event.ledger_index,
            tx_hash: tx.hash.unwrap_or_default(),
            created_at,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
