//! ledgerstream-core — foundation traits and types for LedgerStream.
//!
//! # Overview
//!
//! LedgerStream ingests closed-ledger and account-transaction events from an
//! XRP Ledger node, enriches them and persists deduplicated records. The core
//! crate defines:
//!
//! - [`RpcTransport`] — the async trait behind the request/response channel
//! - [`RpcRequest`] / [`RpcResponse`] — request/response wire types
//! - [`TransportError`] / [`IngestError`] — structured error types
//! - [`types`] — push events and their stored record forms
//! - [`RecordStore`] — the storage seam used by the persistence gate
//! - [`policy`] module — reconnect backoff policy

pub mod error;
pub mod policy;
pub mod request;
pub mod store;
pub mod transport;
pub mod types;

pub use error::{IngestError, TransportError};
pub use policy::ReconnectPolicy;
pub use request::{RpcError, RpcRequest, RpcResponse};
pub use store::RecordStore;
pub use transport::RpcTransport;
pub use types::{
    AccountTransactionEvent, ClosedLedgerEvent, CurrencyAmount, StoredLedgerRecord,
    StoredTransactionRecord,
};
