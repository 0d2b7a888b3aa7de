//! ledgerstream-ingest — the ingest core.
//!
//! ```text
//! PushChannel ──► TopicDispatcher ──► subscription task ──► PipelineHandle
//!                                                             │
//!                           ledger events ─► LedgerEnricher ──┤
//!                                                             ▼
//!                                                     PersistenceGate ──► RecordStore
//! ```
//!
//! - [`dispatcher`] — classify push frames by `type` and route to one subscription
//! - [`enrich`] — fetch `total_coins` (and one-shot full ledgers) over request/response
//! - [`gate`] — completeness check, dedup by ledger index, insert with server timestamp
//! - [`registry`] — named subscriptions: start, stop, list
//! - [`pipeline`] — bounded two-stage receive → enrich → persist pipeline

pub mod dispatcher;
pub mod enrich;
pub mod gate;
pub mod handler;
pub mod pipeline;
pub mod registry;

pub use dispatcher::{DispatchOutcome, PushMessage, Topic, TopicDispatcher, TopicFilter};
pub use enrich::LedgerEnricher;
pub use gate::{PersistOutcome, PersistenceGate};
pub use handler::MessageHandler;
pub use pipeline::{Pipeline, PipelineConfig, PipelineHandle, StatsSnapshot};
pub use registry::{
    PushControl, SubscriptionError, SubscriptionInfo, SubscriptionRegistry, SubscriptionState,
    ACCOUNTS_SUBSCRIPTION, LEDGER_SUBSCRIPTION,
};
