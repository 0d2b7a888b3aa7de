//! Topic dispatcher: classify inbound push frames and route each to exactly
//! one subscription.
//!
//! Classification tries the registered routes highest priority first. A route
//! matches when the frame's `type` field equals the route's discriminator and
//! the payload decodes into the route's shape. Frames matching no route are
//! logged once and dropped.
//!
//! Subscription inboxes are bounded. The dispatcher runs on the push
//! channel's read task and never waits on a subscriber, so a message for a
//! full inbox is logged and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use ledgerstream_core::error::IngestError;
use ledgerstream_core::types::{AccountTransactionEvent, ClosedLedgerEvent};
use ledgerstream_ws::InboundSink;

/// Field carrying the topic discriminator on inbound frames.
pub const DISCRIMINATOR_FIELD: &str = "type";

/// Messages a subscription inbox holds before new ones are dropped.
pub const DEFAULT_INBOX_CAPACITY: usize = 4096;

// ─── Classified messages ─────────────────────────────────────────────────────

/// A classified push message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    LedgerClosed(ClosedLedgerEvent),
    Transaction(AccountTransactionEvent),
    /// Command acknowledgement or any other `response` frame.
    Response(Value),
}

impl PushMessage {
    pub fn topic(&self) -> Topic {
        match self {
            Self::LedgerClosed(_) => Topic::LedgerClosed,
            Self::Transaction(_) => Topic::Transaction,
            Self::Response(_) => Topic::Response,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    LedgerClosed,
    Transaction,
    Response,
}

impl Topic {
    /// Discriminator value carried on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LedgerClosed => "ledgerClosed",
            Self::Transaction => "transaction",
            Self::Response => "response",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification rule.
struct Route {
    priority: u8,
    topic: Topic,
    decode: fn(&Value) -> Option<PushMessage>,
}

fn decode_ledger(v: &Value) -> Option<PushMessage> {
    ClosedLedgerEvent::deserialize(v).ok().map(PushMessage::LedgerClosed)
}

fn decode_transaction(v: &Value) -> Option<PushMessage> {
    AccountTransactionEvent::deserialize(v).ok().map(PushMessage::Transaction)
}

fn decode_response(v: &Value) -> Option<PushMessage> {
    v.is_object().then(|| PushMessage::Response(v.clone()))
}

fn default_routes() -> Vec<Route> {
    let mut routes = vec![
        Route { priority: 0, topic: Topic::Response, decode: decode_response },
        Route { priority: 20, topic: Topic::LedgerClosed, decode: decode_ledger },
        Route { priority: 10, topic: Topic::Transaction, decode: decode_transaction },
    ];
    routes.sort_by(|a, b| b.priority.cmp(&a.priority));
    routes
}

/// Classify a raw frame. Returns `None` when no route accepts it.
pub fn classify(text: &str) -> Option<PushMessage> {
    decode(text, &default_routes()).ok()
}

fn decode(text: &str, routes: &[Route]) -> Result<PushMessage, IngestError> {
    let value: Value = serde_json::from_str(text).map_err(|e| IngestError::Decode {
        reason: format!("invalid JSON: {e}"),
    })?;
    let kind = value
        .get(DISCRIMINATOR_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| IngestError::Decode {
            reason: format!("no string `{DISCRIMINATOR_FIELD}` field"),
        })?;
    routes
        .iter()
        .filter(|r| r.topic.as_str() == kind)
        .find_map(|r| (r.decode)(&value))
        .ok_or_else(|| IngestError::Decode {
            reason: format!("no route accepts type {kind:?}"),
        })
}

// ─── Topic filters ───────────────────────────────────────────────────────────

/// Which classified messages a subscription accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    /// Closed-ledger stream.
    Ledger,
    /// Transactions affecting any of these accounts (sender, destination,
    /// or an owner in the metadata's affected nodes).
    Accounts(Vec<String>),
}

impl TopicFilter {
    pub fn accepts(&self, message: &PushMessage) -> bool {
        match (self, message) {
            (Self::Ledger, PushMessage::LedgerClosed(_)) => true,
            (Self::Accounts(accounts), PushMessage::Transaction(tx)) => {
                accounts.iter().any(|a| tx.involves(a))
            }
            _ => false,
        }
    }
}

/// Result of dispatching one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to the named subscription.
    Routed(String),
    /// Classified, but no active subscription accepts it.
    Unrouted(Topic),
    /// The named subscription's inbox was full; dropped.
    Overflow(String),
    /// Matched no known shape; dropped.
    Undecodable,
}

struct Subscriber {
    name: String,
    filter: TopicFilter,
    tx: mpsc::Sender<PushMessage>,
}

// ─── TopicDispatcher ─────────────────────────────────────────────────────────

/// Routes classified push messages to subscription inboxes.
///
/// Subscribers are kept in start order; a message goes to the first one
/// whose filter accepts it.
pub struct TopicDispatcher {
    routes: Vec<Route>,
    subscribers: Mutex<Vec<Subscriber>>,
    inbox_capacity: usize,
    undecodable: AtomicU64,
    overflowed: AtomicU64,
}

impl TopicDispatcher {
    pub fn new() -> Self {
        Self::with_inbox_capacity(DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_inbox_capacity(capacity: usize) -> Self {
        Self {
            routes: default_routes(),
            subscribers: Mutex::new(Vec::new()),
            inbox_capacity: capacity.max(1),
            undecodable: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Add a subscriber and return its inbox. Replaces an existing entry
    /// with the same name.
    pub fn register(
        &self,
        name: &str,
        filter: TopicFilter,
    ) -> mpsc::Receiver<PushMessage> {
        let (tx, rx) = mpsc::channel(self.inbox_capacity);
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|s| s.name != name);
        subs.push(Subscriber {
            name: name.to_string(),
            filter,
            tx,
        });
        rx
    }

    /// Remove a subscriber, closing its inbox. Returns `true` if it existed.
    pub fn remove(&self, name: &str) -> bool {
        let mut subs = self.subscribers.lock().unwrap();
        let before = subs.len();
        subs.retain(|s| s.name != name);
        subs.len() != before
    }

    /// Filters of every remaining subscriber.
    pub fn filters(&self) -> Vec<TopicFilter> {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.filter.clone())
            .collect()
    }

    /// Number of frames dropped as undecodable so far.
    pub fn undecodable_count(&self) -> u64 {
        self.undecodable.load(Ordering::Relaxed)
    }

    /// Number of messages dropped because a subscription inbox was full.
    pub fn overflow_count(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Classify `text` and deliver it to at most one subscriber.
    pub fn dispatch(&self, text: &str) -> DispatchOutcome {
        let message = match decode(text, &self.routes) {
            Ok(message) => message,
            Err(e) => {
                self.undecodable.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, len = text.len(), preview = %preview(text), "message undecodable");
                return DispatchOutcome::Undecodable;
            }
        };

        let topic = message.topic();
        let mut subs = self.subscribers.lock().unwrap();
        let Some(pos) = subs.iter().position(|s| s.filter.accepts(&message)) else {
            tracing::debug!(topic = %topic, "no subscriber for message");
            return DispatchOutcome::Unrouted(topic);
        };

        let name = subs[pos].name.clone();
        match subs[pos].tx.try_send(message) {
            Ok(()) => DispatchOutcome::Routed(name),
            Err(TrySendError::Full(_)) => {
                self.overflowed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(subscription = %name, topic = %topic, "subscription inbox full; message dropped");
                DispatchOutcome::Overflow(name)
            }
            Err(TrySendError::Closed(_)) => {
                // Inbox dropped: the subscription task already finished.
                subs.remove(pos);
                tracing::debug!(subscription = %name, topic = %topic, "subscriber gone");
                DispatchOutcome::Unrouted(topic)
            }
        }
    }
}

impl Default for TopicDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundSink for TopicDispatcher {
    fn on_message(&self, text: &str) {
        self.dispatch(text);
    }

    /// The push channel stopped for good: close every inbox so the
    /// subscription tasks end.
    fn on_closed(&self) {
        let dropped = std::mem::take(&mut *self.subscribers.lock().unwrap());
        if !dropped.is_empty() {
            tracing::warn!(count = dropped.len(), "push channel closed; ending subscriptions");
        }
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(120) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
