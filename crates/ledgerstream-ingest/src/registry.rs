//! Subscription lifecycle: named logical streams over one push channel.
//!
//! Each active subscription owns a task that drains its dispatcher inbox into
//! the [`MessageHandler`] until it is cancelled or the push channel closes.
//! Start and stop are serialised by a single lock around the name table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use ledgerstream_core::error::TransportError;
use ledgerstream_ws::PushChannel;

use crate::dispatcher::{PushMessage, TopicDispatcher, TopicFilter};
use crate::handler::MessageHandler;

/// Name used for the closed-ledger subscription started over HTTP.
pub const LEDGER_SUBSCRIPTION: &str = "ledger_subscribe";
/// Name used for the account-transaction subscription started over HTTP.
pub const ACCOUNTS_SUBSCRIPTION: &str = "accounts_subscribe";

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Subscription {0} is already active")]
    AlreadyActive(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Subscription {0} not found")]
    NotFound(String),

    #[error("Push channel error: {0}")]
    Transport(#[from] TransportError),
}

/// The subscribe/unsubscribe side of the push channel.
#[async_trait]
pub trait PushControl: Send + Sync + 'static {
    async fn subscribe(&self, key: &str, payload: &Value) -> Result<(), TransportError>;
    async fn unsubscribe(&self, key: &str, payload: Option<&Value>) -> Result<(), TransportError>;
}

#[async_trait]
impl PushControl for PushChannel {
    async fn subscribe(&self, key: &str, payload: &Value) -> Result<(), TransportError> {
        PushChannel::subscribe(self, key, payload).await
    }

    async fn unsubscribe(&self, key: &str, payload: Option<&Value>) -> Result<(), TransportError> {
        PushChannel::unsubscribe(self, key, payload).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Idle,
    Active,
}

/// Public view of an active subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub name: String,
    pub topic: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<String>,
}

struct ActiveSubscription {
    filter: TopicFilter,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    /// A task that ended on its own (push channel closed) counts as Idle.
    fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Owns the name → subscription table.
pub struct SubscriptionRegistry {
    control: Arc<dyn PushControl>,
    dispatcher: Arc<TopicDispatcher>,
    handler: Arc<dyn MessageHandler>,
    active: Mutex<HashMap<String, ActiveSubscription>>,
}

impl SubscriptionRegistry {
    pub fn new(
        control: Arc<dyn PushControl>,
        dispatcher: Arc<TopicDispatcher>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            control,
            dispatcher,
            handler,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start a named subscription. Rejected if the name is already active or
    /// the filter is missing required parameters.
    pub async fn start(&self, name: &str, filter: TopicFilter) -> Result<(), SubscriptionError> {
        validate(name, &filter)?;

        let mut active = self.active.lock().await;
        if active.get(name).is_some_and(ActiveSubscription::is_active) {
            return Err(SubscriptionError::AlreadyActive(name.to_string()));
        }
        active.remove(name);

        // Register before subscribing so no early message is lost.
        let inbox = self.dispatcher.register(name, filter.clone());
        let payload = subscribe_payload(name, &filter);
        if let Err(e) = self.control.subscribe(name, &payload).await {
            self.dispatcher.remove(name);
            tracing::warn!(subscription = %name, error = %e, "subscribe failed");
            return Err(e.into());
        }

        let (cancel, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(run_subscription(
            name.to_string(),
            inbox,
            cancel_rx,
            self.handler.clone(),
        ));
        active.insert(name.to_string(), ActiveSubscription { filter, cancel, task });

        tracing::info!(subscription = %name, "subscription started");
        Ok(())
    }

    /// Stop a named subscription and wait for its task to end.
    ///
    /// Sends an unsubscribe only for streams/accounts no remaining
    /// subscription still needs. A failed unsubscribe is logged; the
    /// subscription is stopped locally either way.
    pub async fn stop(&self, name: &str) -> Result<(), SubscriptionError> {
        let mut active = self.active.lock().await;
        let sub = match active.remove(name) {
            Some(sub) if sub.is_active() => sub,
            _ => return Err(SubscriptionError::NotFound(name.to_string())),
        };

        self.dispatcher.remove(name);
        let payload = unsubscribe_payload(name, &sub.filter, &self.dispatcher.filters());
        if let Err(e) = self.control.unsubscribe(name, payload.as_ref()).await {
            tracing::warn!(subscription = %name, error = %e, "unsubscribe failed");
        }
        drop(active);

        let _ = sub.cancel.send(());
        if let Err(e) = sub.task.await {
            tracing::error!(subscription = %name, error = %e, "subscription task panicked");
        }
        tracing::info!(subscription = %name, "subscription stopped");
        Ok(())
    }

    pub async fn state(&self, name: &str) -> SubscriptionState {
        match self.active.lock().await.get(name) {
            Some(sub) if sub.is_active() => SubscriptionState::Active,
            _ => SubscriptionState::Idle,
        }
    }

    /// Active subscriptions, sorted by name.
    pub async fn active(&self) -> Vec<SubscriptionInfo> {
        let active = self.active.lock().await;
        let mut out: Vec<SubscriptionInfo> = active
            .iter()
            .filter(|(_, sub)| sub.is_active())
            .map(|(name, sub)| match &sub.filter {
                TopicFilter::Ledger => SubscriptionInfo {
                    name: name.clone(),
                    topic: "ledger",
                    accounts: Vec::new(),
                },
                TopicFilter::Accounts(accounts) => SubscriptionInfo {
                    name: name.clone(),
                    topic: "accounts",
                    accounts: accounts.clone(),
                },
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Stop every active subscription.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.active.lock().await.keys().cloned().collect();
        for name in names {
            // NotFound here means the task already ended on its own.
            let _ = self.stop(&name).await;
        }
    }
}

async fn run_subscription(
    name: String,
    mut inbox: mpsc::Receiver<PushMessage>,
    mut cancel: oneshot::Receiver<()>,
    handler: Arc<dyn MessageHandler>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => break,
            msg = inbox.recv() => match msg {
                Some(msg) => handler.handle(&name, msg).await,
                None => {
                    tracing::info!(subscription = %name, "inbox closed");
                    break;
                }
            },
        }
    }
    tracing::debug!(subscription = %name, "subscription task ended");
}

fn validate(name: &str, filter: &TopicFilter) -> Result<(), SubscriptionError> {
    if name.trim().is_empty() {
        return Err(SubscriptionError::InvalidParams("subscription name is empty".into()));
    }
    if let TopicFilter::Accounts(accounts) = filter {
        if accounts.is_empty() {
            return Err(SubscriptionError::InvalidParams("accounts list is empty".into()));
        }
        if accounts.iter().any(|a| a.trim().is_empty()) {
            return Err(SubscriptionError::InvalidParams("accounts list has an empty entry".into()));
        }
    }
    Ok(())
}

fn subscribe_payload(name: &str, filter: &TopicFilter) -> Value {
    match filter {
        TopicFilter::Ledger => json!({"id": name, "command": "subscribe", "streams": ["ledger"]}),
        TopicFilter::Accounts(accounts) => {
            json!({"id": name, "command": "subscribe", "accounts": accounts})
        }
    }
}

/// Build the unsubscribe for `filter`, minus whatever `remaining` still needs.
fn unsubscribe_payload(name: &str, filter: &TopicFilter, remaining: &[TopicFilter]) -> Option<Value> {
    match filter {
        TopicFilter::Ledger => {
            let still_needed = remaining.iter().any(|f| matches!(f, TopicFilter::Ledger));
            (!still_needed)
                .then(|| json!({"id": name, "command": "unsubscribe", "streams": ["ledger"]}))
        }
        TopicFilter::Accounts(accounts) => {
            let released: Vec<&String> = accounts
                .iter()
                .filter(|a| {
                    !remaining.iter().any(|f| match f {
                        TopicFilter::Accounts(other) => other.contains(a),
                        TopicFilter::Ledger => false,
                    })
                })
                .collect();
            (!released.is_empty())
                .then(|| json!({"id": name, "command": "unsubscribe", "accounts": released}))
        }
    }
}
