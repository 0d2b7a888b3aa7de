//! Handler trait invoked by subscription tasks.

use async_trait::async_trait;

use crate::dispatcher::PushMessage;

/// Receives each message routed to a subscription.
///
/// Invoked from the subscription's own task, one message at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, subscription: &str, message: PushMessage);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every `(subscription, message)` pair it receives.
    #[derive(Default)]
    pub struct Recorder {
        pub seen: Mutex<Vec<(String, PushMessage)>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, subscription: &str, message: PushMessage) {
            self.seen.lock().unwrap().push((subscription.to_string(), message));
        }
    }
}
