//! Subscribe payloads remembered for replay after a reconnect.

use std::sync::{Arc, Mutex};

/// Ordered `key → subscribe payload` book, shared with the connection task.
#[derive(Clone, Default)]
pub struct ReplayBook {
    entries: Arc<Mutex<Vec<(String, String)>>>,
}

impl ReplayBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember (or replace) the payload stored under `key`.
    pub fn remember(&self, key: &str, payload: String) {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = payload,
            None => entries.push((key.to_string(), payload)),
        }
    }

    /// Forget the payload stored under `key`. Returns `true` if one existed.
    pub fn forget(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        entries.len() != before
    }

    /// Payloads in the order they were first remembered.
    pub fn payloads(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
