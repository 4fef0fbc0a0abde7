//! In-memory value store.
//!
//! Explicitly out of scope as a component to design in depth — the
//! specification calls it "a trivial key→bytes mapping with no eviction" —
//! but a working node needs an instance of it. A mutex-guarded `HashMap`
//! gives atomic read-or-write per key, as the concurrency model requires:
//! FIND_VALUE readers and STORE writers must not tear.

use std::collections::HashMap;
use std::sync::Mutex;

use kadnet_dht::Identifier;

/// A key→bytes mapping with no expiration, no persistence, and no capacity
/// limit.
#[derive(Default)]
pub struct ValueStore {
    data: Mutex<HashMap<Identifier, Vec<u8>>>,
}

impl ValueStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`'s value.
    pub fn put(&self, key: Identifier, value: Vec<u8>) {
        let mut guard = self.data.lock().expect("value store mutex poisoned");
        guard.insert(key, value);
    }

    /// Fetch `key`'s value, if stored locally.
    pub fn get(&self, key: &Identifier) -> Option<Vec<u8>> {
        let guard = self.data.lock().expect("value store mutex poisoned");
        guard.get(key).cloned()
    }
}
