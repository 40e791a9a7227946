//! Keyed blackboard of messages.
//!
//! The store maps string keys to messages and holds exactly one reference
//! per entry. It is used to seed units with data (command-line arguments,
//! configuration) and as a shared scratchpad between units.
//!
//! Like the pool it has no lock of its own; the registry keeps both behind
//! the same lock and passes the pool in for reference bookkeeping.

use std::collections::BTreeMap;

use crate::message::{MessageId, MessagePool, MessageType};

#[derive(Debug, Default)]
pub struct Store {
    entries: BTreeMap<String, MessageId>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `id` under `key`, taking a reference to it.
    ///
    /// The previous occupant is released only after the new message is in
    /// place. Returns `Some(true)` if the key already existed, `None` if `id`
    /// is stale.
    pub fn set(&mut self, pool: &mut MessagePool, key: &str, id: MessageId) -> Option<bool> {
        pool.acquire(id)?;
        match self.entries.insert(key.to_string(), id) {
            Some(old) => {
                if pool.release(old).is_none() {
                    log::error!("store key '{}' held released message {}", key, old);
                }
                Some(true)
            }
            None => Some(false),
        }
    }

    /// Store a copy of `bytes` under `key`.
    ///
    /// The store ends up holding the only reference to the new message.
    pub fn set_bytes(
        &mut self,
        pool: &mut MessagePool,
        key: &str,
        message_type: MessageType,
        bytes: &[u8],
    ) -> bool {
        let id = pool.allocate_from(message_type, bytes);
        let existed = self.set(pool, key, id).unwrap_or(false);
        pool.release(id);
        existed
    }

    /// The message currently stored under `key`. No reference is transferred.
    pub fn get(&self, key: &str) -> Option<MessageId> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every held reference and empty the store.
    pub fn clear(&mut self, pool: &mut MessagePool) {
        for (_, id) in std::mem::take(&mut self.entries) {
            pool.release(id);
        }
    }
}
