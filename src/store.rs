use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};

/// The Store is responsible for managing key-value pairs, with optional time-to-live settings for
/// each key. The store is designed to be thread-safe, allowing it to be shared and cloned cheaply
/// using reference counting.
///
/// Every access goes through [`InnerStore::lock`], which serializes readers and writers over the
/// whole map. Expiration is lazy: an expired entry is invisible to reads from its deadline on and
/// is removed by the read that finds it. [`InnerStoreLocked::purge_expired`] reclaims entries that
/// are never read again; see [`crate::sweeper`].
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Default)]
pub struct InnerStore {
    state: Mutex<State>,
}

impl InnerStore {
    pub fn lock(&self) -> InnerStoreLocked<'_> {
        // No operation leaves the state half-updated, so a panic in another holder does not
        // invalidate it.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        InnerStoreLocked { state }
    }
}

pub struct InnerStoreLocked<'a> {
    state: MutexGuard<'a, State>,
}

impl<'a> InnerStoreLocked<'a> {
    /// Stores `data` under `key` without expiration, replacing any previous entry and its TTL.
    pub fn set(&mut self, key: Key, data: Bytes) {
        self.insert(key, data, None);
    }

    /// Stores `data` under `key`, expiring `ttl` from now.
    pub fn set_with_ttl(&mut self, key: Key, data: Bytes, ttl: Duration) {
        // A deadline past the clock's range is as good as none.
        let expires_at = Instant::now().checked_add(ttl);
        self.insert(key, data, expires_at);
    }

    fn insert(&mut self, key: Key, data: Bytes, expires_at: Option<Instant>) {
        let value = Value { data, expires_at };
        if let Some(previous) = self.state.keys.insert(key.clone(), value) {
            self.forget_expiration(previous.expires_at, key.clone());
        }

        if let Some(expires_at) = expires_at {
            self.state.expirations.insert((expires_at, key));
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        let now = Instant::now();

        let value = self.state.keys.get(key)?;
        if !value.is_expired(now) {
            return Some(value.data.clone());
        }

        self.remove(key);
        None
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        let (key, value) = self.state.keys.remove_entry(key)?;
        self.forget_expiration(value.expires_at, key);
        Some(value)
    }

    /// Number of entries held, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.state.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.keys.is_empty()
    }

    /// Removes up to `limit` entries whose deadline has passed and returns how many were
    /// removed. Further expired entries are left for the next call.
    pub fn purge_expired(&mut self, limit: usize) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        while removed < limit {
            let Some((expires_at, key)) = self.state.expirations.first().cloned() else {
                break;
            };
            if expires_at > now {
                break;
            }
            self.state.expirations.pop_first();

            // Only drop the entry if it still carries the deadline found in the index; a SET
            // that refreshed the key replaced it.
            let current = self.state.keys.get(&key).and_then(|value| value.expires_at);
            if current == Some(expires_at) {
                self.state.keys.remove(&key);
                removed += 1;
            }
        }

        removed
    }

    fn forget_expiration(&mut self, expires_at: Option<Instant>, key: Key) {
        if let Some(expires_at) = expires_at {
            self.state.expirations.remove(&(expires_at, key));
        }
    }
}

pub type Key = Bytes;

#[derive(Debug)]
pub struct Value {
    pub data: Bytes,
    pub expires_at: Option<Instant>,
}

impl Value {
    /// An entry is gone from its deadline on.
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Default)]
pub struct State {
    keys: HashMap<Key, Value>,
    expirations: BTreeSet<(Instant, Key)>,
}
