//! Expiring key/value cache shared by the source clients
//!
//! Expiry is lazy: an entry past its deadline is treated as absent by `get`
//! and dropped on the next write that touches it or by `purge_expired`.

use rustc_hash::FxHashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Thread-safe cache whose entries expire a fixed TTL after insertion.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<FxHashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `value`, replacing any previous entry and restarting its TTL
    pub fn set(&self, key: K, value: V) {
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(self.ttl),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    /// Get a live value; expired entries are reported as absent
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }
}
