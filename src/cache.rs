//! Process-wide caches, owned by [`crate::context::AppContext`] and injected
//! into the components that use them.
//!
//! - [`EmbeddingCache`]: content hash → vector, no eviction.
//! - [`SearchCache`]: normalized query signature → response, TTL expiry only.
//!
//! Both use `std::sync::RwLock`; every mutation is a single map operation
//! under the write lock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &str) -> Option<Vec<f32>> {
        self.entries.read().ok()?.get(hash).cloned()
    }

    pub fn insert(&self, hash: String, vector: Vec<f32>) {
        if let Ok(mut map) = self.entries.write() {
            map.insert(hash, vector);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.entries.write() {
            map.clear();
        }
    }
}

/// A TTL cache. Expired entries are dropped lazily on lookup.
#[derive(Debug)]
pub struct SearchCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> SearchCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        {
            let map = self.entries.read().ok()?;
            match map.get(key) {
                Some((at, value)) if at.elapsed() < self.ttl => return Some(value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        if let Ok(mut map) = self.entries.write() {
            if map.get(key).is_some_and(|(at, _)| at.elapsed() >= self.ttl) {
                map.remove(key);
            }
        }
        None
    }

    pub fn insert(&self, key: String, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut map) = self.entries.write() {
            map.insert(key, (Instant::now(), value));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.entries.write() {
            map.clear();
        }
    }
}
