//! In-process [`ResultCache`] for single-node deployments.
//!
//! Outcomes are held as serialized bytes, the same representation a networked
//! cache would store. Every slot, reservations included, expires after the
//! configured TTL; a reservation orphaned by a crashed worker therefore frees
//! itself. When full, expired slots go first, then the oldest finished
//! outcome; reservations are evicted only when nothing else is left.

use super::{CacheLookup, CachedOutcome, ResultCache};
use async_trait::async_trait;
use ct_core::{QueryStoreError, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

enum Slot {
    Pending,
    Stored(Vec<u8>),
}

struct Entry {
    slot: Slot,
    written: Instant,
}

impl Entry {
    fn new(slot: Slot) -> Self {
        Self {
            slot,
            written: Instant::now(),
        }
    }
}

pub struct MemoryResultCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    max_entries: usize,
}

impl MemoryResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn expired(&self, entry: &Entry) -> bool {
        entry.written.elapsed() >= self.ttl
    }

    /// Insert and evict down to `max_entries`. Called with the lock held.
    fn insert(&self, entries: &mut HashMap<String, Entry>, key: &str, slot: Slot) {
        entries.insert(key.to_string(), Entry::new(slot));
        if entries.len() <= self.max_entries {
            return;
        }
        entries.retain(|_, entry| !self.expired(entry));
        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .min_by_key(|(_, entry)| (matches!(entry.slot, Slot::Pending), entry.written))
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    debug!("Evicting cache entry {}", k);
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Result<CachedOutcome> {
    serde_json::from_slice(bytes)
        .map_err(|e| QueryStoreError::CacheUnavailable(format!("corrupt cache entry: {}", e)))
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, key: &str) -> Result<CacheLookup> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(key) else {
            return Ok(CacheLookup::Absent);
        };
        if self.expired(entry) {
            entries.remove(key);
            return Ok(CacheLookup::Absent);
        }
        match &entry.slot {
            Slot::Pending => Ok(CacheLookup::Pending),
            Slot::Stored(bytes) => decode(bytes).map(CacheLookup::from),
        }
    }

    async fn put(&self, key: &str, outcome: &CachedOutcome) -> Result<()> {
        let bytes = serde_json::to_vec(outcome)
            .map_err(|e| QueryStoreError::CacheUnavailable(e.to_string()))?;
        let mut entries = self.entries.lock().await;
        self.insert(&mut entries, key, Slot::Stored(bytes));
        Ok(())
    }

    async fn reserve(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let claimable = match entries.get(key) {
            None => true,
            Some(entry) if self.expired(entry) => true,
            Some(Entry {
                slot: Slot::Pending,
                ..
            }) => false,
            Some(Entry {
                slot: Slot::Stored(bytes),
                ..
            }) => matches!(decode(bytes), Ok(CachedOutcome::Failed(_)) | Err(_)),
        };
        if claimable {
            self.insert(&mut entries, key, Slot::Pending);
        }
        Ok(claimable)
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if matches!(entries.get(key), Some(Entry { slot: Slot::Pending, .. })) {
            entries.remove(key);
        }
        Ok(())
    }
}
