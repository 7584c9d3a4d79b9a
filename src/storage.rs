//! Cache backend abstraction.
//!
//! Descendant-id lists are memoized in a key-value store with TTL. The store
//! is injected, so an application can back it with whatever shared cache it
//! runs; `MemoryBackend` is the in-process implementation. A backend is never
//! authoritative and callers treat every error from it as recoverable.

use crate::error::Result;
use crate::types::CacheItem;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Trait for cache backend implementations
pub trait CacheBackend: Send + Sync {
    /// Insert or update a key-value pair
    fn put(&mut self, key: &[u8], item: &CacheItem) -> Result<()>;

    /// Get a live value by key. Expired items read as missing.
    fn get(&self, key: &[u8]) -> Result<Option<CacheItem>>;

    /// Delete a key and return the old value if it existed
    fn delete(&mut self, key: &[u8]) -> Result<Option<CacheItem>>;

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Get all keys with a given prefix
    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>>;

    /// Total number of stored keys, expired ones included
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn stats(&self) -> Result<CacheStats>;

    /// Apply a group of operations
    fn batch(&mut self, ops: &[CacheOp]) -> Result<()>;

    /// Remove items whose expiration is at or before `now`
    fn cleanup_expired(&mut self, now: SystemTime) -> Result<usize>;

    /// Drop every entry
    fn clear(&mut self) -> Result<()>;
}

/// Cache operation for batch processing
#[derive(Debug, Clone)]
pub enum CacheOp {
    Delete { key: Bytes },
}

/// Cache backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub key_count: usize,
    /// Number of expired keys cleaned up
    pub expired_count: usize,
    /// Approximate size of keys and values in bytes
    pub size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub operations_count: u64,
}

/// In-memory cache backend using BTreeMap with lazy expiration
#[derive(Default)]
pub struct MemoryBackend {
    data: BTreeMap<Bytes, CacheItem>,
    stats: CacheStats,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_lookup(&self, hit: bool) {
        use std::sync::atomic::Ordering;
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl CacheBackend for MemoryBackend {
    fn put(&mut self, key: &[u8], item: &CacheItem) -> Result<()> {
        let key_bytes = Bytes::copy_from_slice(key);
        self.data.insert(key_bytes, item.clone());
        self.stats.operations_count += 1;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<CacheItem>> {
        let live = self
            .data
            .get(key)
            .filter(|item| !item.is_expired())
            .cloned();
        self.record_lookup(live.is_some());
        Ok(live)
    }

    fn delete(&mut self, key: &[u8]) -> Result<Option<CacheItem>> {
        let old_item = self.data.remove(key);
        self.stats.operations_count += 1;
        Ok(old_item)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Bytes>> {
        Ok(self
            .data
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.data.len())
    }

    fn stats(&self) -> Result<CacheStats> {
        use std::sync::atomic::Ordering;
        let mut stats = self.stats.clone();
        stats.key_count = self.data.len();
        stats.size_bytes = self.data.iter().map(|(k, v)| k.len() + v.value.len()).sum();
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        Ok(stats)
    }

    fn batch(&mut self, ops: &[CacheOp]) -> Result<()> {
        for op in ops {
            match op {
                CacheOp::Delete { key } => {
                    self.delete(key)?;
                }
            }
        }
        Ok(())
    }

    fn cleanup_expired(&mut self, now: SystemTime) -> Result<usize> {
        let before = self.data.len();
        self.data.retain(|_, item| !item.is_expired_at(now));
        let count = before - self.data.len();

        self.stats.expired_count += count;
        if count > 0 {
            log::debug!("Removed {} expired cache entries", count);
        }

        Ok(count)
    }

    fn clear(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_memory_backend_basic_ops() {
        let mut backend = MemoryBackend::new();

        let key = b"country::1_village";
        let item = CacheItem::new(b"[3,4]".to_vec());

        backend.put(key, &item).unwrap();
        let retrieved = backend.get(key).unwrap().unwrap();
        assert_eq!(retrieved.value, item.value);

        assert!(backend.contains_key(key).unwrap());
        assert!(!backend.contains_key(b"nonexistent").unwrap());

        let deleted = backend.delete(key).unwrap().unwrap();
        assert_eq!(deleted.value, item.value);
        assert!(!backend.contains_key(key).unwrap());
    }

    #[test]
    fn test_memory_backend_prefix_scan() {
        let mut backend = MemoryBackend::new();
        let item = CacheItem::new(b"[]".to_vec());

        backend.put(b"sector::1_cell", &item).unwrap();
        backend.put(b"sector::1_village", &item).unwrap();
        backend.put(b"cell::1_village", &item).unwrap();

        let keys = backend.keys_with_prefix(b"sector::").unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_expired_items_read_as_missing() {
        let mut backend = MemoryBackend::new();

        let now = SystemTime::now();
        let expired = CacheItem::with_expiration(b"[1]".to_vec(), now - Duration::from_secs(60));
        let valid = CacheItem::with_expiration(b"[2]".to_vec(), now + Duration::from_secs(60));

        backend.put(b"expired_key", &expired).unwrap();
        backend.put(b"valid_key", &valid).unwrap();

        assert!(backend.get(b"expired_key").unwrap().is_none());
        assert_eq!(backend.len().unwrap(), 2);

        let cleaned = backend.cleanup_expired(now).unwrap();
        assert_eq!(cleaned, 1);
        assert_eq!(backend.len().unwrap(), 1);
        assert!(backend.contains_key(b"valid_key").unwrap());
        assert_eq!(backend.stats().unwrap().expired_count, 1);
    }

    #[test]
    fn test_batch_and_hit_counters() {
        let mut backend = MemoryBackend::new();

        backend.put(b"key1", &CacheItem::new(b"[1]".to_vec())).unwrap();
        backend.put(b"key2", &CacheItem::new(b"[2]".to_vec())).unwrap();
        let ops = vec![
            CacheOp::Delete {
                key: Bytes::from_static(b"key1"),
            },
            CacheOp::Delete {
                key: Bytes::from_static(b"missing"),
            },
        ];
        backend.batch(&ops).unwrap();

        assert!(backend.get(b"key1").unwrap().is_none());
        assert!(backend.get(b"key2").unwrap().is_some());

        let stats = backend.stats().unwrap();
        assert_eq!(stats.key_count, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        backend.clear().unwrap();
        assert!(backend.is_empty().unwrap());
    }
}
