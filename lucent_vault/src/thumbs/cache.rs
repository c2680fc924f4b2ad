//! Lucent Vault - Thumbnail Cache
//!
//! Memory-only LRU of decrypted thumbnails, bounded by entry count and by
//! total bytes. `clear` and `remove` advance a generation counter; inserts
//! tagged with an older generation are dropped, so a load that raced either
//! one cannot put plaintext back into memory.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::model::PhotoId;

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
}

struct Entry {
    bytes: Arc<Vec<u8>>,
    last_used: u64,
}

struct Inner {
    entries: HashMap<PhotoId, Entry>,
    bytes: usize,
    tick: u64,
    generation: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Thumbnail Cache
pub struct ThumbnailCache {
    max_entries: usize,
    max_bytes: usize,
    inner: Mutex<Inner>,
}

impl ThumbnailCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries,
            max_bytes,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                bytes: 0,
                tick: 0,
                generation: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Cached thumbnail bytes, if present
    pub fn get(&self, id: PhotoId) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        match inner.entries.get_mut(&id) {
            Some(entry) => {
                entry.last_used = tick;
                let bytes = Arc::clone(&entry.bytes);
                inner.hits += 1;
                Some(bytes)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or replace
    pub fn insert(&self, id: PhotoId, bytes: Vec<u8>) {
        let generation = self.generation();
        self.insert_if_current(id, Arc::new(bytes), generation);
    }

    /// Insert only if no `clear` or `remove` happened since `generation` was read.
    /// Returns whether the entry was stored.
    pub fn insert_if_current(&self, id: PhotoId, bytes: Arc<Vec<u8>>, generation: u64) -> bool {
        let size = bytes.len();
        let mut inner = self.inner.lock();

        if inner.generation != generation {
            return false;
        }

        if let Some(old) = inner.entries.remove(&id) {
            inner.bytes -= old.bytes.len();
        }

        if self.max_entries == 0 || size > self.max_bytes {
            log::debug!("Thumbnail {} not cached ({} bytes)", id, size);
            return false;
        }

        while inner.entries.len() >= self.max_entries || inner.bytes + size > self.max_bytes {
            if !Self::evict_one(&mut inner) {
                break;
            }
        }

        inner.tick += 1;
        let tick = inner.tick;
        inner.bytes += size;
        inner.entries.insert(
            id,
            Entry {
                bytes,
                last_used: tick,
            },
        );
        true
    }

    fn evict_one(inner: &mut Inner) -> bool {
        let victim = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| *id);

        match victim {
            Some(id) => {
                if let Some(entry) = inner.entries.remove(&id) {
                    inner.bytes -= entry.bytes.len();
                    inner.evictions += 1;
                }
                true
            }
            None => false,
        }
    }

    /// Drop one entry. Loads already in flight for any id will not be
    /// retained, which covers one that read the entry's blob before its
    /// photo was deleted.
    pub fn remove(&self, id: PhotoId) -> bool {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        match inner.entries.remove(&id) {
            Some(entry) => {
                inner.bytes -= entry.bytes.len();
                true
            }
            None => false,
        }
    }

    /// Drop every entry
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.bytes = 0;
        inner.generation += 1;
        dropped
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn contains(&self, id: PhotoId) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
            bytes: inner.bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_clear() {
        let cache = ThumbnailCache::new(10, 1024);
        let a = PhotoId::new();
        let b = PhotoId::new();

        assert!(cache.get(a).is_none());
        cache.insert(a, vec![1, 2, 3]);
        cache.insert(b, vec![4]);
        assert_eq!(cache.get(a).unwrap().as_slice(), &[1, 2, 3]);

        cache.insert(a, vec![9]);
        assert_eq!(cache.get(a).unwrap().as_slice(), &[9]);
        assert_eq!(cache.stats().bytes, 2);

        assert_eq!(cache.clear(), 2);
        assert!(cache.get(a).is_none());
        assert!(cache.get(b).is_none());
        assert_eq!(cache.stats().bytes, 0);
    }

    #[test]
    fn test_lru_by_entry_count() {
        let cache = ThumbnailCache::new(2, 1024);
        let (a, b, c) = (PhotoId::new(), PhotoId::new(), PhotoId::new());

        cache.insert(a, vec![0]);
        cache.insert(b, vec![0]);
        // Touch a so b becomes least recently used
        assert!(cache.get(a).is_some());
        cache.insert(c, vec![0]);

        assert!(cache.contains(a));
        assert!(!cache.contains(b));
        assert!(cache.contains(c));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_byte_budget() {
        let cache = ThumbnailCache::new(100, 10);
        let (a, b, c) = (PhotoId::new(), PhotoId::new(), PhotoId::new());

        cache.insert(a, vec![0; 6]);
        cache.insert(b, vec![0; 4]);
        cache.insert(c, vec![0; 5]);

        assert!(!cache.contains(a));
        assert!(cache.contains(b));
        assert!(cache.contains(c));
        assert!(cache.stats().bytes <= 10);

        // Larger than the whole budget: never cached
        let big = PhotoId::new();
        cache.insert(big, vec![0; 11]);
        assert!(!cache.contains(big));
    }

    #[test]
    fn test_stale_generation_rejected() {
        let cache = ThumbnailCache::new(10, 1024);
        let id = PhotoId::new();
        let generation = cache.generation();

        cache.clear();
        assert!(!cache.insert_if_current(id, Arc::new(vec![1]), generation));
        assert!(cache.get(id).is_none());
    }

    #[test]
    fn test_remove() {
        let cache = ThumbnailCache::new(10, 1024);
        let id = PhotoId::new();
        cache.insert(id, vec![1, 2]);
        assert!(cache.remove(id));
        assert!(!cache.remove(id));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_racing_remove_is_not_retained() {
        let cache = ThumbnailCache::new(10, 1024);
        let id = PhotoId::new();
        let generation = cache.generation();

        // Photo deleted between the blob read and the insert
        assert!(!cache.remove(id));
        assert!(!cache.insert_if_current(id, Arc::new(vec![1]), generation));
        assert!(!cache.contains(id));

        cache.insert(id, vec![2]);
        assert!(cache.contains(id));
    }
}
