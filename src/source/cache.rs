//! Byte-budgeted LRU cache of PDFs handed between tool calls

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;

/// Where a cached PDF came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfKind {
    /// An uploaded base document
    Base,
    /// A base document with injected form fields
    Surface,
    /// A surface PDF with submitted values
    Filled,
}

#[derive(Debug, Clone)]
pub struct CachedPdf {
    pub data: Vec<u8>,
    pub kind: PdfKind,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub max_bytes: usize,
}

struct CacheInner {
    lru: LruCache<String, CachedPdf>,
    total_bytes: usize,
}

/// PDF cache with entry count and byte budget limits
pub struct PdfCache {
    inner: Mutex<CacheInner>,
    max_bytes: usize,
}

impl PdfCache {
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::new(capacity),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Store a PDF under a fresh key and return the key.
    ///
    /// Returns `None` when the document alone exceeds the byte budget; older
    /// entries are evicted until the new one fits.
    pub fn store(&self, kind: PdfKind, data: Vec<u8>) -> Option<String> {
        let size = data.len();
        if size > self.max_bytes {
            tracing::warn!(bytes = size, max = self.max_bytes, "PDF too large to cache");
            return None;
        }

        let mut inner = self.inner.lock();
        let key = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !inner.lru.contains(&candidate) {
                break candidate;
            }
        };

        while inner.total_bytes + size > self.max_bytes || inner.lru.len() == inner.lru.cap().get() {
            match inner.lru.pop_lru() {
                Some((evicted, entry)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(entry.data.len());
                    tracing::debug!(key = %evicted, "evicted cached PDF");
                }
                None => break,
            }
        }

        inner.total_bytes += size;
        inner.lru.put(
            key.clone(),
            CachedPdf {
                data,
                kind,
                stored_at: Utc::now(),
            },
        );
        Some(key)
    }

    pub fn get(&self, key: &str) -> Option<CachedPdf> {
        self.inner.lock().lru.get(key).cloned()
    }

    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().lru.get(key).map(|entry| entry.data.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<CachedPdf> {
        let mut inner = self.inner.lock();
        let entry = inner.lru.pop(key)?;
        inner.total_bytes = inner.total_bytes.saturating_sub(entry.data.len());
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.lru.len(),
            total_bytes: inner.total_bytes,
            max_bytes: self.max_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_get() {
        let cache = PdfCache::new(10, 1024);
        assert!(cache.is_empty());

        let key = cache.store(PdfKind::Surface, vec![1, 2, 3]).unwrap();
        assert_eq!(key.len(), 36);
        assert!(cache.contains(&key));

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.kind, PdfKind::Surface);
        assert_eq!(cache.get_bytes(&key), Some(vec![1, 2, 3]));
        assert_eq!(cache.stats().total_bytes, 3);
    }

    #[test]
    fn test_entry_limit_evicts_oldest() {
        let cache = PdfCache::new(2, 1024);
        let a = cache.store(PdfKind::Base, vec![1]).unwrap();
        let b = cache.store(PdfKind::Base, vec![2]).unwrap();
        let c = cache.store(PdfKind::Base, vec![3]).unwrap();

        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.stats().total_bytes, 2);
    }

    #[test]
    fn test_byte_budget_evicts_least_recently_used() {
        let cache = PdfCache::new(10, 100);
        let a = cache.store(PdfKind::Filled, vec![0u8; 30]).unwrap();
        let b = cache.store(PdfKind::Filled, vec![0u8; 30]).unwrap();
        let c = cache.store(PdfKind::Filled, vec![0u8; 30]).unwrap();

        // touching `a` makes `b` the eviction candidate
        assert!(cache.get(&a).is_some());
        let d = cache.store(PdfKind::Filled, vec![0u8; 30]).unwrap();

        assert!(!cache.contains(&b));
        for key in [&a, &c, &d] {
            assert!(cache.contains(key));
        }
        assert_eq!(cache.stats().total_bytes, 90);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let cache = PdfCache::new(10, 50);
        assert!(cache.store(PdfKind::Base, vec![0u8; 100]).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_releases_bytes() {
        let cache = PdfCache::new(10, 1024);
        let key = cache.store(PdfKind::Base, vec![0u8; 40]).unwrap();
        assert_eq!(cache.remove(&key).map(|e| e.data.len()), Some(40));
        assert_eq!(cache.stats().total_bytes, 0);
        assert!(cache.remove(&key).is_none());
    }
}
