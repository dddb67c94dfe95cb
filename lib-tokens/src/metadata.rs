//! Asset metadata cache
//!
//! Bounded LRU of asset records sitting in front of durable storage. It is
//! never authoritative: the ledger consults pending overlays first and only
//! refreshes entries when a flush reaches durable storage.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::asset::AssetRecord;
use crate::errors::{TokenError, TokenResult};

/// Default number of records held
pub const DEFAULT_METADATA_CAPACITY: usize = 500_000;

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
}

impl MetadataStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = (self.hits + self.misses) as f64;
        if total == 0.0 {
            0.0
        } else {
            (self.hits as f64 / total) * 100.0
        }
    }
}

struct Inner {
    records: LruCache<String, AssetRecord>,
    stats: MetadataStats,
}

/// Fixed-capacity name -> record cache, safe to share by reference
pub struct MetadataCache {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MetadataCache")
            .field("len", &inner.records.len())
            .field("capacity", &inner.records.cap())
            .finish()
    }
}

impl MetadataCache {
    pub fn new(capacity: usize) -> TokenResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(TokenError::ZeroCapacity)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                records: LruCache::new(capacity),
                stats: MetadataStats::default(),
            }),
        })
    }

    /// Look up a record, marking it most recently used
    pub fn get(&self, name: &str) -> Option<AssetRecord> {
        let mut inner = self.inner.lock();
        let found = inner.records.get(name).cloned();
        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        found
    }

    /// Presence check that leaves recency untouched
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().records.contains(name)
    }

    /// Insert or overwrite, evicting the least recently used record when full
    pub fn put(&self, record: AssetRecord) {
        let mut inner = self.inner.lock();
        let name = record.name().to_string();
        let evicts = !inner.records.contains(&name) && inner.records.len() == inner.records.cap().get();
        inner.records.put(name, record);
        if evicts {
            inner.stats.evictions += 1;
        }
    }

    pub fn erase(&self, name: &str) {
        self.inner.lock().records.pop(name);
    }

    pub fn clear(&self) {
        self.inner.lock().records.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().records.cap().get()
    }

    pub fn stats(&self) -> MetadataStats {
        let inner = self.inner.lock();
        MetadataStats {
            entry_count: inner.records.len(),
            ..inner.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetDescriptor;
    use lib_types::{BlockHash, COIN};
    use proptest::prelude::*;

    fn record(name: &str) -> AssetRecord {
        AssetRecord {
            descriptor: AssetDescriptor::new(name, 10 * COIN, 0, true),
            height: 1,
            block_hash: BlockHash::zero(),
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(MetadataCache::new(0), Err(TokenError::ZeroCapacity)));
    }

    #[test]
    fn test_eviction_follows_recency() {
        let cache = MetadataCache::new(2).unwrap();
        cache.put(record("AAA"));
        cache.put(record("BBB"));

        // touching AAA leaves BBB as the eviction candidate
        assert!(cache.get("AAA").is_some());
        cache.put(record("CCC"));

        assert!(cache.contains("AAA"));
        assert!(!cache.contains("BBB"));
        assert!(cache.contains("CCC"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_untouched_overflow_evicts_first_inserted() {
        let cache = MetadataCache::new(3).unwrap();
        for name in ["AAA", "BBB", "CCC", "DDD"] {
            cache.put(record(name));
        }

        assert!(!cache.contains("AAA"));
        assert!(cache.contains("BBB"));
        assert!(cache.contains("CCC"));
        assert!(cache.contains("DDD"));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_put_overwrites_without_eviction() {
        let cache = MetadataCache::new(1).unwrap();
        cache.put(record("AAA"));
        let mut updated = record("AAA");
        updated.descriptor.amount = 20 * COIN;
        cache.put(updated);

        assert_eq!(cache.get("AAA").unwrap().descriptor.amount, 20 * COIN);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_stats() {
        let cache = MetadataCache::new(4).unwrap();
        cache.put(record("AAA"));
        assert!(cache.get("AAA").is_some());
        assert!(cache.get("ZZZ").is_none());
        cache.erase("AAA");
        assert!(cache.get("AAA").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entry_count, 0);
        assert!((stats.hit_rate() - 33.333).abs() < 0.01);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity_and_keeps_newest(
            capacity in 1usize..8,
            names in proptest::collection::vec(0u8..20, 1..60),
        ) {
            let cache = MetadataCache::new(capacity).unwrap();
            for n in &names {
                cache.put(record(&format!("N{:03}", n)));
                prop_assert!(cache.len() <= capacity);
            }
            let last = names[names.len() - 1];
            let last_name = format!("N{:03}", last);
            prop_assert!(cache.contains(&last_name));
        }

        #[test]
        fn prop_distinct_overflow_evicts_oldest(capacity in 1usize..8) {
            let cache = MetadataCache::new(capacity).unwrap();
            for n in 0..=capacity {
                cache.put(record(&format!("N{:03}", n)));
            }
            prop_assert!(!cache.contains("N000"));
            for n in 1..=capacity {
                let name = format!("N{:03}", n);
                prop_assert!(cache.contains(&name));
            }
        }
    }
}
