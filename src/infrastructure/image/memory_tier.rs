//! Cost-bounded in-memory tier.

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::{debug, trace};

use crate::domain::entities::{CacheEntry, CacheKey};

/// Default memory budget in bytes of payload (32 MB).
pub const DEFAULT_COST_LIMIT: usize = 32 * 1024 * 1024;

/// In-memory entries bounded by total payload size.
///
/// Eviction walks from the least recently used entry until the total cost fits
/// the limit, so one large insert may push out several small entries. A limit
/// of zero disables the bound.
///
/// Not synchronized: the tiered cache owns it from its command task.
pub struct MemoryTier {
    entries: LruCache<CacheKey, CacheEntry>,
    total_cost: usize,
    cost_limit: usize,
    hits: u64,
    misses: u64,
}

impl MemoryTier {
    /// Creates a tier with the given byte budget.
    #[must_use]
    pub fn new(cost_limit: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_cost: 0,
            cost_limit,
            hits: 0,
            misses: 0,
        }
    }

    /// Returns a copy of an entry, marking it used at `now`.
    pub fn get(&mut self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.touch(now);
            self.hits += 1;
            trace!(key = %key, "Memory tier hit");
            Some(entry.clone())
        } else {
            self.misses += 1;
            trace!(key = %key, "Memory tier miss");
            None
        }
    }

    /// Looks at an entry without promoting it or counting a hit.
    #[must_use]
    pub fn peek(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    /// Inserts an entry, evicting older ones until the budget fits.
    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        let cost = entry.cost();
        if self.cost_limit > 0 && cost > self.cost_limit {
            debug!(key = %key, cost, limit = self.cost_limit, "Entry exceeds memory budget, not kept in memory");
            self.remove(&key);
            return;
        }

        if let Some(old) = self.entries.put(key, entry) {
            self.total_cost -= old.cost();
        }
        self.total_cost += cost;
        self.evict_to_fit();
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let removed = self.entries.pop(key)?;
        self.total_cost -= removed.cost();
        Some(removed)
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        let count = self.entries.len();
        self.entries.clear();
        self.total_cost = 0;
        debug!(count, "Cleared memory tier");
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry costs.
    #[must_use]
    pub const fn total_cost(&self) -> usize {
        self.total_cost
    }

    /// Returns tier statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_rate,
            size: self.entries.len(),
            total_cost: self.total_cost,
        }
    }

    fn evict_to_fit(&mut self) {
        if self.cost_limit == 0 {
            return;
        }
        while self.total_cost > self.cost_limit {
            let Some((key, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.total_cost -= evicted.cost();
            debug!(key = %key, cost = evicted.cost(), "Evicted from memory tier");
        }
    }
}

/// Statistics about memory tier performance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of memory hits.
    pub hits: u64,
    /// Number of memory misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of entries.
    pub size: usize,
    /// Current total payload bytes.
    pub total_cost: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} entries, {} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.total_cost, self.hit_rate, self.hits, self.misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;

    fn entry(size: usize) -> CacheEntry {
        CacheEntry::new(
            Bytes::from(vec![0u8; size]),
            Some(Arc::new(image::DynamicImage::new_rgba8(1, 1))),
            None,
        )
    }

    #[test]
    fn test_put_and_get() {
        let mut tier = MemoryTier::new(100);
        let key = CacheKey::new("a");

        tier.put(key.clone(), entry(10));

        assert_eq!(tier.get(&key, Utc::now()).map(|e| e.cost()), Some(10));
        assert_eq!(tier.total_cost(), 10);
    }

    #[test]
    fn test_eviction_is_by_cost_not_count() {
        let mut tier = MemoryTier::new(100);
        let now = Utc::now();

        tier.put(CacheKey::new("a"), entry(30));
        tier.put(CacheKey::new("b"), entry(30));
        tier.put(CacheKey::new("c"), entry(30));
        assert_eq!(tier.len(), 3);

        tier.get(&CacheKey::new("a"), now);
        tier.put(CacheKey::new("big"), entry(60));

        assert!(tier.peek(&CacheKey::new("b")).is_none());
        assert!(tier.peek(&CacheKey::new("c")).is_none());
        assert!(tier.peek(&CacheKey::new("a")).is_some());
        assert!(tier.peek(&CacheKey::new("big")).is_some());
        assert_eq!(tier.total_cost(), 90);
    }

    #[test]
    fn test_replacing_entry_updates_cost() {
        let mut tier = MemoryTier::new(0);
        let key = CacheKey::new("a");

        tier.put(key.clone(), entry(10));
        tier.put(key.clone(), entry(4));

        assert_eq!(tier.len(), 1);
        assert_eq!(tier.total_cost(), 4);
    }

    #[test]
    fn test_oversized_entry_is_not_kept() {
        let mut tier = MemoryTier::new(10);
        tier.put(CacheKey::new("small"), entry(5));
        tier.put(CacheKey::new("huge"), entry(11));

        assert!(tier.peek(&CacheKey::new("huge")).is_none());
        assert!(tier.peek(&CacheKey::new("small")).is_some());
    }

    #[test]
    fn test_stats() {
        let mut tier = MemoryTier::new(100);
        let key = CacheKey::new("a");
        tier.put(key.clone(), entry(1));

        let _ = tier.get(&key, Utc::now());
        let _ = tier.get(&CacheKey::new("missing"), Utc::now());

        let stats = tier.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!(stats.to_string().contains("50.0% hit rate"));
    }

    #[test]
    fn test_clear_resets_cost() {
        let mut tier = MemoryTier::new(100);
        tier.put(CacheKey::new("a"), entry(10));
        tier.clear();

        assert!(tier.is_empty());
        assert_eq!(tier.total_cost(), 0);
    }
}
