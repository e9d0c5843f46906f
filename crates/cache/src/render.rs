//! In-memory cache of rendered page bitmaps with LRU eviction.
//!
//! Entries are keyed by (uid, rotation, resolution), so a page's cached
//! renders at stale rotations can be dropped in one sweep when the page is
//! rotated or removed. Eviction beyond invalidation is least-recently-used,
//! bounded by both an entry count and a byte budget, because preview bitmaps
//! at high DPI are memory-heavy.

use image::RgbaImage;
use quire_doc_model::{PageUid, Rotation};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Cache key: one rendered appearance of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub uid: PageUid,
    pub rotation: Rotation,
    /// Render resolution in dots per inch.
    pub resolution: u32,
}

impl RenderKey {
    pub fn new(uid: PageUid, rotation: Rotation, resolution: u32) -> Self {
        Self { uid, rotation, resolution }
    }
}

/// A cached bitmap. The pixel data is shared, so cloning a cache hit is
/// cheap and does not double memory accounting.
#[derive(Debug, Clone)]
pub struct CachedRender {
    pub key: RenderKey,
    pub image: Arc<RgbaImage>,
}

impl CachedRender {
    fn new(key: RenderKey, image: Arc<RgbaImage>) -> Self {
        Self { key, image }
    }

    /// Memory attributed to this entry in bytes.
    pub fn memory_size(&self) -> usize {
        self.image.as_raw().len()
    }
}

/// Entry and byte limits for the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudget {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self { max_entries: 512, max_bytes: 256 * 1024 * 1024 }
    }
}

impl CacheBudget {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_mb(mut self, megabytes: usize) -> Self {
        self.max_bytes = megabytes * 1024 * 1024;
        self
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of bitmaps currently cached.
    pub entry_count: usize,
    /// Total memory used by cached bitmaps (bytes).
    pub bytes_used: usize,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Entries dropped by LRU eviction (not by invalidation).
    pub evictions: u64,
    /// Entries dropped because their page was rotated, removed, or cleared.
    pub invalidations: u64,
}

impl CacheStats {
    /// Cache hit rate from 0.0 to 1.0.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState {
    entries: HashMap<RenderKey, CachedRender>,
    /// Most recently used at the back, eviction candidates at the front.
    lru_queue: VecDeque<RenderKey>,
    bytes_used: usize,
    budget: CacheBudget,
    stats: CacheStats,
}

impl CacheState {
    fn new(budget: CacheBudget) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            bytes_used: 0,
            budget,
            stats: CacheStats::default(),
        }
    }

    fn touch(&mut self, key: RenderKey) {
        self.lru_queue.retain(|&k| k != key);
        self.lru_queue.push_back(key);
    }

    fn drop_entry(&mut self, key: RenderKey) -> Option<CachedRender> {
        let entry = self.entries.remove(&key)?;
        self.bytes_used = self.bytes_used.saturating_sub(entry.memory_size());
        self.lru_queue.retain(|&k| k != key);
        self.sync_stats();
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<CachedRender> {
        let key = self.lru_queue.pop_front()?;
        let entry = self.entries.remove(&key)?;
        self.bytes_used = self.bytes_used.saturating_sub(entry.memory_size());
        self.stats.evictions += 1;
        self.sync_stats();
        Some(entry)
    }

    /// Evicts until one more entry of `required_bytes` fits both budgets.
    fn evict_to_fit(&mut self, required_bytes: usize) {
        let mut freed = 0usize;
        while !self.entries.is_empty()
            && (self.entries.len() + 1 > self.budget.max_entries
                || self.bytes_used + required_bytes > self.budget.max_bytes)
        {
            match self.evict_lru() {
                Some(entry) => freed += entry.memory_size(),
                None => break,
            }
        }

        if freed > 0 {
            debug!(freed_bytes = freed, bytes_used = self.bytes_used, "render cache eviction");
        }
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.entries.len();
        self.stats.bytes_used = self.bytes_used;
    }
}

/// Thread-safe bitmap cache for one document's pages.
///
/// `get` and `put` update LRU tracking; `invalidate` removes every entry for
/// a uid regardless of rotation and resolution, which is what structural
/// mutations call when a page's appearance or existence changes.
pub struct RenderCache {
    state: Arc<Mutex<CacheState>>,
}

impl RenderCache {
    pub fn new(budget: CacheBudget) -> Self {
        Self { state: Arc::new(Mutex::new(CacheState::new(budget))) }
    }

    /// Stores a bitmap, evicting least-recently-used entries as needed.
    pub fn put(&self, key: RenderKey, image: Arc<RgbaImage>) {
        let mut state = self.state.lock().unwrap();

        let entry = CachedRender::new(key, image);
        let size = entry.memory_size();

        if let Some(old) = state.entries.remove(&key) {
            state.bytes_used = state.bytes_used.saturating_sub(old.memory_size());
            state.lru_queue.retain(|&k| k != key);
        }

        state.evict_to_fit(size);

        state.bytes_used += size;
        state.entries.insert(key, entry);
        state.touch(key);
        state.sync_stats();
    }

    /// Returns the cached bitmap for the exact key, if present.
    pub fn get(&self, key: RenderKey) -> Option<CachedRender> {
        let mut state = self.state.lock().unwrap();

        if let Some(entry) = state.entries.get(&key).cloned() {
            state.touch(key);
            state.stats.hits += 1;
            Some(entry)
        } else {
            state.stats.misses += 1;
            None
        }
    }

    /// Non-blocking variant of `get` for callers that must not stall:
    /// `None` means the lock was contended, `Some(None)` a plain miss.
    pub fn try_get(&self, key: RenderKey) -> Option<Option<CachedRender>> {
        let mut state = self.state.try_lock().ok()?;

        if let Some(entry) = state.entries.get(&key).cloned() {
            state.touch(key);
            state.stats.hits += 1;
            Some(Some(entry))
        } else {
            state.stats.misses += 1;
            Some(None)
        }
    }

    /// Membership check without touching LRU order or hit statistics.
    pub fn contains(&self, key: RenderKey) -> bool {
        let state = self.state.lock().unwrap();
        state.entries.contains_key(&key)
    }

    /// Drops every entry for `uid` across all rotations and resolutions.
    /// Returns how many entries were dropped.
    pub fn invalidate(&self, uid: PageUid) -> usize {
        let mut state = self.state.lock().unwrap();

        let stale: Vec<RenderKey> =
            state.entries.keys().filter(|key| key.uid == uid).copied().collect();
        for key in &stale {
            state.drop_entry(*key);
        }
        state.stats.invalidations += stale.len() as u64;

        if !stale.is_empty() {
            debug!(uid = %uid, dropped = stale.len(), "invalidated cached renders");
        }
        stale.len()
    }

    /// Removes one exact entry.
    pub fn remove(&self, key: RenderKey) -> Option<CachedRender> {
        let mut state = self.state.lock().unwrap();
        let entry = state.drop_entry(key)?;
        state.stats.invalidations += 1;
        Some(entry)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        let dropped = state.entries.len() as u64;
        state.entries.clear();
        state.lru_queue.clear();
        state.bytes_used = 0;
        state.stats.invalidations += dropped;
        state.sync_stats();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap();
        state.stats
    }

    /// Replaces the budget, evicting immediately if the cache is now over.
    pub fn set_budget(&self, budget: CacheBudget) {
        let mut state = self.state.lock().unwrap();
        state.budget = budget;

        while !state.entries.is_empty()
            && (state.entries.len() > state.budget.max_entries
                || state.bytes_used > state.budget.max_bytes)
        {
            if state.evict_lru().is_none() {
                break;
            }
        }
    }

    pub fn budget(&self) -> CacheBudget {
        let state = self.state.lock().unwrap();
        state.budget
    }

    pub fn bytes_used(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.bytes_used
    }

    pub fn entry_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.entries.len()
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(CacheBudget::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn bitmap(width: u32, height: u32) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::new(width, height))
    }

    fn key(uid: PageUid, rotation: Rotation, resolution: u32) -> RenderKey {
        RenderKey::new(uid, rotation, resolution)
    }

    #[test]
    fn put_then_get_returns_the_bitmap() {
        let cache = RenderCache::default();
        let uid = PageUid::new();
        let k = key(uid, Rotation::R0, 150);

        cache.put(k, bitmap(16, 16));

        let hit = cache.get(k).expect("entry should be cached");
        assert_eq!(hit.key, k);
        assert_eq!(hit.image.dimensions(), (16, 16));
        assert_eq!(hit.memory_size(), 16 * 16 * 4);
    }

    #[test]
    fn get_misses_on_different_rotation_or_resolution() {
        let cache = RenderCache::default();
        let uid = PageUid::new();

        cache.put(key(uid, Rotation::R0, 150), bitmap(8, 8));

        assert!(cache.get(key(uid, Rotation::R90, 150)).is_none());
        assert!(cache.get(key(uid, Rotation::R0, 300)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn put_same_key_replaces_without_double_counting() {
        let cache = RenderCache::default();
        let k = key(PageUid::new(), Rotation::R0, 150);

        cache.put(k, bitmap(8, 8));
        cache.put(k, bitmap(16, 16));

        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.bytes_used(), 16 * 16 * 4);
    }

    #[test]
    fn lru_evicts_oldest_entry_first() {
        // Room for exactly two 8x8 bitmaps.
        let cache = RenderCache::new(CacheBudget::default().with_max_mb(1).with_max_entries(2));
        let first = key(PageUid::new(), Rotation::R0, 150);
        let second = key(PageUid::new(), Rotation::R0, 150);
        let third = key(PageUid::new(), Rotation::R0, 150);

        cache.put(first, bitmap(8, 8));
        cache.put(second, bitmap(8, 8));

        // Touch `first` so `second` becomes the eviction candidate.
        cache.get(first);
        cache.put(third, bitmap(8, 8));

        assert!(cache.contains(first));
        assert!(!cache.contains(second));
        assert!(cache.contains(third));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn byte_budget_evicts_until_new_entry_fits() {
        // 8x8 RGBA is 256 bytes; budget fits three of them.
        let cache =
            RenderCache::new(CacheBudget { max_entries: usize::MAX, max_bytes: 3 * 256 });

        let keys: Vec<RenderKey> =
            (0..4).map(|_| key(PageUid::new(), Rotation::R0, 150)).collect();
        for k in &keys {
            cache.put(*k, bitmap(8, 8));
        }

        assert_eq!(cache.entry_count(), 3);
        assert!(!cache.contains(keys[0]));
        assert!(cache.bytes_used() <= 3 * 256);
    }

    #[test]
    fn invalidate_drops_all_rotations_and_resolutions_for_uid() {
        let cache = RenderCache::default();
        let uid = PageUid::new();
        let other = PageUid::new();

        cache.put(key(uid, Rotation::R0, 150), bitmap(8, 8));
        cache.put(key(uid, Rotation::R90, 150), bitmap(8, 8));
        cache.put(key(uid, Rotation::R0, 300), bitmap(8, 8));
        cache.put(key(other, Rotation::R0, 150), bitmap(8, 8));

        let dropped = cache.invalidate(uid);

        assert_eq!(dropped, 3);
        assert!(cache.get(key(uid, Rotation::R0, 150)).is_none());
        assert!(cache.get(key(uid, Rotation::R90, 150)).is_none());
        assert!(cache.get(key(uid, Rotation::R0, 300)).is_none());
        assert!(cache.get(key(other, Rotation::R0, 150)).is_some());
        assert_eq!(cache.stats().invalidations, 3);
        // Invalidation is not eviction.
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn stale_rotation_stays_absent_until_repopulated() {
        let cache = RenderCache::default();
        let uid = PageUid::new();
        let old = key(uid, Rotation::R0, 150);
        let new = key(uid, Rotation::R90, 150);

        cache.put(old, bitmap(8, 8));
        cache.invalidate(uid);

        assert!(cache.get(old).is_none());
        assert!(cache.get(new).is_none());

        cache.put(new, bitmap(8, 8));
        assert!(cache.get(new).is_some());
        assert!(cache.get(old).is_none());
    }

    #[test]
    fn try_get_reports_miss_when_uncontended() {
        let cache = RenderCache::default();
        let k = key(PageUid::new(), Rotation::R0, 150);

        assert_eq!(cache.try_get(k).map(|hit| hit.is_none()), Some(true));

        cache.put(k, bitmap(8, 8));
        let hit = cache.try_get(k).expect("lock is uncontended");
        assert!(hit.is_some());
    }

    #[test]
    fn shrinking_budget_evicts_down_to_fit() {
        let cache = RenderCache::new(CacheBudget { max_entries: 10, max_bytes: 10 * 256 });
        for _ in 0..6 {
            cache.put(key(PageUid::new(), Rotation::R0, 150), bitmap(8, 8));
        }
        assert_eq!(cache.entry_count(), 6);

        cache.set_budget(CacheBudget { max_entries: 2, max_bytes: 10 * 256 });

        assert_eq!(cache.entry_count(), 2);
    }

    #[test]
    fn clear_counts_as_invalidation_and_zeroes_usage() {
        let cache = RenderCache::default();
        cache.put(key(PageUid::new(), Rotation::R0, 150), bitmap(8, 8));
        cache.put(key(PageUid::new(), Rotation::R0, 150), bitmap(8, 8));

        cache.clear();

        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.bytes_used(), 0);
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[test]
    fn hit_rate_reflects_hits_and_misses() {
        let cache = RenderCache::default();
        let k = key(PageUid::new(), Rotation::R0, 150);

        cache.put(k, bitmap(8, 8));
        cache.get(k);
        cache.get(key(PageUid::new(), Rotation::R0, 150));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    // ==================== simulation ====================

    #[test]
    fn random_workload_never_exceeds_budget() {
        let budget = CacheBudget { max_entries: 32, max_bytes: 64 * 256 };
        let cache = RenderCache::new(budget);
        let mut rng = rand::thread_rng();

        let uids: Vec<PageUid> = (0..16).map(|_| PageUid::new()).collect();
        let rotations = [Rotation::R0, Rotation::R90, Rotation::R180, Rotation::R270];

        for _ in 0..2000 {
            let uid = uids[rng.gen_range(0..uids.len())];
            let rotation = rotations[rng.gen_range(0..rotations.len())];
            let resolution = [72, 150, 300][rng.gen_range(0..3)];
            let k = key(uid, rotation, resolution);

            match rng.gen_range(0..10) {
                0..=5 => cache.put(k, bitmap(8, 8)),
                6..=8 => {
                    cache.get(k);
                }
                _ => {
                    cache.invalidate(uid);
                }
            }

            assert!(cache.entry_count() <= budget.max_entries);
            assert!(cache.bytes_used() <= budget.max_bytes);
        }
    }
}
