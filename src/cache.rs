//! Weight-bounded, concurrent tile cache keyed by `RegionRequest`.
//!
//! Grounded on the teacher's `cache.rs::TileCache`: `DashMap` for lock-free
//! concurrent reads, a `parking_lot::Mutex<VecDeque<_>>` for LRU eviction
//! order, and `AtomicU64` hit/miss counters. Generalised to a caller-supplied
//! `SizeEstimator` and to the spec's "/1024" weight-unit convention (see
//! §3/§4.4 of SPEC_FULL.md) instead of the teacher's raw-byte weigher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::region::RegionRequest;

/// Computes the approximate byte weight of a cached tile.
pub type SizeEstimator<T> = Arc<dyn Fn(&T) -> u64 + Send + Sync>;

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub weight: u64,
    pub max_weight: u32,
    pub num_tiles: usize,
}

/// Converts a caller-reported byte size into a weight unit (bytes/1024),
/// clamped to fit `u32` and never zero for a nonzero-capacity insertion.
fn weight_units(bytes: u64) -> u32 {
    ((bytes / 1024).max(1)).min(u32::MAX as u64) as u32
}

/// Thread-safe, weight-bounded tile cache.
///
/// `get`/`contains`/`insert` never block on each other materially (the
/// `DashMap` shard lock is held only for the duration of the individual
/// operation); `clear` and server/overlap bulk-removal are coarse-grained,
/// as permitted by spec §4.4.
pub struct TileCache<T: Clone + Send + Sync + 'static> {
    tiles: DashMap<RegionRequest, (T, u32)>,
    lru_order: Mutex<VecDeque<RegionRequest>>,
    weigher: SizeEstimator<T>,
    max_weight: u32,
    current_weight: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> TileCache<T> {
    /// `max_size_bytes` is the configured cache byte budget; the maximum
    /// aggregate weight is `max_size_bytes / 1024` (spec §3).
    pub fn new(max_size_bytes: u64, weigher: SizeEstimator<T>) -> Self {
        Self {
            tiles: DashMap::new(),
            lru_order: Mutex::new(VecDeque::new()),
            weigher,
            max_weight: weight_units(max_size_bytes.max(1024)),
            current_weight: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a tile from the cache, updating LRU order and hit/miss counters.
    pub fn get(&self, request: &RegionRequest) -> Option<T> {
        if let Some(entry) = self.tiles.get(request) {
            self.hits.fetch_add(1, Ordering::Relaxed);

            let mut lru = self.lru_order.lock();
            if let Some(pos) = lru.iter().position(|r| r == request) {
                lru.remove(pos);
                lru.push_back(request.clone());
            }

            Some(entry.value().0.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Check if a tile is in the cache without affecting LRU order or stats.
    pub fn contains(&self, request: &RegionRequest) -> bool {
        self.tiles.contains_key(request)
    }

    /// Insert a tile, evicting least-recently-used entries to stay within
    /// the weight bound. A tile heavier than the whole cache is clamped to
    /// the max weight and will itself be the sole resident (or simply never
    /// fit, in which case it is dropped after triggering a full evict — see
    /// the `target_size == 0` branch below).
    pub fn insert(&self, request: RegionRequest, tile: T) {
        let weight = weight_units((self.weigher)(&tile));

        if weight > self.max_weight {
            // Tile alone exceeds the cache budget; it cannot be retained
            // (spec §4.4: "tiles larger than the whole cache cannot be
            // retained"). Evict everything and skip the insert.
            self.evict_down_to(0);
            return;
        }

        self.evict_if_needed(weight);

        if self.tiles.contains_key(&request) {
            return;
        }

        self.tiles.insert(request.clone(), (tile, weight));
        self.current_weight.fetch_add(weight as u64, Ordering::Relaxed);

        self.lru_order.lock().push_back(request);
    }

    fn evict_if_needed(&self, incoming_weight: u32) {
        let target = (self.max_weight as u64).saturating_sub(incoming_weight as u64);
        self.evict_down_to(target);
    }

    fn evict_down_to(&self, target: u64) {
        while self.current_weight.load(Ordering::Relaxed) > target {
            let victim = self.lru_order.lock().pop_front();
            match victim {
                Some(request) => {
                    if let Some((_, (_, weight))) = self.tiles.remove(&request) {
                        self.current_weight.fetch_sub(weight as u64, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }

    /// Drop an approximate fraction of the least-recently-used entries
    /// regardless of the weight bound. Models the host-runtime "soft
    /// reference" eviction the teacher relies on implicitly (see
    /// SPEC_FULL.md §9 / design notes): this crate has no GC to hook, so a
    /// caller-driven memory-pressure sensor calls this explicitly.
    pub fn notify_memory_pressure(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let to_drop = (self.tiles.len() as f64 * fraction).ceil() as usize;
        for _ in 0..to_drop {
            let victim = self.lru_order.lock().pop_front();
            match victim {
                Some(request) => {
                    if let Some((_, (_, weight))) = self.tiles.remove(&request) {
                        self.current_weight.fetch_sub(weight as u64, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }

    /// Remove every entry matching `predicate`, also pruning the LRU order.
    /// Coarse-grained, as permitted for bulk removal (spec §4.4).
    pub fn remove_matching(&self, predicate: impl Fn(&RegionRequest) -> bool) {
        let doomed: Vec<RegionRequest> = self
            .tiles
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for request in &doomed {
            if let Some((_, (_, weight))) = self.tiles.remove(request) {
                self.current_weight.fetch_sub(weight as u64, Ordering::Relaxed);
            }
        }

        let mut lru = self.lru_order.lock();
        lru.retain(|r| !doomed.contains(r));
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        self.tiles.clear();
        self.lru_order.lock().clear();
        self.current_weight.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            weight: self.current_weight.load(Ordering::Relaxed),
            max_weight: self.max_weight,
            num_tiles: self.tiles.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(n: i64) -> RegionRequest {
        RegionRequest::new("slideA", 1.0, n, 0, 1, 1, 0, 0)
    }

    fn byte_weigher(size: u64) -> SizeEstimator<Vec<u8>> {
        Arc::new(move |_: &Vec<u8>| size)
    }

    #[test]
    fn insert_and_get() {
        let cache = TileCache::new(10 * 1024 * 1024, Arc::new(|t: &Vec<u8>| t.len() as u64));
        let r = req(0);
        cache.insert(r.clone(), vec![0u8; 1000]);
        assert_eq!(cache.get(&r).unwrap().len(), 1000);
    }

    #[test]
    fn miss_increments_stats() {
        let cache: TileCache<Vec<u8>> =
            TileCache::new(10 * 1024 * 1024, Arc::new(|t: &Vec<u8>| t.len() as u64));
        assert!(cache.get(&req(99)).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn hit_increments_stats() {
        let cache = TileCache::new(10 * 1024 * 1024, Arc::new(|t: &Vec<u8>| t.len() as u64));
        let r = req(0);
        cache.insert(r.clone(), vec![0u8; 10]);
        cache.get(&r);
        cache.get(&r);
        assert_eq!(cache.stats().hits, 2);
    }

    #[test]
    fn weight_bound_is_respected() {
        // Budget = 1024 bytes = 1 weight unit. Each tile weighs ~1 unit
        // (200 bytes, clamped up to 1). Only a handful can coexist.
        let cache = TileCache::new(3 * 1024, byte_weigher(1024));
        for i in 0..5 {
            cache.insert(req(i), vec![0u8; 1024]);
        }
        assert!(cache.stats().weight <= cache.stats().max_weight as u64);
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let cache = TileCache::new(2 * 1024, byte_weigher(1024)); // fits 2
        let (a, b, c) = (req(0), req(1), req(2));
        cache.insert(a.clone(), vec![0u8; 1024]);
        cache.insert(b.clone(), vec![0u8; 1024]);
        cache.get(&a); // touch a, making b the LRU victim
        cache.insert(c.clone(), vec![0u8; 1024]);

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn clear_resets_state() {
        let cache = TileCache::new(10 * 1024 * 1024, Arc::new(|t: &Vec<u8>| t.len() as u64));
        cache.insert(req(0), vec![0u8; 10]);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().weight, 0);
    }

    #[test]
    fn tile_larger_than_cache_is_not_retained() {
        let cache = TileCache::new(1024, byte_weigher(10 * 1024 * 1024));
        let r = req(0);
        cache.insert(r.clone(), vec![0u8; 1]);
        assert!(cache.get(&r).is_none());
    }

    #[test]
    fn weight_is_never_zero_for_a_real_tile() {
        assert_eq!(weight_units(0), 1);
        assert_eq!(weight_units(1), 1);
        assert_eq!(weight_units(1024), 1);
        assert_eq!(weight_units(2048), 2);
    }

    #[test]
    fn remove_matching_prunes_entries_and_lru() {
        let cache = TileCache::new(10 * 1024 * 1024, Arc::new(|t: &Vec<u8>| t.len() as u64));
        let a = RegionRequest::new("sA", 1.0, 0, 0, 1, 1, 0, 0);
        let b = RegionRequest::new("sB", 1.0, 0, 0, 1, 1, 0, 0);
        cache.insert(a.clone(), vec![0u8; 10]);
        cache.insert(b.clone(), vec![0u8; 10]);

        cache.remove_matching(|r| r.server_path.as_ref() == "sA");

        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
    }

    #[test]
    fn memory_pressure_drops_a_fraction_of_entries() {
        let cache = TileCache::new(10 * 1024 * 1024, Arc::new(|t: &Vec<u8>| t.len() as u64));
        for i in 0..10 {
            cache.insert(req(i), vec![0u8; 10]);
        }
        cache.notify_memory_pressure(0.5);
        assert!(cache.len() <= 5);
    }
}
