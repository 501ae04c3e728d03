// C5 ResultCache: the two-tier (consolidation, rule) result cache. A
// `quick_cache`-backed, byte-weighted cache keyed by an `FxBuildHasher`
// hasher, keyed by `(cube, path) -> value` instead of `(segment, block
// offset) -> block bytes`.

use crate::key::Key;
use quick_cache::sync::Cache as QuickCache;
use quick_cache::Weighter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies a cached cell independent of which cube it belongs to — the
/// caller is always a single `Cube`, but the budget tracking below is
/// process-wide, so the key carries the cube id too.
#[derive(Clone, Eq, PartialEq, Hash)]
struct CacheKey {
    cube: u32,
    path: Key,
}

#[derive(Clone)]
struct ScalarWeighter;

impl Weighter<CacheKey, f64> for ScalarWeighter {
    fn weight(&self, key: &CacheKey, _value: &f64) -> u64 {
        (key.path.dims() * 4 + 8 + 4) as u64
    }
}

#[derive(Clone)]
struct RuleResultWeighter;

impl Weighter<CacheKey, (f64, u32)> for RuleResultWeighter {
    fn weight(&self, key: &CacheKey, _value: &(f64, u32)) -> u64 {
        (key.path.dims() * 4 + 8 + 4 + 4) as u64
    }
}

/// Process-wide counter a `ConsolidationCache`/`RuleCache` registers its
/// byte usage against, so that a cap configured once (`CubeConfig`) is
/// enforced across every loaded cube rather than per-cube.
#[derive(Clone, Default)]
pub struct SharedCacheBudget {
    used: Arc<AtomicU64>,
}

impl SharedCacheBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    fn add(&self, delta: i64) {
        if delta >= 0 {
            self.used.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            self.used.fetch_sub((-delta) as u64, Ordering::Relaxed);
        }
    }
}

/// Memoises aggregated consolidated values. `NaN` is the sentinel for
/// "known empty".
pub struct ConsolidationCache {
    cube: u32,
    data: QuickCache<CacheKey, f64, ScalarWeighter, rustc_hash::FxBuildHasher>,
    capacity: u64,
    budget: SharedCacheBudget,
    invalidate_counter: u64,
}

impl ConsolidationCache {
    pub fn new(cube: u32, capacity_bytes: u64, budget: SharedCacheBudget) -> Self {
        Self {
            cube,
            data: new_quick_cache(capacity_bytes, ScalarWeighter),
            capacity: capacity_bytes,
            budget,
            invalidate_counter: 0,
        }
    }

    fn key(&self, path: &Key) -> CacheKey {
        CacheKey {
            cube: self.cube,
            path: path.clone(),
        }
    }

    pub fn get(&self, path: &Key) -> Option<f64> {
        self.data.get(&self.key(path))
    }

    /// Admits a result only when `base_cell_count > cache_barrier`; the caller is expected to have already made
    /// that check (`count_base_cells`), this just performs the insert.
    pub fn insert(&mut self, path: &Key, value: f64, global_limit: u64) {
        let weight_before = self.data.weight();
        self.data.insert(self.key(path), value);
        let delta = self.data.weight() as i64 - weight_before as i64;
        self.budget.add(delta);
        if self.budget.used() > global_limit {
            self.shrink();
        }
    }

    pub fn insert_empty(&mut self, path: &Key, global_limit: u64) {
        self.insert(path, f64::NAN, global_limit);
    }

    /// Removes a single entry (point invalidation when exactly one path
    /// touched the write).
    pub fn invalidate(&mut self, path: &Key) {
        let weight_before = self.data.weight();
        self.data.remove(&self.key(path));
        let delta = self.data.weight() as i64 - weight_before as i64;
        self.budget.add(delta);
        self.invalidate_counter += 1;
    }

    pub fn clear(&mut self) {
        let weight_before = self.data.weight();
        self.data = new_quick_cache(self.capacity, ScalarWeighter);
        self.budget.add(-(weight_before as i64));
        self.invalidate_counter = 0;
    }

    pub fn invalidate_counter(&self) -> u64 {
        self.invalidate_counter
    }

    /// Halves the backing capacity and drops everything currently cached:
    /// a fresh, half-size cache starts empty, so "dropping half the
    /// entries" is satisfied unconditionally rather than needing an LRU walk.
    pub fn shrink(&mut self) {
        let weight_before = self.data.weight();
        self.capacity = (self.capacity / 2).max(1);
        log::debug!(
            "consolidation cache for cube {} shrinking to {} bytes",
            self.cube,
            self.capacity
        );
        self.data = new_quick_cache(self.capacity, ScalarWeighter);
        self.budget.add(-(weight_before as i64));
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Memoises values produced by a rule (value, originating rule id).
pub struct RuleCache {
    cube: u32,
    data: QuickCache<CacheKey, (f64, u32), RuleResultWeighter, rustc_hash::FxBuildHasher>,
    capacity: u64,
    budget: SharedCacheBudget,
}

impl RuleCache {
    pub fn new(cube: u32, capacity_bytes: u64, budget: SharedCacheBudget) -> Self {
        Self {
            cube,
            data: new_quick_cache(capacity_bytes, RuleResultWeighter),
            capacity: capacity_bytes,
            budget,
        }
    }

    fn key(&self, path: &Key) -> CacheKey {
        CacheKey {
            cube: self.cube,
            path: path.clone(),
        }
    }

    pub fn get(&self, path: &Key) -> Option<(f64, u32)> {
        self.data.get(&self.key(path))
    }

    pub fn insert(&mut self, path: &Key, value: f64, rule_id: u32, global_limit: u64) {
        let weight_before = self.data.weight();
        self.data.insert(self.key(path), (value, rule_id));
        let delta = self.data.weight() as i64 - weight_before as i64;
        self.budget.add(delta);
        if self.budget.used() > global_limit {
            self.shrink();
        }
    }

    /// Cleared wholesale on any write to the cube.
    pub fn clear(&mut self) {
        let weight_before = self.data.weight();
        self.data = new_quick_cache(self.capacity, RuleResultWeighter);
        self.budget.add(-(weight_before as i64));
    }

    pub fn shrink(&mut self) {
        let weight_before = self.data.weight();
        self.capacity = (self.capacity / 2).max(1);
        log::debug!(
            "rule cache for cube {} shrinking to {} bytes",
            self.cube,
            self.capacity
        );
        self.data = new_quick_cache(self.capacity, RuleResultWeighter);
        self.budget.add(-(weight_before as i64));
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn new_quick_cache<V: Clone, W: Weighter<CacheKey, V> + Clone>(
    capacity_bytes: u64,
    weighter: W,
) -> QuickCache<CacheKey, V, W, rustc_hash::FxBuildHasher> {
    let opts = quick_cache::OptionsBuilder::new()
        .weight_capacity(capacity_bytes.max(1))
        .hot_allocation(0.9)
        .estimated_items_capacity(1_024)
        .build()
        .expect("cache options should be valid");
    QuickCache::with_options(
        opts,
        weighter,
        Default::default(),
        quick_cache::sync::DefaultLifecycle::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ids: &[u32]) -> Key {
        Key::new(ids.to_vec())
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let budget = SharedCacheBudget::new();
        let mut cache = ConsolidationCache::new(1, 4096, budget);
        cache.insert(&key(&[1, 2]), 42.0, u64::MAX);
        assert_eq!(cache.get(&key(&[1, 2])), Some(42.0));
    }

    #[test]
    fn nan_sentinel_encodes_known_empty() {
        let budget = SharedCacheBudget::new();
        let mut cache = ConsolidationCache::new(1, 4096, budget);
        cache.insert_empty(&key(&[1]), u64::MAX);
        assert!(cache.get(&key(&[1])).unwrap().is_nan());
    }

    #[test]
    fn invalidate_removes_single_entry() {
        let budget = SharedCacheBudget::new();
        let mut cache = ConsolidationCache::new(1, 4096, budget);
        cache.insert(&key(&[1]), 1.0, u64::MAX);
        cache.invalidate(&key(&[1]));
        assert_eq!(cache.get(&key(&[1])), None);
        assert_eq!(cache.invalidate_counter(), 1);
    }

    #[test]
    fn clear_empties_the_cache() {
        let budget = SharedCacheBudget::new();
        let mut cache = ConsolidationCache::new(1, 4096, budget);
        cache.insert(&key(&[1]), 1.0, u64::MAX);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn shrink_halves_capacity_and_drops_entries() {
        let budget = SharedCacheBudget::new();
        let mut cache = ConsolidationCache::new(1, 4096, budget);
        cache.insert(&key(&[1]), 1.0, u64::MAX);
        cache.shrink();
        assert_eq!(cache.capacity, 2048);
        assert!(cache.is_empty());
    }

    #[test]
    fn rule_cache_stores_value_and_rule_id() {
        let budget = SharedCacheBudget::new();
        let mut cache = RuleCache::new(1, 4096, budget);
        cache.insert(&key(&[1]), 9.0, 7, u64::MAX);
        assert_eq!(cache.get(&key(&[1])), Some((9.0, 7)));
    }

    #[test]
    fn shared_budget_triggers_shrink_once_exceeded() {
        let budget = SharedCacheBudget::new();
        let mut cache = ConsolidationCache::new(1, 4096, budget.clone());
        cache.insert(&key(&[1]), 1.0, 1);
        // budget limit of 1 byte is immediately exceeded, forcing a shrink
        assert!(cache.is_empty());
    }
}
