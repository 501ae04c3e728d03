// C3 CubeStore: a sparse N-dimensional store partitioned into pages keyed
// by `(id1, id2)` of two chosen partition dimensions.

use crate::key::Key;
use crate::page::CellPage;
use rustc_hash::FxHashMap;

/// Result of `CubeStore::set`, used by the caller to decide whether to run
/// marker propagation: `check_from(key)` only needs to run when a cell
/// transitions from absent to present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    Inserted,
    Updated,
}

/// Sparse store for one value type (`f64` for the numeric store, `String`
/// for the string store) over a fixed number of dimensions.
pub struct CubeStore<V> {
    dims: usize,
    /// First partition dimension. For `dims >= 2` this is dimension 0.
    first: usize,
    /// Second partition dimension, present only for `dims >= 3`.
    second: Option<usize>,
    pages: FxHashMap<(u32, u32), CellPage<V>>,
    end_id1: u32,
    end_id2: u32,
}

impl<V> CubeStore<V> {
    /// `dims` is the cube's dimension count. Partition dims are fixed at
    /// creation as indices 0 (and 1, for `dims >= 3`); changing them after
    /// data exists is unsupported. An adaptive choice at create time (e.g.
    /// picking the dimensions with the most elements) is left as a future
    /// enhancement rather than implemented here.
    pub fn new(dims: usize) -> Self {
        let (first, second) = match dims {
            0 | 1 => (0, None),
            2 => (0, None),
            _ => (0, Some(1)),
        };
        Self {
            dims,
            first,
            second,
            pages: FxHashMap::default(),
            end_id1: 0,
            end_id2: 0,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn first_dim(&self) -> usize {
        self.first
    }

    pub fn second_dim(&self) -> Option<usize> {
        self.second
    }

    /// The lowest dimension index distinct from both partition dims —
    /// the innermost recursion level of the consolidation walk.
    pub fn minimal_dim(&self) -> Option<usize> {
        (0..self.dims).find(|&d| Some(d) != self.second && d != self.first)
    }

    pub fn end_id1(&self) -> u32 {
        self.end_id1
    }

    pub fn end_id2(&self) -> u32 {
        self.end_id2
    }

    fn partition_key(&self, ids: &[u32]) -> (u32, u32) {
        match self.dims {
            0 => (0, 0),
            1 => (0, 0),
            _ => {
                let id1 = ids[self.first];
                let id2 = self.second.map(|d| ids[d]).unwrap_or(0);
                (id1, id2)
            }
        }
    }

    pub fn page(&self, ids: &[u32]) -> Option<&CellPage<V>> {
        self.pages.get(&self.partition_key(ids))
    }

    pub fn page_mut(&mut self, ids: &[u32]) -> Option<&mut CellPage<V>> {
        self.pages.get_mut(&self.partition_key(ids))
    }

    /// Looks a page up directly by its partition key, without deriving it
    /// from a full coordinate tuple — used by the consolidation walk, which
    /// only ever knows `(id1, id2)`.
    pub fn page_by_partition(&self, id1: u32, id2: u32) -> Option<&CellPage<V>> {
        self.pages.get(&(id1, id2))
    }

    pub fn page_by_partition_mut(&mut self, id1: u32, id2: u32) -> Option<&mut CellPage<V>> {
        self.pages.get_mut(&(id1, id2))
    }

    /// All live pages, e.g. for the consolidation walk's outer loop over
    /// `base[first] x base[second]` restricted to pages that actually
    /// exist.
    pub fn pages(&self) -> impl Iterator<Item = (&(u32, u32), &CellPage<V>)> {
        self.pages.iter()
    }

    pub fn pages_mut(&mut self) -> impl Iterator<Item = (&(u32, u32), &mut CellPage<V>)> {
        self.pages.iter_mut()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn get(&self, key: &Key) -> Option<&V> {
        let page = self.pages.get(&self.partition_key(key.ids()))?;
        let slot = page.lookup(key)?;
        Some(&page.row(slot).value)
    }

    /// True if the key resolves to a live (non-tombstoned) row, including
    /// marker rows.
    pub fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Creates the owning page on demand, updates `end_id1`/`end_id2`, and
    /// either inserts a new row or overwrites the existing one. String storage owning its prior value and freeing it on
    /// overwrite is automatic here — `V`'s `Drop` runs when the old value
    /// is replaced.
    pub fn set(&mut self, key: Key, value: V, is_marker: bool) -> SetOutcome {
        let pk = self.partition_key(key.ids());
        if self.dims >= 2 {
            self.end_id1 = self.end_id1.max(pk.0.wrapping_add(1));
            if self.second.is_some() {
                self.end_id2 = self.end_id2.max(pk.1.wrapping_add(1));
            }
        }
        let page = self.pages.entry(pk).or_default();
        if let Some(slot) = page.lookup(&key) {
            let row = page.row_mut(slot);
            row.value = value;
            row.set_deleted(false);
            row.set_marker(is_marker);
            SetOutcome::Updated
        } else {
            page.append(key, value, is_marker);
            SetOutcome::Inserted
        }
    }

    /// Removes the row for `key`. For marker cells the caller is expected
    /// to have already zeroed the value and call `mark_deleted` instead
    ///; this method always physically removes.
    pub fn remove(&mut self, key: &Key) -> Option<V> {
        let pk = self.partition_key(key.ids());
        let page = self.pages.get_mut(&pk)?;
        let slot = page.lookup(key)?;
        Some(page.remove(slot).value)
    }

    /// Marker-cell delete: write `value` (typically a zero) and tombstone
    /// the row rather than physically removing it.
    pub fn clear_marker(&mut self, key: &Key, value: V) {
        let pk = self.partition_key(key.ids());
        if let Some(page) = self.pages.get_mut(&pk) {
            if let Some(slot) = page.lookup(key) {
                page.row_mut(slot).value = value;
                page.mark_deleted(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ids: &[u32]) -> Key {
        Key::new(ids.to_vec())
    }

    #[test]
    fn single_dimension_uses_one_page() {
        let mut store: CubeStore<f64> = CubeStore::new(1);
        store.set(key(&[0]), 1.0, false);
        store.set(key(&[1]), 2.0, false);
        assert_eq!(store.page_count(), 1);
    }

    #[test]
    fn three_dims_partitions_by_first_two() {
        let mut store: CubeStore<f64> = CubeStore::new(3);
        store.set(key(&[0, 0, 5]), 1.0, false);
        store.set(key(&[1, 0, 5]), 2.0, false);
        assert_eq!(store.page_count(), 2);
        assert_eq!(store.minimal_dim(), Some(2));
    }

    #[test]
    fn get_after_set_roundtrips() {
        let mut store: CubeStore<f64> = CubeStore::new(2);
        store.set(key(&[3, 4]), 42.0, false);
        assert_eq!(store.get(&key(&[3, 4])), Some(&42.0));
    }

    #[test]
    fn set_reports_inserted_then_updated() {
        let mut store: CubeStore<f64> = CubeStore::new(1);
        assert_eq!(store.set(key(&[0]), 1.0, false), SetOutcome::Inserted);
        assert_eq!(store.set(key(&[0]), 2.0, false), SetOutcome::Updated);
        assert_eq!(store.get(&key(&[0])), Some(&2.0));
    }

    #[test]
    fn remove_makes_cell_absent() {
        let mut store: CubeStore<f64> = CubeStore::new(1);
        store.set(key(&[0]), 1.0, false);
        store.remove(&key(&[0]));
        assert_eq!(store.get(&key(&[0])), None);
    }
}
