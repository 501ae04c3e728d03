// CellPage: a fixed-slot-style buffer of (value, key, flags) rows — a
// growable row buffer with binary-search range lookup over a sorted key,
// generalized from an immutable on-disk block to a mutable in-memory row
// buffer with shell-sort-on-write instead of sorted-at-construction.

use crate::key::{export_cmp, Key};
use crate::key_index::KeyIndex;
use std::ops::Range;

const MARKER_BIT: u32 = 1 << 31;
const DELETED_BIT: u32 = 1 << 30;
const CHANGE_DEPTH_MASK: u32 = (1 << 30) - 1;

/// Growth increment applied on page overflow.
const PAGE_SIZE: usize = 256;

/// A single stored cell: value, key, and packed flags.
#[derive(Clone, Debug)]
pub struct Row<V> {
    pub value: V,
    pub key: Key,
    flags: u32,
}

impl<V> Row<V> {
    pub fn new(key: Key, value: V, is_marker: bool) -> Self {
        Self {
            value,
            key,
            flags: if is_marker { MARKER_BIT } else { 0 },
        }
    }

    pub fn is_marker(&self) -> bool {
        self.flags & MARKER_BIT != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & DELETED_BIT != 0
    }

    pub fn change_depth(&self) -> u32 {
        self.flags & CHANGE_DEPTH_MASK
    }

    pub fn set_marker(&mut self, value: bool) {
        if value {
            self.flags |= MARKER_BIT;
        } else {
            self.flags &= !MARKER_BIT;
        }
    }

    pub fn set_deleted(&mut self, value: bool) {
        if value {
            self.flags |= DELETED_BIT;
        } else {
            self.flags &= !DELETED_BIT;
        }
    }

    fn set_change_depth(&mut self, depth: u32) {
        self.flags = (self.flags & !CHANGE_DEPTH_MASK) | (depth & CHANGE_DEPTH_MASK);
    }
}

/// A page of rows belonging to one `(id1, id2)` partition bucket of a
/// `CubeStore`.
pub struct CellPage<V> {
    rows: Vec<Row<V>>,
    index: KeyIndex,
    sorted: bool,
}

impl<V> Default for CellPage<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CellPage<V> {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            index: KeyIndex::new(),
            sorted: true,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn rows(&self) -> &[Row<V>] {
        &self.rows
    }

    pub fn row(&self, slot: usize) -> &Row<V> {
        &self.rows[slot]
    }

    pub fn row_mut(&mut self, slot: usize) -> &mut Row<V> {
        self.sorted = false;
        &mut self.rows[slot]
    }

    pub fn lookup(&self, key: &Key) -> Option<usize> {
        self.index.lookup(key)
    }

    /// Appends a new row, registering it in the key index. Grows the
    /// backing buffer by 3/2 + `PAGE_SIZE` on overflow.
    pub fn append(&mut self, key: Key, value: V, is_marker: bool) -> usize {
        if self.rows.len() == self.rows.capacity() {
            let grown = self.rows.capacity() * 3 / 2 + PAGE_SIZE;
            log::debug!("cell page overflow, growing to {grown} rows");
            self.rows.reserve(grown - self.rows.capacity());
        }
        let slot = self.rows.len();
        self.index.insert(key.clone(), slot);
        self.rows.push(Row::new(key, value, is_marker));
        self.sorted = false;
        slot
    }

    /// Physically removes the row at `slot`: the last live row is moved
    /// into its place, and the key index is updated for both the removed
    /// and the moved key.
    pub fn remove(&mut self, slot: usize) -> Row<V> {
        self.index.remove(&self.rows[slot].key);
        let last = self.rows.len() - 1;
        let removed = self.rows.swap_remove(slot);
        if slot != last {
            self.index.insert(self.rows[slot].key.clone(), slot);
        }
        self.sorted = false;
        removed
    }

    /// Marker sweep: instead of physically removing a
    /// marker cell that was cleared to zero, tombstone it so the rule
    /// engine can still see it carried a marker bit until the next sort.
    pub fn mark_deleted(&mut self, slot: usize) {
        self.rows[slot].set_deleted(true);
        self.sorted = false;
    }

    /// Idempotent shell sort (gap sequence `h = 3h + 1`) by key, dropping
    /// tombstoned rows from the live prefix and recomputing each row's
    /// change-depth against its predecessor.
    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        self.index.clear();

        shell_sort(&mut self.rows, |a, b| a.key.cmp(&b.key));

        self.rows.retain(|row| !row.is_deleted());

        for i in 0..self.rows.len() {
            let depth = if i == 0 {
                self.rows[i].key.dims().saturating_sub(1) as u32
            } else {
                self.rows[i]
                    .key
                    .change_depth(&self.rows[i - 1].key)
                    .unwrap_or(0) as u32
            };
            self.rows[i].set_change_depth(depth);
        }

        for (slot, row) in self.rows.iter().enumerate() {
            self.index.insert(row.key.clone(), slot);
        }

        self.sorted = true;
    }

    /// Returns row indices in "first dimension dominant" order, without
    /// disturbing the page's primary (last-dimension-dominant) sort state.
    /// Used only by the exporter.
    pub fn export_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.rows.len())
            .filter(|&i| !self.rows[i].is_deleted())
            .collect();
        order.sort_by(|&a, &b| export_cmp(&self.rows[a].key, &self.rows[b].key));
        order
    }

    /// Binary bisection on dimension `dim`'s id, narrowed to `range`. The
    /// page must be sorted, and `range` must already be narrowed so that
    /// every row in it agrees on dimensions above `dim`.
    pub fn equal_range(&self, range: Range<usize>, dim: usize, id: u32) -> Range<usize> {
        debug_assert!(self.sorted);
        let slice = &self.rows[range.clone()];
        let lo = slice.partition_point(|row| row.key.id(dim) < id);
        let hi = lo + slice[lo..].partition_point(|row| row.key.id(dim) <= id);
        (range.start + lo)..(range.start + hi)
    }

    /// First index within `range` whose dimension-`dim` id is `> id`
    /// (upper_bound).
    pub fn upper_bound(&self, range: Range<usize>, dim: usize, id: u32) -> usize {
        debug_assert!(self.sorted);
        let slice = &self.rows[range.clone()];
        range.start + slice.partition_point(|row| row.key.id(dim) <= id)
    }

    /// First index within `range` whose dimension-`dim` id is `>= id`
    /// (lower_bound).
    pub fn lower_bound(&self, range: Range<usize>, dim: usize, id: u32) -> usize {
        debug_assert!(self.sorted);
        let slice = &self.rows[range.clone()];
        range.start + slice.partition_point(|row| row.key.id(dim) < id)
    }
}

fn shell_sort<T>(items: &mut [T], mut less_than: impl FnMut(&T, &T) -> std::cmp::Ordering) {
    let n = items.len();
    if n < 2 {
        return;
    }
    let mut gap = 1usize;
    while gap < n / 3 {
        gap = gap * 3 + 1;
    }
    while gap >= 1 {
        for i in gap..n {
            let mut j = i;
            while j >= gap && less_than(&items[j - gap], &items[j]) == std::cmp::Ordering::Greater
            {
                items.swap(j - gap, j);
                j -= gap;
            }
        }
        gap /= 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ids: &[u32]) -> Key {
        Key::new(ids.to_vec())
    }

    #[test]
    fn append_then_lookup() {
        let mut page = CellPage::new();
        let slot = page.append(key(&[1, 2]), 42.0, false);
        assert_eq!(page.lookup(&key(&[1, 2])), Some(slot));
        assert_eq!(page.row(slot).value, 42.0);
    }

    #[test]
    fn remove_updates_moved_row_index() {
        let mut page = CellPage::new();
        page.append(key(&[0, 0]), 1.0, false);
        page.append(key(&[0, 1]), 2.0, false);
        page.append(key(&[0, 2]), 3.0, false);
        page.remove(0);
        // last row (key [0,2]) was moved into slot 0
        assert_eq!(page.lookup(&key(&[0, 2])), Some(0));
        assert_eq!(page.lookup(&key(&[0, 0])), None);
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn sort_orders_by_last_dimension_first() {
        let mut page = CellPage::new();
        page.append(key(&[5, 0]), 1.0, false);
        page.append(key(&[1, 1]), 2.0, false);
        page.append(key(&[9, 0]), 3.0, false);
        page.sort();
        let ids: Vec<_> = page.rows().iter().map(|r| r.key.ids().to_vec()).collect();
        assert_eq!(ids, vec![vec![5, 0], vec![9, 0], vec![1, 1]]);
    }

    #[test]
    fn sort_drops_tombstoned_rows() {
        let mut page = CellPage::new();
        page.append(key(&[0]), 1.0, false);
        let slot = page.append(key(&[1]), 2.0, true);
        page.mark_deleted(slot);
        page.sort();
        assert_eq!(page.len(), 1);
        assert_eq!(page.lookup(&key(&[1])), None);
    }

    #[test]
    fn change_depth_is_zero_for_first_row_and_correct_after() {
        let mut page = CellPage::new();
        page.append(key(&[0, 0]), 1.0, false);
        page.append(key(&[0, 1]), 2.0, false);
        page.sort();
        assert_eq!(page.row(0).change_depth(), 1); // dims-1
        assert_eq!(page.row(1).change_depth(), 1); // differs at dim 1
    }

    #[test]
    fn equal_range_binary_searches_a_dimension() {
        let mut page = CellPage::new();
        for id in [0u32, 1, 1, 2, 3] {
            page.append(key(&[id, 0]), id as f64, false);
        }
        page.sort();
        // after sort, dim0 is ascending because dim1 is constant (0) across all rows
        let range = page.equal_range(0..page.len(), 0, 1);
        assert_eq!(range.len(), 2);
    }

    #[test]
    fn export_order_is_first_dimension_major() {
        let mut page = CellPage::new();
        page.append(key(&[1, 5]), 1.0, false);
        page.append(key(&[0, 9]), 2.0, false);
        let order = page.export_order();
        let ids: Vec<_> = order
            .iter()
            .map(|&i| page.row(i).key.ids().to_vec())
            .collect();
        assert_eq!(ids, vec![vec![0, 9], vec![1, 5]]);
    }

    #[test]
    fn sort_on_random_keys_keeps_change_depth_consistent_with_its_predecessor() {
        use rand::{rng, Rng};
        let mut gen = rng();
        let mut page = CellPage::new();
        for i in 0..200u32 {
            let ids = [gen.random_range(0..4), gen.random_range(0..4), gen.random_range(0..4)];
            page.append(key(&ids), i as f64, false);
        }
        page.sort();
        for i in 1..page.len() {
            let prev = page.row(i - 1).key.clone();
            let cur = page.row(i).key.clone();
            assert_ne!(cur.cmp(&prev), std::cmp::Ordering::Less);
            let expected = cur.change_depth(&prev).unwrap_or(0) as u32;
            assert_eq!(page.row(i).change_depth(), expected);
        }
    }
}
