// Export/area streaming for the `export`/`get_area`/`get_cells` operations.
// Grounded in the original's `ExportStorage.cpp`/`ExportPage.cpp`/
// `AreaStorage.cpp`: a bounded, restartable `(path, value)` sequence rather
// than materialising the whole area in one call. `DFilterProcessor`'s
// filter expression language stays external — `condition` below is the
// evaluated predicate, not the expression tree.

use crate::key::{export_cmp, Key};
use crate::page::CellPage;
use crate::store::CubeStore;
use std::cmp::Ordering;

/// Where the next `export_block` call should resume: strictly after this
/// key in `export_cmp` order.
#[derive(Clone, Debug, Default)]
pub struct ExportCursor {
    resume_after: Option<Key>,
}

impl ExportCursor {
    pub fn from_start() -> Self {
        Self { resume_after: None }
    }

    pub fn after(key: Key) -> Self {
        Self {
            resume_after: Some(key),
        }
    }
}

/// Per-dimension element membership restricting which rows `export_block`
/// emits. `None` means "every element of every dimension" (`get_area`'s
/// unrestricted case); an empty per-dimension slice means "every element
/// of that dimension".
pub fn within_area(area: Option<&[Vec<u32>]>, ids: &[u32]) -> bool {
    match area {
        None => true,
        Some(area) => area
            .iter()
            .zip(ids)
            .all(|(allowed, &id)| allowed.is_empty() || allowed.contains(&id)),
    }
}

/// Resolves a marker row's live value for the exporter, the same role
/// `consolidate::MarkerResolver` plays for aggregation. Only consulted when
/// the caller passes `resolve_markers = true` (the `rules?` export flag);
/// otherwise marker rows are skipped rather than resolved.
pub trait ExportResolver {
    fn resolve(&mut self, key: &Key) -> f64;
}

impl<F: FnMut(&Key) -> f64> ExportResolver for F {
    fn resolve(&mut self, key: &Key) -> f64 {
        self(key)
    }
}

/// One bounded page of export output, plus the cursor to resume from —
/// `None` once the area is exhausted.
pub struct ExportPage<V> {
    pub rows: Vec<(Key, V)>,
    pub next: Option<ExportCursor>,
}

/// Collects every live row in `store` matching `area` and `condition`,
/// in `export_cmp` order, and returns at most `block_size` rows starting
/// strictly after `cursor`. `skip_empty` drops zero-valued rows.
///
/// Pages partition on `(id1, id2)` — the store's first two partition
/// dimensions, which are also `export_cmp`'s two most significant ones —
/// so visiting pages in ascending partition-key order and, within each
/// page, rows in `CellPage::export_order`, already yields the fully
/// merged `export_cmp` order without a second full sort.
#[allow(clippy::too_many_arguments)]
pub fn export_block(
    store: &CubeStore<f64>,
    cursor: &ExportCursor,
    area: Option<&[Vec<u32>]>,
    block_size: usize,
    skip_empty: bool,
    resolve_markers: bool,
    resolver: &mut dyn ExportResolver,
    condition: &mut dyn FnMut(&Key, f64) -> bool,
) -> ExportPage<f64> {
    let mut pages: Vec<(&(u32, u32), &CellPage<f64>)> = store.pages().collect();
    pages.sort_by_key(|(pk, _)| **pk);

    let mut candidates: Vec<(Key, f64)> = Vec::new();

    for (_, page) in pages {
        for idx in page.export_order() {
            let row = page.row(idx);
            if !within_area(area, row.key.ids()) {
                continue;
            }
            let value = if row.is_marker() {
                if !resolve_markers {
                    continue;
                }
                resolver.resolve(&row.key)
            } else {
                row.value
            };
            if skip_empty && value == 0.0 {
                continue;
            }
            if !condition(&row.key, value) {
                continue;
            }
            candidates.push((row.key.clone(), value));
        }
    }

    let start = match &cursor.resume_after {
        None => 0,
        Some(after) => {
            candidates.partition_point(|(k, _)| export_cmp(k, after) != Ordering::Greater)
        }
    };

    let end = (start + block_size).min(candidates.len());
    let rows = candidates[start..end].to_vec();
    let next = rows.last().map(|(k, _)| ExportCursor::after(k.clone()));
    ExportPage { rows, next }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ids: &[u32]) -> Key {
        Key::new(ids.to_vec())
    }

    fn filled_store() -> CubeStore<f64> {
        let mut store: CubeStore<f64> = CubeStore::new(2);
        store.set(key(&[0, 0]), 1.0, false);
        store.set(key(&[0, 1]), 2.0, false);
        store.set(key(&[1, 0]), 0.0, false);
        store.set(key(&[1, 1]), 4.0, false);
        store
    }

    #[test]
    fn export_block_respects_block_size_and_returns_a_cursor() {
        let store = filled_store();
        let page = export_block(
            &store,
            &ExportCursor::from_start(),
            None,
            2,
            false,
            false,
            &mut |_: &Key| panic!("no marker rows in this fixture"),
            &mut |_, _| true,
        );
        assert_eq!(page.rows.len(), 2);
        assert!(page.next.is_some());
    }

    #[test]
    fn resuming_from_a_cursor_continues_where_it_left_off() {
        let store = filled_store();
        let first = export_block(
            &store,
            &ExportCursor::from_start(),
            None,
            2,
            false,
            false,
            &mut |_: &Key| 0.0,
            &mut |_, _| true,
        );
        let second = export_block(
            &store,
            &first.next.unwrap(),
            None,
            2,
            false,
            false,
            &mut |_: &Key| 0.0,
            &mut |_, _| true,
        );
        assert_eq!(second.rows.len(), 2);
        assert!(second.next.is_none());
        let all_keys: Vec<_> = first
            .rows
            .iter()
            .chain(second.rows.iter())
            .map(|(k, _)| k.ids().to_vec())
            .collect();
        assert_eq!(
            all_keys,
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
    }

    #[test]
    fn skip_empty_drops_zero_valued_rows() {
        let store = filled_store();
        let page = export_block(
            &store,
            &ExportCursor::from_start(),
            None,
            usize::MAX,
            true,
            false,
            &mut |_: &Key| 0.0,
            &mut |_, _| true,
        );
        assert_eq!(page.rows.len(), 3);
        assert!(!page.rows.iter().any(|(k, _)| k.ids() == [1, 0]));
    }

    #[test]
    fn area_restriction_filters_by_per_dimension_membership() {
        let store = filled_store();
        let area = vec![vec![0], Vec::new()];
        let page = export_block(
            &store,
            &ExportCursor::from_start(),
            Some(&area),
            usize::MAX,
            false,
            false,
            &mut |_: &Key| 0.0,
            &mut |_, _| true,
        );
        let keys: Vec<_> = page.rows.iter().map(|(k, _)| k.ids().to_vec()).collect();
        assert_eq!(keys, vec![vec![0, 0], vec![0, 1]]);
    }

    #[test]
    fn marker_rows_are_skipped_unless_resolve_markers_is_set() {
        let mut store: CubeStore<f64> = CubeStore::new(1);
        store.set(key(&[0]), 0.0, true);
        store.set(key(&[1]), 5.0, false);

        let without_rules = export_block(
            &store,
            &ExportCursor::from_start(),
            None,
            usize::MAX,
            false,
            false,
            &mut |_: &Key| 99.0,
            &mut |_, _| true,
        );
        assert_eq!(without_rules.rows.len(), 1);

        let with_rules = export_block(
            &store,
            &ExportCursor::from_start(),
            None,
            usize::MAX,
            false,
            true,
            &mut |_: &Key| 99.0,
            &mut |_, _| true,
        );
        assert_eq!(with_rules.rows.len(), 2);
        assert!(with_rules
            .rows
            .iter()
            .any(|(k, v)| k.ids() == [0] && *v == 99.0));
    }

    #[test]
    fn condition_callback_can_veto_individual_rows() {
        let store = filled_store();
        let page = export_block(
            &store,
            &ExportCursor::from_start(),
            None,
            usize::MAX,
            false,
            false,
            &mut |_: &Key| 0.0,
            &mut |_, v| v > 1.0,
        );
        assert_eq!(page.rows.len(), 2);
    }
}
