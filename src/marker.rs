// C7 MarkerPropagator. Grounded in
// `examples/original_source/molap/server/Source/Olap/MarkerStorage.h`: the
// `permutations`/`maps` key-projection in `setCellValue` becomes
// `MarkerSpec::project`, with the `NO_PERMUTATION`/`NO_MAPPING` sentinels
// redesigned as `Option<_>` instead of `~0`/magic constants.

use crate::key::Key;
use crate::rule::Area;

/// One rule-declared marker: a projection from a base cell in `from_cube`
/// to a marker cell in `to_cube`.
#[derive(Clone)]
pub struct MarkerSpec {
    pub rule_id: u32,
    pub from_cube: u32,
    pub to_cube: u32,
    /// Base area in the source cube that activates this marker.
    pub from_area: Area,
    /// Per destination-dimension: which source dimension feeds it, or
    /// `None` if the dimension is supplied by `fixed` instead.
    pub permutation: Vec<Option<usize>>,
    /// Per destination-dimension constant, used where `permutation[d]` is
    /// `None`.
    pub fixed: Vec<Option<u32>>,
    /// Per destination-dimension id translation table. `None` at the
    /// dimension level means "no translation"; `None` inside the table at
    /// a given source id means "veto the whole projection" (the original's
    /// `NO_MAPPING`).
    pub mapping: Vec<Option<Vec<Option<u32>>>>,
}

impl MarkerSpec {
    /// Projects a source row's coordinates into a destination key, or
    /// `None` if a mapping table vetoes the translation.
    pub fn project(&self, source_ids: &[u32]) -> Option<Vec<u32>> {
        let mut out = Vec::with_capacity(self.permutation.len());
        for d in 0..self.permutation.len() {
            let mut id = match self.permutation[d] {
                Some(src_dim) => source_ids[src_dim],
                None => self.fixed[d]?,
            };
            if let Some(table) = &self.mapping[d] {
                id = (*table.get(id as usize)?)?;
            }
            out.push(id);
        }
        Some(out)
    }
}

/// Per-cube marker bookkeeping: `markers_in` are "from" markers registered
/// on this (source) cube, `markers_out` are "to" markers registered
/// elsewhere that point at this cube, tracked only so a structural change
/// here can schedule their rebuild.
#[derive(Default)]
pub struct MarkerPropagator {
    markers_in: Vec<MarkerSpec>,
    markers_out: Vec<MarkerSpec>,
    rebuild_due: bool,
    epoch: u64,
}

impl MarkerPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markers_in(&self) -> &[MarkerSpec] {
        &self.markers_in
    }

    pub fn markers_out(&self) -> &[MarkerSpec] {
        &self.markers_out
    }

    pub fn rebuild_due(&self) -> bool {
        self.rebuild_due
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Registers a "from" marker and immediately activates it against every
    /// currently-live row the caller supplies from the source cube's base
    /// area.
    pub fn add_from_marker(
        &mut self,
        spec: MarkerSpec,
        source_rows: impl Iterator<Item = Key>,
        mut activate: impl FnMut(&MarkerSpec, &[u32]),
    ) {
        for key in source_rows {
            if let Some(dest_ids) = spec.project(key.ids()) {
                activate(&spec, &dest_ids);
            }
        }
        self.markers_in.push(spec);
    }

    /// Registers a "to" marker. Prior writes on the owning cube may not
    /// have fired it, so a full rebuild is scheduled rather than attempted
    /// incrementally.
    pub fn add_to_marker(&mut self, spec: MarkerSpec) {
        self.markers_out.push(spec);
        self.rebuild_due = true;
    }

    /// Called on every base-cell insert in the source cube: returns the
    /// destination cells that should receive a marker for `key`.
    pub fn check_from(&self, key: &Key) -> Vec<(u32, Vec<u32>)> {
        self.markers_in
            .iter()
            .filter(|m| m.from_area.within_ids(key.ids()))
            .filter_map(|m| m.project(key.ids()).map(|ids| (m.to_cube, ids)))
            .collect()
    }

    /// Full rebuild: the caller clears every marker flag in
    /// this cube first (`clear_markers`, turning marker-only cells into
    /// tombstones), then every live `from` marker re-activates against the
    /// rows the caller supplies. Runs at most once per "changed markers"
    /// epoch.
    pub fn rebuild(
        &mut self,
        mut clear_markers: impl FnMut(),
        mut source_rows: impl FnMut(&MarkerSpec) -> Vec<Key>,
        mut activate: impl FnMut(&MarkerSpec, &[u32]),
    ) {
        clear_markers();
        for spec in self.markers_in.clone() {
            for key in source_rows(&spec) {
                if let Some(dest_ids) = spec.project(key.ids()) {
                    activate(&spec, &dest_ids);
                }
            }
        }
        self.rebuild_due = false;
        self.epoch += 1;
    }
}
