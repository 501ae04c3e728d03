// C9 LockManager: area locks over a cube. Grounded in
// `examples/original_source/molap/server/Source/Olap/Lock.h` — `Lock` keeps
// `containsArea` (locked elements plus every descendant) and `overlapArea`
// (`containsArea` plus every ancestor), and answers `contains`/`blocks`/
// `overlaps` against those two per-dimension sets.

use crate::element::{Dimension, ElementKind};
use crate::error::{Error, Result};
use rustc_hash::FxHashSet;

fn descendants_and_self(dim: &dyn Dimension, root: u32) -> FxHashSet<u32> {
    let mut seen = FxHashSet::default();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(element) = dim.element(id) {
            if element.kind == ElementKind::Consolidated {
                for &(child, _) in &element.children {
                    stack.push(child);
                }
            }
        }
    }
    seen
}

fn ancestors_and_self(dim: &dyn Dimension, root: u32) -> FxHashSet<u32> {
    let mut seen = FxHashSet::default();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(element) = dim.element(id) {
            for &parent in &element.parents {
                stack.push(parent);
            }
        }
    }
    seen
}

/// An area lock held by one user over a sub-area of a cube.
pub struct Lock {
    pub id: u32,
    pub user_id: u32,
    pub area_string: String,
    /// Per dimension: locked elements plus every descendant.
    contains_area: Vec<FxHashSet<u32>>,
    /// Per dimension: `contains_area` plus every ancestor.
    overlap_area: Vec<FxHashSet<u32>>,
}

impl Lock {
    /// `area[d]` lists the locked elements of dimension `d`; an empty slice
    /// means "every element of that dimension".
    pub fn new(
        id: u32,
        user_id: u32,
        area_string: String,
        area: &[Vec<u32>],
        dims: &[&dyn Dimension],
    ) -> Self {
        let mut contains_area = Vec::with_capacity(dims.len());
        let mut overlap_area = Vec::with_capacity(dims.len());
        for (d, dim) in dims.iter().enumerate() {
            let roots: Vec<u32> = if area[d].is_empty() {
                dim.element_ids()
            } else {
                area[d].clone()
            };
            let mut contains: FxHashSet<u32> = FxHashSet::default();
            let mut overlap: FxHashSet<u32> = FxHashSet::default();
            for &root in &roots {
                contains.extend(descendants_and_self(*dim, root));
                overlap.extend(ancestors_and_self(*dim, root));
            }
            overlap.extend(contains.iter().copied());
            contains_area.push(contains);
            overlap_area.push(overlap);
        }
        Self {
            id,
            user_id,
            area_string,
            contains_area,
            overlap_area,
        }
    }

    /// True if `path` addresses a cell inside the locked area.
    pub fn contains(&self, path_ids: &[u32]) -> bool {
        path_ids
            .iter()
            .enumerate()
            .all(|(d, id)| self.contains_area[d].contains(id))
    }

    /// True if writing at `path` could splash or consolidate into the
    /// locked area.
    pub fn blocks(&self, path_ids: &[u32]) -> bool {
        path_ids
            .iter()
            .enumerate()
            .all(|(d, id)| self.overlap_area[d].contains(id))
    }

    /// True if this lock's area overlaps another lock's overlap area in
    /// every dimension (used to reject a new lock that conflicts with one
    /// already held).
    pub fn overlaps(&self, other: &Lock) -> bool {
        self.overlap_area
            .iter()
            .zip(&other.overlap_area)
            .all(|(a, b)| a.intersection(b).next().is_some())
    }
}

/// Holds the locks currently active on one cube.
#[derive(Default)]
pub struct LockManager {
    locks: Vec<Lock>,
    next_id: u32,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self) -> &[Lock] {
        &self.locks
    }

    /// Acquires a new lock, rejecting it if it conflicts with an
    /// already-held lock.
    pub fn acquire(
        &mut self,
        user_id: u32,
        area_string: String,
        area: &[Vec<u32>],
        dims: &[&dyn Dimension],
    ) -> Result<u32> {
        let id = self.next_id;
        let candidate = Lock::new(id, user_id, area_string, area, dims);
        if self.locks.iter().any(|held| held.overlaps(&candidate)) {
            return Err(Error::CubeBlockedByLock);
        }
        self.next_id += 1;
        self.locks.push(candidate);
        Ok(id)
    }

    /// Releases a lock on commit or rollback. Only the
    /// owning user may release it.
    pub fn release(&mut self, lock_id: u32, user_id: u32) -> Result<()> {
        let pos = self
            .locks
            .iter()
            .position(|l| l.id == lock_id)
            .ok_or(Error::CubeLockNotFound)?;
        if self.locks[pos].user_id != user_id {
            return Err(Error::CubeWrongUser);
        }
        self.locks.remove(pos);
        Ok(())
    }

    /// The first lock (if any) that blocks a write at `path_ids`, other
    /// than one owned by `user_id` (who may freely write inside their own
    /// lock).
    pub fn blocking_lock(&self, path_ids: &[u32], user_id: u32) -> Option<&Lock> {
        self.locks
            .iter()
            .find(|l| l.user_id != user_id && l.blocks(path_ids))
    }
}
