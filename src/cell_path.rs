// CellPath. Immutable after construction.

use crate::element::{Dimension, Element, ElementKind};
use crate::error::{Error, Result};
use crate::key::Key;

/// What kind of value a path resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    Numeric,
    String,
    Consolidated,
}

/// An N-tuple of element ids addressing a cell, plus the resolved element
/// kinds along each dimension.
#[derive(Clone, Debug)]
pub struct CellPath {
    ids: Box<[u32]>,
    kinds: Box<[ElementKind]>,
    path_kind: PathKind,
}

impl CellPath {
    /// Builds a path for `dims`, resolving each id against its dimension.
    /// `dims.len()` must equal `ids.len()`.
    pub fn new(dims: &[&dyn Dimension], ids: &[u32]) -> Result<Self> {
        if dims.len() != ids.len() {
            return Err(Error::InvalidCoordinates);
        }
        let mut kinds = Vec::with_capacity(ids.len());
        for (dim, &id) in dims.iter().zip(ids) {
            let element = dim.element(id).ok_or(Error::InvalidCoordinates)?;
            kinds.push(element.kind);
        }
        let path_kind = resolve_path_kind(dims, &kinds, ids);
        Ok(Self {
            ids: ids.into(),
            kinds: kinds.into(),
            path_kind,
        })
    }

    pub fn dims(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn id(&self, dim: usize) -> u32 {
        self.ids[dim]
    }

    pub fn kind(&self, dim: usize) -> ElementKind {
        self.kinds[dim]
    }

    pub fn path_kind(&self) -> PathKind {
        self.path_kind
    }

    /// A path is `base` iff every element along it is a leaf (numeric or
    /// string).
    pub fn is_base(&self) -> bool {
        self.kinds.iter().all(|k| k.is_leaf())
    }

    pub fn key(&self) -> Key {
        Key::new(self.ids.clone())
    }
}

/// `path_kind` is `string` if any element is a string leaf or is a
/// consolidation whose base elements are strings; else `consolidated` if any
/// element is consolidated; else `numeric`.
fn resolve_path_kind(dims: &[&dyn Dimension], kinds: &[ElementKind], ids: &[u32]) -> PathKind {
    let mut any_consolidated = false;
    for (dim_idx, &kind) in kinds.iter().enumerate() {
        match kind {
            ElementKind::String => return PathKind::String,
            ElementKind::Consolidated => {
                any_consolidated = true;
                if consolidates_over_strings(dims[dim_idx], ids[dim_idx]) {
                    return PathKind::String;
                }
            }
            ElementKind::Numeric => {}
        }
    }
    if any_consolidated {
        PathKind::Consolidated
    } else {
        PathKind::Numeric
    }
}

fn consolidates_over_strings(dim: &dyn Dimension, element_id: u32) -> bool {
    let mut stack = vec![element_id];
    let mut seen = rustc_hash::FxHashSet::default();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let element: &Element = match dim.element(id) {
            Some(e) => e,
            None => continue,
        };
        match element.kind {
            ElementKind::String => return true,
            ElementKind::Numeric => continue,
            ElementKind::Consolidated => {
                for &(child, weight) in &element.children {
                    if weight != 0.0 {
                        stack.push(child);
                    }
                }
            }
        }
    }
    false
}
