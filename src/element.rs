// Dimension hierarchy element model.
//
// Storage and name/identifier lookup for a dimension's hierarchy is an
// external collaborator; this module defines the shared vocabulary
// (`Element`, `ElementKind`) and the `Dimension` port the engine calls
// against.

use rustc_hash::FxHashMap;

/// What a hierarchy node is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// A leaf carrying a numeric value.
    Numeric,
    /// A leaf carrying a string value.
    String,
    /// An interior node whose value is the weighted sum of its children.
    Consolidated,
}

impl ElementKind {
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Numeric | Self::String)
    }
}

/// A single hierarchy node, owned by a `Dimension`.
#[derive(Clone, Debug)]
pub struct Element {
    pub id: u32,
    pub kind: ElementKind,
    pub parents: Vec<u32>,
    /// `(child_id, weight)` pairs; weight 0 means "structurally linked but
    /// contributes nothing", and is excluded from `base_elements`.
    pub children: Vec<(u32, f64)>,
}

impl Element {
    pub fn new(id: u32, kind: ElementKind) -> Self {
        Self {
            id,
            kind,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_base(&self) -> bool {
        self.kind.is_leaf()
    }
}

/// The transitive closure of `base_elements` over `element`, restricted to
/// numeric leaves and carrying accumulated weight. Non-numeric
/// leaves reachable under a consolidated node do not contribute a weight
/// entry here — the caller decides how to treat string leaves under a
/// consolidation (in practice: the path becomes `path_kind == string` and
/// no numeric aggregation is attempted).
pub fn base_elements(dim: &dyn Dimension, element_id: u32) -> Vec<(u32, f64)> {
    let mut out: FxHashMap<u32, f64> = FxHashMap::default();
    let mut stack = vec![(element_id, 1.0_f64)];
    while let Some((id, weight)) = stack.pop() {
        let element = match dim.element(id) {
            Some(e) => e,
            None => continue,
        };
        if element.kind == ElementKind::Numeric {
            *out.entry(id).or_insert(0.0) += weight;
            continue;
        }
        for &(child, child_weight) in &element.children {
            if child_weight == 0.0 {
                continue;
            }
            stack.push((child, weight * child_weight));
        }
    }
    out.into_iter().filter(|&(_, w)| w != 0.0).collect()
}

/// External collaborator: dimension hierarchy storage and name/identifier
/// lookup. The engine only ever needs parents, children, and
/// element lookup by id.
pub trait Dimension: Send + Sync {
    fn id(&self) -> u32;
    fn element(&self, id: u32) -> Option<&Element>;
    fn element_count(&self) -> usize;

    /// All ids that currently exist in this dimension.
    fn element_ids(&self) -> Vec<u32>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// An in-memory `Dimension` for unit and integration tests.
    pub struct FakeDimension {
        pub id: u32,
        pub elements: FxHashMap<u32, Element>,
    }

    impl FakeDimension {
        pub fn new(id: u32) -> Self {
            Self {
                id,
                elements: FxHashMap::default(),
            }
        }

        pub fn add(&mut self, element: Element) -> u32 {
            let id = element.id;
            self.elements.insert(id, element);
            id
        }

        pub fn link(&mut self, parent: u32, child: u32, weight: f64) {
            self.elements
                .get_mut(&parent)
                .expect("parent exists")
                .children
                .push((child, weight));
            self.elements
                .get_mut(&child)
                .expect("child exists")
                .parents
                .push(parent);
        }
    }

    impl Dimension for FakeDimension {
        fn id(&self) -> u32 {
            self.id
        }

        fn element(&self, id: u32) -> Option<&Element> {
            self.elements.get(&id)
        }

        fn element_count(&self) -> usize {
            self.elements.len()
        }

        fn element_ids(&self) -> Vec<u32> {
            self.elements.keys().copied().collect()
        }
    }
}
