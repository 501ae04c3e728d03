use criterion::{criterion_group, criterion_main, Criterion};
use palo_cube::consolidate::consolidate;
use palo_cube::element::{base_elements, Dimension, Element, ElementKind};
use palo_cube::key::Key;
use palo_cube::store::CubeStore;
use rustc_hash::FxHashMap;

/// A dimension with `n` numeric leaves under one consolidated root, built
/// fresh per benchmark size rather than reused across iterations.
struct FlatDimension {
    elements: FxHashMap<u32, Element>,
}

impl FlatDimension {
    fn with_leaves(n: u32) -> Self {
        let mut elements = FxHashMap::default();
        let mut root = Element::new(n, ElementKind::Consolidated);
        for leaf in 0..n {
            elements.insert(leaf, Element::new(leaf, ElementKind::Numeric));
            root.children.push((leaf, 1.0));
        }
        elements.insert(n, root);
        Self { elements }
    }
}

impl Dimension for FlatDimension {
    fn id(&self) -> u32 {
        0
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

fn consolidate_single_dim(c: &mut Criterion) {
    let mut group = c.benchmark_group("consolidate (1 dim)");

    for leaf_count in [10u32, 100, 1_000, 10_000] {
        let dim = FlatDimension::with_leaves(leaf_count);
        let mut store: CubeStore<f64> = CubeStore::new(1);
        for leaf in 0..leaf_count {
            store.set(Key::new(vec![leaf]), leaf as f64, false);
        }
        let base = vec![base_elements(&dim, leaf_count)];

        group.bench_function(format!("{leaf_count} leaves"), |b| {
            b.iter(|| {
                let mut no_markers = |_: &Key, stored: f64| stored;
                consolidate(&mut store, &base, &mut no_markers)
            })
        });
    }
}

fn consolidate_three_dims(c: &mut Criterion) {
    let mut group = c.benchmark_group("consolidate (3 dims)");

    for leaf_count in [5u32, 10, 20] {
        let dim = FlatDimension::with_leaves(leaf_count);
        let mut store: CubeStore<f64> = CubeStore::new(3);
        for a in 0..leaf_count {
            for b in 0..leaf_count {
                for c in 0..leaf_count {
                    store.set(Key::new(vec![a, b, c]), 1.0, false);
                }
            }
        }
        let base = vec![
            base_elements(&dim, leaf_count),
            base_elements(&dim, leaf_count),
            base_elements(&dim, leaf_count),
        ];

        group.bench_function(format!("{leaf_count}^3 base cells"), |b| {
            b.iter(|| {
                let mut no_markers = |_: &Key, stored: f64| stored;
                consolidate(&mut store, &base, &mut no_markers)
            })
        });
    }
}

criterion_group!(benches, consolidate_single_dim, consolidate_three_dims);
criterion_main!(benches);
