// KeyIndex: hash from a packed N-tuple key to the row slot holding it
// inside a page.
//
// Keeps the contract of a hand-rolled open-addressing table — key in,
// slot out — over a `HashMap` keyed by an `rustc-hash` hasher, rather than
// reimplementing probing by hand.

use crate::key::Key;
use rustc_hash::FxHashMap;

/// Maps a `Key` to the slot (row index) inside its owning `CellPage` that
/// currently holds it.
#[derive(Default)]
pub struct KeyIndex {
    slots: FxHashMap<Key, usize>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self {
            slots: FxHashMap::default(),
        }
    }

    pub fn lookup(&self, key: &Key) -> Option<usize> {
        self.slots.get(key).copied()
    }

    /// Registers `key` at `slot`, overwriting any prior registration.
    pub fn insert(&mut self, key: Key, slot: usize) {
        self.slots.insert(key, slot);
    }

    /// Removes the registration for `key`, returning its prior slot.
    pub fn remove(&mut self, key: &Key) -> Option<usize> {
        self.slots.remove(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
