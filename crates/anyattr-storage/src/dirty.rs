//! Change detection between the stored and the current attributes of an
//! owner.

use std::collections::{BTreeMap, BTreeSet};

use crate::convert::AttrSlot;

/// Attributes to write on save.
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    /// Attributes not stored yet.
    pub new: BTreeSet<AttrSlot>,
    /// Stored attributes whose content changed.
    pub modified: BTreeSet<AttrSlot>,
    /// Stored attributes the owner no longer has.
    pub removed: BTreeSet<AttrSlot>,
}

impl DirtySet {
    /// Slots whose stored rows must be replaced (new + modified).
    pub fn needs_write(&self) -> BTreeSet<AttrSlot> {
        self.new.union(&self.modified).cloned().collect()
    }

    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.removed.len()
    }
}

pub fn compute_dirty_set(
    previous: &BTreeMap<AttrSlot, blake3::Hash>,
    current: &BTreeMap<AttrSlot, blake3::Hash>,
) -> DirtySet {
    let mut dirty = DirtySet::default();
    for (slot, hash) in current {
        match previous.get(slot) {
            Some(prev) if prev == hash => {}
            Some(_) => {
                dirty.modified.insert(slot.clone());
            }
            None => {
                dirty.new.insert(slot.clone());
            }
        }
    }
    for slot in previous.keys() {
        if !current.contains_key(slot) {
            dirty.removed.insert(slot.clone());
        }
    }
    dirty
}
