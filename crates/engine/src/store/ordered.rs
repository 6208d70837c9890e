//! Ordered multiset backend on `BTreeMap`
//!
//! Keys are `(identifier, generation)` tuples, so equal-range, bound, and
//! span queries all come from `BTreeMap::range` with generation sentinels:
//! `(id, i64::MIN)` sorts before every revision of `id` and
//! `(id, i64::MAX)` after all of them (the engine's counter starts at one
//! and fails with an overflow status long before the sentinels).

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::ops::ControlFlow;

use canopy_core::{Element, Entry, Generation};

use super::{EntryStore, RevisionMark};

/// `BTreeMap`-backed ordered multiset of versioned entries.
pub struct OrderedStore<E: Element> {
    entries: BTreeMap<(E::Id, Generation), Entry<E>>,
}

impl<E: Element> Default for OrderedStore<E> {
    fn default() -> Self {
        OrderedStore {
            entries: BTreeMap::new(),
        }
    }
}

impl<E: Element> EntryStore<E> for OrderedStore<E> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn insert(&mut self, entry: Entry<E>) -> bool {
        let key = (entry.id(), entry.generation);
        match self.entries.entry(key) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    fn remove(&mut self, id: &E::Id, generation: Generation) -> Option<Entry<E>> {
        self.entries.remove(&(id.clone(), generation))
    }

    fn get(&self, id: &E::Id, generation: Generation) -> Option<&Entry<E>> {
        self.entries.get(&(id.clone(), generation))
    }

    fn update<R>(
        &mut self,
        id: &E::Id,
        generation: Generation,
        f: impl FnOnce(&mut Entry<E>) -> R,
    ) -> Option<R> {
        self.entries
            .get_mut(&(id.clone(), generation))
            .map(f)
    }

    fn live_revision(&self, id: &E::Id) -> Option<&Entry<E>> {
        let lo = (id.clone(), Generation::MIN);
        let hi = (id.clone(), Generation::MAX);
        self.entries
            .range((Included(lo), Included(hi)))
            .rev()
            .map(|(_, entry)| entry)
            .find(|entry| entry.visible)
    }

    fn revision_marks(&self, id: &E::Id, out: &mut Vec<RevisionMark>) {
        out.clear();
        let lo = (id.clone(), Generation::MIN);
        let hi = (id.clone(), Generation::MAX);
        for (_, entry) in self.entries.range((Included(lo), Included(hi))) {
            out.push(RevisionMark {
                generation: entry.generation,
                visible: entry.visible,
                deleted: entry.deleted,
            });
        }
    }

    fn first_above(&self, id: &E::Id) -> Option<&Entry<E>> {
        let from = (id.clone(), Generation::MAX);
        self.entries
            .range((Excluded(from), Unbounded))
            .map(|(_, entry)| entry)
            .next()
    }

    fn next_revision(&self, id: &E::Id, generation: Generation) -> Option<&Entry<E>> {
        let from = (id.clone(), generation);
        self.entries
            .range((Excluded(from), Unbounded))
            .map(|(_, entry)| entry)
            .next()
    }

    fn visit_span<'a>(
        &'a self,
        lo: &E::Id,
        hi: &E::Id,
        f: &mut dyn FnMut(&'a Entry<E>) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        // `BTreeMap::range` panics on an inverted range; a degenerate span
        // is simply empty.
        if lo >= hi {
            return ControlFlow::Continue(());
        }
        let lo = (lo.clone(), Generation::MIN);
        let hi = (hi.clone(), Generation::MIN);
        for (_, entry) in self.entries.range((Included(lo), Excluded(hi))) {
            f(entry)?;
        }
        ControlFlow::Continue(())
    }

    fn visit_span_mut(
        &mut self,
        lo: &E::Id,
        hi: &E::Id,
        f: &mut dyn FnMut(&mut Entry<E>) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        if lo >= hi {
            return ControlFlow::Continue(());
        }
        let lo = (lo.clone(), Generation::MIN);
        let hi = (hi.clone(), Generation::MIN);
        for (_, entry) in self.entries.range_mut((Included(lo), Excluded(hi))) {
            f(entry)?;
        }
        ControlFlow::Continue(())
    }
}
