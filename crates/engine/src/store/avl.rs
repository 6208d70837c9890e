//! AVL-tree backend
//!
//! Thin adapter from the [`EntryStore`] queries to the probe-based tree
//! operations. Sampling is overridden with the tree's two-pass range
//! sampler, which skips the mark-collection walk the generic default does.

use std::ops::ControlFlow;

use canopy_avl::AvlTree;
use canopy_core::{AfterRevision, Above, Bare, Below, Dated, Element, Entry, Generation, RevisionId};
use rand::RngCore;

use super::{EntryStore, RevisionMark};

/// Height-balanced-tree-backed ordered multiset of versioned entries.
pub struct AvlStore<E: Element> {
    tree: AvlTree<E>,
}

impl<E: Element> AvlStore<E> {
    /// Borrow the underlying tree for diagnostics.
    pub fn tree(&self) -> &AvlTree<E> {
        &self.tree
    }
}

impl<E: Element> Default for AvlStore<E> {
    fn default() -> Self {
        AvlStore {
            tree: AvlTree::new(),
        }
    }
}

fn revision<K: Clone>(id: &K, generation: Generation) -> RevisionId<K> {
    RevisionId {
        id: id.clone(),
        generation,
    }
}

impl<E: Element> EntryStore<E> for AvlStore<E> {
    fn len(&self) -> usize {
        self.tree.len()
    }

    fn clear(&mut self) {
        self.tree.clear();
    }

    fn insert(&mut self, entry: Entry<E>) -> bool {
        self.tree.insert(entry)
    }

    fn remove(&mut self, id: &E::Id, generation: Generation) -> Option<Entry<E>> {
        self.tree.remove(&Dated(&revision(id, generation)))
    }

    fn get(&self, id: &E::Id, generation: Generation) -> Option<&Entry<E>> {
        self.tree.get(&Dated(&revision(id, generation)))
    }

    fn update<R>(
        &mut self,
        id: &E::Id,
        generation: Generation,
        f: impl FnOnce(&mut Entry<E>) -> R,
    ) -> Option<R> {
        self.tree.update(&Dated(&revision(id, generation)), f)
    }

    fn live_revision(&self, id: &E::Id) -> Option<&Entry<E>> {
        // Ascending walk over the equal range; the last visible revision is
        // the one with the greatest generation.
        let mut found = None;
        let _ = self.tree.try_for_range(&Bare(id), &Bare(id), |entry| {
            if entry.visible {
                found = Some(entry);
            }
            ControlFlow::Continue(())
        });
        found
    }

    fn revision_marks(&self, id: &E::Id, out: &mut Vec<RevisionMark>) {
        out.clear();
        let _ = self.tree.try_for_range(&Bare(id), &Bare(id), |entry| {
            out.push(RevisionMark {
                generation: entry.generation,
                visible: entry.visible,
                deleted: entry.deleted,
            });
            ControlFlow::Continue(())
        });
    }

    fn first_above(&self, id: &E::Id) -> Option<&Entry<E>> {
        self.tree.lower_bound(&Above(id))
    }

    fn next_revision(&self, id: &E::Id, generation: Generation) -> Option<&Entry<E>> {
        self.tree
            .lower_bound(&AfterRevision(&revision(id, generation)))
    }

    fn visit_span<'a>(
        &'a self,
        lo: &E::Id,
        hi: &E::Id,
        f: &mut dyn FnMut(&'a Entry<E>) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        self.tree.try_for_range(&Bare(lo), &Below(hi), |entry| f(entry))
    }

    fn visit_span_mut(
        &mut self,
        lo: &E::Id,
        hi: &E::Id,
        f: &mut dyn FnMut(&mut Entry<E>) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        self.tree.for_range_mut(&Bare(lo), &Below(hi), |entry| f(entry))
    }

    fn sample_span<'a>(
        &'a self,
        lo: &E::Id,
        hi: &E::Id,
        rng: &mut dyn RngCore,
    ) -> Option<&'a Entry<E>> {
        self.tree
            .sample_range(&Bare(lo), &Below(hi), rng, |entry| entry.is_live())
    }
}
