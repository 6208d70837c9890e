//! Storage backends for the transactional engine
//!
//! The engine owns the visibility and compaction rules; a backend only has
//! to keep entries totally ordered by `(identifier, generation)` and answer
//! the narrow set of queries below. Two backends ship: an ordered multiset
//! on `BTreeMap` ([`OrderedStore`]) and a height-balanced tree
//! ([`AvlStore`]).

use std::ops::ControlFlow;

use canopy_core::{Element, Entry, Generation};
use rand::RngCore;

mod avl;
mod ordered;

pub use avl::AvlStore;
pub use ordered::OrderedStore;

/// Compact per-revision summary used by the engine's compaction passes.
#[derive(Debug, Clone, Copy)]
pub struct RevisionMark {
    /// The revision's generation.
    pub generation: Generation,
    /// Whether reads may observe the revision.
    pub visible: bool,
    /// Whether the revision is a tombstone.
    pub deleted: bool,
}

/// An ordered multiset of versioned entries keyed by
/// `(identifier, generation)`.
///
/// Spans are half-open identifier intervals `[lo, hi)` and visit every
/// revision, visible or not, in storage order. Visibility filtering is the
/// engine's job.
pub trait EntryStore<E: Element>: Default {
    /// Number of stored entries (all revisions).
    fn len(&self) -> usize;

    /// Whether no entries are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    fn clear(&mut self);

    /// Add a revision at its `(identifier, generation)` position. Returns
    /// false, leaving the stored revision untouched, when that address is
    /// already occupied.
    fn insert(&mut self, entry: Entry<E>) -> bool;

    /// Extract one revision by address.
    fn remove(&mut self, id: &E::Id, generation: Generation) -> Option<Entry<E>>;

    /// Borrow one revision by address.
    fn get(&self, id: &E::Id, generation: Generation) -> Option<&Entry<E>>;

    /// Run a closure over one revision by address. The closure must not
    /// change the entry's identifier or generation.
    fn update<R>(
        &mut self,
        id: &E::Id,
        generation: Generation,
        f: impl FnOnce(&mut Entry<E>) -> R,
    ) -> Option<R>;

    /// The visible revision of an identifier with the greatest generation,
    /// tombstone or not. `None` when no revision is visible.
    fn live_revision(&self, id: &E::Id) -> Option<&Entry<E>>;

    /// Collect `(generation, visible, deleted)` for every revision of the
    /// identifier, ascending by generation. Clears `out` first.
    fn revision_marks(&self, id: &E::Id, out: &mut Vec<RevisionMark>);

    /// First revision whose identifier is strictly greater than `id`.
    fn first_above(&self, id: &E::Id) -> Option<&Entry<E>>;

    /// First revision strictly after `(id, generation)` in storage order.
    fn next_revision(&self, id: &E::Id, generation: Generation) -> Option<&Entry<E>>;

    /// Visit every revision with identifier in `[lo, hi)`, ascending.
    fn visit_span<'a>(
        &'a self,
        lo: &E::Id,
        hi: &E::Id,
        f: &mut dyn FnMut(&'a Entry<E>) -> ControlFlow<()>,
    ) -> ControlFlow<()>;

    /// Mutable variant of [`visit_span`](EntryStore::visit_span). Callbacks
    /// must not change an entry's identifier or generation.
    fn visit_span_mut(
        &mut self,
        lo: &E::Id,
        hi: &E::Id,
        f: &mut dyn FnMut(&mut Entry<E>) -> ControlFlow<()>,
    ) -> ControlFlow<()>;

    /// Uniform pick among the live entries of `[lo, hi)`; `None` when the
    /// span holds none. The default is a two-pass count-then-index walk;
    /// backends may substitute an equivalent strategy.
    fn sample_span<'a>(
        &'a self,
        lo: &E::Id,
        hi: &E::Id,
        rng: &mut dyn RngCore,
    ) -> Option<&'a Entry<E>> {
        use rand::Rng;

        let mut live = 0usize;
        let _ = self.visit_span(lo, hi, &mut |entry| {
            if entry.is_live() {
                live += 1;
            }
            ControlFlow::Continue(())
        });
        if live == 0 {
            return None;
        }

        let mut index = rng.gen_range(0..live);
        let mut picked = None;
        let _ = self.visit_span(lo, hi, &mut |entry| {
            if !entry.is_live() {
                return ControlFlow::Continue(());
            }
            if index == 0 {
                picked = Some(entry);
                return ControlFlow::Break(());
            }
            index -= 1;
            ControlFlow::Continue(())
        });
        picked
    }
}
