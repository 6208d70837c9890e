//! The transactional versioned set
//!
//! [`VersionedSet`] owns a storage backend, the monotonic generation
//! counter, and a cached count of live entries. It enforces the visibility
//! rules:
//!
//! - at most one visible revision per identifier once commits settle,
//! - a visible tombstone reads as absent everywhere except `watch`,
//! - shadowed revisions are compacted as soon as a newer visible revision
//!   appears over them.
//!
//! The set is not thread-safe; the wrappers in `canopy-concurrency` add
//! locking. Interval arguments are half-open `[lo, hi)` throughout.

use std::marker::PhantomData;
use std::ops::ControlFlow;

use canopy_core::{Element, Entry, Error, Generation, Result, RevisionId};
use rand::Rng;

use crate::store::{AvlStore, EntryStore, OrderedStore, RevisionMark};
use crate::transaction::Transaction;

/// Ordered transactional set over the `BTreeMap` multiset backend.
pub type OrderedSet<E> = VersionedSet<E, OrderedStore<E>>;

/// Ordered transactional set over the height-balanced tree backend.
pub type AvlSet<E> = VersionedSet<E, AvlStore<E>>;

/// An in-memory, ordered, transactional set of versioned entries.
///
/// Entries order by `(identifier, generation)`; reads observe at most one
/// revision per identifier. Writes go through [`upsert`](Self::upsert) and
/// friends directly, or through a [`Transaction`] for optimistic multi-key
/// atomicity.
pub struct VersionedSet<E: Element, S: EntryStore<E>> {
    store: S,
    generation: Generation,
    live: usize,
    _marker: PhantomData<E>,
}

impl<E: Element, S: EntryStore<E>> Default for VersionedSet<E, S> {
    fn default() -> Self {
        VersionedSet::new()
    }
}

impl<E: Element, S: EntryStore<E>> VersionedSet<E, S> {
    /// An empty set.
    pub fn new() -> Self {
        VersionedSet {
            store: S::default(),
            generation: 0,
            live: 0,
            _marker: PhantomData,
        }
    }

    /// Number of live entries (visible, not tombstoned).
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no live entries exist.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of stored revisions, including staged and shadowed ones.
    pub fn revision_count(&self) -> usize {
        self.store.len()
    }

    /// Pre-size internal structures. Neither backend preallocates, so this
    /// is a successful no-op kept for interface stability.
    pub fn reserve(&mut self, _additional: usize) -> Result<()> {
        Ok(())
    }

    pub(crate) fn new_generation(&mut self) -> Result<Generation> {
        self.generation = self
            .generation
            .checked_add(1)
            .ok_or(Error::SequenceNumberOverflow)?;
        Ok(self.generation)
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub(crate) fn live_revision(&self, id: &E::Id) -> Option<&Entry<E>> {
        self.store.live_revision(id)
    }

    /// First live entry with identifier strictly greater than `id`.
    pub(crate) fn next_live_after(&self, id: &E::Id) -> Option<&Entry<E>> {
        let mut cursor = self.store.first_above(id);
        while let Some(entry) = cursor {
            if entry.is_live() {
                return Some(entry);
            }
            cursor = self.store.next_revision(&entry.id(), entry.generation);
        }
        None
    }

    fn remove_revision(&mut self, id: &E::Id, generation: Generation) {
        if let Some(entry) = self.store.remove(id, generation) {
            if entry.is_live() {
                self.live -= 1;
            }
        }
    }

    /// Erase every visible revision of `id` whose generation predates
    /// `keep`. Runs after a fresh visible revision lands.
    fn compact_shadowed(&mut self, id: &E::Id, keep: Generation, marks: &mut Vec<RevisionMark>) {
        self.store.revision_marks(id, marks);
        for index in 0..marks.len() {
            let mark = marks[index];
            if mark.visible && mark.generation < keep {
                self.remove_revision(id, mark.generation);
            }
        }
    }

    /// Unmask the staged revision with generation `unmask` and erase every
    /// older visible revision of the identifier. The commit-side compaction.
    pub(crate) fn unmask_and_compact(&mut self, id: &E::Id, unmask: Generation) {
        let mut marks = Vec::new();
        self.store.revision_marks(id, &mut marks);
        let mut last_visible: Option<Generation> = None;
        for mark in marks {
            let mut visible = mark.visible;
            if mark.generation == unmask && !mark.visible {
                let unmasked = self.store.update(id, mark.generation, |entry| {
                    entry.visible = true;
                });
                if unmasked.is_some() && !mark.deleted {
                    self.live += 1;
                }
                visible = true;
            }
            if !visible {
                continue;
            }
            if let Some(previous) = last_visible {
                self.remove_revision(id, previous);
            }
            last_visible = Some(mark.generation);
        }
    }

    /// Insert or replace the entry for the element's identifier. The new
    /// revision is immediately observable; older revisions are compacted.
    pub fn upsert(&mut self, element: E) -> Result<()> {
        let generation = self.new_generation()?;
        let id = element.id();
        if self.store.insert(Entry::live(element, generation)) {
            self.live += 1;
        }
        let mut marks = Vec::new();
        self.compact_shadowed(&id, generation, &mut marks);
        Ok(())
    }

    /// Upsert a batch of elements under one shared generation.
    ///
    /// Equivalent to a transaction that upserts each element and commits:
    /// the whole batch either lands or (on generation overflow) nothing
    /// does.
    pub fn upsert_batch<I>(&mut self, elements: I) -> Result<()>
    where
        I: IntoIterator<Item = E>,
    {
        let generation = self.new_generation()?;
        let mut marks = Vec::new();
        for element in elements {
            let id = element.id();
            // A repeated identifier within one batch lands on the same
            // (id, generation) address; the later element overwrites, the
            // way a transaction's change-set would.
            if self.store.get(&id, generation).is_some() {
                let _ = self
                    .store
                    .update(&id, generation, |entry| entry.element = element);
            } else {
                self.store.insert(Entry {
                    element,
                    generation,
                    deleted: false,
                    visible: true,
                });
                self.live += 1;
            }
            self.compact_shadowed(&id, generation, &mut marks);
        }
        Ok(())
    }

    /// Look up the live revision of `id`. Exactly one of the callbacks runs;
    /// a visible tombstone reports as missing.
    pub fn find<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        match self.store.live_revision(id) {
            Some(entry) if !entry.deleted => on_found(entry),
            _ => on_missing(),
        }
    }

    /// First live entry with identifier strictly greater than `id`.
    pub fn upper_bound<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        match self.next_live_after(id) {
            Some(entry) => on_found(entry),
            None => on_missing(),
        }
    }

    /// Visit the live elements of `[lo, hi)` in ascending identifier order.
    /// A callback error aborts the walk and is returned unchanged.
    pub fn range<F>(&self, lo: &E::Id, hi: &E::Id, mut f: F) -> Result<()>
    where
        F: FnMut(&E) -> Result<()>,
    {
        let mut outcome = Ok(());
        let _ = self.store.visit_span(lo, hi, &mut |entry| {
            if !entry.is_live() {
                return ControlFlow::Continue(());
            }
            match f(&entry.element) {
                Ok(()) => ControlFlow::Continue(()),
                Err(error) => {
                    outcome = Err(error);
                    ControlFlow::Break(())
                }
            }
        });
        outcome
    }

    /// Mutate the live elements of `[lo, hi)` in place. Every visited entry
    /// is re-stamped with one fresh generation; identifiers must not change.
    ///
    /// On a callback error the current element still lands back in the set
    /// (mutated, re-stamped) and the remainder of the interval is left
    /// untouched.
    pub fn range_mut<F>(&mut self, lo: &E::Id, hi: &E::Id, mut f: F) -> Result<()>
    where
        F: FnMut(&mut E) -> Result<()>,
    {
        let generation = self.new_generation()?;
        let targets = self.collect_visible_span(lo, hi, true);
        for revision in targets {
            let Some(mut entry) = self.store.remove(&revision.id, revision.generation) else {
                continue;
            };
            let status = f(&mut entry.element);
            entry.generation = generation;
            self.store.insert(entry);
            status?;
        }
        Ok(())
    }

    /// Revision addresses of the visible entries in `[lo, hi)`; with
    /// `live_only`, tombstones are skipped too.
    fn collect_visible_span(
        &self,
        lo: &E::Id,
        hi: &E::Id,
        live_only: bool,
    ) -> Vec<RevisionId<E::Id>> {
        let mut revisions = Vec::new();
        let _ = self.store.visit_span(lo, hi, &mut |entry| {
            if entry.visible && (!live_only || !entry.deleted) {
                revisions.push(entry.revision_id());
            }
            ControlFlow::Continue(())
        });
        revisions
    }

    /// Remove every visible revision of `id`, live or tombstoned.
    pub fn erase(&mut self, id: &E::Id) -> Result<()> {
        let mut marks = Vec::new();
        self.store.revision_marks(id, &mut marks);
        for mark in marks {
            if mark.visible {
                self.remove_revision(id, mark.generation);
            }
        }
        Ok(())
    }

    /// Remove every visible entry of `[lo, hi)`, invoking the callback on
    /// each live element before its removal. A callback error stops the
    /// erase with the remainder of the interval intact.
    pub fn erase_range<F>(&mut self, lo: &E::Id, hi: &E::Id, mut f: F) -> Result<()>
    where
        F: FnMut(&E) -> Result<()>,
    {
        let targets = self.collect_visible_span(lo, hi, false);
        for revision in targets {
            let status = match self.store.get(&revision.id, revision.generation) {
                Some(entry) if entry.is_live() => f(&entry.element),
                _ => Ok(()),
            };
            status?;
            self.remove_revision(&revision.id, revision.generation);
        }
        Ok(())
    }

    /// Invoke the callback on one live element of `[lo, hi)`, picked
    /// uniformly at random. A no-op when the interval holds none.
    pub fn sample_range<R, F>(&self, lo: &E::Id, hi: &E::Id, rng: &mut R, f: F) -> Result<()>
    where
        R: Rng,
        F: FnOnce(&E) -> Result<()>,
    {
        match self.store.sample_span(lo, hi, rng) {
            Some(entry) => f(&entry.element),
            None => Ok(()),
        }
    }

    /// Reservoir-sample the live elements of `[lo, hi)`.
    ///
    /// `seen` counts every element offered so far and carries across calls,
    /// so several sets (or shards) can fill one reservoir: while fewer than
    /// `capacity` elements have been seen the element is appended; after
    /// that it replaces a random slot with probability `capacity / seen`.
    pub fn sample_reservoir<R>(
        &self,
        lo: &E::Id,
        hi: &E::Id,
        rng: &mut R,
        seen: &mut usize,
        capacity: usize,
        reservoir: &mut Vec<E>,
    ) -> Result<()>
    where
        R: Rng,
        E: Clone,
    {
        let _ = self.store.visit_span(lo, hi, &mut |entry| {
            if !entry.is_live() {
                return ControlFlow::Continue(());
            }
            if *seen < capacity {
                reservoir.push(entry.element.clone());
            } else {
                let slot = rng.gen_range(0..=*seen);
                if slot < capacity {
                    reservoir[slot] = entry.element.clone();
                }
            }
            *seen += 1;
            ControlFlow::Continue(())
        });
        Ok(())
    }

    /// Drop every entry and reset the generation counter.
    pub fn clear(&mut self) -> Result<()> {
        self.store.clear();
        self.generation = 0;
        self.live = 0;
        Ok(())
    }

    /// Open a transaction against this set.
    ///
    /// The transaction must be used with this set only; handing it a
    /// different set corrupts both. The thread-safe wrappers enforce the
    /// pairing structurally.
    pub fn transaction(&mut self) -> Result<Transaction<E>> {
        let generation = self.new_generation()?;
        Ok(Transaction::new(generation))
    }
}
