//! Optimistic transactions: watch, stage, commit
//!
//! A [`Transaction`] buffers writes in a private change-set and records
//! [`Watch`] snapshots of the entries its decisions depend on. `stage`
//! validates every watch against the current store and, when none changed,
//! merges the change-set in as invisible entries; `commit` then unmasks them
//! and compacts older revisions per identifier. `reset` abandons everything,
//! `rollback` pulls staged entries back into the change-set for another
//! attempt.
//!
//! The transaction holds no reference to its set; operations that touch the
//! store take it as an argument (so several transactions can be open against
//! one set at a time). A transaction must only ever be passed the set that
//! created it.

use std::collections::BTreeMap;
use std::ops::Bound;

use canopy_core::{Element, Entry, Error, Generation, Result, Watch};
use tracing::{debug, trace};

use crate::set::VersionedSet;
use crate::store::EntryStore;

/// A watch paired with the identifier it observes.
#[derive(Debug, Clone)]
struct WatchedId<K> {
    id: K,
    watch: Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Staged,
}

/// An optimistic transaction over a [`VersionedSet`].
///
/// Lifecycle: `Created` → (`stage`) → `Staged` → (`commit` | `rollback` |
/// `reset`) → `Created`. `commit` and `rollback` without a prior successful
/// `stage` fail with [`Error::NotPermitted`]; so does a second `stage`.
/// Every transition back to `Created` draws a fresh generation from the set.
pub struct Transaction<E: Element> {
    changes: BTreeMap<E::Id, Entry<E>>,
    watches: Vec<WatchedId<E::Id>>,
    generation: Generation,
    state: State,
}

impl<E: Element> Transaction<E> {
    pub(crate) fn new(generation: Generation) -> Self {
        Transaction {
            changes: BTreeMap::new(),
            watches: Vec::new(),
            generation,
            state: State::Created,
        }
    }

    /// The transaction's current generation: recorded in missing watches,
    /// refreshed by `stage` (staged revisions carry the refreshed value)
    /// and by every transition back to `Created`.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether the change-set has been staged into the store.
    pub fn is_staged(&self) -> bool {
        self.state == State::Staged
    }

    /// The watch recorded for an identifier that was absent: a tombstone at
    /// this transaction's own generation. It stays valid exactly as long as
    /// the identifier stays invisible.
    fn missing_watch(&self) -> Watch {
        Watch {
            generation: self.generation,
            deleted: true,
        }
    }

    /// Pre-size the watch list. The only operation that can observe an
    /// allocation failure, surfaced as [`Error::OutOfMemoryHeap`].
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.watches
            .try_reserve(additional)
            .map_err(|_| Error::OutOfMemoryHeap)
    }

    /// Buffer an insert-or-replace of the element's identifier.
    pub fn upsert(&mut self, element: E) -> Result<()> {
        let id = element.id();
        self.changes.insert(
            id,
            Entry {
                element,
                generation: self.generation,
                deleted: false,
                visible: false,
            },
        );
        Ok(())
    }

    /// Buffer an erase of the identifier (a pending tombstone).
    pub fn erase(&mut self, id: E::Id) -> Result<()> {
        self.changes.insert(
            id.clone(),
            Entry {
                element: E::from_id(id),
                generation: self.generation,
                deleted: true,
                visible: false,
            },
        );
        Ok(())
    }

    /// Record the identifier's current state so `stage` can detect a change.
    /// An absent identifier is watched as "still absent".
    pub fn watch<S: EntryStore<E>>(
        &mut self,
        set: &VersionedSet<E, S>,
        id: &E::Id,
    ) -> Result<()> {
        let watched = match set.live_revision(id) {
            Some(entry) => WatchedId {
                id: entry.id(),
                watch: entry.watch(),
            },
            None => WatchedId {
                id: id.clone(),
                watch: self.missing_watch(),
            },
        };
        self.watches.push(watched);
        Ok(())
    }

    /// Watch an entry already fetched from the set, skipping the lookup.
    pub fn watch_entry(&mut self, entry: &Entry<E>) -> Result<()> {
        self.watches.push(WatchedId {
            id: entry.id(),
            watch: entry.watch(),
        });
        Ok(())
    }

    /// Look up `id` through this transaction: pending writes shadow the set,
    /// and a pending tombstone reports as missing.
    pub fn find<S, F, M>(
        &self,
        set: &VersionedSet<E, S>,
        id: &E::Id,
        on_found: F,
        on_missing: M,
    ) -> Result<()>
    where
        S: EntryStore<E>,
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        match self.changes.get(id) {
            Some(pending) if pending.deleted => on_missing(),
            Some(pending) => on_found(pending),
            None => set.find(id, on_found, on_missing),
        }
    }

    /// First identifier strictly greater than `id` as seen through this
    /// transaction: the smaller of the set's next live entry and the
    /// change-set's next pending write, with pending tombstones masking
    /// their set counterparts.
    pub fn upper_bound<S, F, M>(
        &self,
        set: &VersionedSet<E, S>,
        id: &E::Id,
        on_found: F,
        on_missing: M,
    ) -> Result<()>
    where
        S: EntryStore<E>,
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        match self.next_after_merged(set, id) {
            Some(entry) => on_found(entry),
            None => on_missing(),
        }
    }

    fn next_after_merged<'a, S: EntryStore<E>>(
        &'a self,
        set: &'a VersionedSet<E, S>,
        id: &E::Id,
    ) -> Option<&'a Entry<E>> {
        let pending = self
            .changes
            .range((Bound::Excluded(id), Bound::Unbounded))
            .map(|(_, entry)| entry)
            .find(|entry| !entry.deleted);

        // Stepping the set cursor may land on an identifier this transaction
        // has tombstoned; skip past it and look again.
        let mut from = id.clone();
        loop {
            let Some(external) = set.next_live_after(&from) else {
                return pending;
            };
            let external_id = external.id();
            if let Some(candidate) = pending {
                if candidate.id() <= external_id {
                    return Some(candidate);
                }
            }
            match self.changes.get(&external_id) {
                Some(masked) if masked.deleted => from = external_id,
                _ => return Some(external),
            }
        }
    }

    /// Validate every watch and merge the change-set into the set.
    ///
    /// A watch conflicts when the live revision it recorded changed, and
    /// also when another transaction currently has a revision of the
    /// identifier staged: an invisible revision at rest always belongs to
    /// a staged transaction, and letting a second writer stage behind it
    /// opens a lost-update window between the two commits.
    ///
    /// On a conflict the transaction is left exactly as it was (watches,
    /// change-set, and state untouched) and [`Error::Consistency`] is
    /// returned; the caller decides between `reset`-and-retry and giving
    /// up. On success the merge draws a fresh generation, so staged
    /// revisions outrank every revision already in the set and the later
    /// commit always wins compaction; the watch list shrinks to one record
    /// per staged change and the state becomes `Staged`.
    pub fn stage<S: EntryStore<E>>(&mut self, set: &mut VersionedSet<E, S>) -> Result<()> {
        if self.state == State::Staged {
            return Err(Error::NotPermitted);
        }

        let mut marks = Vec::new();
        for watched in &self.watches {
            set.store().revision_marks(&watched.id, &mut marks);
            let mut live: Option<&crate::store::RevisionMark> = None;
            let mut foreign_staged = false;
            for mark in &marks {
                if mark.visible {
                    live = Some(mark);
                } else {
                    foreign_staged = true;
                }
            }
            let conflict = foreign_staged
                || match live {
                    Some(mark) => {
                        mark.generation != watched.watch.generation
                            || mark.deleted != watched.watch.deleted
                    }
                    None => {
                        !(watched.watch.deleted && watched.watch.generation == self.generation)
                    }
                };
            if conflict {
                debug!(
                    generation = self.generation,
                    "stage aborted: watched entry changed"
                );
                return Err(Error::Consistency);
            }
        }

        // From here on the merge cannot fail; replace the watches with the
        // minimal record needed to locate the staged entries again.
        self.generation = set.new_generation()?;
        self.watches.clear();
        self.reserve(self.changes.len())?;
        let changes = std::mem::take(&mut self.changes);
        for (id, mut entry) in changes {
            entry.generation = self.generation;
            entry.visible = false;
            self.watches.push(WatchedId {
                id,
                watch: Watch {
                    generation: self.generation,
                    deleted: entry.deleted,
                },
            });
            set.store_mut().insert(entry);
        }
        self.state = State::Staged;
        trace!(
            generation = self.generation,
            staged = self.watches.len(),
            "transaction staged"
        );
        Ok(())
    }

    /// Make every staged write observable and compact the identifiers it
    /// touched. Wait-free once `stage` has succeeded.
    pub fn commit<S: EntryStore<E>>(&mut self, set: &mut VersionedSet<E, S>) -> Result<()> {
        if self.state != State::Staged {
            return Err(Error::NotPermitted);
        }
        for watched in &self.watches {
            set.unmask_and_compact(&watched.id, watched.watch.generation);
        }
        trace!(
            generation = self.generation,
            committed = self.watches.len(),
            "transaction committed"
        );
        self.watches.clear();
        self.state = State::Created;
        self.generation = set.new_generation()?;
        Ok(())
    }

    /// Abandon the transaction: un-stage any staged entries, drop the
    /// change-set and watches, and draw a fresh generation. Valid in every
    /// state.
    pub fn reset<S: EntryStore<E>>(&mut self, set: &mut VersionedSet<E, S>) -> Result<()> {
        if self.state == State::Staged {
            for watched in &self.watches {
                let _ = set
                    .store_mut()
                    .remove(&watched.id, watched.watch.generation);
            }
        }
        self.watches.clear();
        self.changes.clear();
        self.state = State::Created;
        self.generation = set.new_generation()?;
        trace!(generation = self.generation, "transaction reset");
        Ok(())
    }

    /// Pull staged entries back out of the set into the change-set so the
    /// transaction can be re-staged. Watches are dropped; the change-set
    /// survives.
    pub fn rollback<S: EntryStore<E>>(&mut self, set: &mut VersionedSet<E, S>) -> Result<()> {
        if self.state != State::Staged {
            return Err(Error::NotPermitted);
        }
        let watches = std::mem::take(&mut self.watches);
        for watched in watches {
            if let Some(entry) = set
                .store_mut()
                .remove(&watched.id, watched.watch.generation)
            {
                self.changes.insert(watched.id, entry);
            }
        }
        self.state = State::Created;
        self.generation = set.new_generation()?;
        trace!(generation = self.generation, "transaction rolled back");
        Ok(())
    }
}
