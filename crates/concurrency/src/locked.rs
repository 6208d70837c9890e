//! Single-lock wrapper
//!
//! Serializes a whole [`VersionedSet`] behind one `parking_lot::RwLock`:
//! shared acquisition for reads and sampling, exclusive for mutation and
//! transaction lifecycle steps. Lock acquisition is bounded; exceeding the
//! patience window surfaces [`Error::WouldBlock`] instead of deadlocking,
//! which catches the classic re-entrancy mistakes (calling back into the
//! set from inside a range callback that holds the write lock).
//!
//! The collection becomes thread-safe; a [`LockedTransaction`] is still a
//! single-thread object.

use std::time::Duration;

use canopy_core::{Element, Entry, Error, Result};
use canopy_engine::{EntryStore, Transaction, VersionedSet};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;

/// How long a lock acquisition may wait before reporting `WouldBlock`.
const LOCK_PATIENCE: Duration = Duration::from_secs(1);

/// A [`VersionedSet`] behind one reader-writer lock.
pub struct LockedSet<E: Element, S: EntryStore<E>> {
    inner: RwLock<VersionedSet<E, S>>,
}

impl<E: Element, S: EntryStore<E>> Default for LockedSet<E, S> {
    fn default() -> Self {
        LockedSet::new()
    }
}

impl<E: Element, S: EntryStore<E>> LockedSet<E, S> {
    /// An empty set.
    pub fn new() -> Self {
        LockedSet {
            inner: RwLock::new(VersionedSet::new()),
        }
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, VersionedSet<E, S>>> {
        self.inner.try_read_for(LOCK_PATIENCE).ok_or(Error::WouldBlock)
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, VersionedSet<E, S>>> {
        self.inner
            .try_write_for(LOCK_PATIENCE)
            .ok_or(Error::WouldBlock)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no live entries exist.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// See [`VersionedSet::upsert`].
    pub fn upsert(&self, element: E) -> Result<()> {
        self.write_guard()?.upsert(element)
    }

    /// See [`VersionedSet::upsert_batch`].
    pub fn upsert_batch<I>(&self, elements: I) -> Result<()>
    where
        I: IntoIterator<Item = E>,
    {
        self.write_guard()?.upsert_batch(elements)
    }

    /// See [`VersionedSet::find`]. The callback runs under the shared lock.
    pub fn find<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        self.read_guard()?.find(id, on_found, on_missing)
    }

    /// See [`VersionedSet::upper_bound`].
    pub fn upper_bound<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        self.read_guard()?.upper_bound(id, on_found, on_missing)
    }

    /// See [`VersionedSet::range`]. Callbacks run under the shared lock.
    pub fn range<F>(&self, lo: &E::Id, hi: &E::Id, f: F) -> Result<()>
    where
        F: FnMut(&E) -> Result<()>,
    {
        self.read_guard()?.range(lo, hi, f)
    }

    /// See [`VersionedSet::range_mut`]. Callbacks run under the exclusive
    /// lock.
    pub fn range_mut<F>(&self, lo: &E::Id, hi: &E::Id, f: F) -> Result<()>
    where
        F: FnMut(&mut E) -> Result<()>,
    {
        self.write_guard()?.range_mut(lo, hi, f)
    }

    /// See [`VersionedSet::erase`].
    pub fn erase(&self, id: &E::Id) -> Result<()> {
        self.write_guard()?.erase(id)
    }

    /// See [`VersionedSet::erase_range`].
    pub fn erase_range<F>(&self, lo: &E::Id, hi: &E::Id, f: F) -> Result<()>
    where
        F: FnMut(&E) -> Result<()>,
    {
        self.write_guard()?.erase_range(lo, hi, f)
    }

    /// See [`VersionedSet::sample_range`].
    pub fn sample_range<R, F>(&self, lo: &E::Id, hi: &E::Id, rng: &mut R, f: F) -> Result<()>
    where
        R: Rng,
        F: FnOnce(&E) -> Result<()>,
    {
        self.read_guard()?.sample_range(lo, hi, rng, f)
    }

    /// See [`VersionedSet::sample_reservoir`].
    #[allow(clippy::too_many_arguments)]
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
        self.read_guard()?
            .sample_reservoir(lo, hi, rng, seen, capacity, reservoir)
    }

    /// See [`VersionedSet::clear`].
    pub fn clear(&self) -> Result<()> {
        self.write_guard()?.clear()
    }

    /// See [`VersionedSet::reserve`].
    pub fn reserve(&self, additional: usize) -> Result<()> {
        self.write_guard()?.reserve(additional)
    }

    /// Open a transaction bound to this set.
    pub fn transaction(&self) -> Result<LockedTransaction<'_, E, S>> {
        let inner = self.write_guard()?.transaction()?;
        Ok(LockedTransaction { owner: self, inner })
    }
}

/// A transaction over a [`LockedSet`].
///
/// Buffered writes need no lock; `watch`/`find`/`upper_bound` take the
/// shared lock per call, and the lifecycle steps (`stage`, `commit`,
/// `reset`, `rollback`) take the exclusive lock per call. The transaction
/// itself must stay on one thread.
pub struct LockedTransaction<'a, E: Element, S: EntryStore<E>> {
    owner: &'a LockedSet<E, S>,
    inner: Transaction<E>,
}

impl<E: Element, S: EntryStore<E>> LockedTransaction<'_, E, S> {
    /// The generation stamped on this transaction's next staged writes.
    pub fn generation(&self) -> canopy_core::Generation {
        self.inner.generation()
    }

    /// See [`Transaction::reserve`].
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.inner.reserve(additional)
    }

    /// See [`Transaction::upsert`]. Purely local; takes no lock.
    pub fn upsert(&mut self, element: E) -> Result<()> {
        self.inner.upsert(element)
    }

    /// See [`Transaction::erase`]. Purely local; takes no lock.
    pub fn erase(&mut self, id: E::Id) -> Result<()> {
        self.inner.erase(id)
    }

    /// See [`Transaction::watch`].
    pub fn watch(&mut self, id: &E::Id) -> Result<()> {
        let guard = self.owner.read_guard()?;
        self.inner.watch(&*guard, id)
    }

    /// See [`Transaction::find`].
    pub fn find<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        let guard = self.owner.read_guard()?;
        self.inner.find(&*guard, id, on_found, on_missing)
    }

    /// See [`Transaction::upper_bound`].
    pub fn upper_bound<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        let guard = self.owner.read_guard()?;
        self.inner.upper_bound(&*guard, id, on_found, on_missing)
    }

    /// See [`Transaction::stage`].
    pub fn stage(&mut self) -> Result<()> {
        let mut guard = self.owner.write_guard()?;
        self.inner.stage(&mut *guard)
    }

    /// See [`Transaction::commit`].
    pub fn commit(&mut self) -> Result<()> {
        let mut guard = self.owner.write_guard()?;
        self.inner.commit(&mut *guard)
    }

    /// See [`Transaction::reset`].
    pub fn reset(&mut self) -> Result<()> {
        let mut guard = self.owner.write_guard()?;
        self.inner.reset(&mut *guard)
    }

    /// See [`Transaction::rollback`].
    pub fn rollback(&mut self) -> Result<()> {
        let mut guard = self.owner.write_guard()?;
        self.inner.rollback(&mut *guard)
    }
}
