//! Hash-partitioned wrapper
//!
//! Shards a [`VersionedSet`] into `N` independent parts, each behind its own
//! reader-writer lock; an identifier's shard is `hash(id) % N`. Two
//! deadlock-free multi-shard patterns cover everything that spans shards:
//!
//! - **hold-all**: spin over the shards with `try_lock` until every lock is
//!   held, then operate, then release. No thread ever blocks while holding
//!   a shard lock, so lock-order cycles cannot form. Used by `range`,
//!   `erase_range`, `len`, and `clear`.
//! - **sweep**: visit each shard under its own briefly-held `try_lock`,
//!   looping until all shards have been served. Used by transaction
//!   fan-out and reservoir sampling, where shard-at-a-time semantics are
//!   acceptable.
//!
//! The global `upper_bound` sweeps all shards for the smallest candidate,
//! then re-checks the winner in its home shard; if a concurrent writer
//! removed it in the gap, the whole pass restarts. Under bounded churn the
//! restart loop terminates.
//!
//! Cross-shard reads are a concatenation of per-shard snapshots, not one
//! consistent snapshot; per-shard operations linearize at lock release.

use std::hash::{BuildHasher, Hash};

use canopy_core::{Element, Entry, Result};
use canopy_engine::{EntryStore, Transaction, VersionedSet};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;
use rustc_hash::FxBuildHasher;
use tracing::debug;

/// Default shard count.
pub const DEFAULT_PARTS: usize = 16;

/// A [`VersionedSet`] sharded `N` ways by identifier hash.
///
/// `N` must be non-zero. Identifiers that compare equal must hash equal.
pub struct PartitionedSet<E, S, H = FxBuildHasher, const N: usize = 16>
where
    E: Element,
    E::Id: Hash,
    S: EntryStore<E>,
    H: BuildHasher + Default,
{
    parts: [RwLock<VersionedSet<E, S>>; N],
    hasher: H,
}

impl<E, S, H, const N: usize> Default for PartitionedSet<E, S, H, N>
where
    E: Element,
    E::Id: Hash,
    S: EntryStore<E>,
    H: BuildHasher + Default,
{
    fn default() -> Self {
        PartitionedSet::new()
    }
}

impl<E, S, H, const N: usize> PartitionedSet<E, S, H, N>
where
    E: Element,
    E::Id: Hash,
    S: EntryStore<E>,
    H: BuildHasher + Default,
{
    /// An empty set of `N` empty shards.
    pub fn new() -> Self {
        PartitionedSet {
            parts: std::array::from_fn(|_| RwLock::new(VersionedSet::new())),
            hasher: H::default(),
        }
    }

    fn bucket(&self, id: &E::Id) -> usize {
        (self.hasher.hash_one(id) % N as u64) as usize
    }

    /// Spin until every shard's shared lock is held; guards are returned in
    /// shard order.
    fn lock_all_read(&self) -> Vec<RwLockReadGuard<'_, VersionedSet<E, S>>> {
        let mut slots: Vec<Option<RwLockReadGuard<'_, VersionedSet<E, S>>>> =
            (0..N).map(|_| None).collect();
        let mut remaining = N;
        while remaining > 0 {
            for (slot, part) in slots.iter_mut().zip(self.parts.iter()) {
                if slot.is_none() {
                    if let Some(guard) = part.try_read() {
                        *slot = Some(guard);
                        remaining -= 1;
                    }
                }
            }
            std::thread::yield_now();
        }
        slots.into_iter().flatten().collect()
    }

    /// Spin until every shard's exclusive lock is held.
    fn lock_all_write(&self) -> Vec<RwLockWriteGuard<'_, VersionedSet<E, S>>> {
        let mut slots: Vec<Option<RwLockWriteGuard<'_, VersionedSet<E, S>>>> =
            (0..N).map(|_| None).collect();
        let mut remaining = N;
        while remaining > 0 {
            for (slot, part) in slots.iter_mut().zip(self.parts.iter()) {
                if slot.is_none() {
                    if let Some(guard) = part.try_write() {
                        *slot = Some(guard);
                        remaining -= 1;
                    }
                }
            }
            std::thread::yield_now();
        }
        slots.into_iter().flatten().collect()
    }

    /// Serve every shard once, each under its own briefly-held shared lock.
    /// An error aborts the sweep with the remaining shards unserved.
    fn sweep_read<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &VersionedSet<E, S>) -> Result<()>,
    {
        let mut done = [false; N];
        let mut remaining = N;
        while remaining > 0 {
            for (index, part) in self.parts.iter().enumerate() {
                if done[index] {
                    continue;
                }
                let Some(guard) = part.try_read() else {
                    continue;
                };
                f(index, &*guard)?;
                done[index] = true;
                remaining -= 1;
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Serve every shard once, each under its own briefly-held exclusive
    /// lock. An error aborts the sweep with the remaining shards unserved.
    fn sweep_write<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &mut VersionedSet<E, S>) -> Result<()>,
    {
        let mut done = [false; N];
        let mut remaining = N;
        while remaining > 0 {
            for (index, part) in self.parts.iter().enumerate() {
                if done[index] {
                    continue;
                }
                let Some(mut guard) = part.try_write() else {
                    continue;
                };
                f(index, &mut *guard)?;
                done[index] = true;
                remaining -= 1;
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Total live entries across shards, under all shared locks.
    pub fn len(&self) -> usize {
        self.lock_all_read().iter().map(|part| part.len()).sum()
    }

    /// Whether no shard holds a live entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upsert into the element's home shard.
    pub fn upsert(&self, element: E) -> Result<()> {
        let index = self.bucket(&element.id());
        self.parts[index].write().upsert(element)
    }

    /// Upsert a batch atomically through an internal transaction (stage +
    /// commit). With no watches involved the stage cannot conflict.
    pub fn upsert_batch<I>(&self, elements: I) -> Result<()>
    where
        I: IntoIterator<Item = E>,
    {
        let mut txn = self.transaction()?;
        for element in elements {
            txn.upsert(element)?;
        }
        txn.stage()?;
        txn.commit()
    }

    /// Erase every visible revision of `id` in its home shard.
    pub fn erase(&self, id: &E::Id) -> Result<()> {
        self.parts[self.bucket(id)].write().erase(id)
    }

    /// Look up the live revision of `id` in its home shard.
    pub fn find<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        self.parts[self.bucket(id)]
            .read()
            .find(id, on_found, on_missing)
    }

    /// `upper_bound` restricted to the shard that owns `id`. Useful when the
    /// caller partitions its keyspace the same way the set does.
    pub fn upper_bound_in_shard<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        self.parts[self.bucket(id)]
            .read()
            .upper_bound(id, on_found, on_missing)
    }

    /// Global `upper_bound`: the smallest live identifier strictly greater
    /// than `id` across every shard.
    ///
    /// Sweeps the shards for their local successors, then re-checks the
    /// smallest in its home shard; if a concurrent writer removed it between
    /// the two looks, the pass restarts.
    pub fn upper_bound<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        let mut on_found = Some(on_found);
        let mut on_missing = Some(on_missing);
        loop {
            let mut smallest: Option<E::Id> = None;
            self.sweep_read(|_, part| {
                part.upper_bound(
                    id,
                    |entry| {
                        let candidate = entry.id();
                        if smallest.as_ref().map_or(true, |best| candidate < *best) {
                            smallest = Some(candidate);
                        }
                        Ok(())
                    },
                    || Ok(()),
                )
            })?;

            let Some(winner) = smallest else {
                return match on_missing.take() {
                    Some(missing) => missing(),
                    None => Ok(()),
                };
            };

            let mut vanished = false;
            let index = self.bucket(&winner);
            let guard = self.parts[index].read();
            let outcome = guard.find(
                &winner,
                |entry| match on_found.take() {
                    Some(found) => found(entry),
                    None => Ok(()),
                },
                || {
                    vanished = true;
                    Ok(())
                },
            );
            if !vanished {
                return outcome;
            }
            outcome?;
        }
    }

    /// Visit the live elements of `[lo, hi)` shard by shard under all shared
    /// locks. Within a shard the order is ascending; across shards it is the
    /// shard order, not a global sort.
    pub fn range<F>(&self, lo: &E::Id, hi: &E::Id, mut f: F) -> Result<()>
    where
        F: FnMut(&E) -> Result<()>,
    {
        let guards = self.lock_all_read();
        for part in &guards {
            part.range(lo, hi, &mut f)?;
        }
        Ok(())
    }

    /// Mutable variant of [`range`](Self::range), under all exclusive locks.
    pub fn range_mut<F>(&self, lo: &E::Id, hi: &E::Id, mut f: F) -> Result<()>
    where
        F: FnMut(&mut E) -> Result<()>,
    {
        let mut guards = self.lock_all_write();
        for part in &mut guards {
            part.range_mut(lo, hi, &mut f)?;
        }
        Ok(())
    }

    /// Erase the visible entries of `[lo, hi)` in every shard, under all
    /// exclusive locks.
    pub fn erase_range<F>(&self, lo: &E::Id, hi: &E::Id, mut f: F) -> Result<()>
    where
        F: FnMut(&E) -> Result<()>,
    {
        let mut guards = self.lock_all_write();
        for part in &mut guards {
            part.erase_range(lo, hi, &mut f)?;
        }
        Ok(())
    }

    /// Invoke the callback on one live element of `[lo, hi)` from one
    /// randomly chosen shard. Assumes identifiers spread evenly across
    /// shards; use [`sample_reservoir`](Self::sample_reservoir) when that
    /// assumption is too coarse.
    pub fn sample_range<R, F>(&self, lo: &E::Id, hi: &E::Id, rng: &mut R, f: F) -> Result<()>
    where
        R: Rng,
        F: FnOnce(&E) -> Result<()>,
    {
        let index = rng.gen_range(0..N);
        self.parts[index].read().sample_range(lo, hi, rng, f)
    }

    /// Reservoir-sample the live elements of `[lo, hi)` across every shard.
    /// Shards are visited with the sweep pattern, so the reservoir trades a
    /// consistent cut for not holding all locks at once.
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
        self.sweep_read(|_, part| part.sample_reservoir(lo, hi, rng, seen, capacity, reservoir))
    }

    /// Pre-size every shard, under all exclusive locks.
    pub fn reserve(&self, additional: usize) -> Result<()> {
        let mut guards = self.lock_all_write();
        for part in &mut guards {
            part.reserve(additional.div_ceil(N))?;
        }
        Ok(())
    }

    /// Replace every shard with a freshly built empty one, under all
    /// exclusive locks. Building the replacements outside the per-shard
    /// `clear` avoids holding the locks through entry teardown.
    pub fn clear(&self) -> Result<()> {
        let mut fresh: Vec<VersionedSet<E, S>> = (0..N).map(|_| VersionedSet::new()).collect();
        let mut guards = self.lock_all_write();
        for (part, replacement) in guards.iter_mut().zip(fresh.drain(..)) {
            **part = replacement;
        }
        debug!(parts = N, "partitioned set cleared");
        Ok(())
    }

    /// Open a transaction spanning every shard: one inner transaction per
    /// shard, writes routed by identifier hash, lifecycle steps fanned out
    /// with the sweep pattern.
    pub fn transaction(&self) -> Result<PartitionedTransaction<'_, E, S, H, N>> {
        let mut inner = Vec::with_capacity(N);
        for part in &self.parts {
            inner.push(part.write().transaction()?);
        }
        Ok(PartitionedTransaction { owner: self, inner })
    }
}

/// A transaction over a [`PartitionedSet`].
///
/// Holds one inner [`Transaction`] per shard. Buffered writes take no lock;
/// `watch`/`find` lock one shard; `stage`/`commit`/`reset`/`rollback` sweep
/// all shards. When `stage` fails with a conflict, the shards staged so far
/// stay staged; call [`reset`](Self::reset) before retrying, which
/// un-stages them.
pub struct PartitionedTransaction<'a, E, S, H = FxBuildHasher, const N: usize = 16>
where
    E: Element,
    E::Id: Hash,
    S: EntryStore<E>,
    H: BuildHasher + Default,
{
    owner: &'a PartitionedSet<E, S, H, N>,
    inner: Vec<Transaction<E>>,
}

impl<E, S, H, const N: usize> PartitionedTransaction<'_, E, S, H, N>
where
    E: Element,
    E::Id: Hash,
    S: EntryStore<E>,
    H: BuildHasher + Default,
{
    /// Buffer an insert-or-replace into the element's home shard.
    pub fn upsert(&mut self, element: E) -> Result<()> {
        let index = self.owner.bucket(&element.id());
        self.inner[index].upsert(element)
    }

    /// Buffer an erase into the identifier's home shard.
    pub fn erase(&mut self, id: E::Id) -> Result<()> {
        let index = self.owner.bucket(&id);
        self.inner[index].erase(id)
    }

    /// Record the identifier's current state in its home shard.
    pub fn watch(&mut self, id: &E::Id) -> Result<()> {
        let index = self.owner.bucket(id);
        let guard = self.owner.parts[index].read();
        self.inner[index].watch(&*guard, id)
    }

    /// Look up `id` through this transaction's view of its home shard.
    pub fn find<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        let index = self.owner.bucket(id);
        let guard = self.owner.parts[index].read();
        self.inner[index].find(&*guard, id, on_found, on_missing)
    }

    /// Global `upper_bound` through this transaction's view: per-shard
    /// successors merged with each shard's pending writes, smallest winner
    /// re-checked in its home shard, whole pass restarted if it vanished.
    pub fn upper_bound<F, M>(&self, id: &E::Id, on_found: F, on_missing: M) -> Result<()>
    where
        F: FnOnce(&Entry<E>) -> Result<()>,
        M: FnOnce() -> Result<()>,
    {
        let mut on_found = Some(on_found);
        let mut on_missing = Some(on_missing);
        loop {
            let mut smallest: Option<E::Id> = None;
            self.owner.sweep_read(|index, part| {
                self.inner[index].upper_bound(
                    part,
                    id,
                    |entry| {
                        let candidate = entry.id();
                        if smallest.as_ref().map_or(true, |best| candidate < *best) {
                            smallest = Some(candidate);
                        }
                        Ok(())
                    },
                    || Ok(()),
                )
            })?;

            let Some(winner) = smallest else {
                return match on_missing.take() {
                    Some(missing) => missing(),
                    None => Ok(()),
                };
            };

            let mut vanished = false;
            let index = self.owner.bucket(&winner);
            let guard = self.owner.parts[index].read();
            let outcome = self.inner[index].find(
                &*guard,
                &winner,
                |entry| match on_found.take() {
                    Some(found) => found(entry),
                    None => Ok(()),
                },
                || {
                    vanished = true;
                    Ok(())
                },
            );
            if !vanished {
                return outcome;
            }
            outcome?;
        }
    }

    /// Stage every shard's change-set. A `Consistency` failure aborts the
    /// fan-out immediately; already-staged shards stay staged until
    /// [`reset`](Self::reset).
    pub fn stage(&mut self) -> Result<()> {
        let inner = &mut self.inner;
        self.owner
            .sweep_write(|index, part| inner[index].stage(part))
    }

    /// Commit every shard. Writes become visible shard by shard as the
    /// sweep progresses.
    pub fn commit(&mut self) -> Result<()> {
        let inner = &mut self.inner;
        self.owner
            .sweep_write(|index, part| inner[index].commit(part))
    }

    /// Reset every shard's transaction, un-staging whatever was staged.
    pub fn reset(&mut self) -> Result<()> {
        let inner = &mut self.inner;
        self.owner
            .sweep_write(|index, part| inner[index].reset(part))
    }

    /// Roll back every shard's transaction, pulling staged entries back
    /// into the per-shard change-sets.
    pub fn rollback(&mut self) -> Result<()> {
        let inner = &mut self.inner;
        self.owner
            .sweep_write(|index, part| inner[index].rollback(part))
    }
}
