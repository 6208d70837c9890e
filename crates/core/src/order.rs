//! Probes: heterogeneous comparison against stored entries
//!
//! Storage is ordered by `(identifier, generation)`. Searches, however, come
//! in four boundary flavors, and encoding each as its own probe type keeps
//! every tree descent a plain three-way comparison:
//!
//! - [`Bare`] compares by identifier only, so it is *equal* to every revision
//!   of that identifier. This is the equal-range probe.
//! - [`Dated`] compares by `(identifier, generation)`: the exact-revision
//!   probe, equal only to that one revision.
//! - [`Above`] sorts after every revision of its identifier and is never
//!   equal, so `lower_bound(Above(k))` is the first entry with an identifier
//!   strictly greater than `k`.
//! - [`Below`] sorts before every revision of its identifier and is never
//!   equal, so the closed probe interval `[Bare(lo), Below(hi)]` is the
//!   half-open identifier interval `[lo, hi)`.
//!
//! [`Dated`] wraps a [`RevisionId`] for exact-revision addressing, and
//! [`AfterRevision`] encodes the "strictly after `(id, gen)`" cursor step
//! used for single-pass forward iteration.

use std::cmp::Ordering;

use crate::entry::{Element, Entry, RevisionId};

/// A search key comparable against stored entries.
///
/// `cmp_entry` returns the ordering of the probe *relative to* the entry:
/// `Less` means the probe sorts before the entry.
pub trait Probe<E: Element> {
    /// Three-way comparison of this probe against a stored entry.
    fn cmp_entry(&self, entry: &Entry<E>) -> Ordering;
}

/// Identifier-only probe; equal to every revision of the identifier.
#[derive(Debug, Clone, Copy)]
pub struct Bare<'a, K>(pub &'a K);

impl<E: Element> Probe<E> for Bare<'_, E::Id> {
    fn cmp_entry(&self, entry: &Entry<E>) -> Ordering {
        self.0.cmp(&entry.id())
    }
}

/// Exact-revision probe: `(identifier, generation)`.
#[derive(Debug, Clone, Copy)]
pub struct Dated<'a, K>(pub &'a RevisionId<K>);

impl<E: Element> Probe<E> for Dated<'_, E::Id> {
    fn cmp_entry(&self, entry: &Entry<E>) -> Ordering {
        self.0
            .id
            .cmp(&entry.id())
            .then_with(|| self.0.generation.cmp(&entry.generation))
    }
}

/// Probe sorting after every revision of its identifier; never equal.
#[derive(Debug, Clone, Copy)]
pub struct Above<'a, K>(pub &'a K);

impl<E: Element> Probe<E> for Above<'_, E::Id> {
    fn cmp_entry(&self, entry: &Entry<E>) -> Ordering {
        match self.0.cmp(&entry.id()) {
            Ordering::Less => Ordering::Less,
            _ => Ordering::Greater,
        }
    }
}

/// Probe sorting before every revision of its identifier; never equal.
#[derive(Debug, Clone, Copy)]
pub struct Below<'a, K>(pub &'a K);

impl<E: Element> Probe<E> for Below<'_, E::Id> {
    fn cmp_entry(&self, entry: &Entry<E>) -> Ordering {
        match self.0.cmp(&entry.id()) {
            Ordering::Greater => Ordering::Greater,
            _ => Ordering::Less,
        }
    }
}

/// Probe sorting immediately after one concrete revision; never equal.
///
/// `lower_bound(AfterRevision(r))` is the next revision in storage order,
/// whether a later revision of the same identifier or the first revision of
/// the next one.
#[derive(Debug, Clone, Copy)]
pub struct AfterRevision<'a, K>(pub &'a RevisionId<K>);

impl<E: Element> Probe<E> for AfterRevision<'_, E::Id> {
    fn cmp_entry(&self, entry: &Entry<E>) -> Ordering {
        match Dated(self.0).cmp_entry(entry) {
            Ordering::Less => Ordering::Less,
            _ => Ordering::Greater,
        }
    }
}
