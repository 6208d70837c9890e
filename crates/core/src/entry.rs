//! The versioned-entry data model shared by every container variant
//!
//! A container stores [`Entry`] records ordered by `(identifier, generation)`.
//! The identifier is the logical primary key, extracted from the element via
//! the [`Element`] trait; the generation disambiguates coexisting revisions
//! of the same identifier. Transactions observe entries through [`Watch`]
//! snapshots and address individual revisions through [`RevisionId`].
//!
//! Visibility rules (held by the engine, stated here because every field on
//! [`Entry`] participates):
//!
//! - At most one entry per identifier is `visible` after a commit settles;
//!   that entry is the live revision.
//! - A live revision with `deleted = true` is a tombstone: reads treat the
//!   identifier as absent, but watches record it faithfully so conflict
//!   detection keeps working.
//! - Non-visible entries are either staged-but-uncommitted writes or
//!   shadowed older revisions awaiting compaction.

use std::cmp::Ordering;

/// Monotonically increasing revision counter.
///
/// A container assigns a fresh generation on every mutating event: top-level
/// writes, transaction creation, and transaction reset/rollback/commit.
/// Overflow of the counter surfaces as
/// [`Error::SequenceNumberOverflow`](crate::Error::SequenceNumberOverflow).
pub type Generation = i64;

/// An element type storable in a Canopy container.
///
/// The element carries its own sort key (the identifier). `from_id` builds a
/// placeholder element for tombstones, which must order identically to every
/// other element with the same identifier; its remaining payload is never
/// observed by readers.
pub trait Element {
    /// The identifier extracted from the element; the container's sort key.
    type Id: Ord + Clone;

    /// Extract this element's identifier.
    fn id(&self) -> Self::Id;

    /// Build a placeholder element carrying only an identifier.
    fn from_id(id: Self::Id) -> Self;
}

macro_rules! self_keyed {
    ($($t:ty),* $(,)?) => {$(
        impl Element for $t {
            type Id = $t;
            fn id(&self) -> $t {
                self.clone()
            }
            fn from_id(id: $t) -> $t {
                id
            }
        }
    )*};
}

// Scalars and strings are their own identifiers.
self_keyed!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, String);

/// The snapshot of an identifier's state recorded by a transaction.
///
/// Two watches are equal when both the generation and the deletion flag
/// match; any difference means the watched identifier changed underneath
/// the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watch {
    /// Generation of the observed revision, or the transaction's own
    /// generation when the identifier was absent.
    pub generation: Generation,
    /// Whether the observed revision was a tombstone (or absent).
    pub deleted: bool,
}

/// Addresses one concrete revision: `(identifier, generation)`.
///
/// Revision ids order by identifier first and break ties by generation,
/// which is exactly the storage order of every container variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionId<K> {
    /// The identifier.
    pub id: K,
    /// The revision's generation.
    pub generation: Generation,
}

impl<K: Ord> PartialOrd for RevisionId<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for RevisionId<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.generation.cmp(&other.generation))
    }
}

/// One versioned record in a container's storage.
#[derive(Debug, Clone)]
pub struct Entry<E> {
    /// The user payload. For tombstones this is an [`Element::from_id`]
    /// placeholder and is never handed to readers.
    pub element: E,
    /// Generation stamped when the entry was created or last rewritten.
    pub generation: Generation,
    /// Tombstone marker.
    pub deleted: bool,
    /// Whether reads may observe this entry. Staged transaction writes are
    /// merged with `visible = false` and unmasked on commit.
    pub visible: bool,
}

impl<E: Element> Entry<E> {
    /// A freshly written, immediately observable revision.
    pub fn live(element: E, generation: Generation) -> Self {
        Entry {
            element,
            generation,
            deleted: false,
            visible: true,
        }
    }

    /// This entry's identifier.
    pub fn id(&self) -> E::Id {
        self.element.id()
    }

    /// This entry's `(identifier, generation)` address.
    pub fn revision_id(&self) -> RevisionId<E::Id> {
        RevisionId {
            id: self.element.id(),
            generation: self.generation,
        }
    }

    /// The watch a transaction would record after observing this entry.
    pub fn watch(&self) -> Watch {
        Watch {
            generation: self.generation,
            deleted: self.deleted,
        }
    }

    /// Whether this entry still matches a previously recorded watch.
    pub fn matches(&self, watch: &Watch) -> bool {
        self.generation == watch.generation && self.deleted == watch.deleted
    }

    /// Whether reads may observe this entry: visible and not a tombstone.
    pub fn is_live(&self) -> bool {
        self.visible && !self.deleted
    }
}
