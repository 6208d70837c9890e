//! Canopy: in-memory, ordered, transactional set containers
//!
//! A family of containers that store versioned entries ordered by
//! `(identifier, generation)` and support optimistic transactions with a
//! watch/stage/commit protocol: serializable committed writes, read-set
//! conflict detection at stage time.
//!
//! Pick a storage variant and a concurrency layer:
//!
//! - [`OrderedSet`] / [`AvlSet`]: single-threaded base containers over the
//!   `BTreeMap` multiset or the height-balanced tree backend.
//! - [`LockedSet`]: one reader-writer lock around a base container.
//! - [`PartitionedSet`]: sixteen (by default) hash-routed shards with
//!   deadlock-free multi-shard operations and transactions.
//!
//! ```
//! use canopy::{Element, OrderedSet};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Pair {
//!     key: u64,
//!     value: u64,
//! }
//!
//! impl Element for Pair {
//!     type Id = u64;
//!     fn id(&self) -> u64 {
//!         self.key
//!     }
//!     fn from_id(key: u64) -> Pair {
//!         Pair { key, value: 0 }
//!     }
//! }
//!
//! let mut set = OrderedSet::new();
//! set.upsert(Pair { key: 1, value: 10 })?;
//!
//! let mut txn = set.transaction()?;
//! txn.watch(&set, &1)?;
//! txn.upsert(Pair { key: 1, value: 11 })?;
//! txn.stage(&mut set)?;
//! txn.commit(&mut set)?;
//!
//! let mut seen = None;
//! set.find(&1, |entry| { seen = Some(entry.element.value); Ok(()) }, || Ok(()))?;
//! assert_eq!(seen, Some(11));
//! # canopy::Result::Ok(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use canopy_avl::{AvlTree, Everything, RangeEnds};
pub use canopy_concurrency::{
    LockedSet, LockedTransaction, PartitionedSet, PartitionedTransaction, DEFAULT_PARTS,
};
pub use canopy_core::{
    AfterRevision, Above, Bare, Below, Dated, Element, Entry, Error, Generation, Probe, Result,
    RevisionId, Watch,
};
pub use canopy_engine::{
    AvlSet, AvlStore, EntryStore, OrderedSet, OrderedStore, RevisionMark, Transaction,
    VersionedSet,
};

/// A [`LockedSet`] over the `BTreeMap` multiset backend.
pub type LockedOrderedSet<E> = LockedSet<E, OrderedStore<E>>;

/// A [`LockedSet`] over the height-balanced tree backend.
pub type LockedAvlSet<E> = LockedSet<E, AvlStore<E>>;

/// A [`PartitionedSet`] over the `BTreeMap` multiset backend.
pub type PartitionedOrderedSet<E> = PartitionedSet<E, OrderedStore<E>>;

/// A [`PartitionedSet`] over the height-balanced tree backend.
pub type PartitionedAvlSet<E> = PartitionedSet<E, AvlStore<E>>;
