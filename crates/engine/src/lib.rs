//! Transactional versioned-set engine for the Canopy container family
//!
//! The engine layers the transactional contract over pluggable ordered
//! storage:
//! - [`EntryStore`]: the narrow backend interface
//! - [`OrderedStore`] / [`AvlStore`]: the `BTreeMap` multiset and
//!   height-balanced tree backends
//! - [`VersionedSet`] (aliases [`OrderedSet`], [`AvlSet`]): visibility,
//!   compaction, ranges, sampling
//! - [`Transaction`]: the optimistic watch/stage/commit protocol
//!
//! Nothing in this crate is thread-safe; see `canopy-concurrency` for the
//! locked and partitioned wrappers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod set;
pub mod store;
pub mod transaction;

pub use set::{AvlSet, OrderedSet, VersionedSet};
pub use store::{AvlStore, EntryStore, OrderedStore, RevisionMark};
pub use transaction::Transaction;
