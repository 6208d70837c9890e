//! Thread-safety wrappers for Canopy sets
//!
//! Two layers over the non-thread-safe engine:
//! - [`LockedSet`]: one reader-writer lock around the whole set; bounded
//!   acquisition surfaces `WouldBlock` instead of deadlocking.
//! - [`PartitionedSet`]: `N` independently locked shards keyed by identifier
//!   hash, with deadlock-free try-lock patterns for every multi-shard
//!   operation, including multi-shard transactions.
//!
//! The intended stacking is `PartitionedSet` directly over a base variant:
//! the partitioned wrapper already embeds its locks, so wrapping it in
//! `LockedSet` (or vice versa) only adds contention.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod locked;
mod partitioned;

pub use locked::{LockedSet, LockedTransaction};
pub use partitioned::{PartitionedSet, PartitionedTransaction, DEFAULT_PARTS};
