//! The watch/stage/commit protocol: state machine, conflict detection,
//! read-your-writes, merge-aware iteration, reset and rollback.

use canopy_core::{Element, Error};
use canopy_engine::{EntryStore, VersionedSet};

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pair {
    key: u64,
    value: u64,
}

impl Pair {
    fn new(key: u64, value: u64) -> Self {
        Pair { key, value }
    }
}

impl Element for Pair {
    type Id = u64;

    fn id(&self) -> u64 {
        self.key
    }

    fn from_id(key: u64) -> Pair {
        Pair { key, value: 0 }
    }
}

type Set<S> = VersionedSet<Pair, S>;

fn lookup<S: EntryStore<Pair>>(set: &Set<S>, key: u64) -> Option<Pair> {
    let mut found = None;
    set.find(
        &key,
        |entry| {
            found = Some(entry.element);
            Ok(())
        },
        || Ok(()),
    )
    .unwrap();
    found
}

macro_rules! on_both_backends {
    ($name:ident, $body:ident) => {
        mod $name {
            use super::*;

            #[test]
            fn ordered() {
                $body::<canopy_engine::OrderedStore<Pair>>();
            }

            #[test]
            fn avl() {
                $body::<canopy_engine::AvlStore<Pair>>();
            }
        }
    };
}

// ============================================================================
// SECTION 1: State Machine
// ============================================================================

fn lifecycle_guards<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    let mut txn = set.transaction().unwrap();

    assert_eq!(txn.commit(&mut set), Err(Error::NotPermitted));
    assert_eq!(txn.rollback(&mut set), Err(Error::NotPermitted));

    txn.upsert(Pair::new(1, 1)).unwrap();
    txn.stage(&mut set).unwrap();
    assert!(txn.is_staged());
    assert_eq!(txn.stage(&mut set), Err(Error::NotPermitted));

    txn.commit(&mut set).unwrap();
    assert!(!txn.is_staged());
    assert_eq!(txn.commit(&mut set), Err(Error::NotPermitted));
}
on_both_backends!(lifecycle_guards_suite, lifecycle_guards);

fn reset_refreshes_generation<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    let mut txn = set.transaction().unwrap();
    let first = txn.generation();
    txn.reset(&mut set).unwrap();
    assert!(txn.generation() > first);
}
on_both_backends!(reset_refreshes_generation_suite, reset_refreshes_generation);

fn staged_writes_are_invisible_until_commit<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    let mut txn = set.transaction().unwrap();
    txn.upsert(Pair::new(1, 10)).unwrap();
    txn.stage(&mut set).unwrap();

    assert!(lookup(&set, 1).is_none());
    assert_eq!(set.len(), 0);
    assert_eq!(set.revision_count(), 1);

    txn.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 1), Some(Pair::new(1, 10)));
    assert_eq!(set.len(), 1);
}
on_both_backends!(staged_writes_are_invisible_until_commit_suite, staged_writes_are_invisible_until_commit);

// ============================================================================
// SECTION 2: Conflict Detection
// ============================================================================

fn committed_write_conflicts_a_watcher<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();

    let mut t1 = set.transaction().unwrap();
    t1.watch(&set, &5).unwrap();

    let mut t2 = set.transaction().unwrap();
    t2.upsert(Pair::new(5, 42)).unwrap();
    t2.stage(&mut set).unwrap();
    t2.commit(&mut set).unwrap();

    t1.upsert(Pair::new(5, 7)).unwrap();
    assert_eq!(t1.stage(&mut set), Err(Error::Consistency));
    // The conflicted transaction keeps its buffered writes for a retry.
    t1.reset(&mut set).unwrap();
    t1.watch(&set, &5).unwrap();
    t1.upsert(Pair::new(5, 7)).unwrap();
    t1.stage(&mut set).unwrap();
    t1.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 5), Some(Pair::new(5, 7)));
}
on_both_backends!(committed_write_conflicts_a_watcher_suite, committed_write_conflicts_a_watcher);

fn missing_watch_conflicts_when_entry_appears<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();

    let mut t1 = set.transaction().unwrap();
    t1.watch(&set, &9).unwrap();

    set.upsert(Pair::new(9, 1)).unwrap();

    t1.upsert(Pair::new(9, 2)).unwrap();
    assert_eq!(t1.stage(&mut set), Err(Error::Consistency));
}
on_both_backends!(missing_watch_conflicts_when_entry_appears_suite, missing_watch_conflicts_when_entry_appears);

fn missing_watch_passes_while_still_missing<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    set.upsert(Pair::new(1, 1)).unwrap();

    let mut txn = set.transaction().unwrap();
    txn.watch(&set, &9).unwrap();
    txn.upsert(Pair::new(9, 9)).unwrap();
    txn.stage(&mut set).unwrap();
    txn.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 9), Some(Pair::new(9, 9)));
}
on_both_backends!(missing_watch_passes_while_still_missing_suite, missing_watch_passes_while_still_missing);

fn erase_conflicts_a_watcher<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    set.upsert(Pair::new(5, 5)).unwrap();

    let mut t1 = set.transaction().unwrap();
    t1.watch(&set, &5).unwrap();

    set.erase(&5).unwrap();

    t1.upsert(Pair::new(5, 50)).unwrap();
    assert_eq!(t1.stage(&mut set), Err(Error::Consistency));
}
on_both_backends!(erase_conflicts_a_watcher_suite, erase_conflicts_a_watcher);

fn foreign_staged_write_conflicts_a_watcher<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    set.upsert(Pair::new(5, 5)).unwrap();

    let mut t1 = set.transaction().unwrap();
    t1.watch(&set, &5).unwrap();
    t1.upsert(Pair::new(5, 10)).unwrap();

    let mut t2 = set.transaction().unwrap();
    t2.watch(&set, &5).unwrap();
    t2.upsert(Pair::new(5, 20)).unwrap();

    t1.stage(&mut set).unwrap();
    // T2 must not slip in behind T1's staged-but-uncommitted write.
    assert_eq!(t2.stage(&mut set), Err(Error::Consistency));

    t1.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 5), Some(Pair::new(5, 10)));

    t2.reset(&mut set).unwrap();
    t2.watch(&set, &5).unwrap();
    t2.upsert(Pair::new(5, 20)).unwrap();
    t2.stage(&mut set).unwrap();
    t2.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 5), Some(Pair::new(5, 20)));
}
on_both_backends!(foreign_staged_write_conflicts_a_watcher_suite, foreign_staged_write_conflicts_a_watcher);

fn watch_survives_a_tombstone<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    set.upsert(Pair::new(5, 5)).unwrap();

    // Commit an erase so a visible tombstone is the live revision.
    let mut eraser = set.transaction().unwrap();
    eraser.erase(5).unwrap();
    eraser.stage(&mut set).unwrap();
    eraser.commit(&mut set).unwrap();
    assert!(lookup(&set, 5).is_none());

    // A watcher records the tombstone and can stage against it.
    let mut txn = set.transaction().unwrap();
    txn.watch(&set, &5).unwrap();
    txn.upsert(Pair::new(5, 55)).unwrap();
    txn.stage(&mut set).unwrap();
    txn.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 5), Some(Pair::new(5, 55)));
}
on_both_backends!(watch_survives_a_tombstone_suite, watch_survives_a_tombstone);

// ============================================================================
// SECTION 3: Transactional Reads
// ============================================================================

fn find_reads_pending_writes_first<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    set.upsert(Pair::new(1, 1)).unwrap();
    set.upsert(Pair::new(2, 2)).unwrap();

    let mut txn = set.transaction().unwrap();
    txn.upsert(Pair::new(1, 100)).unwrap();
    txn.erase(2).unwrap();

    let mut seen = None;
    txn.find(&set, &1, |entry| {
        seen = Some(entry.element);
        Ok(())
    }, || Ok(()))
    .unwrap();
    assert_eq!(seen, Some(Pair::new(1, 100)));

    let mut missed = false;
    txn.find(&set, &2, |_| panic!("tombstoned in this transaction"), || {
        missed = true;
        Ok(())
    })
    .unwrap();
    assert!(missed);

    // Untouched identifiers fall through to the set.
    let mut fallthrough = None;
    txn.find(&set, &2u64.pow(5), |_| Ok(()), || Ok(())).unwrap();
    set.find(&1, |entry| {
        fallthrough = Some(entry.element.value);
        Ok(())
    }, || Ok(()))
    .unwrap();
    assert_eq!(fallthrough, Some(1));
}
on_both_backends!(find_reads_pending_writes_first_suite, find_reads_pending_writes_first);

fn upper_bound_merges_pending_and_stored<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    for key in [10u64, 20, 30] {
        set.upsert(Pair::new(key, key)).unwrap();
    }

    let mut txn = set.transaction().unwrap();
    txn.upsert(Pair::new(15, 15)).unwrap();
    txn.erase(20).unwrap();

    let next = |txn: &canopy_engine::Transaction<Pair>, set: &Set<S>, from: u64| {
        let mut next = None;
        txn.upper_bound(set, &from, |entry| {
            next = Some(entry.id());
            Ok(())
        }, || Ok(()))
        .unwrap();
        next
    };

    // The pending 15 sorts between stored 10 and 20.
    assert_eq!(next(&txn, &set, 10), Some(15));
    // 20 is tombstoned in this transaction, so 15's successor is 30.
    assert_eq!(next(&txn, &set, 15), Some(30));
    assert_eq!(next(&txn, &set, 25), Some(30));
    assert_eq!(next(&txn, &set, 30), None);
    // Before everything: the stored 10 wins over the pending 15.
    assert_eq!(next(&txn, &set, 0), Some(10));
}
on_both_backends!(upper_bound_merges_pending_and_stored_suite, upper_bound_merges_pending_and_stored);

// ============================================================================
// SECTION 4: Reset and Rollback
// ============================================================================

fn reset_unstages_everything<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    set.upsert(Pair::new(1, 1)).unwrap();

    let mut txn = set.transaction().unwrap();
    txn.upsert(Pair::new(2, 2)).unwrap();
    txn.erase(1).unwrap();
    txn.stage(&mut set).unwrap();
    assert_eq!(set.revision_count(), 3);

    txn.reset(&mut set).unwrap();
    assert_eq!(set.revision_count(), 1);
    assert_eq!(lookup(&set, 1), Some(Pair::new(1, 1)));
    assert!(lookup(&set, 2).is_none());

    // Reset dropped the change-set: staging again is an empty no-op merge.
    txn.stage(&mut set).unwrap();
    txn.commit(&mut set).unwrap();
    assert_eq!(set.revision_count(), 1);
}
on_both_backends!(reset_unstages_everything_suite, reset_unstages_everything);

fn rollback_keeps_the_change_set<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();

    let mut txn = set.transaction().unwrap();
    txn.upsert(Pair::new(1, 10)).unwrap();
    txn.upsert(Pair::new(2, 20)).unwrap();
    txn.stage(&mut set).unwrap();
    assert_eq!(set.revision_count(), 2);

    txn.rollback(&mut set).unwrap();
    assert_eq!(set.revision_count(), 0);
    assert!(lookup(&set, 1).is_none());

    // The rolled-back writes are still buffered; stage and commit again.
    txn.stage(&mut set).unwrap();
    txn.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 1), Some(Pair::new(1, 10)));
    assert_eq!(lookup(&set, 2), Some(Pair::new(2, 20)));
    assert_eq!(set.len(), 2);
}
on_both_backends!(rollback_keeps_the_change_set_suite, rollback_keeps_the_change_set);

// ============================================================================
// SECTION 5: Commit Ordering and Compaction
// ============================================================================

fn later_stager_wins_multi_version_commit<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();

    let mut t1 = set.transaction().unwrap();
    let mut t2 = set.transaction().unwrap();
    t1.upsert(Pair::new(7, 100)).unwrap();
    t2.upsert(Pair::new(7, 200)).unwrap();

    t1.stage(&mut set).unwrap();
    t2.stage(&mut set).unwrap();
    assert_eq!(set.revision_count(), 2);

    t1.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 7), Some(Pair::new(7, 100)));

    t2.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 7), Some(Pair::new(7, 200)));
    // Compaction leaves exactly one revision behind.
    assert_eq!(set.revision_count(), 1);
    assert_eq!(set.len(), 1);
}
on_both_backends!(later_stager_wins_multi_version_commit_suite, later_stager_wins_multi_version_commit);

fn committed_erase_reads_as_missing<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    set.upsert(Pair::new(3, 3)).unwrap();

    let mut txn = set.transaction().unwrap();
    txn.erase(3).unwrap();
    txn.stage(&mut set).unwrap();
    txn.commit(&mut set).unwrap();

    assert!(lookup(&set, 3).is_none());
    assert_eq!(set.len(), 0);

    let mut missed = false;
    set.upper_bound(&0, |entry| {
        assert_ne!(entry.id(), 3, "tombstone must not surface");
        Ok(())
    }, || {
        missed = true;
        Ok(())
    })
    .unwrap();
    assert!(missed);

    let mut in_range = Vec::new();
    set.range(&0, &10, |element| {
        in_range.push(element.key);
        Ok(())
    })
    .unwrap();
    assert!(in_range.is_empty());

    // A fresh upsert compacts the tombstone away.
    set.upsert(Pair::new(3, 30)).unwrap();
    assert_eq!(set.revision_count(), 1);
    assert_eq!(lookup(&set, 3), Some(Pair::new(3, 30)));
}
on_both_backends!(committed_erase_reads_as_missing_suite, committed_erase_reads_as_missing);

fn batch_upsert_matches_committed_transaction<S: EntryStore<Pair>>() {
    let mut batch_set: Set<S> = Set::new();
    batch_set
        .upsert_batch((0..20).map(|key| Pair::new(key, key * 2)))
        .unwrap();

    let mut txn_set: Set<S> = Set::new();
    let mut txn = txn_set.transaction().unwrap();
    for key in 0..20 {
        txn.upsert(Pair::new(key, key * 2)).unwrap();
    }
    txn.stage(&mut txn_set).unwrap();
    txn.commit(&mut txn_set).unwrap();

    assert_eq!(batch_set.len(), txn_set.len());
    for key in 0..20 {
        assert_eq!(lookup(&batch_set, key), lookup(&txn_set, key));
    }
}
on_both_backends!(batch_upsert_matches_committed_transaction_suite, batch_upsert_matches_committed_transaction);

fn watch_reserve_presizes<S: EntryStore<Pair>>() {
    let mut set: Set<S> = Set::new();
    for key in 0..32 {
        set.upsert(Pair::new(key, key)).unwrap();
    }
    let mut txn = set.transaction().unwrap();
    txn.reserve(32).unwrap();
    for key in 0..32 {
        txn.watch(&set, &key).unwrap();
        txn.upsert(Pair::new(key, key + 1)).unwrap();
    }
    txn.stage(&mut set).unwrap();
    txn.commit(&mut set).unwrap();
    assert_eq!(lookup(&set, 31), Some(Pair::new(31, 32)));
}
on_both_backends!(watch_reserve_presizes_suite, watch_reserve_presizes);
