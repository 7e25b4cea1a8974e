//! End-to-end tree workloads at the production page size: bulk loads that
//! split several levels deep, deletions that merge back down, scans across
//! commits, and reopening from a saved root.

use std::sync::Arc;

use vellum::{
    BPlusTree, DefaultFreeListManager, FreeLists, MemoryBlockSource, Pager, WriteSession,
};

fn key(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

fn value(n: u64) -> [u8; 8] {
    (n ^ 0x5a5a_5a5a_5a5a_5a5a).to_be_bytes()
}

fn store() -> (Pager, Arc<dyn FreeLists>) {
    let pager = Pager::new(Box::new(MemoryBlockSource::new(4096)));
    let free_lists: Arc<dyn FreeLists> = Arc::new(DefaultFreeListManager::new(pager.clone()));
    (pager, free_lists)
}

#[test]
fn bulk_load_and_point_lookups() {
    let (pager, free_lists) = store();
    let session = WriteSession::open(0, 1, pager.clone(), free_lists);
    let mut tree = BPlusTree::create(&session, pager, 8, 8).unwrap();

    // 2000 keys in a mixed order: ascending runs force rightmost splits,
    // the reversed tail forces inserts into settled leaves.
    for n in 0..1000u64 {
        tree.insert(&session, &key(n * 2), &value(n * 2), false).unwrap();
    }
    for n in (0..1000u64).rev() {
        tree.insert(&session, &key(n * 2 + 1), &value(n * 2 + 1), false)
            .unwrap();
    }
    for n in 0..2000u64 {
        assert_eq!(
            tree.search(&key(n)).unwrap().as_deref(),
            Some(&value(n)[..]),
            "key {n}"
        );
    }
    assert_eq!(tree.search(&key(2000)).unwrap(), None);
}

#[test]
fn full_scan_is_sorted_and_complete() {
    let (pager, free_lists) = store();
    let session = WriteSession::open(0, 1, pager.clone(), free_lists);
    let mut tree = BPlusTree::create(&session, pager, 8, 8).unwrap();
    for n in (0..1500u64).rev() {
        tree.insert(&session, &key(n), &value(n), false).unwrap();
    }

    let mut expected = 0u64;
    for entry in tree.scan().unwrap() {
        let (k, v) = entry.unwrap();
        assert_eq!(k, key(expected));
        assert_eq!(v, value(expected));
        expected += 1;
    }
    assert_eq!(expected, 1500);
}

#[test]
fn range_scan_spans_leaf_boundaries() {
    let (pager, free_lists) = store();
    let session = WriteSession::open(0, 1, pager.clone(), free_lists);
    let mut tree = BPlusTree::create(&session, pager, 8, 8).unwrap();
    for n in 0..1000u64 {
        tree.insert(&session, &key(n), &value(n), false).unwrap();
    }

    let hits: Vec<u64> = tree
        .scan_range(&key(317), &key(740))
        .unwrap()
        .map(|entry| u64::from_be_bytes(entry.unwrap().0.try_into().unwrap()))
        .collect();
    assert_eq!(hits.len(), 424);
    assert_eq!(hits.first(), Some(&317));
    assert_eq!(hits.last(), Some(&740));
    assert!(hits.windows(2).all(|pair| pair[1] == pair[0] + 1));
}

#[test]
fn interleaved_deletes_and_inserts_stay_consistent() {
    let (pager, free_lists) = store();
    let session = WriteSession::open(0, 1, pager.clone(), free_lists);
    let mut tree = BPlusTree::create(&session, pager, 8, 8).unwrap();

    for n in 0..1200u64 {
        tree.insert(&session, &key(n), &value(n), false).unwrap();
    }
    // Carve out the middle, then refill part of it.
    for n in 400..900u64 {
        assert!(tree.delete(&session, &key(n)).unwrap(), "delete {n}");
    }
    for n in 600..700u64 {
        tree.insert(&session, &key(n), &value(n), false).unwrap();
    }

    for n in 0..1200u64 {
        let present = !(400..900).contains(&n) || (600..700).contains(&n);
        assert_eq!(
            tree.search(&key(n)).unwrap().is_some(),
            present,
            "key {n}"
        );
    }
    let count = tree.scan().unwrap().count();
    assert_eq!(count, 1200 - 500 + 100);
}

#[test]
fn saved_root_reopens_identically() {
    let (pager, free_lists) = store();
    let session = WriteSession::open(0, 1, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::create(&session, pager.clone(), 8, 8).unwrap();
    for n in 0..800u64 {
        tree.insert(&session, &key(n), &value(n), false).unwrap();
    }
    let root = tree.save();
    session.commit().unwrap();
    drop(session);

    let mut reopened = BPlusTree::open(pager, root, 8, 8).unwrap();
    assert!(!reopened.is_modified());
    for n in 0..800u64 {
        assert_eq!(
            reopened.search(&key(n)).unwrap().as_deref(),
            Some(&value(n)[..])
        );
    }
    let count = reopened.scan().unwrap().count();
    assert_eq!(count, 800);
}

#[test]
fn wide_values_round_trip() {
    let (pager, free_lists) = store();
    let session = WriteSession::open(0, 1, pager.clone(), free_lists);
    // 8-byte keys with 64-byte values: 56 entries per leaf.
    let mut tree = BPlusTree::create(&session, pager, 8, 64).unwrap();
    for n in 0..300u64 {
        let mut wide = [0u8; 64];
        wide[..8].copy_from_slice(&key(n));
        wide[56..].copy_from_slice(&value(n));
        tree.insert(&session, &key(n), &wide, false).unwrap();
    }
    for n in (0..300u64).step_by(7) {
        let found = tree.search(&key(n)).unwrap().unwrap();
        assert_eq!(&found[..8], &key(n));
        assert_eq!(&found[56..], &value(n));
    }
}

#[test]
fn deletes_across_commits_keep_old_snapshots_whole() {
    let (pager, free_lists) = store();

    let session = WriteSession::open(0, 1, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::create(&session, pager.clone(), 8, 8).unwrap();
    for n in 0..600u64 {
        tree.insert(&session, &key(n), &value(n), false).unwrap();
    }
    let full_root = tree.save();
    session.commit().unwrap();
    drop(session);

    let session = WriteSession::open(1, 2, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::open(pager.clone(), full_root, 8, 8).unwrap();
    for n in 0..600u64 {
        if n % 2 == 0 {
            assert!(tree.delete(&session, &key(n)).unwrap());
        }
    }
    let thinned_root = tree.save();
    session.commit().unwrap();
    drop(session);

    // Commit 2 never unlocked: every page of the full snapshot is intact.
    let mut full = BPlusTree::open(pager.clone(), full_root, 8, 8).unwrap();
    assert_eq!(full.scan().unwrap().count(), 600);

    let mut thinned = BPlusTree::open(pager, thinned_root, 8, 8).unwrap();
    assert_eq!(thinned.scan().unwrap().count(), 300);
    assert_eq!(thinned.search(&key(4)).unwrap(), None);
    assert_eq!(
        thinned.search(&key(5)).unwrap().as_deref(),
        Some(&value(5)[..])
    );
}
