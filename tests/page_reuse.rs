//! Cross-commit storage behavior: copy-on-write page movement, snapshot
//! isolation through historic roots, and the reuse timing gated by the
//! free-list manager.

use std::sync::Arc;

use vellum::{
    BPlusTree, DefaultFreeListManager, FreeLists, MemoryBlockSource, Pager, Session, WriteSession,
};

fn key(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

fn store() -> (Pager, Arc<dyn FreeLists>) {
    let pager = Pager::new(Box::new(MemoryBlockSource::new(4096)));
    let free_lists: Arc<dyn FreeLists> = Arc::new(DefaultFreeListManager::new(pager.clone()));
    (pager, free_lists)
}

/// Four commits over a one-leaf tree. The root moves 0 -> 1 -> 3 and then
/// back to 0 once the page freed by commit 2 clears both release gates;
/// the free list persists to page 2 from commit 2 onward, reusing its own
/// chain page every time.
#[test]
fn root_page_walk_across_four_commits() {
    let (pager, free_lists) = store();

    // Commit 1: fresh store, one insert, nothing freed.
    let session = WriteSession::open(0, 1, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::create(&session, pager.clone(), 8, 8).unwrap();
    tree.insert(&session, &key(1), &key(10), false).unwrap();
    assert_eq!(tree.save(), 0);
    assert_eq!(session.commit().unwrap(), 0);
    drop(session);

    // Commit 2: the root shadows onto page 1, page 0 retires, and the
    // free list claims page 2.
    let session = WriteSession::open(1, 2, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::open(pager.clone(), 0, 8, 8).unwrap();
    tree.insert(&session, &key(2), &key(20), false).unwrap();
    assert_eq!(tree.save(), 1);
    assert_eq!(session.commit().unwrap(), 2);
    drop(session);

    // Commit 3: commit 2 is still the current snapshot, so page 0 stays
    // held and the root shadows onto freshly grown page 3.
    let session = WriteSession::open(2, 3, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::open(pager.clone(), 1, 8, 8).unwrap();
    tree.insert(&session, &key(3), &key(30), false).unwrap();
    assert_eq!(tree.save(), 3);
    assert_eq!(session.commit().unwrap(), 2);
    drop(session);

    // Commit 4: with commit 2 superseded and unpinned, page 0 recycles
    // and becomes the root again.
    free_lists.unlock_commit(2);
    let session = WriteSession::open(3, 4, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::open(pager.clone(), 3, 8, 8).unwrap();
    tree.insert(&session, &key(4), &key(40), false).unwrap();
    assert_eq!(tree.save(), 0);
    assert_eq!(session.commit().unwrap(), 2);

    for n in 1..=4 {
        assert_eq!(
            tree.search(&key(n)).unwrap().as_deref(),
            Some(&key(n * 10)[..]),
            "key {n}"
        );
    }
}

#[test]
fn historic_roots_read_their_own_snapshot() {
    let (pager, free_lists) = store();

    let session = WriteSession::open(0, 1, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::create(&session, pager.clone(), 8, 8).unwrap();
    tree.insert(&session, &key(1), &key(100), false).unwrap();
    let first_root = tree.save();
    session.commit().unwrap();
    drop(session);

    let session = WriteSession::open(1, 2, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::open(pager.clone(), first_root, 8, 8).unwrap();
    tree.insert(&session, &key(2), &key(200), false).unwrap();
    tree.insert(&session, &key(1), &key(111), true).unwrap();
    let second_root = tree.save();
    session.commit().unwrap();
    drop(session);
    assert_ne!(first_root, second_root);

    // The old root still shows the old world.
    let mut old = BPlusTree::open(pager.clone(), first_root, 8, 8).unwrap();
    assert_eq!(old.search(&key(1)).unwrap().as_deref(), Some(&key(100)[..]));
    assert_eq!(old.search(&key(2)).unwrap(), None);

    let mut new = BPlusTree::open(pager, second_root, 8, 8).unwrap();
    assert_eq!(new.search(&key(1)).unwrap().as_deref(), Some(&key(111)[..]));
    assert_eq!(new.search(&key(2)).unwrap().as_deref(), Some(&key(200)[..]));
}

#[test]
fn reader_pins_delay_reuse_past_unlock() {
    let (pager, free_lists) = store();

    let session = WriteSession::open(0, 1, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::create(&session, pager.clone(), 8, 8).unwrap();
    tree.insert(&session, &key(1), &key(1), false).unwrap();
    let root = tree.save();
    session.commit().unwrap();
    drop(session);

    // Commit 2 retires the old root page.
    let session = WriteSession::open(1, 2, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::open(pager.clone(), root, 8, 8).unwrap();
    tree.insert(&session, &key(2), &key(2), false).unwrap();
    tree.save();
    session.commit().unwrap();
    drop(session);

    // A reader is still on commit 2's snapshot when it gets superseded.
    let mut reader = Session::open(2, pager.clone(), Arc::clone(&free_lists));
    free_lists.unlock_commit(2);
    assert_eq!(free_lists.peek_free(), None);

    reader.close();
    assert_eq!(free_lists.peek_free(), Some(root));
}

#[test]
fn write_session_read_view_ignores_in_flight_frees() {
    let (pager, free_lists) = store();
    let session = WriteSession::open(0, 1, pager.clone(), Arc::clone(&free_lists));
    let mut tree = BPlusTree::create(&session, pager.clone(), 8, 8).unwrap();
    tree.insert(&session, &key(7), &key(70), false).unwrap();
    tree.save();
    session.commit().unwrap();
    drop(session);

    let session = WriteSession::open(1, 2, pager, Arc::clone(&free_lists));
    // The writer shadows page 0 but its own free entry stays locked, so
    // nothing is reusable mid-transaction.
    let copy = session.copy_page(0).unwrap();
    assert_ne!(copy.page_no(), 0);
    assert_eq!(free_lists.peek_free(), None);
    // The retired page is still readable through the session.
    assert_eq!(session.get_page(0).unwrap().data().len(), 4096);
}
