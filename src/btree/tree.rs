//! # Copy-on-Write B+Tree
//!
//! Fixed-size keys and values over the page store. All structural work is
//! done on the way back up a recursive descent: each level returns what
//! happened below as a value (the child's possibly-relocated page id, plus
//! a split separator or an underflow flag), and the parent reacts by
//! patching child pointers, inserting separators, or rebalancing.
//!
//! Mutating traversals run inside a [`WriteSession`]; every touched node
//! relocates onto a fresh page via copy-on-write, so a tree's entire
//! history stays readable through older roots until the free-list manager
//! releases the retired pages.
//!
//! ## Rebalancing
//!
//! A node that drops below minimum occupancy is repaired by its parent in
//! a fixed order: borrow from the left sibling, borrow from the right,
//! merge into the left, merge the right into it. Underflow propagates
//! upward through the returned flag; the root is exempt (a leaf root may
//! hold any count, and an internal root that loses its last separator
//! collapses into its only child, shrinking the tree).
//!
//! A tree instance is single-writer and single-threaded; its node cache
//! ([`NodeCache`]) and modification flag are private to it. `save` clears
//! both and hands back the root page id for an external catalog.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use tracing::debug;

use crate::btree::cache::NodeCache;
use crate::btree::interior::InternalNode;
use crate::btree::leaf::LeafNode;
use crate::btree::node::{Node, TreeConfig};
use crate::config::DEFAULT_NODE_CACHE_CAPACITY;
use crate::error::StoreError;
use crate::storage::pager::Pager;
use crate::storage::session::WriteSession;

pub struct BPlusTree {
    pager: Pager,
    config: TreeConfig,
    root_page: u32,
    cache: NodeCache,
    modified: bool,
}

/// What an insert did one level down.
struct InsertOutcome {
    /// The child's page id after any copy-on-write relocation.
    page_no: u32,
    /// Present when the child split: separator and new right sibling.
    split: Option<(Vec<u8>, u32)>,
}

impl BPlusTree {
    /// Create an empty tree: a single leaf root allocated from `session`.
    pub fn create(
        session: &WriteSession,
        pager: Pager,
        key_size: usize,
        value_size: usize,
    ) -> Result<Self> {
        let config = TreeConfig::new(pager.page_size(), key_size, value_size)?;
        let page = session.next_page()?;
        let root = LeafNode::create(page, config)?;
        pager.mark_dirty(root.page());
        let root_page = root.page_no();
        debug!(root_page, "tree created");
        let mut cache = NodeCache::new(DEFAULT_NODE_CACHE_CAPACITY);
        cache.insert(Node::Leaf(root));
        Ok(Self {
            pager,
            config,
            root_page,
            cache,
            modified: true,
        })
    }

    /// Open an existing tree at `root_page`.
    pub fn open(pager: Pager, root_page: u32, key_size: usize, value_size: usize) -> Result<Self> {
        let config = TreeConfig::new(pager.page_size(), key_size, value_size)?;
        let root = Node::decode(pager.get_page(root_page)?, config)?;
        let mut cache = NodeCache::new(DEFAULT_NODE_CACHE_CAPACITY);
        cache.insert(root);
        Ok(Self {
            pager,
            config,
            root_page,
            cache,
            modified: false,
        })
    }

    pub fn root_page(&self) -> u32 {
        self.root_page
    }

    /// True once any mutation has gone through since create/open/save.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    /// Forget cached nodes, reset the modification flag, and return the
    /// root page id for the caller's commit metadata.
    pub fn save(&mut self) -> u32 {
        self.cache.clear();
        self.modified = false;
        debug!(root_page = self.root_page, "tree saved");
        self.root_page
    }

    fn get_node(&mut self, page_no: u32) -> Result<Node> {
        if let Some(node) = self.cache.get(page_no) {
            return Ok(node);
        }
        let node = Node::decode(self.pager.get_page(page_no)?, self.config)?;
        self.cache.insert(node.clone());
        Ok(node)
    }

    fn get_leaf(&mut self, page_no: u32) -> Result<LeafNode> {
        match self.get_node(page_no)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => bail!(
                "page {page_no} holds an internal node where a leaf was expected"
            ),
        }
    }

    fn get_internal(&mut self, page_no: u32) -> Result<InternalNode> {
        match self.get_node(page_no)? {
            Node::Internal(node) => Ok(node),
            Node::Leaf(_) => bail!(
                "page {page_no} holds a leaf where an internal node was expected"
            ),
        }
    }

    fn touch_leaf(&mut self, leaf: &LeafNode) {
        self.modified = true;
        self.pager.mark_dirty(leaf.page());
        self.cache.insert(Node::Leaf(leaf.clone()));
    }

    fn touch_internal(&mut self, node: &InternalNode) {
        self.modified = true;
        self.pager.mark_dirty(node.page());
        self.cache.insert(Node::Internal(node.clone()));
    }

    /// Patch `parent` after a child relocated from `old` to `new`; no-op
    /// when the id did not change.
    fn repoint_child(
        &mut self,
        session: &WriteSession,
        parent: &mut InternalNode,
        old: u32,
        new: u32,
    ) -> Result<()> {
        if old == new {
            return Ok(());
        }
        parent.update_child_pointer(session, old, new)?;
        self.cache.remove(old);
        Ok(())
    }

    pub fn search(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_key(key)?;
        let mut page_no = self.root_page;
        loop {
            match self.get_node(page_no)? {
                Node::Internal(node) => page_no = node.child_for_key(key),
                Node::Leaf(leaf) => return Ok(leaf.get(key).map(<[u8]>::to_vec)),
            }
        }
    }

    pub fn insert(
        &mut self,
        session: &WriteSession,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<()> {
        self.check_key(key)?;
        ensure!(
            value.len() == self.config.value_size(),
            "value is {} bytes, tree expects {}",
            value.len(),
            self.config.value_size()
        );
        let old_root = self.root_page;
        let root = self.get_node(old_root)?;
        let outcome = self.insert_into(session, root, key, value, overwrite)?;
        if outcome.page_no != old_root {
            self.cache.remove(old_root);
        }
        match outcome.split {
            Some((separator, right)) => {
                // The root split: grow the tree by one level.
                let page = session.next_page()?;
                let new_root =
                    InternalNode::create(page, self.config, &separator, outcome.page_no, right)?;
                self.touch_internal(&new_root);
                debug!(
                    old_root = outcome.page_no,
                    new_root = new_root.page_no(),
                    "root split"
                );
                self.root_page = new_root.page_no();
            }
            None => self.root_page = outcome.page_no,
        }
        Ok(())
    }

    fn insert_into(
        &mut self,
        session: &WriteSession,
        node: Node,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<InsertOutcome> {
        match node {
            Node::Leaf(mut leaf) => {
                // A hit on an existing key never adds an entry; only a
                // genuine insertion may split.
                if leaf.is_full() && leaf.get(key).is_none() {
                    let (mut right, separator) = leaf.split(session, session.next_page()?)?;
                    if key < separator.as_slice() {
                        leaf.insert(session, key, value, overwrite)?;
                    } else {
                        right.insert(session, key, value, overwrite)?;
                    }
                    self.touch_leaf(&leaf);
                    self.touch_leaf(&right);
                    Ok(InsertOutcome {
                        page_no: leaf.page_no(),
                        split: Some((separator, right.page_no())),
                    })
                } else {
                    leaf.insert(session, key, value, overwrite)?;
                    self.touch_leaf(&leaf);
                    Ok(InsertOutcome {
                        page_no: leaf.page_no(),
                        split: None,
                    })
                }
            }
            Node::Internal(mut node) => {
                let child_no = node.child_for_key(key);
                let child = self.get_node(child_no)?;
                let outcome = self.insert_into(session, child, key, value, overwrite)?;
                let Some((child_separator, child_right)) = outcome.split else {
                    if outcome.page_no != child_no {
                        self.repoint_child(session, &mut node, child_no, outcome.page_no)?;
                        self.touch_internal(&node);
                    }
                    return Ok(InsertOutcome {
                        page_no: node.page_no(),
                        split: None,
                    });
                };
                if node.is_full() {
                    let (mut right, separator) = node.split(session, session.next_page()?)?;
                    if child_separator.as_slice() < separator.as_slice() {
                        node.insert_separator(session, &child_separator, child_right)?;
                    } else {
                        right.insert_separator(session, &child_separator, child_right)?;
                    }
                    // The relocated child sits in exactly one half; offer
                    // the update to both.
                    if outcome.page_no != child_no {
                        node.update_child_pointer(session, child_no, outcome.page_no)?;
                        right.update_child_pointer(session, child_no, outcome.page_no)?;
                        self.cache.remove(child_no);
                    }
                    self.touch_internal(&node);
                    self.touch_internal(&right);
                    Ok(InsertOutcome {
                        page_no: node.page_no(),
                        split: Some((separator, right.page_no())),
                    })
                } else {
                    node.insert_separator(session, &child_separator, child_right)?;
                    self.repoint_child(session, &mut node, child_no, outcome.page_no)?;
                    self.touch_internal(&node);
                    Ok(InsertOutcome {
                        page_no: node.page_no(),
                        split: None,
                    })
                }
            }
        }
    }

    /// Remove `key`; `Ok(false)` when it was not present.
    pub fn delete(&mut self, session: &WriteSession, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        let old_root = self.root_page;
        match self.get_node(old_root)? {
            Node::Leaf(mut leaf) => {
                // A leaf root holds any count; no rebalancing at the top.
                let removed = leaf.delete(session, key)?;
                if removed {
                    self.touch_leaf(&leaf);
                    if leaf.page_no() != old_root {
                        self.cache.remove(old_root);
                        self.root_page = leaf.page_no();
                    }
                }
                Ok(removed)
            }
            Node::Internal(mut root) => {
                let (removed, _) = self.delete_from(session, &mut root, key)?;
                if root.page_no() != old_root {
                    self.cache.remove(old_root);
                }
                self.root_page = root.page_no();
                if root.key_count() == 0 {
                    // Only one child left: the tree shrinks by one level.
                    let only_child = root.child_at(0)?;
                    debug!(
                        old_root = root.page_no(),
                        new_root = only_child,
                        "root collapsed"
                    );
                    session.free_page(root.page_no());
                    self.cache.remove(root.page_no());
                    self.root_page = only_child;
                    self.modified = true;
                }
                Ok(removed)
            }
        }
    }

    /// Delete `key` from the subtree under `parent`, rebalancing children
    /// as needed. Returns `(removed, parent_underflows)`.
    fn delete_from(
        &mut self,
        session: &WriteSession,
        parent: &mut InternalNode,
        key: &[u8],
    ) -> Result<(bool, bool)> {
        ensure!(
            parent.key_count() > 0,
            "internal page {} has no separators",
            parent.page_no()
        );
        let child_no = parent.child_for_key(key);
        match self.get_node(child_no)? {
            Node::Leaf(mut leaf) => {
                if !leaf.delete(session, key)? {
                    return Ok((false, false));
                }
                self.touch_leaf(&leaf);
                if leaf.page_no() != child_no {
                    self.repoint_child(session, parent, child_no, leaf.page_no())?;
                    self.touch_internal(parent);
                }
                let child_no = leaf.page_no();
                if !leaf.needs_join() {
                    return Ok((true, false));
                }
                self.rebalance_leaf(session, parent, leaf, child_no)
                    .map(|underflow| (true, underflow))
            }
            Node::Internal(mut child) => {
                let (removed, child_underflows) = self.delete_from(session, &mut child, key)?;
                if child.page_no() != child_no {
                    self.repoint_child(session, parent, child_no, child.page_no())?;
                    self.touch_internal(parent);
                }
                let child_no = child.page_no();
                if !child_underflows {
                    return Ok((removed, false));
                }
                self.rebalance_internal(session, parent, child, child_no)
                    .map(|underflow| (removed, underflow))
            }
        }
    }

    /// Repair an under-minimum leaf. Returns whether `parent` itself now
    /// underflows (only merges shrink the parent).
    fn rebalance_leaf(
        &mut self,
        session: &WriteSession,
        parent: &mut InternalNode,
        mut leaf: LeafNode,
        child_no: u32,
    ) -> Result<bool> {
        if let Some(left_no) = parent.left_sibling_of(child_no) {
            let mut left = self.get_leaf(left_no)?;
            if leaf.redistribute_from_left(session, &mut left)? {
                self.touch_leaf(&leaf);
                self.touch_leaf(&left);
                self.repoint_child(session, parent, left_no, left.page_no())?;
                let boundary = self.leaf_boundary(&leaf)?;
                parent.set_left_key(session, leaf.page_no(), &boundary)?;
                self.touch_internal(parent);
                return Ok(false);
            }
        }
        if let Some(right_no) = parent.right_sibling_of(child_no) {
            let mut right = self.get_leaf(right_no)?;
            if leaf.redistribute_from_right(session, &mut right)? {
                self.touch_leaf(&leaf);
                self.touch_leaf(&right);
                self.repoint_child(session, parent, right_no, right.page_no())?;
                // The separator between leaf and its right sibling tracks
                // the sibling's new leftmost key.
                let boundary = self.leaf_boundary(&right)?;
                parent.set_left_key(session, right.page_no(), &boundary)?;
                self.touch_internal(parent);
                return Ok(false);
            }
        }
        if let Some(left_no) = parent.left_sibling_of(child_no) {
            let left = self.get_leaf(left_no)?;
            if leaf.merge(session, &left)? {
                self.touch_leaf(&leaf);
                self.repoint_child(session, parent, child_no, leaf.page_no())?;
                parent.remove_child(session, left_no)?;
                let boundary = self.leaf_boundary(&leaf)?;
                parent.set_left_key(session, leaf.page_no(), &boundary)?;
                self.cache.remove(left_no);
                self.touch_internal(parent);
                return Ok(parent.needs_join());
            }
        }
        if let Some(right_no) = parent.right_sibling_of(child_no) {
            let right = self.get_leaf(right_no)?;
            if leaf.merge(session, &right)? {
                self.touch_leaf(&leaf);
                self.repoint_child(session, parent, child_no, leaf.page_no())?;
                if let Some(separator) = parent.remove_child(session, right_no)? {
                    parent.set_separator_after(session, leaf.page_no(), &separator)?;
                }
                self.cache.remove(right_no);
                self.touch_internal(parent);
                return Ok(parent.needs_join());
            }
        }
        // Neither side could help; tolerate the deficit.
        Ok(false)
    }

    /// Repair an under-minimum internal child of `parent`.
    fn rebalance_internal(
        &mut self,
        session: &WriteSession,
        parent: &mut InternalNode,
        mut child: InternalNode,
        child_no: u32,
    ) -> Result<bool> {
        if let Some(left_no) = parent.left_sibling_of(child_no) {
            let mut left = self.get_internal(left_no)?;
            let join = self.join_key(parent, left_no)?;
            if let Some(new_join) = child.redistribute_from_left(session, &mut left, &join)? {
                self.touch_internal(&child);
                self.touch_internal(&left);
                self.repoint_child(session, parent, left_no, left.page_no())?;
                parent.set_separator_after(session, left.page_no(), &new_join)?;
                self.touch_internal(parent);
                return Ok(false);
            }
        }
        if let Some(right_no) = parent.right_sibling_of(child_no) {
            let mut right = self.get_internal(right_no)?;
            let join = self.join_key(parent, child_no)?;
            if let Some(new_join) = child.redistribute_from_right(session, &mut right, &join)? {
                self.touch_internal(&child);
                self.touch_internal(&right);
                self.repoint_child(session, parent, right_no, right.page_no())?;
                parent.set_separator_after(session, child.page_no(), &new_join)?;
                self.touch_internal(parent);
                return Ok(false);
            }
        }
        if let Some(left_no) = parent.left_sibling_of(child_no) {
            let mut left = self.get_internal(left_no)?;
            let join = self.join_key(parent, left_no)?;
            if left.merge(session, &child, &join)? {
                self.touch_internal(&left);
                self.repoint_child(session, parent, left_no, left.page_no())?;
                if let Some(separator) = parent.remove_child(session, child_no)? {
                    parent.set_separator_after(session, left.page_no(), &separator)?;
                }
                self.cache.remove(child_no);
                self.touch_internal(parent);
                return Ok(parent.needs_join());
            }
        }
        if let Some(right_no) = parent.right_sibling_of(child_no) {
            let right = self.get_internal(right_no)?;
            let join = self.join_key(parent, child_no)?;
            if child.merge(session, &right, &join)? {
                self.touch_internal(&child);
                self.repoint_child(session, parent, child_no, child.page_no())?;
                if let Some(separator) = parent.remove_child(session, right_no)? {
                    parent.set_separator_after(session, child.page_no(), &separator)?;
                }
                self.cache.remove(right_no);
                self.touch_internal(parent);
                return Ok(parent.needs_join());
            }
        }
        bail!("internal page {child_no} under minimum with no viable sibling")
    }

    fn leaf_boundary(&self, leaf: &LeafNode) -> Result<Vec<u8>> {
        leaf.leftmost_key()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| eyre::eyre!("rebalancing left leaf page {} empty", leaf.page_no()))
    }

    /// Separator between `page_no` and its right sibling; both must exist
    /// while rebalancing around that boundary.
    fn join_key(&self, parent: &InternalNode, page_no: u32) -> Result<Vec<u8>> {
        parent
            .separator_after(page_no)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                eyre::eyre!(
                    "no separator right of page {page_no} on internal page {}",
                    parent.page_no()
                )
            })
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        ensure!(
            key.len() == self.config.key_size(),
            "key is {} bytes, tree expects {}",
            key.len(),
            self.config.key_size()
        );
        Ok(())
    }

    /// Lazy ascending scan over the whole tree.
    pub fn scan(&mut self) -> Result<Scan<'_>> {
        Scan::new(self, None, None)
    }

    /// Lazy ascending scan over `from..=to` (both inclusive). An inverted
    /// range fails with [`StoreError::InvalidScanRange`] before any
    /// traversal.
    pub fn scan_range(&mut self, from: &[u8], to: &[u8]) -> Result<Scan<'_>> {
        self.check_key(from)?;
        self.check_key(to)?;
        if from > to {
            bail!(StoreError::InvalidScanRange);
        }
        Scan::new(self, Some(from.to_vec()), Some(to.to_vec()))
    }
}

struct ScanFrame {
    node: InternalNode,
    next_child: usize,
    last_child: usize,
}

/// Cursor over a key range, yielding owned `(key, value)` pairs in
/// ascending order. Holds the tree mutably for its lifetime, so the
/// structure cannot shift underneath it.
pub struct Scan<'t> {
    tree: &'t mut BPlusTree,
    stack: SmallVec<[ScanFrame; 8]>,
    leaf: Option<(LeafNode, usize)>,
    from: Option<Vec<u8>>,
    to: Option<Vec<u8>>,
    done: bool,
}

impl<'t> Scan<'t> {
    fn new(tree: &'t mut BPlusTree, from: Option<Vec<u8>>, to: Option<Vec<u8>>) -> Result<Self> {
        let root = tree.root_page;
        let mut scan = Self {
            tree,
            stack: SmallVec::new(),
            leaf: None,
            from,
            to,
            done: false,
        };
        scan.descend(root)?;
        Ok(scan)
    }

    /// Walk down to the first in-range leaf under `page_no`, recording
    /// which children of each internal node the range still covers.
    fn descend(&mut self, mut page_no: u32) -> Result<()> {
        loop {
            match self.tree.get_node(page_no)? {
                Node::Internal(node) => {
                    let first = self
                        .from
                        .as_deref()
                        .map_or(0, |from| node.child_index_for(from));
                    let last = self
                        .to
                        .as_deref()
                        .map_or(node.child_count() - 1, |to| node.child_index_for(to));
                    page_no = node.child_at(first)?;
                    self.stack.push(ScanFrame {
                        node,
                        next_child: first + 1,
                        last_child: last,
                    });
                }
                Node::Leaf(leaf) => {
                    let start = self.from.as_deref().map_or(0, |from| leaf.lower_bound(from));
                    self.leaf = Some((leaf, start));
                    return Ok(());
                }
            }
        }
    }

    fn advance_leaf(&mut self) -> Result<bool> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(false);
            };
            if frame.next_child > frame.last_child {
                self.stack.pop();
                continue;
            }
            let child = frame.node.child_at(frame.next_child)?;
            frame.next_child += 1;
            self.descend(child)?;
            return Ok(true);
        }
    }
}

impl std::fmt::Debug for Scan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scan")
            .field("root_page", &self.tree.root_page)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Iterator for Scan<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some((leaf, cursor)) = &mut self.leaf {
                if *cursor < leaf.key_count() {
                    let key = leaf.key_at(*cursor);
                    if self.to.as_deref().is_some_and(|to| key > to) {
                        self.done = true;
                        return None;
                    }
                    let entry = (key.to_vec(), leaf.value_at(*cursor).to_vec());
                    *cursor += 1;
                    return Some(Ok(entry));
                }
            }
            self.leaf = None;
            match self.advance_leaf() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block::MemoryBlockSource;
    use crate::storage::freelist::{DefaultFreeListManager, FreeLists};
    use std::sync::Arc;

    // 64-byte pages with 4/4 entries keep the fan-out tiny (7 per node),
    // so a few dozen keys exercise multi-level splits and merges.
    fn harness() -> (Pager, WriteSession) {
        let pager = Pager::new(Box::new(MemoryBlockSource::new(64)));
        let free_lists: Arc<dyn FreeLists> = Arc::new(DefaultFreeListManager::new(pager.clone()));
        let session = WriteSession::open(0, 1, pager.clone(), free_lists);
        (pager, session)
    }

    fn key(n: u32) -> [u8; 4] {
        n.to_be_bytes()
    }

    fn insert_all(tree: &mut BPlusTree, session: &WriteSession, keys: impl Iterator<Item = u32>) {
        for n in keys {
            tree.insert(session, &key(n), &key(n * 7), false).unwrap();
        }
    }

    #[test]
    fn empty_tree_finds_nothing() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager, 4, 4).unwrap();
        assert_eq!(tree.search(&key(1)).unwrap(), None);
        assert!(tree.scan().unwrap().next().is_none());
    }

    #[test]
    fn inserts_survive_multi_level_splits() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager, 4, 4).unwrap();
        insert_all(&mut tree, &session, 0..200);
        for n in 0..200 {
            assert_eq!(
                tree.search(&key(n)).unwrap().as_deref(),
                Some(&key(n * 7)[..]),
                "key {n}"
            );
        }
        assert_eq!(tree.search(&key(200)).unwrap(), None);
    }

    #[test]
    fn descending_and_interleaved_insert_orders() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager, 4, 4).unwrap();
        insert_all(&mut tree, &session, (0..100).rev());
        insert_all(&mut tree, &session, (100..200).filter(|n| n % 2 == 0));
        insert_all(&mut tree, &session, (100..200).filter(|n| n % 2 == 1));
        let keys: Vec<u32> = tree
            .scan()
            .unwrap()
            .map(|entry| {
                let (k, _) = entry.unwrap();
                u32::from_be_bytes([k[0], k[1], k[2], k[3]])
            })
            .collect();
        assert_eq!(keys, (0..200).collect::<Vec<u32>>());
    }

    #[test]
    fn duplicate_policy_and_overwrite() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager, 4, 4).unwrap();
        tree.insert(&session, &key(1), &key(10), false).unwrap();
        let err = tree.insert(&session, &key(1), &key(11), false).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::DuplicateKey)
        );
        tree.insert(&session, &key(1), &key(11), true).unwrap();
        assert_eq!(tree.search(&key(1)).unwrap().as_deref(), Some(&key(11)[..]));
    }

    #[test]
    fn rejected_duplicate_leaves_a_full_leaf_intact() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager.clone(), 4, 4).unwrap();
        // Exactly fill the root leaf (capacity 7).
        insert_all(&mut tree, &session, 0..7);
        let pages = pager.page_count();

        let err = tree.insert(&session, &key(3), &key(99), false).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::DuplicateKey)
        );

        // The rejection split nothing and retired nothing.
        assert_eq!(pager.page_count(), pages);
        let root = tree.save();
        let mut reopened = BPlusTree::open(pager, root, 4, 4).unwrap();
        for n in 0..7 {
            assert_eq!(
                reopened.search(&key(n)).unwrap().as_deref(),
                Some(&key(n * 7)[..]),
                "key {n}"
            );
        }
        assert_eq!(reopened.scan().unwrap().count(), 7);
    }

    #[test]
    fn overwrite_on_a_full_leaf_updates_in_place() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager.clone(), 4, 4).unwrap();
        insert_all(&mut tree, &session, 0..7);
        let pages = pager.page_count();

        tree.insert(&session, &key(3), &key(99), true).unwrap();
        assert_eq!(pager.page_count(), pages);
        assert_eq!(tree.search(&key(3)).unwrap().as_deref(), Some(&key(99)[..]));
        assert_eq!(tree.scan().unwrap().count(), 7);
    }

    #[test]
    fn delete_returns_presence_and_removes() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager, 4, 4).unwrap();
        insert_all(&mut tree, &session, 0..50);
        assert!(tree.delete(&session, &key(17)).unwrap());
        assert!(!tree.delete(&session, &key(17)).unwrap());
        assert_eq!(tree.search(&key(17)).unwrap(), None);
        assert_eq!(tree.search(&key(18)).unwrap().as_deref(), Some(&key(126)[..]));
    }

    #[test]
    fn deleting_everything_collapses_back_to_a_leaf_root() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager.clone(), 4, 4).unwrap();
        insert_all(&mut tree, &session, 0..120);
        for n in 0..120 {
            assert!(tree.delete(&session, &key(n)).unwrap(), "delete {n}");
        }
        assert!(tree.scan().unwrap().next().is_none());
        // The root shrank back to a single leaf.
        let root = Node::decode(pager.get_page(tree.root_page()).unwrap(), tree.config()).unwrap();
        assert!(matches!(root, Node::Leaf(_)));
    }

    #[test]
    fn alternating_deletes_keep_the_remainder_searchable() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager, 4, 4).unwrap();
        insert_all(&mut tree, &session, 0..150);
        for n in (0..150).filter(|n| n % 3 != 0) {
            assert!(tree.delete(&session, &key(n)).unwrap());
        }
        for n in 0..150 {
            let expected = (n % 3 == 0).then(|| key(n * 7).to_vec());
            assert_eq!(tree.search(&key(n)).unwrap(), expected, "key {n}");
        }
        let survivors: Vec<Vec<u8>> = tree
            .scan()
            .unwrap()
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(survivors.len(), 50);
        assert!(survivors.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn scan_range_is_inclusive_on_both_ends() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager, 4, 4).unwrap();
        insert_all(&mut tree, &session, (0..100).map(|n| n * 2)); // evens
        let keys: Vec<u32> = tree
            .scan_range(&key(10), &key(20))
            .unwrap()
            .map(|entry| {
                let (k, _) = entry.unwrap();
                u32::from_be_bytes([k[0], k[1], k[2], k[3]])
            })
            .collect();
        assert_eq!(keys, vec![10, 12, 14, 16, 18, 20]);

        // Bounds that miss present keys still clamp correctly.
        let keys: Vec<u32> = tree
            .scan_range(&key(11), &key(19))
            .unwrap()
            .map(|entry| {
                let (k, _) = entry.unwrap();
                u32::from_be_bytes([k[0], k[1], k[2], k[3]])
            })
            .collect();
        assert_eq!(keys, vec![12, 14, 16, 18]);
    }

    #[test]
    fn inverted_scan_range_is_rejected() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager, 4, 4).unwrap();
        insert_all(&mut tree, &session, 0..10);
        let err = tree.scan_range(&key(9), &key(3)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::InvalidScanRange)
        );
        // An empty-but-ordered range is fine.
        assert!(tree.scan_range(&key(200), &key(300)).unwrap().next().is_none());
    }

    #[test]
    fn save_clears_state_and_returns_the_root() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager.clone(), 4, 4).unwrap();
        assert!(tree.is_modified());
        insert_all(&mut tree, &session, 0..30);
        let root = tree.save();
        assert_eq!(root, tree.root_page());
        assert!(!tree.is_modified());

        // A fresh instance over the saved root sees everything.
        let mut reopened = BPlusTree::open(pager, root, 4, 4).unwrap();
        assert!(!reopened.is_modified());
        for n in 0..30 {
            assert_eq!(
                reopened.search(&key(n)).unwrap().as_deref(),
                Some(&key(n * 7)[..])
            );
        }
    }

    #[test]
    fn mismatched_key_and_value_sizes_are_rejected() {
        let (pager, session) = harness();
        let mut tree = BPlusTree::create(&session, pager, 4, 4).unwrap();
        assert!(tree.insert(&session, b"toolong!", &key(0), false).is_err());
        assert!(tree.insert(&session, &key(0), b"toolong!", false).is_err());
        assert!(tree.search(b"xy").is_err());
        assert!(tree.delete(&session, b"xy").is_err());
    }
}

