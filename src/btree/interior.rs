//! # Internal Nodes
//!
//! An internal node holds `key_count` fixed-size separator keys followed by
//! `key_count + 1` little-endian u32 child pointers:
//!
//! ```text
//! offset                       size             field
//! ------                       ----             -----
//! 0                            4                header (i32 LE, < 0; key_count = !header)
//! 4                            key_count * ks   separator keys, ascending
//! 4 + key_count * ks           4 * (key_count+1) child page ids
//! ```
//!
//! `keys[i]` is the inclusive lower bound of the subtree under
//! `children[i + 1]`; `children[0]` is unbounded below and the last child
//! unbounded above. The `child_count == key_count + 1` invariant holds at
//! all times, so removing a child always removes exactly one separator.
//!
//! Like leaves, every mutating method relocates the node via copy-on-write
//! first, and callers propagate the resulting page-id change upward.

use eyre::{ensure, Result};

use crate::btree::node::TreeConfig;
use crate::config::NODE_HEADER_SIZE;
use crate::storage::page::Page;
use crate::storage::session::WriteSession;

#[derive(Clone)]
pub struct InternalNode {
    page: Page,
    config: TreeConfig,
    /// Flat separator keys, `key_size` bytes each.
    keys: Vec<u8>,
    children: Vec<u32>,
}

impl InternalNode {
    /// Initialize a new root over a freshly split pair.
    pub fn create(
        page: Page,
        config: TreeConfig,
        separator: &[u8],
        left: u32,
        right: u32,
    ) -> Result<Self> {
        ensure!(
            separator.len() == config.key_size(),
            "separator is {} bytes, tree expects {}",
            separator.len(),
            config.key_size()
        );
        let node = Self {
            page,
            config,
            keys: separator.to_vec(),
            children: vec![left, right],
        };
        node.write_page()?;
        Ok(node)
    }

    pub fn from_page(page: Page, key_count: usize, config: TreeConfig) -> Result<Self> {
        ensure!(
            key_count <= config.internal_key_capacity(),
            "internal page {} claims {key_count} keys, over capacity {}",
            page.page_no(),
            config.internal_key_capacity()
        );
        let key_size = config.key_size();
        let (keys, children) = {
            let data = page.data();
            let keys_end = NODE_HEADER_SIZE + key_count * key_size;
            let keys = data[NODE_HEADER_SIZE..keys_end].to_vec();
            let mut children = Vec::with_capacity(key_count + 1);
            for raw in data[keys_end..keys_end + (key_count + 1) * 4].chunks_exact(4) {
                let mut word = [0u8; 4];
                word.copy_from_slice(raw);
                children.push(u32::from_le_bytes(word));
            }
            (keys, children)
        };
        Ok(Self {
            page,
            config,
            keys,
            children,
        })
    }

    pub fn page_no(&self) -> u32 {
        self.page.page_no()
    }

    pub(crate) fn page(&self) -> &Page {
        &self.page
    }

    pub fn key_count(&self) -> usize {
        self.keys.len() / self.config.key_size()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_full(&self) -> bool {
        self.key_count() >= self.config.internal_key_capacity()
    }

    pub fn needs_join(&self) -> bool {
        self.key_count() < self.config.internal_min_keys()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let key_size = self.config.key_size();
        &self.keys[index * key_size..(index + 1) * key_size]
    }

    pub fn child_at(&self, index: usize) -> Result<u32> {
        self.children
            .get(index)
            .copied()
            .ok_or_else(|| {
                eyre::eyre!(
                    "child index {index} out of range on internal page {}",
                    self.page_no()
                )
            })
    }

    /// Index of the child whose subtree covers `key`: the number of
    /// separators at or below it.
    pub fn child_index_for(&self, key: &[u8]) -> usize {
        let mut lo = 0usize;
        let mut hi = self.key_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn child_for_key(&self, key: &[u8]) -> u32 {
        self.children[self.child_index_for(key)]
    }

    fn index_of_child(&self, page_no: u32) -> Option<usize> {
        self.children.iter().position(|&child| child == page_no)
    }

    pub fn left_sibling_of(&self, page_no: u32) -> Option<u32> {
        let index = self.index_of_child(page_no)?;
        (index > 0).then(|| self.children[index - 1])
    }

    pub fn right_sibling_of(&self, page_no: u32) -> Option<u32> {
        let index = self.index_of_child(page_no)?;
        self.children.get(index + 1).copied()
    }

    /// Separator between `page_no` and its right sibling; `None` for the
    /// rightmost child (unbounded above) or an unknown page.
    pub fn separator_after(&self, page_no: u32) -> Option<&[u8]> {
        let index = self.index_of_child(page_no)?;
        (index < self.key_count()).then(|| self.key_at(index))
    }

    /// Rewrite the separator between `page_no` and its right sibling.
    /// No-op for the rightmost child, which has no upper separator.
    pub fn set_separator_after(
        &mut self,
        session: &WriteSession,
        page_no: u32,
        key: &[u8],
    ) -> Result<()> {
        let Some(index) = self.index_of_child(page_no) else {
            return Ok(());
        };
        if index >= self.key_count() || self.key_at(index) == key {
            return Ok(());
        }
        self.ensure_writeable(session)?;
        let key_size = self.config.key_size();
        self.keys[index * key_size..(index + 1) * key_size].copy_from_slice(key);
        self.write_page()
    }

    /// Rewrite the separator between `page_no` and its *left* sibling, the
    /// key bounding `page_no` from below. No-op for the leftmost child.
    pub fn set_left_key(&mut self, session: &WriteSession, page_no: u32, key: &[u8]) -> Result<()> {
        let Some(index) = self.index_of_child(page_no) else {
            return Ok(());
        };
        if index == 0 || self.key_at(index - 1) == key {
            return Ok(());
        }
        self.ensure_writeable(session)?;
        let key_size = self.config.key_size();
        self.keys[(index - 1) * key_size..index * key_size].copy_from_slice(key);
        self.write_page()
    }

    /// Record a split: `right_child` becomes the neighbor to the right of
    /// the child that split, bounded below by `separator`.
    pub fn insert_separator(
        &mut self,
        session: &WriteSession,
        separator: &[u8],
        right_child: u32,
    ) -> Result<()> {
        ensure!(!self.is_full(), "separator insert into a full internal node");
        ensure!(
            separator.len() == self.config.key_size(),
            "separator is {} bytes, tree expects {}",
            separator.len(),
            self.config.key_size()
        );
        self.ensure_writeable(session)?;
        // Separators are unique, so < and <= agree here.
        let slot = self.child_index_for(separator);
        let key_size = self.config.key_size();
        self.keys
            .splice(slot * key_size..slot * key_size, separator.iter().copied());
        self.children.insert(slot + 1, right_child);
        self.write_page()
    }

    /// Swap one child pointer after a copy-on-write relocation. Unknown
    /// pages are ignored so both halves of a split parent can be offered
    /// the update.
    pub fn update_child_pointer(
        &mut self,
        session: &WriteSession,
        old_page_no: u32,
        new_page_no: u32,
    ) -> Result<()> {
        if old_page_no == new_page_no {
            return Ok(());
        }
        let Some(index) = self.index_of_child(old_page_no) else {
            return Ok(());
        };
        self.ensure_writeable(session)?;
        self.children[index] = new_page_no;
        self.write_page()
    }

    /// Remove the child `page_no` after a merge. Returns the separator that
    /// bounded the removed child from above, which the caller rewrites at
    /// the surviving node's slot; `None` when the removed child was the
    /// rightmost (the survivor simply becomes unbounded above).
    pub fn remove_child(
        &mut self,
        session: &WriteSession,
        page_no: u32,
    ) -> Result<Option<Vec<u8>>> {
        let index = self.index_of_child(page_no).ok_or_else(|| {
            eyre::eyre!(
                "page {page_no} is not a child of internal page {}",
                self.page_no()
            )
        })?;
        self.ensure_writeable(session)?;
        self.children.remove(index);
        let key_size = self.config.key_size();
        let removed = if index < self.key_count() {
            let removed = self.key_at(index).to_vec();
            self.keys.drain(index * key_size..(index + 1) * key_size);
            Some(removed)
        } else {
            // Rightmost child: drop the separator below it instead.
            self.keys.drain((index - 1) * key_size..index * key_size);
            None
        };
        self.write_page()?;
        Ok(removed)
    }

    /// Move the upper half onto `new_page`, promoting the middle key.
    /// Returns the new right sibling and the promoted separator, which no
    /// longer appears in either half.
    pub fn split(
        &mut self,
        session: &WriteSession,
        new_page: Page,
    ) -> Result<(InternalNode, Vec<u8>)> {
        ensure!(
            self.key_count() >= 3,
            "split of an internal node with fewer than three keys"
        );
        self.ensure_writeable(session)?;
        let key_size = self.config.key_size();
        let mid = self.key_count() / 2;
        let promoted = self.key_at(mid).to_vec();
        let right = InternalNode {
            page: new_page,
            config: self.config,
            keys: self.keys.split_off((mid + 1) * key_size),
            children: self.children.split_off(mid + 1),
        };
        self.keys.truncate(mid * key_size);
        self.write_page()?;
        right.write_page()?;
        Ok((right, promoted))
    }

    /// Absorb the immediate right sibling, pulling `join_key` down as the
    /// separator between the two child runs, and retire the sibling's
    /// page. `Ok(false)` when the result would not fit.
    pub fn merge(
        &mut self,
        session: &WriteSession,
        right: &InternalNode,
        join_key: &[u8],
    ) -> Result<bool> {
        if self.key_count() + right.key_count() + 1 > self.config.internal_key_capacity() {
            return Ok(false);
        }
        self.ensure_writeable(session)?;
        self.keys.extend_from_slice(join_key);
        self.keys.extend_from_slice(&right.keys);
        self.children.extend_from_slice(&right.children);
        self.write_page()?;
        session.free_page(right.page_no());
        Ok(true)
    }

    /// Borrow the left sibling's last child. `join_key` (the separator
    /// between `left` and `self`) moves down as this node's new first key;
    /// the donor's last key moves up and is returned as the new separator.
    pub fn redistribute_from_left(
        &mut self,
        session: &WriteSession,
        left: &mut InternalNode,
        join_key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        if left.key_count() <= self.config.internal_min_keys() {
            return Ok(None);
        }
        self.ensure_writeable(session)?;
        left.ensure_writeable(session)?;
        let key_size = self.config.key_size();
        let new_join = left.key_at(left.key_count() - 1).to_vec();
        let moved_child = left.children[left.child_count() - 1];
        left.children.truncate(left.child_count() - 1);
        left.keys.truncate(left.keys.len() - key_size);
        self.children.insert(0, moved_child);
        self.keys.splice(0..0, join_key.iter().copied());
        self.write_page()?;
        left.write_page()?;
        Ok(Some(new_join))
    }

    /// Borrow the right sibling's first child. `join_key` (the separator
    /// between `self` and `right`) moves down as this node's new last key;
    /// the donor's first key moves up as the new separator.
    pub fn redistribute_from_right(
        &mut self,
        session: &WriteSession,
        right: &mut InternalNode,
        join_key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        if right.key_count() <= self.config.internal_min_keys() {
            return Ok(None);
        }
        self.ensure_writeable(session)?;
        right.ensure_writeable(session)?;
        let key_size = self.config.key_size();
        let new_join = right.key_at(0).to_vec();
        let moved_child = right.children.remove(0);
        right.keys.drain(..key_size);
        self.children.push(moved_child);
        self.keys.extend_from_slice(join_key);
        self.write_page()?;
        right.write_page()?;
        Ok(Some(new_join))
    }

    fn ensure_writeable(&mut self, session: &WriteSession) -> Result<()> {
        if !self.page.is_writeable() {
            self.page = session.copy_page(self.page.page_no())?;
        }
        Ok(())
    }

    fn write_page(&self) -> Result<()> {
        let header = !(self.key_count() as i32);
        self.page.write_at(0, &header.to_le_bytes())?;
        self.page.write_at(NODE_HEADER_SIZE, &self.keys)?;
        let mut pointers = Vec::with_capacity(self.children.len() * 4);
        for child in &self.children {
            pointers.extend_from_slice(&child.to_le_bytes());
        }
        self.page
            .write_at(NODE_HEADER_SIZE + self.keys.len(), &pointers)
    }
}
