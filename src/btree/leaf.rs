//! # Leaf Nodes
//!
//! A leaf stores `key_count` fixed-size `(key || value)` entries in
//! ascending key order straight after the node header:
//!
//! ```text
//! offset                    size                     field
//! ------                    ----                     -----
//! 0                         4                        header (i32 LE, >= 0)
//! 4 + i * stride            key_size                 key i
//! 4 + i * stride + key_size value_size               value i
//! ```
//!
//! with `stride = key_size + value_size`.
//!
//! Every mutating method takes the write session and relocates the node via
//! copy-on-write before touching bytes: after any mutation the node's
//! `page_no` may differ from the one it was loaded under, and the caller is
//! responsible for propagating that change into the parent.

use eyre::{bail, ensure, Result};

use crate::btree::node::TreeConfig;
use crate::config::NODE_HEADER_SIZE;
use crate::error::StoreError;
use crate::storage::page::Page;
use crate::storage::session::WriteSession;

#[derive(Clone)]
pub struct LeafNode {
    page: Page,
    config: TreeConfig,
    entries: Vec<u8>,
}

impl LeafNode {
    /// Initialize an empty leaf on `page` and write its header.
    pub fn create(page: Page, config: TreeConfig) -> Result<Self> {
        let leaf = Self {
            page,
            config,
            entries: Vec::new(),
        };
        leaf.write_page()?;
        Ok(leaf)
    }

    pub fn from_page(page: Page, key_count: usize, config: TreeConfig) -> Result<Self> {
        ensure!(
            key_count <= config.leaf_capacity(),
            "leaf page {} claims {key_count} entries, over capacity {}",
            page.page_no(),
            config.leaf_capacity()
        );
        let stride = config.key_size() + config.value_size();
        let entries = {
            let data = page.data();
            data[NODE_HEADER_SIZE..NODE_HEADER_SIZE + key_count * stride].to_vec()
        };
        Ok(Self {
            page,
            config,
            entries,
        })
    }

    fn stride(&self) -> usize {
        self.config.key_size() + self.config.value_size()
    }

    pub fn page_no(&self) -> u32 {
        self.page.page_no()
    }

    pub(crate) fn page(&self) -> &Page {
        &self.page
    }

    pub fn key_count(&self) -> usize {
        self.entries.len() / self.stride()
    }

    pub fn is_full(&self) -> bool {
        self.key_count() >= self.config.leaf_capacity()
    }

    /// Below minimum occupancy; the tree should try to rebalance.
    pub fn needs_join(&self) -> bool {
        self.key_count() < self.config.leaf_min()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let start = index * self.stride();
        &self.entries[start..start + self.config.key_size()]
    }

    pub fn value_at(&self, index: usize) -> &[u8] {
        let start = index * self.stride() + self.config.key_size();
        &self.entries[start..start + self.config.value_size()]
    }

    pub fn leftmost_key(&self) -> Option<&[u8]> {
        (self.key_count() > 0).then(|| self.key_at(0))
    }

    pub fn rightmost_key(&self) -> Option<&[u8]> {
        let count = self.key_count();
        (count > 0).then(|| self.key_at(count - 1))
    }

    /// Binary search: `Ok(slot)` on an exact hit, `Err(slot)` at the
    /// insertion point.
    fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let mut lo = 0usize;
        let mut hi = self.key_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.key_at(mid).cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// First slot whose key is `>=` the probe; used to start ranged scans.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        match self.search(key) {
            Ok(slot) | Err(slot) => slot,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.search(key).ok().map(|slot| self.value_at(slot))
    }

    pub fn insert(
        &mut self,
        session: &WriteSession,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<()> {
        ensure!(
            key.len() == self.config.key_size(),
            "key is {} bytes, tree expects {}",
            key.len(),
            self.config.key_size()
        );
        ensure!(
            value.len() == self.config.value_size(),
            "value is {} bytes, tree expects {}",
            value.len(),
            self.config.value_size()
        );
        match self.search(key) {
            Ok(slot) => {
                if !overwrite {
                    bail!(StoreError::DuplicateKey);
                }
                if self.value_at(slot) == value {
                    return Ok(());
                }
                self.ensure_writeable(session)?;
                let start = slot * self.stride() + self.config.key_size();
                self.entries[start..start + value.len()].copy_from_slice(value);
                self.write_page()
            }
            Err(slot) => {
                ensure!(!self.is_full(), "insert into a full leaf");
                self.ensure_writeable(session)?;
                let at = slot * self.stride();
                let mut entry = Vec::with_capacity(self.stride());
                entry.extend_from_slice(key);
                entry.extend_from_slice(value);
                self.entries.splice(at..at, entry);
                self.write_page()
            }
        }
    }

    /// Remove `key`; `Ok(false)` when it was not present.
    pub fn delete(&mut self, session: &WriteSession, key: &[u8]) -> Result<bool> {
        let Ok(slot) = self.search(key) else {
            return Ok(false);
        };
        self.ensure_writeable(session)?;
        let at = slot * self.stride();
        self.entries.drain(at..at + self.stride());
        self.write_page()?;
        Ok(true)
    }

    /// Move the upper half of the entries onto `new_page`. Returns the new
    /// right sibling and the separator (its leftmost key).
    pub fn split(&mut self, session: &WriteSession, new_page: Page) -> Result<(LeafNode, Vec<u8>)> {
        ensure!(self.key_count() >= 2, "split of a leaf with fewer than two keys");
        self.ensure_writeable(session)?;
        let mid = self.key_count() / 2;
        let right = LeafNode {
            page: new_page,
            config: self.config,
            entries: self.entries.split_off(mid * self.stride()),
        };
        let separator = right.key_at(0).to_vec();
        self.write_page()?;
        right.write_page()?;
        Ok((right, separator))
    }

    /// Borrow the largest entry from the left sibling. `Ok(false)` when the
    /// donor cannot spare one.
    pub fn redistribute_from_left(
        &mut self,
        session: &WriteSession,
        left: &mut LeafNode,
    ) -> Result<bool> {
        if left.key_count() <= self.config.leaf_min() {
            return Ok(false);
        }
        self.ensure_writeable(session)?;
        left.ensure_writeable(session)?;
        let at = (left.key_count() - 1) * left.stride();
        let entry: Vec<u8> = left.entries.drain(at..).collect();
        self.entries.splice(0..0, entry);
        self.write_page()?;
        left.write_page()?;
        Ok(true)
    }

    /// Borrow the smallest entry from the right sibling.
    pub fn redistribute_from_right(
        &mut self,
        session: &WriteSession,
        right: &mut LeafNode,
    ) -> Result<bool> {
        if right.key_count() <= self.config.leaf_min() {
            return Ok(false);
        }
        self.ensure_writeable(session)?;
        right.ensure_writeable(session)?;
        let entry: Vec<u8> = right.entries.drain(..right.stride()).collect();
        self.entries.extend_from_slice(&entry);
        self.write_page()?;
        right.write_page()?;
        Ok(true)
    }

    /// Absorb `sibling` (either neighbor) into this node and retire its
    /// page. `Ok(false)` when the combined entries do not fit.
    pub fn merge(&mut self, session: &WriteSession, sibling: &LeafNode) -> Result<bool> {
        if self.key_count() + sibling.key_count() > self.config.leaf_capacity() {
            return Ok(false);
        }
        self.ensure_writeable(session)?;
        let prepend = match (sibling.leftmost_key(), self.leftmost_key()) {
            (Some(theirs), Some(ours)) => theirs < ours,
            _ => false,
        };
        if prepend {
            self.entries.splice(0..0, sibling.entries.iter().copied());
        } else {
            self.entries.extend_from_slice(&sibling.entries);
        }
        self.write_page()?;
        session.free_page(sibling.page_no());
        Ok(true)
    }

    fn ensure_writeable(&mut self, session: &WriteSession) -> Result<()> {
        if !self.page.is_writeable() {
            self.page = session.copy_page(self.page.page_no())?;
        }
        Ok(())
    }

    fn write_page(&self) -> Result<()> {
        let header = self.key_count() as i32;
        self.page.write_at(0, &header.to_le_bytes())?;
        self.page.write_at(NODE_HEADER_SIZE, &self.entries)
    }
}
