//! # Node Cache
//!
//! Bounded cache of decoded nodes keyed by page number, evicting with the
//! SIEVE algorithm: a hand sweeps the entries, clearing visited bits until
//! it finds an unvisited victim. Hits only set a flag, so lookups stay
//! cheap and hot nodes survive the sweep.
//!
//! The cache is purely an optimization. Entries are re-derived from pages
//! on a miss, so evicting (or clearing the whole cache, as `save` does) is
//! always correct. A tree instance is single-threaded, so unlike a shared
//! page cache there is no sharding and no pinning here.

use hashbrown::HashMap;

use crate::btree::node::Node;

struct CacheEntry {
    page_no: u32,
    node: Node,
    visited: bool,
}

pub struct NodeCache {
    entries: Vec<CacheEntry>,
    index: HashMap<u32, usize>,
    hand: usize,
    capacity: usize,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(1024)),
            index: HashMap::new(),
            hand: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, page_no: u32) -> Option<Node> {
        let &slot = self.index.get(&page_no)?;
        let entry = &mut self.entries[slot];
        entry.visited = true;
        Some(entry.node.clone())
    }

    /// Insert or replace the node for its page number.
    pub fn insert(&mut self, node: Node) {
        let page_no = node.page_no();
        if let Some(&slot) = self.index.get(&page_no) {
            let entry = &mut self.entries[slot];
            entry.node = node;
            entry.visited = true;
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.index.insert(page_no, self.entries.len());
        self.entries.push(CacheEntry {
            page_no,
            node,
            visited: false,
        });
    }

    pub fn remove(&mut self, page_no: u32) {
        if let Some(slot) = self.index.remove(&page_no) {
            self.remove_slot(slot);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.hand = 0;
    }

    fn evict(&mut self) {
        // Sweep until an unvisited entry turns up; one full lap clears
        // every flag, so the sweep terminates.
        loop {
            if self.entries.is_empty() {
                return;
            }
            if self.hand >= self.entries.len() {
                self.hand = 0;
            }
            let entry = &mut self.entries[self.hand];
            if entry.visited {
                entry.visited = false;
                self.hand += 1;
                continue;
            }
            let page_no = entry.page_no;
            self.index.remove(&page_no);
            self.remove_slot(self.hand);
            return;
        }
    }

    fn remove_slot(&mut self, slot: usize) {
        self.entries.swap_remove(slot);
        if let Some(moved) = self.entries.get(slot) {
            self.index.insert(moved.page_no, slot);
        }
        if self.hand > self.entries.len() {
            self.hand = 0;
        }
    }
}
