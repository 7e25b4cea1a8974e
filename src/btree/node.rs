//! # Node Header and Decode
//!
//! Every tree page starts with a signed 32-bit little-endian header that
//! both discriminates the node kind and carries the key count:
//!
//! ```text
//! header >= 0   leaf node,     key_count = header
//! header <  0   internal node, key_count = !header
//! ```
//!
//! Keys and values are fixed-size, so a node's byte layout is fully
//! determined by [`TreeConfig`] and the header. [`Node::decode`] rebuilds
//! the in-memory form from any page; nodes are plain owned values and can
//! be cloned into and out of the node cache freely.

use eyre::{ensure, Result};

use crate::btree::interior::InternalNode;
use crate::btree::leaf::LeafNode;
use crate::config::NODE_HEADER_SIZE;
use crate::storage::page::Page;

/// Key/value geometry for one tree. Capacities derive from the page size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeConfig {
    page_size: usize,
    key_size: usize,
    value_size: usize,
}

impl TreeConfig {
    pub fn new(page_size: usize, key_size: usize, value_size: usize) -> Result<Self> {
        ensure!(key_size > 0, "key size must be at least one byte");
        let config = Self {
            page_size,
            key_size,
            value_size,
        };
        ensure!(
            config.leaf_capacity() >= 4 && config.internal_key_capacity() >= 4,
            "page size {page_size} holds fewer than four entries for \
             key size {key_size} / value size {value_size}"
        );
        Ok(config)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Maximum `(key || value)` entries in a leaf.
    pub fn leaf_capacity(&self) -> usize {
        (self.page_size - NODE_HEADER_SIZE) / (self.key_size + self.value_size)
    }

    /// Minimum leaf occupancy before rebalancing kicks in.
    pub fn leaf_min(&self) -> usize {
        self.leaf_capacity() / 2
    }

    /// Maximum separator keys in an internal node; child pointers are
    /// `key_count + 1` u32s packed after the keys.
    pub fn internal_key_capacity(&self) -> usize {
        (self.page_size - NODE_HEADER_SIZE - 4) / (self.key_size + 4)
    }

    pub fn internal_min_keys(&self) -> usize {
        self.internal_key_capacity() / 2
    }
}

#[derive(Clone)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    /// Rebuild a node from its page. The header decides the kind.
    pub fn decode(page: Page, config: TreeConfig) -> Result<Node> {
        let header = {
            let data = page.data();
            ensure!(
                data.len() >= NODE_HEADER_SIZE,
                "page {} is smaller than a node header",
                page.page_no()
            );
            let mut word = [0u8; NODE_HEADER_SIZE];
            word.copy_from_slice(&data[..NODE_HEADER_SIZE]);
            i32::from_le_bytes(word)
        };
        if header >= 0 {
            Ok(Node::Leaf(LeafNode::from_page(page, header as usize, config)?))
        } else {
            Ok(Node::Internal(InternalNode::from_page(
                page,
                !header as usize,
                config,
            )?))
        }
    }

    pub fn page_no(&self) -> u32 {
        match self {
            Node::Leaf(leaf) => leaf.page_no(),
            Node::Internal(node) => node.page_no(),
        }
    }

    pub fn key_count(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.key_count(),
            Node::Internal(node) => node.key_count(),
        }
    }
}
