//! # B+Tree
//!
//! Copy-on-write B+Tree over the page store, with fixed-size keys and
//! values. Mutations never touch committed pages: every modified node is
//! shadowed onto a fresh page and the parent's child pointer follows, so
//! each commit's tree hangs off its own root while sharing all unchanged
//! subtrees with its predecessors.
//!
//! - [`tree`]: the tree itself — descent, splits, four-step rebalancing,
//!   the lazy [`Scan`] cursor.
//! - [`leaf`] / [`interior`]: node-level byte layout and local operations.
//! - [`node`]: header decode and the [`TreeConfig`] geometry.
//! - [`cache`]: the per-instance SIEVE node cache.

pub mod cache;
pub mod interior;
pub mod leaf;
pub mod node;
pub mod tree;

pub use cache::NodeCache;
pub use interior::InternalNode;
pub use leaf::LeafNode;
pub use node::{Node, TreeConfig};
pub use tree::{BPlusTree, Scan};
