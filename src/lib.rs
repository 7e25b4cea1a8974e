//! # Vellum
//!
//! A transactional, copy-on-write page store with a B+Tree index.
//!
//! Commits are immutable snapshots: writers shadow the pages they change
//! onto fresh page numbers, readers pin the commit they opened against,
//! and the free-list manager returns retired pages to circulation only
//! once no current or pinned commit can reach them. On top of the store
//! sits a B+Tree whose nodes relocate on every mutation, so each commit's
//! index is a root page id and the full history stays readable for as
//! long as it is pinned.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vellum::{
//!     BPlusTree, DefaultFreeListManager, FreeLists, MemoryBlockSource, Pager, WriteSession,
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let pager = Pager::new(Box::new(MemoryBlockSource::new(4096)));
//! let free_lists: Arc<dyn FreeLists> = Arc::new(DefaultFreeListManager::new(pager.clone()));
//!
//! let session = WriteSession::open(0, 1, pager.clone(), Arc::clone(&free_lists));
//! let mut tree = BPlusTree::create(&session, pager.clone(), 8, 8)?;
//! tree.insert(&session, b"aaaaaaaa", b"11111111", false)?;
//! let root = tree.save();
//! let free_list_root = session.commit()?;
//!
//! // `root` and `free_list_root` go into the caller's commit metadata;
//! // reopen with `BPlusTree::open(pager, root, 8, 8)`.
//! # let _ = (root, free_list_root);
//! # Ok(())
//! # }
//! ```

pub mod btree;
pub mod config;
pub mod error;
pub mod storage;

pub use btree::{BPlusTree, InternalNode, LeafNode, Node, NodeCache, Scan, TreeConfig};
pub use error::StoreError;
pub use storage::{
    BlockHandle, BlockSource, DefaultFreeListManager, FileBlockSource, FreeLists,
    MemoryBlockSource, Page, Pager, Session, WriteSession,
};
