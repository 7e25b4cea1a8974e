//! # Storage Layer
//!
//! Copy-on-write page storage with commit-gated page reuse.
//!
//! ```text
//! Session / WriteSession       snapshot pinning, CoW allocation
//!         │
//!         ▼
//! FreeLists ──── Pager ─────── page handles, dirty flags
//!                  │
//!                  ▼
//!             BlockSource      memory- or file-backed fixed-size blocks
//! ```
//!
//! Committed pages are immutable: a writer shadows the pages it changes
//! onto fresh page numbers and retires the originals to the free-list
//! manager, which holds them until no commit that could reach them is
//! either current or pinned by a reader.

pub mod block;
pub mod freelist;
pub mod page;
pub mod pager;
pub mod session;

pub use block::{BlockHandle, BlockSource, FileBlockSource, MemoryBlockSource};
pub use freelist::{DefaultFreeListManager, FreeLists};
pub use page::Page;
pub use pager::Pager;
pub use session::{Session, WriteSession};
