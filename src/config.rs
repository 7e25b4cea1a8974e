//! # Configuration Constants
//!
//! Layout constants shared across the storage and btree layers. Values that
//! derive from each other are co-located so a change in one is checked
//! against its dependents.
//!
//! ```text
//! page_size (per store, fixed at block-source creation)
//!       │
//!       ├─> free-list entry capacity = page_size / 4 - FREELIST_HEADER_WORDS
//!       │     (one u32 forward link + one u32 entry count per page)
//!       │
//!       └─> node capacities (see TreeConfig)
//!             leaf:     (page_size - NODE_HEADER_SIZE) / (key + value)
//!             internal: (page_size - NODE_HEADER_SIZE - 4) / (key + 4)
//! ```
//!
//! The page size itself is not a global constant: every block source is
//! constructed with one, and everything above it derives capacities from
//! `Pager::page_size()`.

/// Size in bytes of the leading node header (a signed 32-bit key count;
/// negative values mark internal nodes).
pub const NODE_HEADER_SIZE: usize = 4;

/// Words (u32s) of header on a free-list page: forward link + entry count.
pub const FREELIST_HEADER_WORDS: usize = 2;

/// Byte size of the free-list page header.
pub const FREELIST_HEADER_SIZE: usize = FREELIST_HEADER_WORDS * 4;

/// Default capacity (in nodes) of a tree instance's decode cache.
pub const DEFAULT_NODE_CACHE_CAPACITY: usize = 256;

/// Number of freed page ids a single free-list page can hold.
pub const fn freelist_entry_capacity(page_size: usize) -> usize {
    page_size / 4 - FREELIST_HEADER_WORDS
}
