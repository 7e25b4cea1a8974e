//! # Typed Storage Failures
//!
//! Most fallible paths in vellum propagate `eyre::Result` and attach context
//! at the failure site. The variants below are the failures callers are
//! expected to branch on; they are carried inside the `eyre::Report` and can
//! be recovered with `report.downcast_ref::<StoreError>()`.
//!
//! ## Taxonomy
//!
//! - `PageOutOfRange`: a page/block offset at or past the end of the store.
//!   The caller must grow the store before retrying; nothing was read.
//! - `ReadOnlyPage`: a write through a page handle that was obtained for
//!   reading. This is a programming error, never retried.
//! - `DuplicateKey`: an insert with `overwrite == false` hit an existing key.
//! - `InvalidScanRange`: a ranged scan whose from-key sorts after its to-key,
//!   rejected before any traversal.
//!
//! There is no automatic retry anywhere in this crate; retry policy belongs
//! to the integrating layer, which knows whether the snapshot it was working
//! against is still valid.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("page {page_no} out of range (store holds {page_count} pages)")]
    PageOutOfRange { page_no: u64, page_count: u64 },

    #[error("write attempted through a read-only handle for page {page_no}")]
    ReadOnlyPage { page_no: u32 },

    #[error("key already present and overwrite was not requested")]
    DuplicateKey,

    #[error("scan range is inverted: from-key sorts after to-key")]
    InvalidScanRange,
}
