//! # Page Handles
//!
//! A [`Page`] is a numbered view onto one shared block buffer plus a
//! writability flag. Handles are cheap to clone; clones share the buffer
//! and every reader of the same page sees writes as soon as the write lock
//! drops.
//!
//! Writability is a property of the handle, not the page: the same page can
//! be held read-only by one session and writeable by the allocator that
//! just produced it. [`Page::write_at`] enforces the flag and the buffer
//! bounds before touching any bytes.

use eyre::Result;
use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};

use crate::error::StoreError;
use crate::storage::block::BlockHandle;

#[derive(Clone)]
pub struct Page {
    page_no: u32,
    buf: BlockHandle,
    writeable: bool,
}

impl Page {
    pub(crate) fn new(page_no: u32, buf: BlockHandle, writeable: bool) -> Self {
        Self {
            page_no,
            buf,
            writeable,
        }
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn is_writeable(&self) -> bool {
        self.writeable
    }

    /// Read-locked view of the full page buffer.
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.buf.read(), |buf| &buf[..])
    }

    /// Copy `src` into the buffer at `offset`. Fails with
    /// [`StoreError::ReadOnlyPage`] on a read-only handle and refuses
    /// writes that would run past the end of the page.
    pub fn write_at(&self, offset: usize, src: &[u8]) -> Result<()> {
        if !self.writeable {
            return Err(StoreError::ReadOnlyPage {
                page_no: self.page_no,
            }
            .into());
        }
        let mut buf = self.buf.write();
        eyre::ensure!(
            offset.checked_add(src.len()).is_some_and(|end| end <= buf.len()),
            "write of {} bytes at offset {offset} overruns page {} ({} bytes)",
            src.len(),
            self.page_no,
            buf.len()
        );
        buf[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_no", &self.page_no)
            .field("writeable", &self.writeable)
            .finish()
    }
}
