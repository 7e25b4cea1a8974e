//! # Pager
//!
//! Thin page manager over a boxed [`BlockSource`]. The pager owns the
//! source behind a mutex and is cheap to clone (`Arc` inner), so sessions,
//! the free-list manager and tree instances can all hold a handle to the
//! same store.
//!
//! The pager adds nothing to the block source beyond the page/handle
//! translation: `get_page` yields read-only handles, `new_page` grows the
//! store and yields a writeable handle, and dirty tracking and flushing
//! pass straight through.

use std::sync::Arc;

use eyre::Result;
use parking_lot::Mutex;

use crate::storage::block::BlockSource;
use crate::storage::page::Page;

#[derive(Clone)]
pub struct Pager {
    inner: Arc<PagerInner>,
}

struct PagerInner {
    page_size: usize,
    source: Mutex<Box<dyn BlockSource>>,
}

impl Pager {
    pub fn new(source: Box<dyn BlockSource>) -> Self {
        let page_size = source.block_size();
        Self {
            inner: Arc::new(PagerInner {
                page_size,
                source: Mutex::new(source),
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    pub fn page_count(&self) -> u64 {
        self.inner.source.lock().len()
    }

    /// Read-only handle for an existing page.
    pub fn get_page(&self, page_no: u32) -> Result<Page> {
        let buf = self.inner.source.lock().block(page_no as u64, false)?;
        Ok(Page::new(page_no, buf, false))
    }

    /// Writeable handle for an existing page. Reserved for the allocator
    /// paths (recycled pages, free-list persistence); everything else goes
    /// through copy-on-write.
    pub(crate) fn get_page_for_write(&self, page_no: u32) -> Result<Page> {
        let buf = self.inner.source.lock().block(page_no as u64, true)?;
        Ok(Page::new(page_no, buf, true))
    }

    /// Append a zeroed page and return a writeable handle to it.
    pub fn new_page(&self) -> Result<Page> {
        let mut source = self.inner.source.lock();
        let offset = source.grow()?;
        eyre::ensure!(
            u32::try_from(offset).is_ok(),
            "store grew past the u32 page-number space"
        );
        let buf = source.block(offset, true)?;
        Ok(Page::new(offset as u32, buf, true))
    }

    pub fn mark_dirty(&self, page: &Page) {
        self.inner.source.lock().mark_dirty(page.page_no() as u64);
    }

    pub fn is_dirty(&self, page_no: u32) -> bool {
        self.inner.source.lock().is_dirty(page_no as u64)
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.source.lock().flush()
    }

    /// Durability point: flush everything dirty.
    pub fn commit(&self) -> Result<()> {
        self.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.inner.source.lock().close()
    }
}
