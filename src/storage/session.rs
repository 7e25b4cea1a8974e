//! # Page-Store Sessions
//!
//! A [`Session`] pins one committed snapshot: opening it increments the
//! commit's refcount in the free-list manager, which keeps every page that
//! snapshot can reach from being recycled underneath the reader. Closing
//! (explicit or on drop) decrements exactly once.
//!
//! A [`WriteSession`] layers allocation on top of a read view of its base
//! snapshot. Writers never mutate committed pages in place: they allocate
//! with [`WriteSession::next_page`] (recycling released pages first) and
//! relocate with [`WriteSession::copy_page`], which shadows the source page
//! and retires it under the write commit id. Read-only misuse is ruled out
//! at the type level since only a `WriteSession` exposes the mutating
//! surface.

use std::sync::Arc;

use eyre::Result;
use tracing::{debug, trace};

use crate::storage::freelist::FreeLists;
use crate::storage::page::Page;
use crate::storage::pager::Pager;

pub struct Session {
    read_commit_id: u64,
    pager: Pager,
    free_lists: Arc<dyn FreeLists>,
    closed: bool,
}

impl Session {
    pub fn open(read_commit_id: u64, pager: Pager, free_lists: Arc<dyn FreeLists>) -> Self {
        free_lists.increment_ref_count(read_commit_id);
        trace!(read_commit_id, "read session opened");
        Self {
            read_commit_id,
            pager,
            free_lists,
            closed: false,
        }
    }

    pub fn read_commit_id(&self) -> u64 {
        self.read_commit_id
    }

    /// Read-only handle for a page in this snapshot.
    pub fn get_page(&self, page_no: u32) -> Result<Page> {
        self.pager.get_page(page_no)
    }

    /// Release the snapshot pin. Safe to call more than once.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.free_lists.decrement_ref_count(self.read_commit_id);
            trace!(read_commit_id = self.read_commit_id, "read session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct WriteSession {
    session: Session,
    write_commit_id: u64,
}

impl WriteSession {
    /// Open a writer reading snapshot `read_commit_id` and retiring pages
    /// under `write_commit_id`.
    pub fn open(
        read_commit_id: u64,
        write_commit_id: u64,
        pager: Pager,
        free_lists: Arc<dyn FreeLists>,
    ) -> Self {
        Self {
            session: Session::open(read_commit_id, pager, free_lists),
            write_commit_id,
        }
    }

    pub fn read_commit_id(&self) -> u64 {
        self.session.read_commit_id()
    }

    pub fn write_commit_id(&self) -> u64 {
        self.write_commit_id
    }

    pub fn get_page(&self, page_no: u32) -> Result<Page> {
        self.session.get_page(page_no)
    }

    /// Allocate a writeable page: recycle the oldest released page if one
    /// exists, otherwise grow the store.
    pub fn next_page(&self) -> Result<Page> {
        if let Some(page_no) = self.session.free_lists.pop_free() {
            trace!(page_no, "page recycled");
            return self.session.pager.get_page_for_write(page_no);
        }
        self.session.pager.new_page()
    }

    /// Shadow-copy `page_no` to a fresh writeable page and retire the
    /// source under the write commit. The source stays readable for pinned
    /// snapshots until the free-list release conditions are met.
    pub fn copy_page(&self, page_no: u32) -> Result<Page> {
        let source = self.get_page(page_no)?;
        let copy = self.next_page()?;
        copy.write_at(0, &source.data())?;
        self.session
            .free_lists
            .add_free_page(page_no, self.write_commit_id);
        debug!(
            from = page_no,
            to = copy.page_no(),
            write_commit_id = self.write_commit_id,
            "page shadow-copied"
        );
        Ok(copy)
    }

    /// Retire `page_no` under the write commit without replacing it.
    pub fn free_page(&self, page_no: u32) {
        self.session
            .free_lists
            .add_free_page(page_no, self.write_commit_id);
    }

    pub fn mark_dirty(&self, page: &Page) {
        self.session.pager.mark_dirty(page);
    }

    /// Persist the pending free set, then flush the store. Returns the
    /// free-list root to record in the commit metadata.
    pub fn commit(&self) -> Result<u32> {
        let free_list_root = self.session.free_lists.commit()?;
        self.session.pager.commit()?;
        Ok(free_list_root)
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}
