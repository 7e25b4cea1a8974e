//! # Free-List Manager
//!
//! Tracks pages retired by copy-on-write and decides when they may be
//! handed out again. A page freed under commit `c` must stay readable until
//! nobody can observe commit `c` any more, which requires two independent
//! conditions on `c`'s free list:
//!
//! 1. **unlocked** — the writer that produced `c` has called
//!    [`FreeLists::unlock_commit`], meaning a newer commit is durable and
//!    new readers no longer start at `c`;
//! 2. **unpinned** — every read session opened against `c` has closed
//!    (`ref_count == 0`).
//!
//! Only when both hold do `c`'s pages move into the global available queue,
//! and the commit's entry is dropped from the tracking table so a page that
//! has been handed back out can never later be persisted as free.
//!
//! ## On-disk format
//!
//! The pending free set is persisted at every commit as a chain of ordinary
//! pages:
//!
//! ```text
//! offset  size               field
//! ------  ----               -----
//! 0       4                  next_page (u32 LE, 0 = end of chain)
//! 4       4                  entry_count (u32 LE)
//! 8       4 * entry_count    freed page ids (u32 LE)
//! ```
//!
//! Capacity per page is `page_size / 4 - 2`. The chain pages themselves are
//! recycled: `load` records the chain it walked as *reserved*, and the next
//! `commit` overwrites reserved pages front-first before growing the store.
//! Reserved pages beyond what a commit needs are folded into the persisted
//! free set instead of leaking.
//!
//! The in-memory state sits behind one mutex which is never held across
//! page I/O; `load` and `commit` snapshot or apply state under the lock and
//! do their page reads/writes outside it. That is sound because the store
//! has a single writer and `commit`/`load` only run on the writer path.

use std::collections::VecDeque;

use eyre::{bail, ensure, Result};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{freelist_entry_capacity, FREELIST_HEADER_SIZE};
use crate::storage::page::Page;
use crate::storage::pager::Pager;

/// Commit-aware free-page tracking.
///
/// One production implementation exists ([`DefaultFreeListManager`]); the
/// trait is the seam sessions and tests hook into.
pub trait FreeLists: Send + Sync {
    /// Read a persisted free-page chain starting at `root_page` into the
    /// available queue. `root_page == 0` is a no-op (nothing was persisted).
    fn load(&self, root_page: u32) -> Result<()>;

    /// Record `page_no` as freed under `commit_id`. The commit's list is
    /// created locked on first use.
    fn add_free_page(&self, page_no: u32, commit_id: u64);

    /// Mark `commit_id` superseded; its pages release once unpinned.
    fn unlock_commit(&self, commit_id: u64);

    /// Pin `commit_id` on behalf of a read session.
    fn increment_ref_count(&self, commit_id: u64);

    /// Drop one pin from `commit_id`; saturates at zero. Releases the
    /// commit's pages when it is also unlocked.
    fn decrement_ref_count(&self, commit_id: u64);

    /// Next reusable page, if any, without claiming it.
    fn peek_free(&self) -> Option<u32>;

    /// Claim the next reusable page in FIFO order.
    fn pop_free(&self) -> Option<u32>;

    /// Persist the pending free set; returns the first chain page, or 0 if
    /// nothing was written.
    fn commit(&self) -> Result<u32>;
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct FreeListPageHeader {
    next_page: U32,
    entry_count: U32,
}

#[derive(Default)]
struct CommitFreeList {
    freed: HashSet<u32>,
    locked: bool,
    ref_count: u32,
}

#[derive(Default)]
struct FreeListState {
    /// Pages cleared for reuse, handed out FIFO.
    available: VecDeque<u32>,
    /// Per-commit freed pages still gated on the release conditions.
    commits: HashMap<u64, CommitFreeList>,
    /// Chain pages from the last load/commit, reusable by the next commit.
    reserved: Vec<u32>,
}

impl FreeListState {
    fn release(&mut self, commit_id: u64) {
        if let Some(list) = self.commits.remove(&commit_id) {
            let mut pages: Vec<u32> = list.freed.into_iter().collect();
            pages.sort_unstable();
            trace!(commit_id, pages = pages.len(), "commit free list released");
            self.available.extend(pages);
        }
    }
}

pub struct DefaultFreeListManager {
    pager: Pager,
    state: Mutex<FreeListState>,
}

impl DefaultFreeListManager {
    pub fn new(pager: Pager) -> Self {
        Self {
            pager,
            state: Mutex::new(FreeListState::default()),
        }
    }

    fn read_chain_page(&self, page_no: u32, entries: &mut Vec<u32>) -> Result<u32> {
        let page = self.pager.get_page(page_no)?;
        let data = page.data();
        let (header, body) = FreeListPageHeader::ref_from_prefix(&data)
            .map_err(|_| eyre::eyre!("free-list page {page_no} is too small for its header"))?;
        let count = header.entry_count.get() as usize;
        ensure!(
            count <= freelist_entry_capacity(self.pager.page_size()),
            "free-list page {page_no} claims {count} entries, over capacity"
        );
        for raw in body[..count * 4].chunks_exact(4) {
            let mut word = [0u8; 4];
            word.copy_from_slice(raw);
            entries.push(u32::from_le_bytes(word));
        }
        Ok(header.next_page.get())
    }

    fn write_chain_page(&self, page: &Page, entries: &[u32]) -> Result<()> {
        let mut buf = Vec::with_capacity(FREELIST_HEADER_SIZE + entries.len() * 4);
        let header = FreeListPageHeader {
            next_page: U32::new(0),
            entry_count: U32::new(entries.len() as u32),
        };
        buf.extend_from_slice(header.as_bytes());
        for entry in entries {
            buf.extend_from_slice(&entry.to_le_bytes());
        }
        page.write_at(0, &buf)?;
        self.pager.mark_dirty(page);
        Ok(())
    }
}

impl FreeLists for DefaultFreeListManager {
    fn load(&self, root_page: u32) -> Result<()> {
        if root_page == 0 {
            return Ok(());
        }
        let mut entries = Vec::new();
        let mut chain: SmallVec<[u32; 4]> = SmallVec::new();
        let mut next = root_page;
        while next != 0 {
            ensure!(
                (chain.len() as u64) < self.pager.page_count(),
                "free-list chain from page {root_page} cycles"
            );
            chain.push(next);
            next = self.read_chain_page(next, &mut entries)?;
        }
        debug!(
            root_page,
            pages = chain.len(),
            entries = entries.len(),
            "free list loaded"
        );
        let mut state = self.state.lock();
        state.available.extend(entries);
        state.reserved.extend(chain);
        Ok(())
    }

    fn add_free_page(&self, page_no: u32, commit_id: u64) {
        let mut state = self.state.lock();
        let list = state.commits.entry(commit_id).or_insert_with(|| {
            trace!(commit_id, "commit free list opened");
            CommitFreeList {
                locked: true,
                ..CommitFreeList::default()
            }
        });
        list.freed.insert(page_no);
    }

    fn unlock_commit(&self, commit_id: u64) {
        let mut state = self.state.lock();
        let Some(list) = state.commits.get_mut(&commit_id) else {
            return;
        };
        list.locked = false;
        if list.ref_count == 0 {
            state.release(commit_id);
        }
    }

    fn increment_ref_count(&self, commit_id: u64) {
        let mut state = self.state.lock();
        let list = state.commits.entry(commit_id).or_default();
        // A list created by a reader pin tracks no pages; it starts
        // unlocked so the last close can drop it.
        list.ref_count += 1;
    }

    fn decrement_ref_count(&self, commit_id: u64) {
        let mut state = self.state.lock();
        let Some(list) = state.commits.get_mut(&commit_id) else {
            return;
        };
        list.ref_count = list.ref_count.saturating_sub(1);
        if list.ref_count == 0 && !list.locked {
            state.release(commit_id);
        }
    }

    fn peek_free(&self) -> Option<u32> {
        self.state.lock().available.front().copied()
    }

    fn pop_free(&self) -> Option<u32> {
        let page = self.state.lock().available.pop_front();
        if let Some(page_no) = page {
            trace!(page_no, "free page claimed for reuse");
        }
        page
    }

    fn commit(&self) -> Result<u32> {
        let capacity = freelist_entry_capacity(self.pager.page_size());
        let pages_needed = |entries: usize| entries.div_ceil(capacity);

        // Snapshot under the lock: the available queue in FIFO order, then
        // every still-tracked commit in ascending id order with its pages
        // ascending, deduplicated.
        let (mut entries, mut reserved) = {
            let mut state = self.state.lock();
            let mut seen: HashSet<u32> = HashSet::new();
            let mut entries: Vec<u32> = Vec::new();
            for &page_no in &state.available {
                if seen.insert(page_no) {
                    entries.push(page_no);
                }
            }
            let mut commit_ids: Vec<u64> = state.commits.keys().copied().collect();
            commit_ids.sort_unstable();
            for commit_id in commit_ids {
                let mut pages: Vec<u32> = state.commits[&commit_id]
                    .freed
                    .iter()
                    .copied()
                    .collect();
                pages.sort_unstable();
                for page_no in pages {
                    if seen.insert(page_no) {
                        entries.push(page_no);
                    }
                }
            }
            (entries, std::mem::take(&mut state.reserved))
        };

        // Reserved chain pages the new chain will not occupy are themselves
        // free; fold them into the persisted set rather than leaking them.
        while reserved.len() > pages_needed(entries.len()) {
            if let Some(page_no) = reserved.pop() {
                entries.push(page_no);
            }
        }

        if entries.is_empty() {
            let mut state = self.state.lock();
            state.reserved = reserved;
            return Ok(0);
        }

        let mut written: Vec<u32> = Vec::with_capacity(pages_needed(entries.len()));
        let mut reusable = reserved.into_iter();
        let mut previous: Option<Page> = None;
        for chunk in entries.chunks(capacity) {
            let page = match reusable.next() {
                Some(page_no) => self.pager.get_page_for_write(page_no)?,
                None => self.pager.new_page()?,
            };
            self.write_chain_page(&page, chunk)?;
            if let Some(prev) = &previous {
                // Link the chain forward as pages materialize.
                prev.write_at(0, &page.page_no().to_le_bytes())?;
                self.pager.mark_dirty(prev);
            }
            written.push(page.page_no());
            previous = Some(page);
        }

        let root = match written.first() {
            Some(&page_no) => page_no,
            None => bail!("free-list commit wrote no pages for a non-empty set"),
        };
        debug!(
            root_page = root,
            chain = written.len(),
            entries = entries.len(),
            "free list committed"
        );
        let mut state = self.state.lock();
        state.reserved = written;
        Ok(root)
    }
}
