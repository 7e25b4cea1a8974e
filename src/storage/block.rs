//! # Block Sources
//!
//! A block source owns the raw fixed-size blocks a store is made of and
//! tracks which of them are dirty. Everything above this layer (pager,
//! free-list, tree) speaks in block offsets and shared buffers; only this
//! module knows whether the bytes live in memory or in a file.
//!
//! ## Buffer sharing
//!
//! Blocks are handed out as `BlockHandle = Arc<RwLock<Box<[u8]>>>`. Every
//! caller that fetches the same block observes the same buffer, so a write
//! through one page handle is visible through all others. The file-backed
//! source keeps strong references only for dirty blocks; clean blocks are
//! held through `Weak` references and re-read from the file once every
//! outstanding handle is gone.
//!
//! ## Dirty tracking
//!
//! Mutating a buffer does not mark it dirty by itself. Callers flag the
//! block through `mark_dirty` (usually via `Pager::mark_dirty`), and `flush`
//! writes exactly the flagged set. A fresh block returned by `grow` counts
//! as dirty for the file-backed source so zero-fill reaches the platter.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Weak};

use eyre::Result;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::error::StoreError;

/// Shared, lockable block buffer.
pub type BlockHandle = Arc<RwLock<Box<[u8]>>>;

pub trait BlockSource: Send {
    /// Number of blocks currently in the source.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed size in bytes of every block.
    fn block_size(&self) -> usize;

    /// Fetch the block at `offset`. Fails with [`StoreError::PageOutOfRange`]
    /// at or past the end. `for_writing` is a retention hint: a file-backed
    /// source keeps such blocks strongly referenced until the next flush.
    fn block(&mut self, offset: u64, for_writing: bool) -> Result<BlockHandle>;

    /// Flag the block at `offset` for the next flush.
    fn mark_dirty(&mut self, offset: u64);

    fn is_dirty(&self, offset: u64) -> bool;

    /// Append a zeroed block and return its offset.
    fn grow(&mut self) -> Result<u64>;

    /// Set the source length to `blocks`. Fails if that would grow it.
    fn truncate(&mut self, blocks: u64) -> Result<()>;

    /// Persist all dirty blocks and clear the dirty set.
    fn flush(&mut self) -> Result<()>;

    /// Flush and release resources. The source is unusable afterwards.
    fn close(&mut self) -> Result<()>;
}

fn zeroed_block(block_size: usize) -> BlockHandle {
    Arc::new(RwLock::new(vec![0u8; block_size].into_boxed_slice()))
}

/// Volatile block source backed by a `Vec` of buffers.
pub struct MemoryBlockSource {
    block_size: usize,
    blocks: Vec<BlockHandle>,
    dirty: HashSet<u64>,
}

impl MemoryBlockSource {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            blocks: Vec::new(),
            dirty: HashSet::new(),
        }
    }
}

impl BlockSource for MemoryBlockSource {
    fn len(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block(&mut self, offset: u64, _for_writing: bool) -> Result<BlockHandle> {
        let handle = self
            .blocks
            .get(offset as usize)
            .ok_or(StoreError::PageOutOfRange {
                page_no: offset,
                page_count: self.len(),
            })?;
        Ok(Arc::clone(handle))
    }

    fn mark_dirty(&mut self, offset: u64) {
        if offset < self.len() {
            self.dirty.insert(offset);
        }
    }

    fn is_dirty(&self, offset: u64) -> bool {
        self.dirty.contains(&offset)
    }

    fn grow(&mut self) -> Result<u64> {
        let offset = self.len();
        self.blocks.push(zeroed_block(self.block_size));
        Ok(offset)
    }

    fn truncate(&mut self, blocks: u64) -> Result<()> {
        eyre::ensure!(
            blocks <= self.len(),
            "truncate to {blocks} blocks would grow a source of {}",
            self.len()
        );
        self.blocks.truncate(blocks as usize);
        self.dirty.retain(|&off| off < blocks);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // The buffers are the store. Nothing to persist.
        self.dirty.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.blocks.clear();
        self.dirty.clear();
        Ok(())
    }
}

/// Durable block source over a read/write file.
///
/// Dirty blocks are pinned in `dirty` until flushed; flushed blocks demote
/// to the `clean` weak map so live page handles keep observing one shared
/// buffer, while unreferenced clean blocks drop and are re-read on demand.
pub struct FileBlockSource {
    file: std::fs::File,
    block_size: usize,
    len: u64,
    dirty: HashMap<u64, BlockHandle>,
    clean: HashMap<u64, Weak<RwLock<Box<[u8]>>>>,
}

impl FileBlockSource {
    /// Open (or create) the file at `path`. An existing file must hold a
    /// whole number of blocks.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let byte_len = file.metadata()?.len();
        eyre::ensure!(
            byte_len % block_size as u64 == 0,
            "file length {byte_len} is not a multiple of the block size {block_size}"
        );
        Ok(Self {
            file,
            block_size,
            len: byte_len / block_size as u64,
            dirty: HashMap::new(),
            clean: HashMap::new(),
        })
    }

    fn read_block(&mut self, offset: u64) -> Result<BlockHandle> {
        let mut buf = vec![0u8; self.block_size];
        self.file
            .seek(SeekFrom::Start(offset * self.block_size as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(Arc::new(RwLock::new(buf.into_boxed_slice())))
    }
}

impl BlockSource for FileBlockSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block(&mut self, offset: u64, for_writing: bool) -> Result<BlockHandle> {
        if offset >= self.len {
            return Err(StoreError::PageOutOfRange {
                page_no: offset,
                page_count: self.len,
            }
            .into());
        }
        if let Some(handle) = self.dirty.get(&offset) {
            return Ok(Arc::clone(handle));
        }
        if let Some(handle) = self.clean.get(&offset).and_then(Weak::upgrade) {
            return Ok(handle);
        }
        let handle = self.read_block(offset)?;
        if for_writing {
            self.dirty.insert(offset, Arc::clone(&handle));
        } else {
            self.clean.insert(offset, Arc::downgrade(&handle));
        }
        Ok(handle)
    }

    fn mark_dirty(&mut self, offset: u64) {
        if offset >= self.len || self.dirty.contains_key(&offset) {
            return;
        }
        if let Some(handle) = self.clean.remove(&offset) {
            if let Some(handle) = handle.upgrade() {
                self.dirty.insert(offset, handle);
                return;
            }
        }
        // No live buffer; pull one in so the flush has bytes to write.
        if let Ok(handle) = self.read_block(offset) {
            self.dirty.insert(offset, handle);
        }
    }

    fn is_dirty(&self, offset: u64) -> bool {
        self.dirty.contains_key(&offset)
    }

    fn grow(&mut self) -> Result<u64> {
        let offset = self.len;
        self.len += 1;
        self.file.set_len(self.len * self.block_size as u64)?;
        self.dirty.insert(offset, zeroed_block(self.block_size));
        Ok(offset)
    }

    fn truncate(&mut self, blocks: u64) -> Result<()> {
        eyre::ensure!(
            blocks <= self.len,
            "truncate to {blocks} blocks would grow a source of {}",
            self.len
        );
        self.len = blocks;
        self.file.set_len(blocks * self.block_size as u64)?;
        self.dirty.retain(|&off, _| off < blocks);
        self.clean.retain(|&off, _| off < blocks);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut offsets: Vec<u64> = self.dirty.keys().copied().collect();
        offsets.sort_unstable();
        for offset in offsets {
            if let Some(handle) = self.dirty.remove(&offset) {
                {
                    let buf = handle.read();
                    self.file
                        .seek(SeekFrom::Start(offset * self.block_size as u64))?;
                    self.file.write_all(&buf)?;
                }
                self.clean.insert(offset, Arc::downgrade(&handle));
            }
        }
        self.file.sync_data()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.clean.clear();
        Ok(())
    }
}
