//! In-memory log backing for transient stores.
//!
//! Implements the same block and catalog traits as the extent files, so
//! sessions run unchanged on top of it. Blocks are addressed as extent 0,
//! offset = block ordinal.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::catalog::{Catalog, CatalogStore};
use crate::core::envelope::MAX_BLOCK_LEN;
use crate::core::extent::BlockPosition;
use crate::core::log::{BlockReader, BlockToken, BlockWriter, ReadStatus};
use crate::core::{Error, Result};

#[derive(Default)]
struct MemoryState {
    blocks: Vec<Arc<[u8]>>,
    closed: bool,
    catalog: Option<Catalog>,
}

/// Shared handle to one in-memory store. Cloning shares the contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Corrupt("memory store lock poisoned"))
    }

    pub fn writer(&self) -> MemoryWriter {
        MemoryWriter {
            store: self.clone(),
            pending: None,
            closed: false,
        }
    }

    pub fn reader(&self) -> MemoryReader {
        MemoryReader {
            store: self.clone(),
            next: 0,
            block: Arc::from(Vec::new()),
        }
    }

    pub fn block_count(&self) -> usize {
        self.lock().map_or(0, |state| state.blocks.len())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map_or(false, |state| state.closed)
    }
}

impl CatalogStore for MemoryStore {
    fn load_catalog(&self) -> Result<Option<Catalog>> {
        Ok(self.lock()?.catalog.clone())
    }

    fn save_catalog(&mut self, catalog: &Catalog) -> Result<()> {
        self.lock()?.catalog = Some(catalog.clone());
        Ok(())
    }
}

pub struct MemoryWriter {
    store: MemoryStore,
    pending: Option<(BlockPosition, Vec<u8>)>,
    closed: bool,
}

impl BlockWriter for MemoryWriter {
    fn reserve_block(&mut self, size: usize) -> Result<BlockToken> {
        if self.closed {
            return Err(Error::WriterClosed);
        }
        if size > MAX_BLOCK_LEN {
            return Err(Error::CapacityExceeded {
                requested: size,
                capacity: MAX_BLOCK_LEN,
            });
        }
        if self.pending.is_some() {
            return Err(Error::InvalidReservation("a block is already reserved"));
        }
        let position = self.end_position();
        self.pending = Some((position, Vec::with_capacity(size)));
        Ok(BlockToken::new(position, size))
    }

    fn write_to_block(&mut self, token: &mut BlockToken, bytes: &[u8]) -> Result<()> {
        let Some((position, buf)) = self.pending.as_mut() else {
            return Err(Error::InvalidReservation("no open reservation"));
        };
        if *position != token.position() {
            return Err(Error::InvalidReservation("token does not match the open reservation"));
        }
        if bytes.len() > token.remaining() {
            return Err(Error::InvalidReservation("write exceeds reservation"));
        }
        buf.extend_from_slice(bytes);
        token.advance(bytes.len());
        Ok(())
    }

    fn commit_block(&mut self, token: BlockToken) -> Result<BlockPosition> {
        match self.pending.take() {
            Some((position, buf)) if position == token.position() => {
                self.store.lock()?.blocks.push(Arc::from(buf));
                Ok(position)
            }
            other => {
                self.pending = other;
                Err(Error::InvalidReservation("token does not match the open reservation"))
            }
        }
    }

    fn max_block_len(&self) -> usize {
        MAX_BLOCK_LEN
    }

    fn end_position(&self) -> BlockPosition {
        BlockPosition::new(0, self.store.block_count() as u64)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.pending = None;
            self.store.lock()?.closed = true;
        }
        Ok(())
    }
}

pub struct MemoryReader {
    store: MemoryStore,
    next: usize,
    block: Arc<[u8]>,
}

impl BlockReader for MemoryReader {
    fn move_next(&mut self) -> Result<ReadStatus> {
        let state = self.store.lock()?;
        match state.blocks.get(self.next) {
            Some(block) => {
                self.block = Arc::clone(block);
                let position = BlockPosition::new(0, self.next as u64);
                self.next += 1;
                Ok(ReadStatus::Ready(position))
            }
            None if state.closed => Ok(ReadStatus::End),
            None => Ok(ReadStatus::Pending),
        }
    }

    fn read_block(&self) -> &[u8] {
        &self.block
    }

    fn seek(&mut self, position: BlockPosition) -> Result<()> {
        self.next = position.offset as usize;
        Ok(())
    }

    fn position(&self) -> BlockPosition {
        BlockPosition::new(0, self.next as u64)
    }
}
