//! Extent writing primitive.
//!
//! Provides the reserve / write / commit protocol over a chain of extent
//! files.
//!
//! # Design
//!
//! - Owns a single active extent (mmap)
//! - Writes block payload first, then checksum, then the commit word
//! - Rolls to a new extent when a reservation does not fit, leaving a
//!   rollover marker for readers
//! - Seals sealed-off extents and retires their mappings on a background thread
//! - On close, truncates the active extent to the last committed block

use std::path::{Path, PathBuf};

use crate::core::envelope::{BlockHeader, BLOCK_HEADER_SIZE};
use crate::core::extent::{
    create_extent, max_block_len, prefault_mmap, seal_extent, truncated_len,
    validate_extent_capacity, write_rollover_marker, BlockPosition, MmapFile, EXTENT_DATA_OFFSET,
};
use crate::core::log::{BlockToken, BlockWriter};
use crate::core::reclaim::Reclaimer;
use crate::core::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct ExtentOptions {
    /// msync a sealed extent before moving on.
    pub sync_on_rollover: bool,
    /// Touch every page of a new extent up front.
    pub prefault: bool,
}

impl Default for ExtentOptions {
    fn default() -> Self {
        Self {
            sync_on_rollover: true,
            prefault: false,
        }
    }
}

/// Writer over the extent files of one store.
///
/// Extent 0 is created eagerly with exclusive-create semantics, which is
/// what makes two writers on the same store collide instead of interleave.
/// Later extents are created when a reservation does not fit.
pub struct ExtentWriter {
    dir: PathBuf,
    store: String,
    capacity: usize,
    options: ExtentOptions,
    extent_index: u32,
    write_offset: usize,
    mmap: Option<MmapFile>,
    pending: Option<BlockPosition>,
    reclaimer: Reclaimer,
    extents_created: u32,
}

impl ExtentWriter {
    /// Creates extent 0 of `store` in `dir`.
    ///
    /// # Errors
    ///
    /// - `Error::Collision`: the store already has extents in `dir`
    /// - `Error::InvalidReservation`: capacity out of range
    pub fn create(
        dir: impl AsRef<Path>,
        store: &str,
        capacity: usize,
        options: ExtentOptions,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let capacity = validate_extent_capacity(capacity)?;
        std::fs::create_dir_all(&dir)?;

        let mut mmap = match create_extent(&dir, store, 0, capacity) {
            Ok(mmap) => mmap,
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Collision(dir));
            }
            Err(err) => return Err(err),
        };
        if options.prefault {
            prefault_mmap(&mut mmap);
        }

        Ok(Self {
            dir,
            store: store.to_string(),
            capacity,
            options,
            extent_index: 0,
            write_offset: EXTENT_DATA_OFFSET,
            mmap: Some(mmap),
            pending: None,
            reclaimer: Reclaimer::new(),
            extents_created: 1,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extent_index(&self) -> u32 {
        self.extent_index
    }

    pub fn extents_created(&self) -> u32 {
        self.extents_created
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.mmap.is_none()
    }

    fn roll(&mut self) -> Result<()> {
        let next_index = self
            .extent_index
            .checked_add(1)
            .ok_or(Error::Corrupt("extent index overflow"))?;
        let mut next = create_extent(&self.dir, &self.store, next_index, self.capacity)?;
        if self.options.prefault {
            prefault_mmap(&mut next);
        }

        if let Some(mut old) = self.mmap.replace(next) {
            write_rollover_marker(&mut old, self.write_offset)?;
            seal_extent(&mut old)?;
            if self.options.sync_on_rollover {
                old.flush_sync()?;
            }
            self.reclaimer.retire(old.into_map());
        }

        log::debug!(
            "{}: rolled from extent {} to {} at offset {}",
            self.store,
            self.extent_index,
            next_index,
            self.write_offset
        );
        self.extent_index = next_index;
        self.write_offset = EXTENT_DATA_OFFSET;
        self.extents_created += 1;
        Ok(())
    }

    fn check_token(&self, token: &BlockToken) -> Result<()> {
        match self.pending {
            Some(position) if position == token.position() => Ok(()),
            _ => Err(Error::InvalidReservation("token does not match the open reservation")),
        }
    }
}

impl BlockWriter for ExtentWriter {
    /// # Errors
    ///
    /// - `Error::CapacityExceeded`: `size` can never fit in one extent
    /// - `Error::InvalidReservation`: a reservation is already open
    fn reserve_block(&mut self, size: usize) -> Result<BlockToken> {
        if self.mmap.is_none() {
            return Err(Error::WriterClosed);
        }
        let limit = max_block_len(self.capacity);
        if size > limit {
            return Err(Error::CapacityExceeded {
                requested: size,
                capacity: limit,
            });
        }
        if self.pending.is_some() {
            return Err(Error::InvalidReservation("a block is already reserved"));
        }

        if self.write_offset + BlockHeader::footprint(size) > self.capacity {
            self.roll()?;
        }

        let position = BlockPosition::new(self.extent_index, self.write_offset as u64);
        self.pending = Some(position);
        Ok(BlockToken::new(position, size))
    }

    fn write_to_block(&mut self, token: &mut BlockToken, bytes: &[u8]) -> Result<()> {
        self.check_token(token)?;
        if bytes.len() > token.remaining() {
            return Err(Error::InvalidReservation("write exceeds reservation"));
        }
        let start = self.write_offset + BLOCK_HEADER_SIZE + token.written();
        let mmap = self.mmap.as_mut().ok_or(Error::WriterClosed)?;
        mmap.range_mut(start, bytes.len())?.copy_from_slice(bytes);
        token.advance(bytes.len());
        Ok(())
    }

    fn commit_block(&mut self, token: BlockToken) -> Result<BlockPosition> {
        self.check_token(&token)?;
        let offset = self.write_offset;
        let len = token.written();
        let mmap = self.mmap.as_mut().ok_or(Error::WriterClosed)?;

        let checksum = BlockHeader::crc32(mmap.range(offset + BLOCK_HEADER_SIZE, len)?);
        mmap.range_mut(offset + 4, 4)?
            .copy_from_slice(&checksum.to_le_bytes());

        let commit = BlockHeader::commit_for_len(len)?;
        let header_ptr = mmap.range_mut(offset, 4)?.as_mut_ptr();
        BlockHeader::store_commit(header_ptr, commit);

        self.write_offset = offset
            .checked_add(BlockHeader::footprint(len))
            .ok_or(Error::Corrupt("write offset overflow"))?;
        self.pending = None;
        Ok(token.position())
    }

    fn max_block_len(&self) -> usize {
        max_block_len(self.capacity)
    }

    fn end_position(&self) -> BlockPosition {
        BlockPosition::new(self.extent_index, self.write_offset as u64)
    }

    /// Ensures writes are visible to the OS but not necessarily durable.
    fn flush(&mut self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush_async()?;
        }
        Ok(())
    }

    /// Truncates the active extent to the last committed block, rounded up to
    /// the storage block size, then seals it. An open reservation is dropped.
    fn close(&mut self) -> Result<()> {
        let Some(mut mmap) = self.mmap.take() else {
            return Ok(());
        };
        if self.pending.take().is_some() {
            log::debug!("{}: discarding uncommitted reservation on close", self.store);
        }
        let len = truncated_len(self.write_offset).min(mmap.len());
        mmap.truncate(len)?;
        seal_extent(&mut mmap)?;
        log::debug!(
            "{}: closed extent {} at {} bytes",
            self.store,
            self.extent_index,
            len
        );
        self.reclaimer.retire(mmap.into_map());
        Ok(())
    }
}
