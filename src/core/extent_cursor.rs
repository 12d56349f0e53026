//! Sequential reading across extents.
//!
//! # Design
//!
//! - Opens extents lazily as the read position reaches them
//! - Sealed extents are memory-mapped; the extent still being written is
//!   read with positional reads, so a writer truncating it on close can
//!   never fault a reader's mapping
//! - Follows rollover markers and sealed extents transparently
//! - Never reports corruption: an invalid block in a sealed extent ends
//!   the log for this cursor, an incomplete block in a live extent reads
//!   as "not yet committed"

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::core::envelope::{BlockHeader, BLOCK_HEADER_SIZE, COMMIT_NONE, COMMIT_ROLLOVER};
use crate::core::extent::{
    extent_path, BlockPosition, ExtentHeader, EXTENT_DATA_OFFSET, EXTENT_HEADER_SIZE,
};
use crate::core::log::{BlockReader, ReadStatus};
use crate::core::reclaim::Reclaimer;
use crate::core::Result;

enum ExtentView {
    Sealed(Mmap),
    Live(File),
}

impl ExtentView {
    fn open(path: &Path) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut buf = [0u8; EXTENT_HEADER_SIZE];
        match file.read_exact_at(&mut buf, 0) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        // Created but header not yet written.
        if buf.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        let header = ExtentHeader::from_bytes(&buf)?;
        if header.is_sealed() {
            // SAFETY: sealed extents are never written or truncated again.
            let map = unsafe { Mmap::map(&file)? };
            Ok(Some(ExtentView::Sealed(map)))
        } else {
            Ok(Some(ExtentView::Live(file)))
        }
    }

    /// Fills `buf` from `offset`; `false` if the extent ends first.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<bool> {
        match self {
            ExtentView::Sealed(map) => match map.get(offset..offset + buf.len()) {
                Some(src) => {
                    buf.copy_from_slice(src);
                    Ok(true)
                }
                None => Ok(false),
            },
            ExtentView::Live(file) => match file.read_exact_at(buf, offset as u64) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Bytes readable in this extent.
    fn len(&self) -> Result<usize> {
        match self {
            ExtentView::Sealed(map) => Ok(map.len()),
            ExtentView::Live(file) => Ok(file.metadata()?.len() as usize),
        }
    }

    fn is_sealed(&self) -> Result<bool> {
        match self {
            ExtentView::Sealed(_) => Ok(true),
            ExtentView::Live(file) => {
                let mut buf = [0u8; EXTENT_HEADER_SIZE];
                file.read_exact_at(&mut buf, 0)?;
                Ok(ExtentHeader::from_bytes(&buf)?.is_sealed())
            }
        }
    }
}

enum BlockState {
    Committed(usize),
    Rollover,
    /// Nothing (valid) at this offset; the extent may or may not be finished.
    Absent,
    /// A committed block that does not read back intact.
    Invalid(&'static str),
}

/// Forward cursor over the committed blocks of one store.
pub struct ExtentCursor {
    dir: PathBuf,
    store: String,
    extent_index: u32,
    offset: usize,
    view: Option<ExtentView>,
    block: Vec<u8>,
    halted: bool,
    reclaimer: Reclaimer,
}

impl ExtentCursor {
    /// Positions a cursor at the first block of `store`. Extents are opened
    /// lazily on the first `move_next`.
    pub fn open(dir: impl AsRef<Path>, store: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            store: store.to_string(),
            extent_index: 0,
            offset: EXTENT_DATA_OFFSET,
            view: None,
            block: Vec::new(),
            halted: false,
            reclaimer: Reclaimer::new(),
        }
    }

    pub fn extent_index(&self) -> u32 {
        self.extent_index
    }

    /// Whether the cursor stopped at an invalid block in a sealed extent.
    pub fn halted(&self) -> bool {
        self.halted
    }

    fn ensure_view(&mut self) -> Result<bool> {
        if self.view.is_some() {
            return Ok(true);
        }
        let path = extent_path(&self.dir, &self.store, self.extent_index);
        self.view = ExtentView::open(&path)?;
        Ok(self.view.is_some())
    }

    fn next_extent_exists(&self) -> bool {
        extent_path(&self.dir, &self.store, self.extent_index + 1).exists()
    }

    fn advance_extent(&mut self) {
        if let Some(ExtentView::Sealed(map)) = self.view.take() {
            self.reclaimer.retire(map);
        }
        self.extent_index += 1;
        self.offset = EXTENT_DATA_OFFSET;
    }

    fn probe(&mut self) -> Result<BlockState> {
        let Some(view) = &self.view else {
            return Ok(BlockState::Absent);
        };
        let mut header_buf = [0u8; BLOCK_HEADER_SIZE];
        if !view.read_at(self.offset, &mut header_buf)? {
            return Ok(BlockState::Absent);
        }
        let header = BlockHeader::from_bytes(&header_buf)?;
        match header.commit {
            COMMIT_NONE => return Ok(BlockState::Absent),
            COMMIT_ROLLOVER => return Ok(BlockState::Rollover),
            _ => {}
        }
        let len = BlockHeader::len_from_commit(header.commit)?;
        if self.offset + BLOCK_HEADER_SIZE + len > view.len()? {
            return Ok(BlockState::Invalid("block length exceeds extent"));
        }
        self.block.resize(len, 0);
        if !view.read_at(self.offset + BLOCK_HEADER_SIZE, &mut self.block)? {
            return Ok(BlockState::Invalid("block extends past end of extent"));
        }
        if header.validate_crc(&self.block).is_err() {
            return Ok(BlockState::Invalid("block checksum mismatch"));
        }
        Ok(BlockState::Committed(len))
    }
}

impl BlockReader for ExtentCursor {
    fn move_next(&mut self) -> Result<ReadStatus> {
        loop {
            if self.halted {
                return Ok(ReadStatus::End);
            }
            if !self.ensure_view()? {
                return Ok(ReadStatus::Pending);
            }

            match self.probe()? {
                BlockState::Committed(len) => {
                    let position = BlockPosition::new(self.extent_index, self.offset as u64);
                    self.offset += BlockHeader::footprint(len);
                    return Ok(ReadStatus::Ready(position));
                }
                BlockState::Rollover => {
                    self.advance_extent();
                }
                BlockState::Invalid(reason) => {
                    let sealed = self.view.as_ref().map_or(Ok(false), |v| v.is_sealed())?;
                    if !sealed {
                        return Ok(ReadStatus::Pending);
                    }
                    log::warn!(
                        "{}: stopping at extent {} offset {}: {}",
                        self.store,
                        self.extent_index,
                        self.offset,
                        reason
                    );
                    self.halted = true;
                    return Ok(ReadStatus::End);
                }
                BlockState::Absent => {
                    let sealed = self.view.as_ref().map_or(Ok(false), |v| v.is_sealed())?;
                    if !sealed {
                        return Ok(ReadStatus::Pending);
                    }
                    // Sealing happens after the last commit, so a re-read
                    // after observing the seal is authoritative.
                    if !matches!(self.probe()?, BlockState::Absent) {
                        continue;
                    }
                    if self.next_extent_exists() {
                        self.advance_extent();
                    } else {
                        return Ok(ReadStatus::End);
                    }
                }
            }
        }
    }

    fn read_block(&self) -> &[u8] {
        &self.block
    }

    fn seek(&mut self, position: BlockPosition) -> Result<()> {
        if let Some(ExtentView::Sealed(map)) = self.view.take() {
            self.reclaimer.retire(map);
        }
        self.extent_index = position.extent;
        self.offset = (position.offset as usize).max(EXTENT_DATA_OFFSET);
        self.halted = false;
        Ok(())
    }

    fn position(&self) -> BlockPosition {
        BlockPosition::new(self.extent_index, self.offset as u64)
    }
}
