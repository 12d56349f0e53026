//! Block log abstraction.
//!
//! A log is a sequence of committed blocks. Writers go through a
//! reserve / write / commit protocol so that the commit is the single point
//! at which a block becomes visible; readers walk committed blocks forward.
//! Two backings exist: extent files on disk ([`ExtentWriter`] /
//! [`ExtentCursor`]) and a growable buffer ([`MemoryStore`]).
//!
//! # Example
//!
//! ```no_run
//! use streamstore::core::{BlockReader, BlockWriter, ExtentCursor, ExtentWriter, ReadStatus};
//!
//! let mut log = ExtentWriter::create("./data", "session", 1024 * 1024, Default::default())?;
//! let mut token = log.reserve_block(5)?;
//! log.write_to_block(&mut token, b"hel")?;
//! log.write_to_block(&mut token, b"lo")?;
//! log.commit_block(token)?;
//! log.close()?;
//!
//! let mut cursor = ExtentCursor::open("./data", "session");
//! while let ReadStatus::Ready(position) = cursor.move_next()? {
//!     println!("{position:?}: {} bytes", cursor.read_block().len());
//! }
//! # Ok::<(), streamstore::Error>(())
//! ```
//!
//! [`ExtentWriter`]: crate::core::ExtentWriter
//! [`ExtentCursor`]: crate::core::ExtentCursor
//! [`MemoryStore`]: crate::core::MemoryStore

use crate::core::extent::BlockPosition;
use crate::core::Result;

/// A reservation handed out by [`BlockWriter::reserve_block`].
#[derive(Debug, PartialEq, Eq)]
pub struct BlockToken {
    position: BlockPosition,
    reserved: usize,
    written: usize,
}

impl BlockToken {
    pub(crate) fn new(position: BlockPosition, reserved: usize) -> Self {
        Self {
            position,
            reserved,
            written: 0,
        }
    }

    pub fn position(&self) -> BlockPosition {
        self.position
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn remaining(&self) -> usize {
        self.reserved - self.written
    }

    pub(crate) fn advance(&mut self, len: usize) {
        self.written += len;
    }
}

/// Outcome of [`BlockReader::move_next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// A committed block is available through `read_block`.
    Ready(BlockPosition),
    /// Nothing committed past the current position yet; the writer may add more.
    Pending,
    /// The log was finalized and every block has been read.
    End,
}

pub trait BlockWriter: Send {
    /// Guarantees `size` contiguous bytes, rolling to a new extent if needed.
    fn reserve_block(&mut self, size: usize) -> Result<BlockToken>;

    /// Copies `bytes` into the reservation; may be called repeatedly.
    fn write_to_block(&mut self, token: &mut BlockToken, bytes: &[u8]) -> Result<()>;

    /// Publishes the bytes written so far. Readers never see a block before this returns.
    fn commit_block(&mut self, token: BlockToken) -> Result<BlockPosition>;

    /// Largest payload a single reservation may request.
    fn max_block_len(&self) -> usize;

    /// Where the next block will be written.
    fn end_position(&self) -> BlockPosition;

    fn flush(&mut self) -> Result<()>;

    /// Finalizes the log. Idempotent.
    fn close(&mut self) -> Result<()>;
}

pub trait BlockReader: Send {
    fn move_next(&mut self) -> Result<ReadStatus>;

    /// Bytes of the block returned by the last `Ready`.
    fn read_block(&self) -> &[u8];

    /// Continues reading at `position`, which must be a block boundary.
    fn seek(&mut self, position: BlockPosition) -> Result<()>;

    /// Position of the next block to read.
    fn position(&self) -> BlockPosition;
}
