use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::clock::Ticks;
use crate::core::{Error, Result};

pub const ENVELOPE_SIZE: usize = 24;

pub const BLOCK_HEADER_SIZE: usize = 8;
pub const BLOCK_ALIGN: usize = 8;

/// Commit word of a block nobody has committed yet.
pub const COMMIT_NONE: u32 = 0;
/// Commit word telling readers to continue in the next extent.
pub const COMMIT_ROLLOVER: u32 = u32::MAX;
pub const MAX_BLOCK_LEN: usize = u32::MAX as usize - 2;

const STREAM_ID_OFFSET: usize = 0;
const SEQUENCE_ID_OFFSET: usize = 4;
const ORIGINATING_TIME_OFFSET: usize = 8;
const CREATION_TIME_OFFSET: usize = 16;

/// Ordering and addressing header written in front of every message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Envelope {
    pub stream_id: u32,
    pub sequence_id: u32,
    pub originating_time: Ticks,
    pub creation_time: Ticks,
}

impl Envelope {
    pub fn new(stream_id: u32, sequence_id: u32, originating_time: Ticks, creation_time: Ticks) -> Self {
        Self {
            stream_id,
            sequence_id,
            originating_time,
            creation_time,
        }
    }

    /// `creation_time - originating_time`.
    pub fn latency(&self) -> Ticks {
        self.creation_time.saturating_sub(self.originating_time)
    }

    pub fn to_bytes(&self) -> [u8; ENVELOPE_SIZE] {
        let mut buf = [0u8; ENVELOPE_SIZE];
        buf[STREAM_ID_OFFSET..STREAM_ID_OFFSET + 4].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[SEQUENCE_ID_OFFSET..SEQUENCE_ID_OFFSET + 4]
            .copy_from_slice(&self.sequence_id.to_le_bytes());
        buf[ORIGINATING_TIME_OFFSET..ORIGINATING_TIME_OFFSET + 8]
            .copy_from_slice(&self.originating_time.to_le_bytes());
        buf[CREATION_TIME_OFFSET..CREATION_TIME_OFFSET + 8]
            .copy_from_slice(&self.creation_time.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENVELOPE_SIZE {
            return Err(Error::Corrupt("block too short for envelope"));
        }
        Ok(Self {
            stream_id: read_u32(bytes, STREAM_ID_OFFSET),
            sequence_id: read_u32(bytes, SEQUENCE_ID_OFFSET),
            originating_time: read_i64(bytes, ORIGINATING_TIME_OFFSET),
            creation_time: read_i64(bytes, CREATION_TIME_OFFSET),
        })
    }

    /// Splits a message block into its envelope and payload.
    pub fn split_block(block: &[u8]) -> Result<(Self, &[u8])> {
        let envelope = Self::from_bytes(block)?;
        Ok((envelope, &block[ENVELOPE_SIZE..]))
    }
}

/// Length-prefixed header in front of every block in an extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// 0 = uncommitted, `u32::MAX` = rollover, otherwise payload length + 1.
    pub commit: u32,
    pub checksum: u32,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.commit.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(Error::Corrupt("block header truncated"));
        }
        Ok(Self {
            commit: read_u32(bytes, 0),
            checksum: read_u32(bytes, 4),
        })
    }

    pub fn commit_for_len(len: usize) -> Result<u32> {
        if len > MAX_BLOCK_LEN {
            return Err(Error::CapacityExceeded {
                requested: len,
                capacity: MAX_BLOCK_LEN,
            });
        }
        Ok(len as u32 + 1)
    }

    pub fn len_from_commit(commit: u32) -> Result<usize> {
        match commit {
            COMMIT_NONE => Err(Error::Corrupt("commit word is zero")),
            COMMIT_ROLLOVER => Err(Error::Corrupt("commit word is a rollover marker")),
            n => Ok((n - 1) as usize),
        }
    }

    /// Bytes a block of `len` payload bytes occupies in an extent.
    pub fn footprint(len: usize) -> usize {
        align_up(BLOCK_HEADER_SIZE + len, BLOCK_ALIGN)
    }

    pub fn store_commit(ptr: *mut u8, commit: u32) {
        // SAFETY: blocks are BLOCK_ALIGN aligned and the commit word sits at offset 0.
        let atomic = unsafe { &*(ptr as *const AtomicU32) };
        atomic.store(commit, Ordering::Release);
    }

    pub fn crc32(payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        hasher.finalize()
    }

    pub fn validate_crc(&self, payload: &[u8]) -> Result<()> {
        if Self::crc32(payload) == self.checksum {
            Ok(())
        } else {
            Err(Error::Corrupt("crc mismatch"))
        }
    }
}

#[inline]
pub fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_i64(bytes: &[u8], offset: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_le_bytes(buf)
}
