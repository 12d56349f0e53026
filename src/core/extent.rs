//! Extent file lifecycle management.
//!
//! Pure file operations for extents, with no session state: naming,
//! creation, header management, sealing, truncation and discovery. The
//! writer and the cursors compose these.
//!
//! # Layout
//!
//! ```text
//! {dir}/
//!   {store}.catalog        ← stream catalog (JSON)
//!   {store}_000000.ext     ← extent 0
//!   {store}_000001.ext     ← extent 1 (active)
//! ```
//!
//! Each extent starts with a 64-byte header followed by 8-byte aligned
//! blocks.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::core::envelope::{align_up, BlockHeader, BLOCK_HEADER_SIZE};
use crate::core::{Error, Result};

/// Default extent capacity (64 MB)
pub const DEFAULT_EXTENT_CAPACITY: usize = 64 * 1024 * 1024;

pub const EXTENT_HEADER_SIZE: usize = 64;

/// Offset of the first block.
pub const EXTENT_DATA_OFFSET: usize = 64;

/// Extent magic number ('EXT0')
pub const EXTENT_MAGIC: u32 = 0x4558_5430;

pub const EXTENT_VERSION: u32 = 1;

/// Set once an extent will never be written again.
pub const EXTENT_FLAG_SEALED: u32 = 1;

/// Granularity the final extent is rounded up to on truncation.
pub const STORAGE_BLOCK_SIZE: usize = 4096;

const MIN_EXTENT_CAPACITY: usize = STORAGE_BLOCK_SIZE;

/// Location of a committed block: extent index, then byte offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPosition {
    pub extent: u32,
    pub offset: u64,
}

impl BlockPosition {
    pub fn new(extent: u32, offset: u64) -> Self {
        Self { extent, offset }
    }

    pub fn start() -> Self {
        Self::new(0, EXTENT_DATA_OFFSET as u64)
    }
}

/// Header stored at the beginning of each extent file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentHeader {
    pub magic: u32,
    pub version: u32,
    pub extent_index: u32,
    pub flags: u32,
    pub capacity: u64,
}

impl ExtentHeader {
    pub fn new(extent_index: u32, capacity: u64) -> Self {
        Self {
            magic: EXTENT_MAGIC,
            version: EXTENT_VERSION,
            extent_index,
            flags: 0,
            capacity,
        }
    }

    pub fn is_sealed(&self) -> bool {
        (self.flags & EXTENT_FLAG_SEALED) != 0
    }

    pub fn to_bytes(&self) -> [u8; EXTENT_HEADER_SIZE] {
        let mut buf = [0u8; EXTENT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.extent_index.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..24].copy_from_slice(&self.capacity.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EXTENT_HEADER_SIZE {
            return Err(Error::Corrupt("extent too small for header"));
        }
        let word = |at: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(buf)
        };
        let mut capacity = [0u8; 8];
        capacity.copy_from_slice(&bytes[16..24]);
        let header = Self {
            magic: word(0),
            version: word(4),
            extent_index: word(8),
            flags: word(12),
            capacity: u64::from_le_bytes(capacity),
        };
        if header.magic != EXTENT_MAGIC {
            return Err(Error::Corrupt("extent magic mismatch"));
        }
        if header.version != EXTENT_VERSION {
            return Err(Error::UnsupportedVersion(header.version));
        }
        Ok(header)
    }
}

// ============================================================================
// Naming
// ============================================================================

/// Extent filename, e.g. `"session_000042.ext"`.
pub fn extent_filename(store: &str, index: u32) -> String {
    format!("{store}_{index:06}.ext")
}

pub fn extent_path(dir: &Path, store: &str, index: u32) -> PathBuf {
    dir.join(extent_filename(store, index))
}

pub fn catalog_filename(store: &str) -> String {
    format!("{store}.catalog")
}

pub fn catalog_path(dir: &Path, store: &str) -> PathBuf {
    dir.join(catalog_filename(store))
}

/// Returns the extent index if `name` is an extent of `store`.
pub fn parse_extent_filename(store: &str, name: &str) -> Option<u32> {
    let base = name.strip_prefix(store)?.strip_prefix('_')?.strip_suffix(".ext")?;
    if base.len() < 6 || !base.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    base.parse::<u32>().ok()
}

/// Sorted extent indices of `store` present in `dir`.
pub fn discover_extents(dir: &Path, store: &str) -> Result<Vec<u32>> {
    let mut extents = Vec::new();
    if !dir.exists() {
        return Ok(extents);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(index) = parse_extent_filename(store, name) {
            extents.push(index);
        }
    }
    extents.sort_unstable();
    Ok(extents)
}

/// Validate extent capacity is within acceptable bounds.
pub fn validate_extent_capacity(capacity: usize) -> Result<usize> {
    if capacity < MIN_EXTENT_CAPACITY {
        return Err(Error::InvalidReservation("extent capacity too small"));
    }
    if capacity > u32::MAX as usize {
        return Err(Error::InvalidReservation("extent capacity exceeds block addressing"));
    }
    Ok(align_up(capacity, BLOCK_HEADER_SIZE))
}

/// Largest block payload an extent of `capacity` bytes can hold.
pub fn max_block_len(capacity: usize) -> usize {
    capacity.saturating_sub(EXTENT_DATA_OFFSET + BLOCK_HEADER_SIZE)
}

// ============================================================================
// Memory-mapped files
// ============================================================================

/// A writable, memory-mapped extent file.
pub struct MmapFile {
    file: File,
    map: MmapMut,
    len: usize,
}

impl MmapFile {
    /// Creates a new file of `len` bytes; fails if it already exists.
    pub fn create_new(path: &Path, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidReservation("mmap length must be non-zero"));
        }
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.set_len(len as u64)?;
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self { file, map, len })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Err(Error::Corrupt("extent file is empty"));
        }
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self { file, map, len })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..self.len]
    }

    pub fn range(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(Error::Corrupt("range overflow"))?;
        if end > self.len {
            return Err(Error::Corrupt("range out of bounds"));
        }
        Ok(&self.map[offset..end])
    }

    pub fn range_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        let end = offset.checked_add(len).ok_or(Error::Corrupt("range overflow"))?;
        if end > self.len {
            return Err(Error::Corrupt("range out of bounds"));
        }
        Ok(&mut self.map[offset..end])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn flush_async(&self) -> Result<()> {
        self.map.flush_async_range(0, self.len)?;
        Ok(())
    }

    pub fn flush_sync(&self) -> Result<()> {
        self.map.flush_range(0, self.len)?;
        Ok(())
    }

    /// Shrinks the file. The mapping keeps its original length, so callers
    /// must not touch bytes at or beyond `len` afterwards.
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        if len > self.len {
            return Err(Error::Corrupt("truncate beyond mapped length"));
        }
        self.flush_sync()?;
        self.file.set_len(len as u64)?;
        self.file.sync_all()?;
        self.len = len;
        Ok(())
    }

    /// Gives up the file handle and returns the mapping for deferred unmapping.
    pub fn into_map(self) -> MmapMut {
        self.map
    }
}

// ============================================================================
// Extent header management
// ============================================================================

/// Creates extent `index` of `store`. Fails with `AlreadyExists` if present.
pub fn create_extent(dir: &Path, store: &str, index: u32, capacity: usize) -> Result<MmapFile> {
    let path = extent_path(dir, store, index);
    let mut mmap = MmapFile::create_new(&path, capacity)?;
    write_extent_header(&mut mmap, &ExtentHeader::new(index, capacity as u64))?;
    Ok(mmap)
}

pub fn read_extent_header(mmap: &MmapFile) -> Result<ExtentHeader> {
    ExtentHeader::from_bytes(mmap.range(0, EXTENT_HEADER_SIZE)?)
}

pub fn write_extent_header(mmap: &mut MmapFile, header: &ExtentHeader) -> Result<()> {
    mmap.range_mut(0, EXTENT_HEADER_SIZE)?
        .copy_from_slice(&header.to_bytes());
    Ok(())
}

/// Marks the extent immutable. Idempotent.
pub fn seal_extent(mmap: &mut MmapFile) -> Result<()> {
    let mut header = read_extent_header(mmap)?;
    if header.is_sealed() {
        return Ok(());
    }
    header.flags |= EXTENT_FLAG_SEALED;
    write_extent_header(mmap, &header)?;
    mmap.flush_sync()
}

/// Writes the rollover marker at `offset`, if a block header still fits.
pub fn write_rollover_marker(mmap: &mut MmapFile, offset: usize) -> Result<()> {
    if offset + BLOCK_HEADER_SIZE > mmap.len() {
        return Ok(());
    }
    let ptr = mmap.range_mut(offset, BLOCK_HEADER_SIZE)?.as_mut_ptr();
    BlockHeader::store_commit(ptr, crate::core::envelope::COMMIT_ROLLOVER);
    Ok(())
}

/// Size a final extent is truncated to when the last block ends at `end`.
pub fn truncated_len(end: usize) -> usize {
    align_up(end.max(EXTENT_DATA_OFFSET), STORAGE_BLOCK_SIZE)
}

/// Prefault memory by touching every 4KB page.
///
/// Forces the kernel to back the mapping before the hot write path needs
/// it, so first-touch page faults do not land inside `write` calls.
pub fn prefault_mmap(mmap: &mut MmapFile) {
    let slice = mmap.as_mut_slice();
    let len = slice.len();
    let mut offset = STORAGE_BLOCK_SIZE;
    while offset < len {
        slice[offset] = 0;
        offset += STORAGE_BLOCK_SIZE;
    }
}
