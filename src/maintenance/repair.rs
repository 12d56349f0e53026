//! Recovery of stores whose writer never closed them.
//!
//! The valid prefix of the log is every block up to the first one that is
//! missing, torn or fails its checksum. Repair rebuilds the catalog from
//! that prefix, cuts the log right after it and writes the terminal
//! marker, leaving a store indistinguishable from one closed at that point.

use std::path::Path;

use crate::core::catalog::{rebuild_statistics, Catalog, CatalogStore, FileCatalog};
use crate::core::clock::{Clock, SystemClock};
use crate::core::extent::{
    create_extent, discover_extents, extent_path, read_extent_header, seal_extent, truncated_len,
    validate_extent_capacity, write_extent_header, BlockPosition, ExtentHeader, MmapFile,
    DEFAULT_EXTENT_CAPACITY, EXTENT_DATA_OFFSET, EXTENT_HEADER_SIZE,
};
use crate::core::extent_cursor::ExtentCursor;
use crate::core::{Error, Result};
use crate::store::resolve_store_dir;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// The store already carried the terminal marker; nothing was touched.
    pub was_finalized: bool,
    pub messages_recovered: u64,
    /// File bytes released by truncation and extent removal.
    pub bytes_discarded: u64,
    pub extents_removed: u32,
}

/// Repairs store `name` at `path` in place.
///
/// # Errors
///
/// `Error::StoreNotFound` if the store has no extents.
pub fn repair(name: &str, path: impl AsRef<Path>) -> Result<RepairReport> {
    let dir = resolve_store_dir(name, path.as_ref())?;
    let mut catalog_store = FileCatalog::new(&dir, name);
    let stored = match catalog_store.load_catalog() {
        Ok(stored) => stored,
        Err(err) => {
            log::warn!("{}: unreadable catalog ({}); rebuilding from the log", name, err);
            None
        }
    };
    if let Some(catalog) = stored.as_ref().filter(|c| c.is_finalized()) {
        return Ok(RepairReport {
            was_finalized: true,
            messages_recovered: catalog.streams().iter().map(|s| s.message_count).sum(),
            ..RepairReport::default()
        });
    }

    let extents = discover_extents(&dir, name)?;
    if extents.is_empty() {
        return Err(Error::StoreNotFound(dir));
    }
    let mut catalog = stored.unwrap_or_else(|| Catalog::new(name, &dir, 0, 0));
    let capacity = if catalog.extent_capacity > 0 {
        catalog.extent_capacity as usize
    } else {
        DEFAULT_EXTENT_CAPACITY
    };

    let mut cursor = ExtentCursor::open(&dir, name);
    let summary = rebuild_statistics(&mut cursor, &mut catalog)?;
    drop(cursor);
    let end = summary.end;
    log::debug!("{}: valid prefix ends at {:?}", name, end);

    let mut report = RepairReport {
        messages_recovered: summary.messages,
        ..RepairReport::default()
    };

    for &index in extents.iter().filter(|&&index| index < end.extent) {
        let mut mmap = MmapFile::open(&extent_path(&dir, name, index))?;
        seal_extent(&mut mmap)?;
    }
    report.bytes_discarded += cut_extent(&dir, name, end, capacity)?;
    for &index in extents.iter().filter(|&&index| index > end.extent) {
        let path = extent_path(&dir, name, index);
        report.bytes_discarded += std::fs::metadata(&path)?.len();
        std::fs::remove_file(&path)?;
        report.extents_removed += 1;
    }

    let now = SystemClock.now();
    for stream in &mut catalog.streams {
        stream.close(now);
    }
    catalog.finalize(now);
    catalog_store.save_catalog(&catalog)?;

    log::info!(
        "{}: repaired ({} messages kept, {} bytes discarded, {} extents removed)",
        name,
        report.messages_recovered,
        report.bytes_discarded,
        report.extents_removed
    );
    Ok(report)
}

/// Makes `end` the final position of the log: clears everything after it
/// in its extent, truncates and seals. Returns the bytes released.
fn cut_extent(dir: &Path, name: &str, end: BlockPosition, capacity: usize) -> Result<u64> {
    let path = extent_path(dir, name, end.extent);
    let original_len = match std::fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
        Err(err) => return Err(err.into()),
    };
    if original_len < EXTENT_HEADER_SIZE as u64 {
        // Never got a header; start it over empty.
        if original_len > 0 {
            std::fs::remove_file(&path)?;
        }
        let mut mmap = create_extent(dir, name, end.extent, validate_extent_capacity(capacity)?)?;
        mmap.truncate(truncated_len(EXTENT_DATA_OFFSET))?;
        seal_extent(&mut mmap)?;
        return Ok(original_len);
    }

    let mut mmap = MmapFile::open(&path)?;
    if read_extent_header(&mmap).is_err() {
        write_extent_header(&mut mmap, &ExtentHeader::new(end.extent, original_len))?;
    }
    let len = mmap.len();
    let cut = (end.offset as usize).clamp(EXTENT_DATA_OFFSET, len);
    let new_len = truncated_len(cut).min(len);
    mmap.range_mut(cut, new_len - cut)?.fill(0);
    mmap.truncate(new_len)?;
    seal_extent(&mut mmap)?;
    Ok((len - new_len) as u64)
}
