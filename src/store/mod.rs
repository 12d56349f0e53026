//! Store sessions: one writer, any number of readers.
//!
//! # Layout
//!
//! Without auto-increment a store lives directly in the given directory.
//! With it, each writer creates `{path}/{name}.{NNNN}/` using the next
//! unused number, and readers opening `(name, path)` pick the highest
//! numbered instance.

mod reader;
mod replay;
mod scope;
mod writer;

use std::path::{Path, PathBuf};

use crate::core::extent::{catalog_path, extent_path};
use crate::core::{Error, Result};

pub use reader::{MessageCursor, ReadMode, ReaderConfig, StoreReader, StreamCursor};
pub use replay::{Pacer, Replay, ReplayDescriptor, ReplayPacing, ReplayStats};
pub use scope::ReplayScope;
pub use writer::{StoreWriter, WriterConfig};

/// Whether `dir` holds files of store `name`.
pub fn store_exists_in(dir: &Path, name: &str) -> bool {
    catalog_path(dir, name).exists() || extent_path(dir, name, 0).exists()
}

/// Numbered instance directories `{name}.{NNNN}` under `path`, ascending.
pub fn store_instances(path: &Path, name: &str) -> Result<Vec<(u32, PathBuf)>> {
    let mut instances = Vec::new();
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(instances),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(suffix) = file_name.strip_prefix(name).and_then(|s| s.strip_prefix('.')) else {
            continue;
        };
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(number) = suffix.parse::<u32>() {
            instances.push((number, entry.path()));
        }
    }
    instances.sort_unstable_by_key(|(number, _)| *number);
    Ok(instances)
}

pub(crate) fn instance_dir(path: &Path, name: &str, number: u32) -> PathBuf {
    path.join(format!("{name}.{number:04}"))
}

/// Directory a reader should open for `(name, path)`.
///
/// # Errors
///
/// `Error::StoreNotFound` if neither `path` nor any numbered instance
/// under it holds the store.
pub fn resolve_store_dir(name: &str, path: &Path) -> Result<PathBuf> {
    if store_exists_in(path, name) {
        return Ok(path.to_path_buf());
    }
    store_instances(path, name)?
        .into_iter()
        .rev()
        .map(|(_, dir)| dir)
        .find(|dir| store_exists_in(dir, name))
        .ok_or_else(|| Error::StoreNotFound(path.to_path_buf()))
}
