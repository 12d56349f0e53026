//! Persistent store for multimodal, time-stamped message streams.
//!
//! A store is a directory holding a chain of fixed-capacity extent files
//! and a JSON stream catalog. One writer appends messages from many
//! streams into a single log; any number of readers may open the same
//! store concurrently, seek by time, replay in recorded order, or tail the
//! writer live. Crop, copy and repair produce new consistent stores.
//!
//! ```no_run
//! use streamstore::{StoreReader, StoreWriter, WriterConfig};
//!
//! let mut writer = StoreWriter::create("session", "./data", WriterConfig::default())?;
//! let seq = writer.open_stream("seq", "i32")?.id;
//! for i in 1..=100i32 {
//!     writer.write_next(seq, &i.to_le_bytes(), i64::from(i) * 10_000)?;
//! }
//! writer.close()?;
//!
//! let mut reader = StoreReader::open("session", "./data")?;
//! let sum: i32 = reader
//!     .open_stream("seq", |bytes| Ok(i32::from_le_bytes(bytes.try_into().unwrap_or_default())))?
//!     .map(|item| item.map(|(value, _)| value))
//!     .sum::<streamstore::Result<i32>>()?;
//! assert_eq!(sum, 5050);
//! # Ok::<(), streamstore::Error>(())
//! ```

pub mod core;
#[cfg(feature = "json")]
pub mod json;
pub mod maintenance;
pub mod store;

pub use crate::core::{
    Catalog, Envelope, Error, Result, SearchMode, StreamMetadata, Ticks, TimeInterval,
};
pub use crate::maintenance::{copy, crop, repair, RepairReport};
pub use crate::store::{
    ReadMode, ReaderConfig, Replay, ReplayDescriptor, ReplayPacing, ReplayScope, StoreReader,
    StoreWriter, StreamCursor, WriterConfig,
};
