//! Storage primitives: extents, blocks, envelopes, the time index and the
//! stream catalog. Nothing in here knows about sessions.

pub mod catalog;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod extent;
pub mod extent_cursor;
pub mod extent_writer;
pub mod index;
pub mod interval;
pub mod log;
pub mod memory;
mod reclaim;
pub mod wait;

pub use catalog::{
    rebuild_statistics, Catalog, CatalogStore, FileCatalog, ScanSummary, StoreState, StreamMetadata,
};
pub use clock::{Clock, QuantaClock, SystemClock, Ticks, TICKS_PER_MILLISECOND, TICKS_PER_SECOND};
pub use envelope::{BlockHeader, Envelope, ENVELOPE_SIZE};
pub use error::{Error, Result};
pub use extent::{BlockPosition, DEFAULT_EXTENT_CAPACITY};
pub use extent_cursor::ExtentCursor;
pub use extent_writer::{ExtentOptions, ExtentWriter};
pub use index::{locate, locate_within_epsilon, IndexEntry, SearchMode, StreamIndex};
pub use interval::{RelativeTimeInterval, TimeInterval};
pub use log::{BlockReader, BlockToken, BlockWriter, ReadStatus};
pub use memory::{MemoryReader, MemoryStore, MemoryWriter};
pub use wait::WaitStrategy;
