use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::core::catalog::{rebuild_statistics, Catalog, CatalogStore, FileCatalog, StreamMetadata};
use crate::core::clock::Ticks;
use crate::core::envelope::Envelope;
use crate::core::extent::{extent_path, BlockPosition};
use crate::core::extent_cursor::ExtentCursor;
use crate::core::index::{IndexEntry, SearchMode, StreamIndex};
use crate::core::interval::{RelativeTimeInterval, TimeInterval};
use crate::core::log::{BlockReader, ReadStatus};
use crate::core::memory::MemoryStore;
use crate::core::wait::WaitStrategy;
use crate::core::{Error, Result};
use crate::store::replay::{Replay, ReplayDescriptor};
use crate::store::resolve_store_dir;

/// What a reader does when it catches up with the writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// Stop at the last block committed so far.
    #[default]
    Bounded,
    /// Wait for the writer to commit more, until the store is finalized.
    Follow,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReaderConfig {
    pub mode: ReadMode,
    pub wait: WaitStrategy,
    /// In follow mode, give up after this long without a new block.
    pub follow_timeout: Option<Duration>,
}

impl ReaderConfig {
    pub fn follow() -> Self {
        Self {
            mode: ReadMode::Follow,
            ..Self::default()
        }
    }

    pub fn with_wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_follow_timeout(mut self, timeout: Duration) -> Self {
        self.follow_timeout = Some(timeout);
        self
    }
}

#[derive(Clone)]
enum LogSource {
    Extents { dir: PathBuf, name: String },
    Memory(MemoryStore),
}

impl LogSource {
    fn open_blocks(&self) -> Box<dyn BlockReader> {
        match self {
            LogSource::Extents { dir, name } => Box::new(ExtentCursor::open(dir, name)),
            LogSource::Memory(store) => Box::new(store.reader()),
        }
    }

    fn load_catalog(&self) -> Result<Option<Catalog>> {
        match self {
            LogSource::Extents { dir, name } => FileCatalog::new(dir, name).load_catalog(),
            LogSource::Memory(store) => store.load_catalog(),
        }
    }
}

/// Block reader plus the bounded / follow policy.
struct BlockSource {
    blocks: Box<dyn BlockReader>,
    config: ReaderConfig,
}

impl BlockSource {
    /// Position of the next block, or `None` once the read is over.
    fn next_block(&mut self) -> Result<Option<BlockPosition>> {
        match self.blocks.move_next()? {
            ReadStatus::Ready(position) => return Ok(Some(position)),
            ReadStatus::End => return Ok(None),
            ReadStatus::Pending if self.config.mode == ReadMode::Bounded => return Ok(None),
            ReadStatus::Pending => {}
        }

        let deadline = self.config.follow_timeout.map(|timeout| Instant::now() + timeout);
        let mut status = ReadStatus::Pending;
        let blocks = &mut self.blocks;
        let ready = self.config.wait.wait_until(deadline, || {
            status = blocks.move_next()?;
            Ok(status != ReadStatus::Pending)
        })?;
        match status {
            ReadStatus::Ready(position) if ready => Ok(Some(position)),
            _ => Ok(None),
        }
    }

    fn read_block(&self) -> &[u8] {
        self.blocks.read_block()
    }
}

/// Forward cursor over the messages of a set of streams, in commit order,
/// restricted to a replay interval.
pub struct MessageCursor {
    source: BlockSource,
    descriptor: ReplayDescriptor,
    streams: HashSet<u32>,
    finished: HashSet<u32>,
    done: bool,
}

impl MessageCursor {
    /// Next admitted message. The payload borrows the cursor.
    pub fn next_message(&mut self) -> Result<Option<(Envelope, &[u8])>> {
        while !self.done {
            let Some(position) = self.source.next_block()? else {
                self.done = true;
                break;
            };
            let (envelope, _) = Envelope::split_block(self.source.read_block()).map_err(|_| {
                self.done = true;
                Error::Decode(format!("block at {position:?} is not a message"))
            })?;
            if !self.streams.contains(&envelope.stream_id) {
                continue;
            }
            let time = self.descriptor.time_of(&envelope);
            if self.descriptor.interval.is_past_end(time) {
                // Per-stream times never decrease, so the stream is done.
                self.finished.insert(envelope.stream_id);
                if self.finished.len() == self.streams.len() {
                    self.done = true;
                }
                continue;
            }
            if !self.descriptor.interval.contains(time) {
                continue;
            }
            let (_, payload) = Envelope::split_block(self.source.read_block())?;
            return Ok(Some((envelope, payload)));
        }
        Ok(None)
    }
}

/// Decoded messages of one stream, in commit order. One-shot.
pub struct StreamCursor<T, F>
where
    F: FnMut(&[u8]) -> Result<T>,
{
    messages: MessageCursor,
    decoder: F,
}

impl<T, F> Iterator for StreamCursor<T, F>
where
    F: FnMut(&[u8]) -> Result<T>,
{
    type Item = Result<(T, Envelope)>;

    fn next(&mut self) -> Option<Self::Item> {
        let decoder = &mut self.decoder;
        match self.messages.next_message() {
            Ok(Some((envelope, payload))) => Some(decoder(payload).map(|value| (value, envelope))),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// Read session over one store.
///
/// The catalog snapshot, and with it the active interval, is fixed at open
/// and only changes on [`refresh`](Self::refresh). For a store that is not
/// finalized, statistics are derived from the blocks committed at open, so
/// the metadata describes exactly what the session can read.
pub struct StoreReader {
    name: String,
    source: LogSource,
    config: ReaderConfig,
    catalog: Catalog,
    active_interval: Option<TimeInterval>,
    indexes: Option<HashMap<u32, StreamIndex>>,
}

impl StoreReader {
    pub fn open(name: &str, path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(name, path, ReaderConfig::default())
    }

    /// # Errors
    ///
    /// `Error::StoreNotFound` if no instance of the store exists at `path`.
    pub fn open_with(name: &str, path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let dir = resolve_store_dir(name, path.as_ref())?;
        let source = LogSource::Extents {
            dir,
            name: name.to_string(),
        };
        Self::from_source(name, source, config)
    }

    pub fn open_in_memory(name: &str, store: &MemoryStore, config: ReaderConfig) -> Result<Self> {
        Self::from_source(name, LogSource::Memory(store.clone()), config)
    }

    fn from_source(name: &str, source: LogSource, config: ReaderConfig) -> Result<Self> {
        let catalog = load_snapshot(name, &source)?;
        log::info!(
            "{}: opened for reading ({} streams, {})",
            name,
            catalog.streams().len(),
            if catalog.is_finalized() { "finalized" } else { "unfinalized" }
        );
        Ok(Self {
            name: name.to_string(),
            source,
            config,
            active_interval: catalog.active_time_interval(),
            catalog,
            indexes: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store directory; `None` for in-memory stores.
    pub fn dir(&self) -> Option<&Path> {
        match &self.source {
            LogSource::Extents { dir, .. } => Some(dir),
            LogSource::Memory(_) => None,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Whether the writer closed the store cleanly (as of the last refresh).
    pub fn is_finalized(&self) -> bool {
        self.catalog.is_finalized()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn streams(&self) -> &[StreamMetadata] {
        self.catalog.streams()
    }

    pub fn metadata(&self, stream: &str) -> Option<&StreamMetadata> {
        self.catalog.stream(stream)
    }

    /// Coverage of every stream's originating times.
    pub fn active_time_interval(&self) -> Option<TimeInterval> {
        self.active_interval
    }

    /// Coverage of the named streams only.
    pub fn requested_interval<S: AsRef<str>>(&self, streams: &[S]) -> Option<TimeInterval> {
        self.catalog.interval_for(streams)
    }

    /// Reloads the catalog and merges it into the snapshot. Streams may
    /// appear and ranges may grow; nothing is removed.
    pub fn refresh(&mut self) -> Result<()> {
        let latest = load_snapshot(&self.name, &self.source)?;
        self.catalog.merge(&latest);
        self.active_interval = self.catalog.active_time_interval();
        self.indexes = None;
        Ok(())
    }

    /// Decoded messages of `stream` over the whole store.
    pub fn open_stream<T, F>(&mut self, stream: &str, decoder: F) -> Result<StreamCursor<T, F>>
    where
        F: FnMut(&[u8]) -> Result<T>,
    {
        self.open_stream_with(stream, &ReplayDescriptor::all(), decoder)
    }

    pub fn open_stream_with<T, F>(
        &mut self,
        stream: &str,
        descriptor: &ReplayDescriptor,
        decoder: F,
    ) -> Result<StreamCursor<T, F>>
    where
        F: FnMut(&[u8]) -> Result<T>,
    {
        let id = self
            .metadata(stream)
            .ok_or_else(|| Error::StreamNotFound(stream.to_string()))?
            .id;
        let messages = self.messages_for(&[id], descriptor)?;
        Ok(StreamCursor { messages, decoder })
    }

    /// Raw messages of the named streams in global commit order.
    pub fn messages<S: AsRef<str>>(
        &mut self,
        streams: &[S],
        descriptor: &ReplayDescriptor,
    ) -> Result<MessageCursor> {
        let ids = streams
            .iter()
            .map(|name| {
                self.metadata(name.as_ref())
                    .map(|s| s.id)
                    .ok_or_else(|| Error::StreamNotFound(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<u32>>>()?;
        self.messages_for(&ids, descriptor)
    }

    pub(crate) fn messages_for(&mut self, ids: &[u32], descriptor: &ReplayDescriptor) -> Result<MessageCursor> {
        let mut blocks = self.source.open_blocks();
        if let Some(start) = self.start_position(ids, descriptor)? {
            blocks.seek(start)?;
        }
        Ok(MessageCursor {
            source: BlockSource {
                blocks,
                config: self.config,
            },
            descriptor: *descriptor,
            streams: ids.iter().copied().collect(),
            finished: HashSet::new(),
            done: false,
        })
    }

    /// Begins a replay of this store; see [`Replay`].
    pub fn replay(&mut self, descriptor: ReplayDescriptor) -> Replay<'_> {
        Replay::new(self, descriptor)
    }

    /// Message of `stream` matching `time` under `mode`.
    pub fn seek(&mut self, stream: &str, time: Ticks, mode: SearchMode) -> Result<Option<IndexEntry>> {
        let index = self.stream_index(stream)?;
        Ok(index.and_then(|index| index.locate(time, mode)).copied())
    }

    /// Message of `stream` nearest to `time` that lies within `time + epsilon`.
    pub fn seek_within(
        &mut self,
        stream: &str,
        time: Ticks,
        epsilon: RelativeTimeInterval,
    ) -> Result<Option<IndexEntry>> {
        let index = self.stream_index(stream)?;
        Ok(index.and_then(|index| index.locate_within(time, epsilon)).copied())
    }

    /// Reads the message at `position`, as returned by a seek.
    pub fn read_at(&self, position: BlockPosition) -> Result<Option<(Envelope, Vec<u8>)>> {
        let mut blocks = self.source.open_blocks();
        blocks.seek(position)?;
        match blocks.move_next()? {
            ReadStatus::Ready(found) if found == position => {
                let (envelope, payload) = Envelope::split_block(blocks.read_block())?;
                Ok(Some((envelope, payload.to_vec())))
            }
            _ => Ok(None),
        }
    }

    fn stream_index(&mut self, stream: &str) -> Result<Option<&StreamIndex>> {
        let id = self
            .metadata(stream)
            .ok_or_else(|| Error::StreamNotFound(stream.to_string()))?
            .id;
        Ok(self.indexes()?.get(&id))
    }

    /// Per-stream time index, built on first use from one pass over the log.
    fn indexes(&mut self) -> Result<&HashMap<u32, StreamIndex>> {
        if self.indexes.is_none() {
            let mut indexes: HashMap<u32, StreamIndex> = HashMap::new();
            let mut blocks = self.source.open_blocks();
            while let ReadStatus::Ready(position) = blocks.move_next()? {
                let Ok(envelope) = Envelope::from_bytes(blocks.read_block()) else {
                    break;
                };
                indexes
                    .entry(envelope.stream_id)
                    .or_default()
                    .push(envelope, position);
            }
            log::debug!("{}: indexed {} streams", self.name, indexes.len());
            self.indexes = Some(indexes);
        }
        Ok(self.indexes.get_or_insert_with(HashMap::new))
    }

    /// Earliest block any of `ids` could contribute from, when the replay
    /// interval has a finite start on the originating-time axis.
    fn start_position(&mut self, ids: &[u32], descriptor: &ReplayDescriptor) -> Result<Option<BlockPosition>> {
        let start = descriptor.interval.start;
        if !descriptor.use_originating_time || start == Ticks::MIN {
            return Ok(None);
        }
        let indexes = self.indexes()?;
        let positions: Vec<BlockPosition> = ids
            .iter()
            .filter_map(|id| indexes.get(id))
            .filter_map(|index| index.locate(start, SearchMode::Next))
            .map(|entry| entry.position)
            .collect();
        Ok(positions.into_iter().min())
    }
}

fn load_snapshot(name: &str, source: &LogSource) -> Result<Catalog> {
    let mut catalog = match source.load_catalog()? {
        Some(catalog) if catalog.is_finalized() => return Ok(catalog),
        Some(catalog) => catalog,
        None => match source {
            LogSource::Extents { dir, .. } if extent_path(dir, name, 0).exists() => {
                Catalog::new(name, dir, 0, 0)
            }
            LogSource::Extents { dir, .. } => return Err(Error::StoreNotFound(dir.clone())),
            LogSource::Memory(_) => Catalog::new(name, Path::new(""), 0, 0),
        },
    };
    let summary = rebuild_statistics(source.open_blocks().as_mut(), &mut catalog)?;
    log::debug!(
        "{}: unfinalized store, derived statistics from {} messages",
        name,
        summary.messages
    );
    Ok(catalog)
}
