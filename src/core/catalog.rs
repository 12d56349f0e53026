//! Stream catalog.
//!
//! The catalog is the per-store registry of streams and their running
//! statistics. It is persisted as JSON next to the extents and rewritten
//! atomically (tmp file + rename), so a reader always sees either the
//! previous or the next complete version.
//!
//! A catalog in state `closed` is the terminal marker of a cleanly
//! finalized store. Anything else means the writer is still running or
//! was abandoned.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::clock::Ticks;
use crate::core::envelope::Envelope;
use crate::core::extent::{catalog_path, BlockPosition};
use crate::core::interval::TimeInterval;
use crate::core::log::{BlockReader, ReadStatus};
use crate::core::{Error, Result};

pub const CATALOG_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Open,
    Closed,
}

/// Identity and running statistics of one stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub id: u32,
    pub name: String,
    /// Opaque tag naming the payload encoding; never interpreted by the store.
    pub type_descriptor: String,
    pub partition_name: String,
    pub opened_time: Ticks,
    #[serde(default)]
    pub closed_time: Option<Ticks>,
    #[serde(default)]
    pub is_closed: bool,
    /// Creation time of the first message.
    pub first_message_time: Option<Ticks>,
    pub last_message_time: Option<Ticks>,
    pub first_originating_time: Option<Ticks>,
    pub last_originating_time: Option<Ticks>,
    pub message_count: u64,
    pub average_message_size: f64,
    /// Mean of `creation_time - originating_time`, in ticks.
    pub average_latency: f64,
    #[serde(default)]
    pub supplemental: Option<String>,
    #[serde(default)]
    pub total_message_bytes: u64,
    #[serde(default)]
    pub total_latency: i64,
}

impl StreamMetadata {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        type_descriptor: impl Into<String>,
        partition_name: impl Into<String>,
        opened_time: Ticks,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            type_descriptor: type_descriptor.into(),
            partition_name: partition_name.into(),
            opened_time,
            closed_time: None,
            is_closed: false,
            first_message_time: None,
            last_message_time: None,
            first_originating_time: None,
            last_originating_time: None,
            message_count: 0,
            average_message_size: 0.0,
            average_latency: 0.0,
            supplemental: None,
            total_message_bytes: 0,
            total_latency: 0,
        }
    }

    /// Folds one committed message into the statistics.
    pub fn observe(&mut self, envelope: &Envelope, payload_len: usize) {
        self.first_message_time.get_or_insert(envelope.creation_time);
        self.first_originating_time.get_or_insert(envelope.originating_time);
        self.last_message_time = Some(
            self.last_message_time
                .map_or(envelope.creation_time, |t| t.max(envelope.creation_time)),
        );
        self.last_originating_time = Some(
            self.last_originating_time
                .map_or(envelope.originating_time, |t| t.max(envelope.originating_time)),
        );

        self.message_count += 1;
        self.total_message_bytes = self.total_message_bytes.saturating_add(payload_len as u64);
        self.total_latency = self.total_latency.saturating_add(envelope.latency());

        // Incremental mean; totals are kept alongside so reloads stay exact.
        let n = self.message_count as f64;
        self.average_message_size += (payload_len as f64 - self.average_message_size) / n;
        self.average_latency += (envelope.latency() as f64 - self.average_latency) / n;
    }

    /// Clears everything derived from messages, keeping identity.
    pub fn reset_statistics(&mut self) {
        self.first_message_time = None;
        self.last_message_time = None;
        self.first_originating_time = None;
        self.last_originating_time = None;
        self.message_count = 0;
        self.average_message_size = 0.0;
        self.average_latency = 0.0;
        self.total_message_bytes = 0;
        self.total_latency = 0;
    }

    pub fn close(&mut self, time: Ticks) {
        if !self.is_closed {
            self.is_closed = true;
            self.closed_time = Some(time);
        }
    }

    /// `[first, last]` originating time of the messages seen so far.
    pub fn originating_interval(&self) -> Option<TimeInterval> {
        match (self.first_originating_time, self.last_originating_time) {
            (Some(first), Some(last)) => Some(TimeInterval::closed(first, last)),
            _ => None,
        }
    }

    /// `[first, last]` creation time of the messages seen so far.
    pub fn message_interval(&self) -> Option<TimeInterval> {
        match (self.first_message_time, self.last_message_time) {
            (Some(first), Some(last)) => Some(TimeInterval::closed(first, last)),
            _ => None,
        }
    }

    /// Extends this entry with a newer snapshot of the same stream.
    ///
    /// Statistics only ever grow: a snapshot with fewer messages is ignored.
    fn merge_from(&mut self, newer: &StreamMetadata) {
        if newer.message_count >= self.message_count {
            self.first_message_time = newer.first_message_time.or(self.first_message_time);
            self.first_originating_time = newer.first_originating_time.or(self.first_originating_time);
            self.last_message_time = max_option(self.last_message_time, newer.last_message_time);
            self.last_originating_time =
                max_option(self.last_originating_time, newer.last_originating_time);
            self.message_count = newer.message_count;
            self.average_message_size = newer.average_message_size;
            self.average_latency = newer.average_latency;
            self.total_message_bytes = newer.total_message_bytes;
            self.total_latency = newer.total_latency;
        }
        if newer.is_closed {
            self.is_closed = true;
            self.closed_time = newer.closed_time.or(self.closed_time);
        }
        if newer.supplemental.is_some() {
            self.supplemental = newer.supplemental.clone();
        }
    }
}

fn max_option(a: Option<Ticks>, b: Option<Ticks>) -> Option<Ticks> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Store identity plus all stream entries, in registration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub version: u32,
    pub name: String,
    pub path: PathBuf,
    pub extent_capacity: u64,
    pub state: StoreState,
    pub created_time: Ticks,
    #[serde(default)]
    pub closed_time: Option<Ticks>,
    pub streams: Vec<StreamMetadata>,
}

impl Catalog {
    pub fn new(name: &str, path: &Path, extent_capacity: u64, created_time: Ticks) -> Self {
        Self {
            version: CATALOG_VERSION,
            name: name.to_string(),
            path: path.to_path_buf(),
            extent_capacity,
            state: StoreState::Open,
            created_time,
            closed_time: None,
            streams: Vec::new(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state == StoreState::Closed
    }

    /// Writes the terminal marker.
    pub fn finalize(&mut self, closed_time: Ticks) {
        self.state = StoreState::Closed;
        self.closed_time = Some(closed_time);
    }

    /// Registers a stream with the next free id.
    ///
    /// # Errors
    ///
    /// `Error::StreamExists` if `name` is already registered.
    pub fn add_stream(
        &mut self,
        name: &str,
        type_descriptor: &str,
        partition_name: &str,
        opened_time: Ticks,
    ) -> Result<&StreamMetadata> {
        if self.stream(name).is_some() {
            return Err(Error::StreamExists(name.to_string()));
        }
        let id = self.next_stream_id();
        self.streams.push(StreamMetadata::new(
            id,
            name,
            type_descriptor,
            partition_name,
            opened_time,
        ));
        Ok(&self.streams[self.streams.len() - 1])
    }

    /// Adds an entry keeping its id, as crop and repair do.
    pub fn insert_stream(&mut self, stream: StreamMetadata) -> Result<()> {
        if self.stream(&stream.name).is_some() {
            return Err(Error::StreamExists(stream.name));
        }
        if self.stream_by_id(stream.id).is_some() {
            return Err(Error::CorruptMetadata("duplicate stream id"));
        }
        self.streams.push(stream);
        Ok(())
    }

    pub fn next_stream_id(&self) -> u32 {
        self.streams.iter().map(|s| s.id + 1).max().unwrap_or(0)
    }

    pub fn streams(&self) -> &[StreamMetadata] {
        &self.streams
    }

    pub fn stream(&self, name: &str) -> Option<&StreamMetadata> {
        self.streams.iter().find(|s| s.name == name)
    }

    pub fn stream_by_id(&self, id: u32) -> Option<&StreamMetadata> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn stream_by_id_mut(&mut self, id: u32) -> Option<&mut StreamMetadata> {
        self.streams.iter_mut().find(|s| s.id == id)
    }

    pub fn observe(&mut self, envelope: &Envelope, payload_len: usize) -> Result<()> {
        let stream = self
            .stream_by_id_mut(envelope.stream_id)
            .ok_or(Error::UnknownStreamId(envelope.stream_id))?;
        stream.observe(envelope, payload_len);
        Ok(())
    }

    pub fn reset_statistics(&mut self) {
        for stream in &mut self.streams {
            stream.reset_statistics();
        }
    }

    /// Coverage of the originating-time ranges of every stream.
    pub fn active_time_interval(&self) -> Option<TimeInterval> {
        let intervals: Vec<TimeInterval> = self
            .streams
            .iter()
            .filter_map(StreamMetadata::originating_interval)
            .collect();
        TimeInterval::coverage(&intervals)
    }

    /// Coverage of the named streams only.
    pub fn interval_for<S: AsRef<str>>(&self, names: &[S]) -> Option<TimeInterval> {
        let intervals: Vec<TimeInterval> = names
            .iter()
            .filter_map(|name| self.stream(name.as_ref()))
            .filter_map(StreamMetadata::originating_interval)
            .collect();
        TimeInterval::coverage(&intervals)
    }

    /// Folds a newer snapshot of the same store into this one: new streams
    /// are appended, known ones extended, nothing shrinks.
    pub fn merge(&mut self, newer: &Catalog) {
        for stream in &newer.streams {
            match self.stream_by_id_mut(stream.id) {
                Some(existing) => existing.merge_from(stream),
                None => self.streams.push(stream.clone()),
            }
        }
        if newer.is_finalized() {
            self.state = StoreState::Closed;
            self.closed_time = newer.closed_time;
        }
    }

    /// Checks version and identity invariants.
    pub fn validate(&self) -> Result<()> {
        if self.version != CATALOG_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for stream in &self.streams {
            if !names.insert(stream.name.as_str()) {
                return Err(Error::CorruptMetadata("duplicate stream name"));
            }
            if !ids.insert(stream.id) {
                return Err(Error::CorruptMetadata("duplicate stream id"));
            }
        }
        Ok(())
    }

    /// Atomically replaces the catalog file at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("catalog.tmp");
        let data = serde_json::to_vec_pretty(self)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads the catalog at `path`; `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let catalog: Catalog = serde_json::from_slice(&data)?;
        catalog.validate()?;
        Ok(Some(catalog))
    }
}

/// Outcome of [`rebuild_statistics`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanSummary {
    pub messages: u64,
    /// Just past the last valid block.
    pub end: BlockPosition,
    /// Whether the scan stopped at a block that was present but unusable.
    pub stopped_early: bool,
}

/// Re-derives every stream's statistics from the committed blocks.
///
/// Reads until the log reports no further committed block and stops at the
/// first block that is not a valid message. Messages of ids missing from
/// the catalog get placeholder entries.
pub fn rebuild_statistics(reader: &mut dyn BlockReader, catalog: &mut Catalog) -> Result<ScanSummary> {
    catalog.reset_statistics();
    let mut messages = 0u64;
    loop {
        let position = match reader.move_next()? {
            ReadStatus::Ready(position) => position,
            ReadStatus::Pending | ReadStatus::End => {
                return Ok(ScanSummary {
                    messages,
                    end: reader.position(),
                    stopped_early: false,
                });
            }
        };
        let block = reader.read_block();
        let Ok((envelope, payload)) = Envelope::split_block(block) else {
            log::warn!(
                "{}: block at {:?} is not a message; ignoring the rest of the log",
                catalog.name,
                position
            );
            return Ok(ScanSummary {
                messages,
                end: position,
                stopped_early: true,
            });
        };
        if catalog.stream_by_id(envelope.stream_id).is_none() {
            log::warn!(
                "{}: stream id {} missing from catalog; adding placeholder",
                catalog.name,
                envelope.stream_id
            );
            let placeholder = StreamMetadata::new(
                envelope.stream_id,
                format!("stream_{}", envelope.stream_id),
                "",
                catalog.name.clone(),
                envelope.originating_time,
            );
            catalog.insert_stream(placeholder)?;
        }
        catalog.observe(&envelope, payload.len())?;
        messages += 1;
    }
}

/// Where a session persists its catalog.
pub trait CatalogStore: Send {
    fn load_catalog(&self) -> Result<Option<Catalog>>;
    fn save_catalog(&mut self, catalog: &Catalog) -> Result<()>;
}

/// Catalog kept in `{dir}/{store}.catalog`.
#[derive(Clone, Debug)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(dir: &Path, store: &str) -> Self {
        Self {
            path: catalog_path(dir, store),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogStore for FileCatalog {
    fn load_catalog(&self) -> Result<Option<Catalog>> {
        Catalog::load(&self.path)
    }

    fn save_catalog(&mut self, catalog: &Catalog) -> Result<()> {
        catalog.save(&self.path)?;
        log::debug!(
            "{}: catalog saved ({} streams, {:?})",
            catalog.name,
            catalog.streams.len(),
            catalog.state
        );
        Ok(())
    }
}
