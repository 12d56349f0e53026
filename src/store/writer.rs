use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::catalog::{Catalog, CatalogStore, FileCatalog, StreamMetadata};
use crate::core::clock::{Clock, SystemClock, Ticks};
use crate::core::envelope::{Envelope, ENVELOPE_SIZE};
use crate::core::extent::{BlockPosition, DEFAULT_EXTENT_CAPACITY};
use crate::core::extent_writer::{ExtentOptions, ExtentWriter};
use crate::core::log::BlockWriter;
use crate::core::memory::MemoryStore;
use crate::core::{Error, Result};
use crate::store::{instance_dir, store_exists_in, store_instances};

const CATALOG_FLUSH_INTERVAL_MS: u64 = 1_000;
const AUTO_INCREMENT_ATTEMPTS: u32 = 16;

#[derive(Clone, Copy, Debug)]
pub struct WriterConfig {
    pub extent_capacity: usize,
    /// Create `{path}/{name}.{NNNN}` instead of failing on collision.
    pub allow_auto_increment: bool,
    /// Upper bound on catalog staleness while the writer runs.
    pub catalog_flush_interval: Duration,
    pub sync_on_rollover: bool,
    pub prefault: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            extent_capacity: DEFAULT_EXTENT_CAPACITY,
            allow_auto_increment: false,
            catalog_flush_interval: Duration::from_millis(CATALOG_FLUSH_INTERVAL_MS),
            sync_on_rollover: true,
            prefault: false,
        }
    }
}

impl WriterConfig {
    pub fn with_extent_capacity(mut self, capacity: usize) -> Self {
        self.extent_capacity = capacity;
        self
    }

    pub fn with_auto_increment(mut self, allow: bool) -> Self {
        self.allow_auto_increment = allow;
        self
    }

    pub fn with_catalog_flush_interval(mut self, interval: Duration) -> Self {
        self.catalog_flush_interval = interval;
        self
    }

    pub fn with_sync_on_rollover(mut self, sync: bool) -> Self {
        self.sync_on_rollover = sync;
        self
    }

    fn extent_options(&self) -> ExtentOptions {
        ExtentOptions {
            sync_on_rollover: self.sync_on_rollover,
            prefault: self.prefault,
        }
    }
}

/// The single writer of a store.
///
/// Every message goes through one reserve / write / commit on the log and
/// is then folded into its stream's catalog entry. The catalog is persisted
/// whenever the stream set changes, at most `catalog_flush_interval` apart
/// while writing, and at close, where it also receives the terminal marker.
///
/// Dropping an unclosed writer closes it.
pub struct StoreWriter {
    name: String,
    dir: Option<PathBuf>,
    log: Box<dyn BlockWriter>,
    catalog_store: Box<dyn CatalogStore>,
    catalog: Catalog,
    clock: Arc<dyn Clock>,
    next_sequence: HashMap<u32, u32>,
    flush_interval: Duration,
    last_catalog_flush: Instant,
    catalog_dirty: bool,
    closed: bool,
}

impl StoreWriter {
    /// Creates store `name` under `path`.
    ///
    /// # Errors
    ///
    /// `Error::Collision` when `path` already holds the store and
    /// auto-increment is off. Nothing is created in that case.
    pub fn create(name: &str, path: impl AsRef<Path>, config: WriterConfig) -> Result<Self> {
        let path = path.as_ref();
        let (dir, log) = if config.allow_auto_increment {
            create_instance(name, path, &config)?
        } else {
            if store_exists_in(path, name) {
                return Err(Error::Collision(path.to_path_buf()));
            }
            let log = ExtentWriter::create(path, name, config.extent_capacity, config.extent_options())?;
            (path.to_path_buf(), log)
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let catalog = Catalog::new(name, &dir, log.capacity() as u64, clock.now());
        let mut catalog_store = FileCatalog::new(&dir, name);
        catalog_store.save_catalog(&catalog)?;
        log::info!("{}: created store at {}", name, dir.display());

        Ok(Self::from_parts(
            name,
            Some(dir),
            Box::new(log),
            Box::new(catalog_store),
            catalog,
            clock,
            config.catalog_flush_interval,
        ))
    }

    /// Creates a transient store backed by `store`.
    pub fn create_in_memory(name: &str, store: &MemoryStore) -> Result<Self> {
        if store.load_catalog()?.is_some() {
            return Err(Error::Collision(PathBuf::from(name)));
        }
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let catalog = Catalog::new(name, Path::new(""), 0, clock.now());
        let mut catalog_store = store.clone();
        catalog_store.save_catalog(&catalog)?;
        Ok(Self::from_parts(
            name,
            None,
            Box::new(store.writer()),
            Box::new(catalog_store),
            catalog,
            clock,
            Duration::ZERO,
        ))
    }

    fn from_parts(
        name: &str,
        dir: Option<PathBuf>,
        log: Box<dyn BlockWriter>,
        catalog_store: Box<dyn CatalogStore>,
        catalog: Catalog,
        clock: Arc<dyn Clock>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            dir,
            log,
            catalog_store,
            catalog,
            clock,
            next_sequence: HashMap::new(),
            flush_interval,
            last_catalog_flush: Instant::now(),
            catalog_dirty: false,
            closed: false,
        }
    }

    /// Replaces the clock used to stamp creation times.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the store files; `None` for in-memory stores.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn stream(&self, name: &str) -> Option<&StreamMetadata> {
        self.catalog.stream(name)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn now(&self) -> Ticks {
        self.clock.now()
    }

    /// Largest payload a single message can carry.
    pub fn max_payload_len(&self) -> usize {
        self.log.max_block_len().saturating_sub(ENVELOPE_SIZE)
    }

    /// Registers a stream and persists the catalog.
    ///
    /// # Errors
    ///
    /// `Error::StreamExists` if `name` is already registered.
    pub fn open_stream(&mut self, name: &str, type_descriptor: &str) -> Result<StreamMetadata> {
        let partition = self.name.clone();
        self.open_stream_in(name, type_descriptor, &partition)
    }

    pub fn open_stream_in(
        &mut self,
        name: &str,
        type_descriptor: &str,
        partition_name: &str,
    ) -> Result<StreamMetadata> {
        self.ensure_open()?;
        let now = self.clock.now();
        let stream = self
            .catalog
            .add_stream(name, type_descriptor, partition_name, now)?
            .clone();
        self.persist_catalog()?;
        log::debug!("{}: opened stream {} as id {}", self.name, name, stream.id);
        Ok(stream)
    }

    /// Registers a stream with the identity of `source`, as copy and crop do.
    pub(crate) fn open_stream_like(&mut self, source: &StreamMetadata) -> Result<StreamMetadata> {
        let mut stream = self.open_stream_in(&source.name, &source.type_descriptor, &source.partition_name)?;
        if source.supplemental.is_some() {
            self.set_supplemental(stream.id, source.supplemental.clone())?;
            stream.supplemental = source.supplemental.clone();
        }
        Ok(stream)
    }

    /// Attaches opaque metadata to a stream's catalog entry.
    pub fn set_supplemental(&mut self, stream_id: u32, supplemental: Option<String>) -> Result<()> {
        let stream = self
            .catalog
            .stream_by_id_mut(stream_id)
            .ok_or(Error::UnknownStreamId(stream_id))?;
        stream.supplemental = supplemental;
        self.persist_catalog()
    }

    /// Appends one message. The envelope's stream id is replaced with
    /// `stream_id`; every other field is stored as given.
    pub fn write(&mut self, stream_id: u32, payload: &[u8], envelope: Envelope) -> Result<BlockPosition> {
        self.write_parts(stream_id, &[payload], envelope)
    }

    /// Appends one message whose payload is the concatenation of `parts`,
    /// streamed into a single reservation.
    pub fn write_parts(
        &mut self,
        stream_id: u32,
        parts: &[&[u8]],
        envelope: Envelope,
    ) -> Result<BlockPosition> {
        self.ensure_open()?;
        self.ensure_writable(stream_id)?;
        let envelope = Envelope {
            stream_id,
            ..envelope
        };
        let payload_len: usize = parts.iter().map(|part| part.len()).sum();

        let mut token = self.log.reserve_block(ENVELOPE_SIZE + payload_len)?;
        self.log.write_to_block(&mut token, &envelope.to_bytes())?;
        for part in parts {
            self.log.write_to_block(&mut token, part)?;
        }
        let position = self.log.commit_block(token)?;

        self.catalog.observe(&envelope, payload_len)?;
        self.next_sequence
            .insert(stream_id, envelope.sequence_id.wrapping_add(1));
        self.catalog_dirty = true;
        if self.last_catalog_flush.elapsed() >= self.flush_interval {
            self.persist_catalog()?;
        }
        Ok(position)
    }

    /// Appends with the next sequence id and a creation time from the clock.
    pub fn write_next(
        &mut self,
        stream_id: u32,
        payload: &[u8],
        originating_time: Ticks,
    ) -> Result<Envelope> {
        let sequence_id = self.next_sequence.get(&stream_id).copied().unwrap_or(0);
        let envelope = Envelope::new(stream_id, sequence_id, originating_time, self.clock.now());
        self.write(stream_id, payload, envelope)?;
        Ok(envelope)
    }

    /// Marks a stream finished; later writes to it fail.
    pub fn close_stream(&mut self, stream_id: u32, time: Ticks) -> Result<()> {
        self.ensure_open()?;
        let stream = self
            .catalog
            .stream_by_id_mut(stream_id)
            .ok_or(Error::UnknownStreamId(stream_id))?;
        stream.close(time);
        self.persist_catalog()
    }

    /// Pushes written bytes to the OS and persists the catalog.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.log.flush()?;
        self.persist_catalog()
    }

    /// Finalizes the store: truncates the active extent, then writes the
    /// catalog with the terminal marker. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.log.close()?;
        let now = self.clock.now();
        for stream in &mut self.catalog.streams {
            stream.close(now);
        }
        self.catalog.finalize(now);
        self.catalog_store.save_catalog(&self.catalog)?;
        let messages: u64 = self.catalog.streams().iter().map(|s| s.message_count).sum();
        log::info!(
            "{}: closed ({} streams, {} messages)",
            self.name,
            self.catalog.streams().len(),
            messages
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::WriterClosed)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self, stream_id: u32) -> Result<()> {
        match self.catalog.stream_by_id(stream_id) {
            None => Err(Error::UnknownStreamId(stream_id)),
            Some(stream) if stream.is_closed => Err(Error::StreamClosed(stream_id)),
            Some(_) => Ok(()),
        }
    }

    fn persist_catalog(&mut self) -> Result<()> {
        self.catalog_store.save_catalog(&self.catalog)?;
        self.last_catalog_flush = Instant::now();
        self.catalog_dirty = false;
        Ok(())
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.catalog_dirty {
            log::debug!("{}: closing on drop with unsaved statistics", self.name);
        }
        if let Err(err) = self.close() {
            log::warn!("{}: close on drop failed: {}", self.name, err);
        }
    }
}

/// Creates the next numbered instance directory and its first extent.
fn create_instance(name: &str, path: &Path, config: &WriterConfig) -> Result<(PathBuf, ExtentWriter)> {
    let mut number = store_instances(path, name)?
        .last()
        .map_or(0, |(number, _)| number + 1);
    for _ in 0..AUTO_INCREMENT_ATTEMPTS {
        let dir = instance_dir(path, name, number);
        if !store_exists_in(&dir, name) {
            match ExtentWriter::create(&dir, name, config.extent_capacity, config.extent_options()) {
                Ok(log) => return Ok((dir, log)),
                Err(Error::Collision(_)) => {}
                Err(err) => return Err(err),
            }
        }
        // Lost a race with another writer picking the same number.
        number += 1;
    }
    Err(Error::Collision(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extent::{catalog_path, extent_path};
    use tempfile::TempDir;

    fn small() -> WriterConfig {
        WriterConfig::default().with_extent_capacity(64 * 1024)
    }

    #[test]
    fn test_create_and_close() {
        let dir = TempDir::new().unwrap();
        let mut writer = StoreWriter::create("s", dir.path(), small()).unwrap();
        let stream = writer.open_stream("seq", "i32").unwrap();
        assert_eq!(stream.id, 0);
        writer.write_next(stream.id, &1i32.to_le_bytes(), 10).unwrap();
        writer.write_next(stream.id, &2i32.to_le_bytes(), 20).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();

        let catalog = Catalog::load(&catalog_path(dir.path(), "s")).unwrap().unwrap();
        assert!(catalog.is_finalized());
        let seq = catalog.stream("seq").unwrap();
        assert_eq!(seq.message_count, 2);
        assert_eq!(seq.last_originating_time, Some(20));
        assert!(seq.is_closed);
        assert!(matches!(writer.write_next(0, b"", 30), Err(Error::WriterClosed)));
    }

    #[test]
    fn test_collision_without_auto_increment() {
        let dir = TempDir::new().unwrap();
        let _first = StoreWriter::create("s", dir.path(), small()).unwrap();
        let err = StoreWriter::create("s", dir.path(), small()).err().unwrap();
        assert!(matches!(err, Error::Collision(_)));
    }

    #[test]
    fn test_auto_increment_picks_next_number() {
        let dir = TempDir::new().unwrap();
        let config = small().with_auto_increment(true);
        let mut first = StoreWriter::create("s", dir.path(), config).unwrap();
        let mut second = StoreWriter::create("s", dir.path(), config).unwrap();
        assert_eq!(first.dir().unwrap(), dir.path().join("s.0000"));
        assert_eq!(second.dir().unwrap(), dir.path().join("s.0001"));
        first.close().unwrap();
        second.close().unwrap();
        assert!(extent_path(&dir.path().join("s.0001"), "s", 0).exists());
    }

    #[test]
    fn test_stream_rules() {
        let dir = TempDir::new().unwrap();
        let mut writer = StoreWriter::create("s", dir.path(), small()).unwrap();
        let a = writer.open_stream("a", "bytes").unwrap();
        assert!(matches!(writer.open_stream("a", "bytes"), Err(Error::StreamExists(_))));
        assert!(matches!(
            writer.write_next(7, b"x", 0),
            Err(Error::UnknownStreamId(7))
        ));

        writer.close_stream(a.id, 5).unwrap();
        assert!(matches!(writer.write_next(a.id, b"x", 6), Err(Error::StreamClosed(_))));

        let persisted = Catalog::load(&catalog_path(dir.path(), "s")).unwrap().unwrap();
        assert!(persisted.stream("a").unwrap().is_closed);
        assert!(!persisted.is_finalized());
    }

    #[test]
    fn test_write_parts_and_sequence() {
        let dir = TempDir::new().unwrap();
        let mut writer = StoreWriter::create("s", dir.path(), small()).unwrap();
        let id = writer.open_stream("blob", "bytes").unwrap().id;
        writer
            .write_parts(id, &[b"he", b"llo"], Envelope::new(99, 4, 100, 100))
            .unwrap();
        let next = writer.write_next(id, b"!", 200).unwrap();
        assert_eq!(next.sequence_id, 5);
        assert_eq!(next.stream_id, id);

        let stream = writer.stream("blob").unwrap();
        assert_eq!(stream.message_count, 2);
        assert_eq!(stream.total_message_bytes, 6);
    }

    #[test]
    fn test_oversized_message_fails_fast() {
        let dir = TempDir::new().unwrap();
        let mut writer = StoreWriter::create("s", dir.path(), small()).unwrap();
        let id = writer.open_stream("big", "bytes").unwrap().id;
        let payload = vec![0u8; writer.max_payload_len() + 1];
        assert!(matches!(
            writer.write_next(id, &payload, 0),
            Err(Error::CapacityExceeded { .. })
        ));
        let payload = vec![0u8; writer.max_payload_len()];
        writer.write_next(id, &payload, 0).unwrap();
    }

    #[test]
    fn test_drop_finalizes() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = StoreWriter::create("s", dir.path(), small()).unwrap();
            writer.open_stream("a", "").unwrap();
        }
        let catalog = Catalog::load(&catalog_path(dir.path(), "s")).unwrap().unwrap();
        assert!(catalog.is_finalized());
    }

    #[test]
    fn test_in_memory_writer() {
        let store = MemoryStore::new();
        let mut writer = StoreWriter::create_in_memory("m", &store).unwrap();
        let id = writer.open_stream("a", "").unwrap().id;
        writer.write_next(id, b"x", 1).unwrap();
        writer.close().unwrap();
        assert_eq!(store.block_count(), 1);
        assert!(store.load_catalog().unwrap().unwrap().is_finalized());
        assert!(StoreWriter::create_in_memory("m", &store).is_err());
    }
}
