use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::core::catalog::{Catalog, StreamMetadata};
use crate::core::clock::{Clock, SystemClock};
use crate::core::envelope::Envelope;
use crate::core::{Error, Result};
use crate::json::shape::Shape;
use crate::json::{catalog_path, data_path, Record};

/// Writes a store as plain JSON files, one record per line.
///
/// The first message on a stream fixes its [`Shape`]; later messages that
/// do not fit fail with `Error::Schema` and nothing is written.
pub struct JsonStoreWriter {
    name: String,
    dir: PathBuf,
    data: BufWriter<File>,
    catalog: Catalog,
    shapes: HashMap<u32, Shape>,
    next_sequence: HashMap<u32, u32>,
    clock: Box<dyn Clock>,
    records: u64,
    closed: bool,
}

impl JsonStoreWriter {
    /// Creates store `name` in directory `path`.
    ///
    /// # Errors
    ///
    /// `Error::Collision` if a data file for `name` already exists there.
    pub fn create(name: &str, path: impl AsRef<Path>) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(data_path(&dir, name))
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Collision(dir))
            }
            Err(err) => return Err(err.into()),
        };
        let mut data = BufWriter::new(file);
        data.write_all(b"[\n")?;

        let clock: Box<dyn Clock> = Box::new(SystemClock);
        let catalog = Catalog::new(name, &dir, 0, clock.now());
        catalog.save(&catalog_path(&dir, name))?;
        log::info!("json store {} created in {}", name, dir.display());
        Ok(Self {
            name: name.to_string(),
            dir,
            data,
            catalog,
            shapes: HashMap::new(),
            next_sequence: HashMap::new(),
            clock,
            records: 0,
            closed: false,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn open_stream(&mut self, name: &str, type_descriptor: &str) -> Result<StreamMetadata> {
        if self.closed {
            return Err(Error::WriterClosed);
        }
        let now = self.clock.now();
        let partition = self.name.clone();
        let stream = self
            .catalog
            .add_stream(name, type_descriptor, &partition, now)?
            .clone();
        self.catalog.save(&catalog_path(&self.dir, &self.name))?;
        Ok(stream)
    }

    /// Serializes `message` and appends it with the next sequence id.
    pub fn write<T: Serialize>(
        &mut self,
        stream_id: u32,
        message: &T,
        originating_time: i64,
    ) -> Result<Envelope> {
        let value = serde_json::to_value(message)?;
        let sequence_id = self.next_sequence.get(&stream_id).copied().unwrap_or(0);
        let envelope = Envelope::new(stream_id, sequence_id, originating_time, self.clock.now());
        self.write_value(value, envelope)?;
        Ok(envelope)
    }

    /// Appends `value` under `envelope` as given.
    pub fn write_value(&mut self, value: Value, envelope: Envelope) -> Result<()> {
        if self.closed {
            return Err(Error::WriterClosed);
        }
        let stream_id = envelope.stream_id;
        let stream = self
            .catalog
            .stream_by_id(stream_id)
            .ok_or(Error::UnknownStreamId(stream_id))?;
        if stream.is_closed {
            return Err(Error::StreamClosed(stream_id));
        }

        let new_shape = match self.shapes.get(&stream_id) {
            Some(shape) => {
                shape
                    .check(&value)
                    .map_err(|reason| Error::Schema(format!("{}: {}", stream.name, reason)))?;
                None
            }
            None => Some(Shape::of(&value)),
        };

        let payload_len = serde_json::to_string(&value)?.len();
        let line = serde_json::to_string(&Record { envelope, data: value })?;
        if self.records > 0 {
            self.data.write_all(b",")?;
        }
        self.data.write_all(line.as_bytes())?;
        self.data.write_all(b"\n")?;
        self.records += 1;

        if let Some(shape) = new_shape {
            let encoded = serde_json::to_string(&shape)?;
            if let Some(stream) = self.catalog.stream_by_id_mut(stream_id) {
                stream.supplemental = Some(encoded);
            }
            self.shapes.insert(stream_id, shape);
        }
        self.catalog.observe(&envelope, payload_len)?;
        self.next_sequence
            .insert(stream_id, envelope.sequence_id.wrapping_add(1));
        Ok(())
    }

    pub fn close_stream(&mut self, stream_id: u32) -> Result<()> {
        let now = self.clock.now();
        let stream = self
            .catalog
            .stream_by_id_mut(stream_id)
            .ok_or(Error::UnknownStreamId(stream_id))?;
        stream.close(now);
        Ok(())
    }

    /// Pushes buffered records to the file and rewrites the catalog.
    pub fn flush(&mut self) -> Result<()> {
        self.data.flush()?;
        self.catalog.save(&catalog_path(&self.dir, &self.name))
    }

    /// Terminates the record array and finalizes the catalog. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.data.write_all(b"]\n")?;
        self.data.flush()?;
        self.data.get_ref().sync_all()?;

        let now = self.clock.now();
        for stream in &mut self.catalog.streams {
            stream.close(now);
        }
        self.catalog.finalize(now);
        self.catalog.save(&catalog_path(&self.dir, &self.name))?;
        self.closed = true;
        log::info!("json store {} closed after {} records", self.name, self.records);
        Ok(())
    }
}

impl Drop for JsonStoreWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("json store {}: close on drop failed: {}", self.name, err);
        }
    }
}
