use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::catalog::{Catalog, StreamMetadata};
use crate::core::envelope::Envelope;
use crate::core::interval::TimeInterval;
use crate::core::{Error, Result};
use crate::json::shape::Shape;
use crate::json::{catalog_path, data_path, Record};

/// Loads a store written by [`JsonStoreWriter`](crate::json::JsonStoreWriter).
///
/// Records are read up to the first line that fails to parse, so a store
/// whose writer died mid-line still opens with everything before it.
#[derive(Debug)]
pub struct JsonStoreReader {
    dir: PathBuf,
    catalog: Catalog,
    records: Vec<Record>,
}

impl JsonStoreReader {
    pub fn open(name: &str, path: impl AsRef<Path>) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        let mut catalog = Catalog::load(&catalog_path(&dir, name))?
            .ok_or_else(|| Error::StoreNotFound(dir.clone()))?;
        let text = match std::fs::read_to_string(data_path(&dir, name)) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::StoreNotFound(dir))
            }
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            let line = line.strip_prefix(',').unwrap_or(line);
            if line.is_empty() || line == "[" || line == "]" {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    log::warn!("{}: stopping at unreadable record: {}", name, err);
                    break;
                }
            }
        }

        if !catalog.is_finalized() {
            catalog.reset_statistics();
            for record in &records {
                let payload_len = serde_json::to_string(&record.data)?.len();
                if catalog.observe(&record.envelope, payload_len).is_err() {
                    log::warn!(
                        "{}: record for unregistered stream {}",
                        name,
                        record.envelope.stream_id
                    );
                }
            }
        }
        log::debug!("json store {} loaded: {} records", name, records.len());
        Ok(Self {
            dir,
            catalog,
            records,
        })
    }

    pub fn name(&self) -> &str {
        &self.catalog.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn is_finalized(&self) -> bool {
        self.catalog.is_finalized()
    }

    pub fn streams(&self) -> &[StreamMetadata] {
        self.catalog.streams()
    }

    pub fn metadata(&self, stream: &str) -> Option<&StreamMetadata> {
        self.catalog.stream(stream)
    }

    pub fn active_time_interval(&self) -> Option<TimeInterval> {
        self.catalog.active_time_interval()
    }

    /// Shape fixed by the stream's first message.
    pub fn shape(&self, stream: &str) -> Result<Option<Shape>> {
        let Some(encoded) = self.metadata(stream).and_then(|s| s.supplemental.as_deref()) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(encoded)?))
    }

    /// Raw values of `streams` in write order.
    pub fn values<S: AsRef<str>>(&self, streams: &[S]) -> Result<Vec<(Envelope, &Value)>> {
        let ids = streams
            .iter()
            .map(|name| {
                self.metadata(name.as_ref())
                    .map(|s| s.id)
                    .ok_or_else(|| Error::StreamNotFound(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<u32>>>()?;
        Ok(self
            .records
            .iter()
            .filter(|record| ids.contains(&record.envelope.stream_id))
            .map(|record| (record.envelope, &record.data))
            .collect())
    }

    /// Decodes every message of `stream` whose originating time lies in
    /// `interval`.
    pub fn read_stream<T: DeserializeOwned>(
        &self,
        stream: &str,
        interval: TimeInterval,
    ) -> Result<Vec<(T, Envelope)>> {
        self.values(&[stream])?
            .into_iter()
            .filter(|(envelope, _)| interval.contains(envelope.originating_time))
            .map(|(envelope, value)| {
                T::deserialize(value)
                    .map(|message| (message, envelope))
                    .map_err(|err| Error::Decode(format!("{}: {}", stream, err)))
            })
            .collect()
    }
}
