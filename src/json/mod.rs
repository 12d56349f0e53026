//! Human-readable alternative encoding.
//!
//! A JSON store is two files in one directory: `{name}.Catalog.json`, the
//! same catalog document the binary store keeps, and `{name}.Data.json`,
//! an array of `{ "envelope": .., "data": .. }` records with one record
//! per line. Each stream's structure is checked on write.

mod reader;
mod shape;
mod writer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::envelope::Envelope;

pub use reader::JsonStoreReader;
pub use shape::Shape;
pub use writer::JsonStoreWriter;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Record {
    envelope: Envelope,
    data: Value,
}

pub fn catalog_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.Catalog.json", name))
}

pub fn data_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.Data.json", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interval::TimeInterval;
    use crate::core::Error;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Pose {
        x: f64,
        y: f64,
        label: Option<String>,
    }

    fn pose(x: f64, label: Option<&str>) -> Pose {
        Pose {
            x,
            y: -x,
            label: label.map(str::to_string),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonStoreWriter::create("j", dir.path()).unwrap();
        let poses = writer.open_stream("poses", "Pose").unwrap().id;
        let counts = writer.open_stream("counts", "u32").unwrap().id;
        for i in 0..5 {
            writer.write(poses, &pose(f64::from(i), Some("p")), i64::from(i) * 10).unwrap();
            writer.write(counts, &i, i64::from(i) * 10 + 1).unwrap();
        }
        writer.close().unwrap();

        let reader = JsonStoreReader::open("j", dir.path()).unwrap();
        assert!(reader.is_finalized());
        assert_eq!(reader.metadata("poses").unwrap().message_count, 5);
        assert_eq!(reader.active_time_interval(), Some(TimeInterval::closed(0, 41)));

        let read: Vec<(Pose, Envelope)> = reader
            .read_stream("poses", TimeInterval::closed(10, 30))
            .unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read[0].0, pose(1.0, Some("p")));
        assert_eq!(read[0].1.sequence_id, 1);

        let all = reader.values(&["poses", "counts"]).unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all[1].0.stream_id, counts);
        assert!(matches!(
            reader.values(&["missing"]),
            Err(Error::StreamNotFound(_))
        ));
    }

    #[test]
    fn test_schema_violation_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonStoreWriter::create("j", dir.path()).unwrap();
        let poses = writer.open_stream("poses", "Pose").unwrap().id;
        writer.write(poses, &pose(1.0, None), 1).unwrap();
        writer.write(poses, &pose(2.0, Some("named")), 2).unwrap();

        let err = writer.write(poses, &"not a pose", 3).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        let err = writer
            .write(poses, &serde_json::json!({"x": 1, "y": "wrong", "label": null}), 4)
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        writer.close().unwrap();

        let reader = JsonStoreReader::open("j", dir.path()).unwrap();
        assert_eq!(reader.metadata("poses").unwrap().message_count, 2);
        assert!(matches!(reader.shape("poses").unwrap(), Some(Shape::Object(_))));
    }

    #[test]
    fn test_unfinished_store_reads_prefix() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonStoreWriter::create("j", dir.path()).unwrap();
        let counts = writer.open_stream("counts", "u32").unwrap().id;
        for i in 0..3u32 {
            writer.write(counts, &i, i64::from(i)).unwrap();
        }
        writer.flush().unwrap();
        std::mem::forget(writer);

        // A torn final record.
        let path = data_path(dir.path(), "j");
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str(",{\"envelope\":{\"stream_id\":0");
        std::fs::write(&path, text).unwrap();

        let reader = JsonStoreReader::open("j", dir.path()).unwrap();
        assert!(!reader.is_finalized());
        assert_eq!(reader.metadata("counts").unwrap().message_count, 3);
        let values: Vec<(u32, Envelope)> = reader
            .read_stream("counts", TimeInterval::infinite())
            .unwrap();
        assert_eq!(values.iter().map(|(v, _)| *v).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_abandoned_store_keeps_stream_registry() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonStoreWriter::create("j", dir.path()).unwrap();
        let counts = writer.open_stream("counts", "u32").unwrap().id;
        // Enough records to spill the write buffer without an explicit flush.
        for i in 0..2000u32 {
            writer.write(counts, &i, i64::from(i)).unwrap();
        }
        std::mem::forget(writer);

        let reader = JsonStoreReader::open("j", dir.path()).unwrap();
        assert!(!reader.is_finalized());
        let persisted = reader.values(&["counts"]).unwrap().len();
        assert!(persisted > 0);
        assert_eq!(
            reader.metadata("counts").unwrap().message_count,
            persisted as u64
        );
    }

    #[test]
    fn test_create_collision() {
        let dir = TempDir::new().unwrap();
        let mut first = JsonStoreWriter::create("j", dir.path()).unwrap();
        first.close().unwrap();
        assert!(matches!(
            JsonStoreWriter::create("j", dir.path()),
            Err(Error::Collision(_))
        ));
    }
}
