use std::os::unix::fs::FileExt;
use std::time::Duration;

use streamstore::core::extent::{catalog_path, extent_path, EXTENT_DATA_OFFSET};
use streamstore::{repair, Catalog, StoreReader, StoreWriter, WriterConfig};
use tempfile::tempdir;

fn decode_i32(bytes: &[u8]) -> streamstore::Result<i32> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| streamstore::Error::Decode("short payload".to_string()))?;
    Ok(i32::from_le_bytes(raw))
}

fn read_seq(name: &str, path: &std::path::Path) -> Vec<i32> {
    read_stream(name, path, "seq")
}

fn read_stream(name: &str, path: &std::path::Path, stream: &str) -> Vec<i32> {
    let mut reader = StoreReader::open(name, path).expect("reader open");
    reader
        .open_stream(stream, decode_i32)
        .expect("open stream")
        .map(|item| item.expect("decode").0)
        .collect()
}

/// Writes `count` messages and abandons the writer without closing it.
fn abandoned_store(path: &std::path::Path, count: i32) {
    abandoned_store_with(path, count, WriterConfig::default());
}

fn abandoned_store_with(path: &std::path::Path, count: i32, config: WriterConfig) {
    let config = config.with_extent_capacity(64 * 1024);
    let mut writer = StoreWriter::create("crash", path, config).expect("create");
    let seq = writer.open_stream("seq", "i32").expect("open stream").id;
    for i in 1..=count {
        writer.write_next(seq, &i.to_le_bytes(), i64::from(i)).expect("write");
    }
    std::mem::forget(writer);
}

#[test]
fn unfinalized_store_reads_committed_prefix() {
    let dir = tempdir().expect("tempdir");
    abandoned_store(dir.path(), 75);

    let reader = StoreReader::open("crash", dir.path()).expect("reader open");
    assert!(!reader.is_finalized());
    assert_eq!(reader.metadata("seq").expect("metadata").message_count, 75);
    drop(reader);
    assert_eq!(read_seq("crash", dir.path()), (1..=75).collect::<Vec<_>>());
}

#[test]
fn repair_after_truncation_mid_block() {
    let dir = tempdir().expect("tempdir");
    abandoned_store(dir.path(), 100);

    // 4-byte payloads take 40-byte blocks; cut the file inside block 51.
    let path = extent_path(dir.path(), "crash", 0);
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .expect("open extent");
    file.set_len((EXTENT_DATA_OFFSET + 50 * 40 + 20) as u64)
        .expect("truncate");
    drop(file);

    let report = repair("crash", dir.path()).expect("repair");
    assert!(!report.was_finalized);
    assert_eq!(report.messages_recovered, 50);

    let reader = StoreReader::open("crash", dir.path()).expect("reader open");
    assert!(reader.is_finalized());
    assert_eq!(reader.metadata("seq").expect("metadata").message_count, 50);
    drop(reader);
    assert_eq!(read_seq("crash", dir.path()), (1..=50).collect::<Vec<_>>());
}

#[test]
fn repair_is_idempotent() {
    let dir = tempdir().expect("tempdir");
    abandoned_store(dir.path(), 10);
    let first = repair("crash", dir.path()).expect("repair");
    let second = repair("crash", dir.path()).expect("repair again");
    assert!(!first.was_finalized);
    assert!(second.was_finalized);
    assert_eq!(second.messages_recovered, 10);
    assert_eq!(read_seq("crash", dir.path()), (1..=10).collect::<Vec<_>>());
}

#[test]
fn garbage_commit_word_ends_the_valid_prefix() {
    let dir = tempdir().expect("tempdir");
    abandoned_store(dir.path(), 10);

    // Where block 11 would start, a commit word claiming a ~4 GiB payload.
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(extent_path(dir.path(), "crash", 0))
        .expect("open extent");
    file.write_all_at(
        &0xF000_0000u32.to_le_bytes(),
        (EXTENT_DATA_OFFSET + 10 * 40) as u64,
    )
    .expect("plant commit word");
    drop(file);

    let reader = StoreReader::open("crash", dir.path()).expect("reader open");
    assert_eq!(reader.metadata("seq").expect("metadata").message_count, 10);
    drop(reader);

    let report = repair("crash", dir.path()).expect("repair");
    assert_eq!(report.messages_recovered, 10);
    assert_eq!(read_seq("crash", dir.path()), (1..=10).collect::<Vec<_>>());
}

#[test]
fn catalog_is_persisted_while_writing() {
    let dir = tempdir().expect("tempdir");
    abandoned_store_with(
        dir.path(),
        5,
        WriterConfig::default().with_catalog_flush_interval(Duration::ZERO),
    );

    let catalog = Catalog::load(&catalog_path(dir.path(), "crash"))
        .expect("load catalog")
        .expect("catalog present");
    assert!(!catalog.is_finalized());
    let seq = catalog.stream("seq").expect("seq registered");
    assert_eq!(seq.message_count, 5);
    assert_eq!(seq.last_originating_time, Some(5));
}

#[test]
fn repair_without_catalog_keeps_every_message() {
    let dir = tempdir().expect("tempdir");
    abandoned_store(dir.path(), 10);
    std::fs::remove_file(catalog_path(dir.path(), "crash")).expect("remove catalog");

    let report = repair("crash", dir.path()).expect("repair");
    assert_eq!(report.messages_recovered, 10);

    let reader = StoreReader::open("crash", dir.path()).expect("reader open");
    assert!(reader.is_finalized());
    let names: Vec<(String, u64)> = reader
        .streams()
        .iter()
        .map(|s| (s.name.clone(), s.message_count))
        .collect();
    assert_eq!(names, vec![("stream_0".to_string(), 10)]);
    drop(reader);
    assert_eq!(
        read_stream("crash", dir.path(), "stream_0"),
        (1..=10).collect::<Vec<_>>()
    );
}
