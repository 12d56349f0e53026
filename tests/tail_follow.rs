use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use streamstore::core::WaitStrategy;
use streamstore::{ReaderConfig, StoreReader, StoreWriter, WriterConfig};
use tempfile::tempdir;

#[test]
fn follow_reader_sees_every_message_across_rollovers() {
    let dir = tempdir().expect("tempdir");
    let config = WriterConfig::default().with_extent_capacity(8192);
    let mut writer = StoreWriter::create("live", dir.path(), config).expect("create");
    let seq = writer.open_stream("seq", "u32").expect("open stream").id;

    let path = dir.path().to_path_buf();
    let (ready_tx, ready_rx) = mpsc::channel();
    let tail = thread::spawn(move || {
        let config = ReaderConfig::follow()
            .with_wait(WaitStrategy::Sleep(Duration::from_micros(200)))
            .with_follow_timeout(Duration::from_secs(10));
        let mut reader = StoreReader::open_with("live", &path, config).expect("reader open");
        ready_tx.send(()).expect("signal ready");
        reader
            .open_stream("seq", |bytes| {
                let raw: [u8; 4] = bytes.try_into().map_err(|_| {
                    streamstore::Error::Decode("short payload".to_string())
                })?;
                Ok(u32::from_le_bytes(raw))
            })
            .expect("open stream")
            .map(|item| item.expect("decode").0)
            .collect::<Vec<u32>>()
    });

    ready_rx.recv().expect("reader ready");
    for i in 0..2_000u32 {
        writer
            .write_next(seq, &i.to_le_bytes(), i64::from(i))
            .expect("write");
        if i % 250 == 0 {
            thread::sleep(Duration::from_millis(2));
        }
    }
    writer.close().expect("close");

    let seen = tail.join().expect("tail thread");
    assert_eq!(seen, (0..2_000).collect::<Vec<u32>>());
}

#[test]
fn bounded_reader_stops_at_live_end() {
    let dir = tempdir().expect("tempdir");
    let mut writer = StoreWriter::create("live", dir.path(), WriterConfig::default()).expect("create");
    let seq = writer.open_stream("seq", "u8").expect("open stream").id;
    for i in 0..5u8 {
        writer.write_next(seq, &[i], i64::from(i)).expect("write");
    }

    let mut reader = StoreReader::open("live", dir.path()).expect("reader open");
    assert!(!reader.is_finalized());
    let count = reader
        .open_stream("seq", |bytes| Ok(bytes[0]))
        .expect("open stream")
        .count();
    assert_eq!(count, 5);

    writer.write_next(seq, &[5], 5).expect("write");
    writer.close().expect("close");
    reader.refresh().expect("refresh");
    assert!(reader.is_finalized());
    assert_eq!(reader.metadata("seq").expect("metadata").message_count, 6);
}
