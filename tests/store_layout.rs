use streamstore::store::{resolve_store_dir, store_instances};
use streamstore::{Error, StoreReader, StoreWriter, WriterConfig};
use tempfile::tempdir;

#[test]
fn collision_without_auto_increment() {
    let dir = tempdir().expect("tempdir");
    let mut first = StoreWriter::create("rec", dir.path(), WriterConfig::default()).expect("create");
    first.close().expect("close");

    let second = StoreWriter::create("rec", dir.path(), WriterConfig::default());
    assert!(matches!(second, Err(Error::Collision(_))));
    // The existing store is untouched.
    assert!(StoreReader::open("rec", dir.path()).expect("reader").is_finalized());
}

#[test]
fn auto_increment_creates_numbered_instances() {
    let dir = tempdir().expect("tempdir");
    let config = WriterConfig::default().with_auto_increment(true);
    for i in 0..3u8 {
        let mut writer = StoreWriter::create("rec", dir.path(), config).expect("create");
        let id = writer.open_stream("marker", "u8").expect("open stream").id;
        writer.write_next(id, &[i], i64::from(i)).expect("write");
        writer.close().expect("close");
    }

    let instances = store_instances(dir.path(), "rec").expect("instances");
    assert_eq!(
        instances.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(
        resolve_store_dir("rec", dir.path()).expect("resolve"),
        dir.path().join("rec.0002")
    );

    // Readers pick the latest instance.
    let mut reader = StoreReader::open("rec", dir.path()).expect("reader");
    let values: Vec<u8> = reader
        .open_stream("marker", |bytes| Ok(bytes[0]))
        .expect("open stream")
        .map(|item| item.expect("decode").0)
        .collect();
    assert_eq!(values, vec![2]);
}

#[test]
fn missing_store() {
    let dir = tempdir().expect("tempdir");
    assert!(matches!(
        StoreReader::open("nothing", dir.path()),
        Err(Error::StoreNotFound(_))
    ));
}
