use std::cell::RefCell;
use std::time::{Duration, Instant};

use streamstore::core::clock::TICKS_PER_MILLISECOND;
use streamstore::{
    Envelope, ReplayDescriptor, ReplayScope, StoreReader, StoreWriter, TimeInterval, WriterConfig,
};
use tempfile::tempdir;

const MS: i64 = TICKS_PER_MILLISECOND;

fn sensor_store(path: &std::path::Path) {
    let mut writer = StoreWriter::create("sensors", path, WriterConfig::default()).expect("create");
    let imu = writer.open_stream("imu", "u8").expect("imu").id;
    let gps = writer.open_stream("gps", "u8").expect("gps").id;
    for i in 0..50i64 {
        writer.write_next(imu, &[i as u8], i * MS).expect("imu write");
        if i % 10 == 0 {
            writer.write_next(gps, &[i as u8], 1_000 * MS + i * MS).expect("gps write");
        }
    }
    writer.close().expect("close");
}

#[test]
fn replay_interleaves_in_commit_order() {
    let dir = tempdir().expect("tempdir");
    sensor_store(dir.path());
    let mut reader = StoreReader::open("sensors", dir.path()).expect("reader");

    let delivered = RefCell::new(Vec::new());
    let mut replay = reader.replay(ReplayDescriptor::all());
    replay
        .subscribe("imu", |bytes| Ok(bytes[0]), |value, envelope: &Envelope| {
            delivered.borrow_mut().push(("imu", value, envelope.originating_time));
        })
        .expect("subscribe imu")
        .subscribe("gps", |bytes| Ok(bytes[0]), |value, envelope: &Envelope| {
            delivered.borrow_mut().push(("gps", value, envelope.originating_time));
        })
        .expect("subscribe gps");
    let stats = replay.run().expect("run");

    let delivered = delivered.into_inner();
    assert_eq!(stats.delivered, 55);
    assert_eq!(delivered.len(), 55);
    assert_eq!(delivered[0], ("imu", 0, 0));
    assert_eq!(delivered[1], ("gps", 0, 1_000 * MS));
    assert_eq!(delivered[2], ("imu", 1, MS));
}

#[test]
fn paced_replay_is_never_early() {
    let dir = tempdir().expect("tempdir");
    sensor_store(dir.path());
    let mut reader = StoreReader::open("sensors", dir.path()).expect("reader");

    let arrivals = RefCell::new(Vec::new());
    let started = Instant::now();
    let descriptor = ReplayDescriptor::new(TimeInterval::closed(0, 20 * MS)).real_time(1.0);
    let mut replay = reader.replay(descriptor);
    replay
        .subscribe_raw("imu", |_, envelope| {
            arrivals
                .borrow_mut()
                .push((envelope.originating_time, started.elapsed()));
            Ok(())
        })
        .expect("subscribe");
    replay.run().expect("run");

    let arrivals = arrivals.into_inner();
    assert_eq!(arrivals.len(), 21);
    let (last_time, last_arrival) = arrivals[arrivals.len() - 1];
    assert_eq!(last_time, 20 * MS);
    assert!(last_arrival >= Duration::from_millis(20));
}

#[test]
fn nested_scopes_replay_only_requested_window() {
    let dir = tempdir().expect("tempdir");
    sensor_store(dir.path());
    let mut reader = StoreReader::open("sensors", dir.path()).expect("reader");
    assert_eq!(
        reader.active_time_interval(),
        Some(TimeInterval::closed(0, 1_040 * MS))
    );

    let mut root = ReplayScope::new("session");
    let viewer = root.child("viewer");
    viewer.child("map").request_streams(&reader, &["gps"]).expect("gps coverage");
    assert_eq!(
        root.effective_interval(),
        Some(TimeInterval::closed(1_000 * MS, 1_040 * MS))
    );

    let descriptor = root.descriptor().expect("descriptor");
    let imu_seen = RefCell::new(0u32);
    let gps_seen = RefCell::new(0u32);
    let mut replay = reader.replay(descriptor);
    replay
        .subscribe_raw("imu", |_, _| {
            *imu_seen.borrow_mut() += 1;
            Ok(())
        })
        .expect("subscribe imu")
        .subscribe_raw("gps", |_, _| {
            *gps_seen.borrow_mut() += 1;
            Ok(())
        })
        .expect("subscribe gps");
    replay.run().expect("run");

    assert_eq!(imu_seen.into_inner(), 0);
    assert_eq!(gps_seen.into_inner(), 5);
}
