use crate::core::catalog::StreamMetadata;
use crate::core::interval::TimeInterval;
use crate::core::Result;
use crate::maintenance::transfer;
use crate::store::{ReplayDescriptor, StoreReader, StoreWriter};

/// Rewrites every stream of `source` into `destination`, keeping only the
/// messages whose originating time lies in `interval`.
///
/// Stream names, type descriptors and partitions carry over, including
/// streams left empty by the crop. Statistics in the destination are
/// computed from the retained messages. Returns the number of messages
/// written.
pub fn crop(source: &mut StoreReader, destination: &mut StoreWriter, interval: TimeInterval) -> Result<u64> {
    let streams: Vec<StreamMetadata> = source.streams().to_vec();
    let written = transfer(source, &streams, destination, &ReplayDescriptor::new(interval))?;
    log::info!(
        "cropped {} to {:?}: {} messages across {} streams",
        source.name(),
        interval,
        written,
        streams.len()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::TICKS_PER_MILLISECOND;
    use crate::store::WriterConfig;
    use tempfile::TempDir;

    #[test]
    fn test_crop_keeps_identity_and_recomputes_metadata() {
        let dir = TempDir::new().unwrap();
        let ms = TICKS_PER_MILLISECOND;
        let config = WriterConfig::default().with_extent_capacity(8192);

        let mut writer = StoreWriter::create("src", dir.path().join("src"), config).unwrap();
        let a = writer.open_stream("a", "u8").unwrap().id;
        writer.open_stream("never", "json").unwrap();
        for i in 0..20u8 {
            writer.write_next(a, &[i], i64::from(i) * ms).unwrap();
        }
        writer.close().unwrap();

        let mut source = StoreReader::open("src", dir.path().join("src")).unwrap();
        let mut destination = StoreWriter::create("dst", dir.path().join("dst"), config).unwrap();
        let written = crop(&mut source, &mut destination, TimeInterval::closed(5 * ms, 9 * ms)).unwrap();
        destination.close().unwrap();
        assert_eq!(written, 5);

        let cropped = StoreReader::open("dst", dir.path().join("dst")).unwrap();
        let a = cropped.metadata("a").unwrap();
        assert_eq!(a.message_count, 5);
        assert_eq!(a.type_descriptor, "u8");
        assert_eq!(a.first_originating_time, Some(5 * ms));
        assert_eq!(a.last_originating_time, Some(9 * ms));
        assert_eq!(cropped.metadata("never").unwrap().type_descriptor, "json");
        assert_eq!(cropped.metadata("never").unwrap().message_count, 0);
    }
}
