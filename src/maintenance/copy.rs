use crate::core::catalog::StreamMetadata;
use crate::core::{Error, Result};
use crate::maintenance::transfer;
use crate::store::{ReplayDescriptor, StoreReader, StoreWriter};

/// Appends the named streams of `source` to `destination` without
/// decoding them.
///
/// Each stream is registered anew in `destination`; payload bytes and
/// envelopes are kept as recorded apart from the stream id. Returns the
/// number of messages copied.
///
/// # Errors
///
/// - `Error::StreamNotFound`: a name is not in `source`
/// - `Error::StreamExists`: a name is already in `destination`
pub fn copy<S: AsRef<str>>(
    source: &mut StoreReader,
    streams: &[S],
    destination: &mut StoreWriter,
) -> Result<u64> {
    let selected = streams
        .iter()
        .map(|name| {
            source
                .metadata(name.as_ref())
                .cloned()
                .ok_or_else(|| Error::StreamNotFound(name.as_ref().to_string()))
        })
        .collect::<Result<Vec<StreamMetadata>>>()?;
    if let Some(taken) = selected.iter().find(|s| destination.stream(&s.name).is_some()) {
        return Err(Error::StreamExists(taken.name.clone()));
    }

    let copied = transfer(source, &selected, destination, &ReplayDescriptor::all())?;
    log::info!(
        "copied {} messages from {} into {}",
        copied,
        source.name(),
        destination.name()
    );
    Ok(copied)
}
