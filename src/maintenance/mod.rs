//! Offline operations producing consistent stores from existing ones.

mod copy;
mod crop;
mod repair;

use std::collections::HashMap;

use crate::core::catalog::StreamMetadata;
use crate::core::Result;
use crate::store::{ReplayDescriptor, StoreReader, StoreWriter};

pub use copy::copy;
pub use crop::crop;
pub use repair::{repair, RepairReport};

/// Registers `streams` in `destination` and appends their admitted
/// messages in source commit order. Payloads and envelopes are copied
/// verbatim except for the stream id.
fn transfer(
    source: &mut StoreReader,
    streams: &[StreamMetadata],
    destination: &mut StoreWriter,
    descriptor: &ReplayDescriptor,
) -> Result<u64> {
    let mut ids = HashMap::with_capacity(streams.len());
    for stream in streams {
        let created = destination.open_stream_like(stream)?;
        ids.insert(stream.id, created.id);
    }

    let names: Vec<&str> = streams.iter().map(|s| s.name.as_str()).collect();
    let mut messages = source.messages(&names, descriptor)?;
    let mut written = 0u64;
    while let Some((envelope, payload)) = messages.next_message()? {
        let Some(&id) = ids.get(&envelope.stream_id) else {
            continue;
        };
        destination.write(id, payload, envelope)?;
        written += 1;
    }
    Ok(written)
}
