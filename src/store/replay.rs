//! Replay: delivery of several streams in recorded order.
//!
//! Messages are delivered in global commit order, not stream by stream, so
//! cross-stream interleaving is exactly what the writer produced. With
//! real-time pacing, delivery is delayed until the message is due relative
//! to the first one; a slow consumer makes replay fall behind and nothing
//! is skipped to catch up.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::clock::{ticks_to_duration, Ticks};
use crate::core::envelope::Envelope;
use crate::core::interval::TimeInterval;
use crate::core::{Error, Result};
use crate::store::reader::StoreReader;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ReplayPacing {
    /// As fast as the consumer takes them.
    #[default]
    Unpaced,
    /// Wall-clock paced; `speed` 2.0 plays twice as fast as recorded.
    RealTime { speed: f64 },
}

/// Requested window, time axis and pacing of a replay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReplayDescriptor {
    pub interval: TimeInterval,
    /// Filter and pace on originating time (default) or creation time.
    pub use_originating_time: bool,
    pub pacing: ReplayPacing,
}

impl Default for ReplayDescriptor {
    fn default() -> Self {
        Self::all()
    }
}

impl ReplayDescriptor {
    /// Everything, unpaced.
    pub fn all() -> Self {
        Self::new(TimeInterval::infinite())
    }

    pub fn new(interval: TimeInterval) -> Self {
        Self {
            interval,
            use_originating_time: true,
            pacing: ReplayPacing::Unpaced,
        }
    }

    pub fn with_pacing(mut self, pacing: ReplayPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn real_time(self, speed: f64) -> Self {
        self.with_pacing(ReplayPacing::RealTime { speed })
    }

    pub fn using_creation_time(mut self) -> Self {
        self.use_originating_time = false;
        self
    }

    /// The time of `envelope` on this replay's axis.
    pub fn time_of(&self, envelope: &Envelope) -> Ticks {
        if self.use_originating_time {
            envelope.originating_time
        } else {
            envelope.creation_time
        }
    }
}

/// Longest a paced message is held back; slower schedules saturate here.
const MAX_PACING_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Holds delivery back until each message is due.
#[derive(Debug)]
pub struct Pacer {
    speed: Option<f64>,
    anchor: Option<(Ticks, Instant)>,
}

impl Pacer {
    pub fn new(pacing: ReplayPacing) -> Self {
        let speed = match pacing {
            ReplayPacing::Unpaced => None,
            ReplayPacing::RealTime { speed } if speed.is_finite() && speed > 0.0 => Some(speed),
            ReplayPacing::RealTime { speed } => {
                log::warn!("ignoring invalid replay speed {speed}; replaying unpaced");
                None
            }
        };
        Self { speed, anchor: None }
    }

    /// When a message at `time` is due; `None` when unpaced.
    pub fn due_at(&self, time: Ticks) -> Option<Instant> {
        let speed = self.speed?;
        let (anchor_time, anchor_instant) = self.anchor?;
        let offset = ticks_to_duration(time.saturating_sub(anchor_time));
        let delay = Duration::try_from_secs_f64(offset.as_secs_f64() / speed)
            .unwrap_or(MAX_PACING_DELAY)
            .min(MAX_PACING_DELAY);
        Some(anchor_instant + delay)
    }

    /// Sleeps until `time` is due and returns how long it slept. The first
    /// message anchors the schedule and is due immediately.
    pub fn wait_for(&mut self, time: Ticks) -> Duration {
        if self.speed.is_none() {
            return Duration::ZERO;
        }
        let Some(due) = self.due_at(time) else {
            self.anchor = Some((time, Instant::now()));
            return Duration::ZERO;
        };
        let now = Instant::now();
        if due <= now {
            return Duration::ZERO;
        }
        let delay = due - now;
        std::thread::sleep(delay);
        delay
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub delivered: u64,
    /// Total time spent holding messages back for pacing.
    pub paced: Duration,
}

type Handler<'a> = Box<dyn FnMut(&[u8], &Envelope) -> Result<()> + 'a>;

/// A replay being assembled: subscribe streams, then [`run`](Self::run).
pub struct Replay<'a> {
    reader: &'a mut StoreReader,
    descriptor: ReplayDescriptor,
    handlers: HashMap<u32, Vec<Handler<'a>>>,
    streams: Vec<String>,
}

impl<'a> Replay<'a> {
    pub(crate) fn new(reader: &'a mut StoreReader, descriptor: ReplayDescriptor) -> Self {
        Self {
            reader,
            descriptor,
            handlers: HashMap::new(),
            streams: Vec::new(),
        }
    }

    pub fn descriptor(&self) -> &ReplayDescriptor {
        &self.descriptor
    }

    /// Delivers every message of `stream`, decoded, to `handler`.
    pub fn subscribe<T, D, H>(&mut self, stream: &str, mut decoder: D, mut handler: H) -> Result<&mut Self>
    where
        T: 'a,
        D: FnMut(&[u8]) -> Result<T> + 'a,
        H: FnMut(T, &Envelope) + 'a,
    {
        self.subscribe_raw(stream, move |bytes, envelope| {
            let value = decoder(bytes)?;
            handler(value, envelope);
            Ok(())
        })
    }

    /// Delivers the undecoded payloads of `stream`. An error from `handler`
    /// stops the replay.
    pub fn subscribe_raw<H>(&mut self, stream: &str, handler: H) -> Result<&mut Self>
    where
        H: FnMut(&[u8], &Envelope) -> Result<()> + 'a,
    {
        let id = self
            .reader
            .metadata(stream)
            .ok_or_else(|| Error::StreamNotFound(stream.to_string()))?
            .id;
        if !self.streams.iter().any(|name| name == stream) {
            self.streams.push(stream.to_string());
        }
        self.handlers.entry(id).or_default().push(Box::new(handler));
        Ok(self)
    }

    /// The part of the replay window the subscribed streams actually cover.
    pub fn requested_interval(&self) -> Option<TimeInterval> {
        self.reader
            .requested_interval(&self.streams)
            .and_then(|covered| covered.intersection(&self.descriptor.interval))
    }

    /// Delivers the subscribed streams until the window or the store ends.
    pub fn run(mut self) -> Result<ReplayStats> {
        let mut stats = ReplayStats::default();
        if self.handlers.is_empty() {
            return Ok(stats);
        }
        let ids: Vec<u32> = self.handlers.keys().copied().collect();
        let mut cursor = self.reader.messages_for(&ids, &self.descriptor)?;
        let mut pacer = Pacer::new(self.descriptor.pacing);

        while let Some((envelope, payload)) = cursor.next_message()? {
            stats.paced += pacer.wait_for(self.descriptor.time_of(&envelope));
            if let Some(handlers) = self.handlers.get_mut(&envelope.stream_id) {
                for handler in handlers.iter_mut() {
                    handler(payload, &envelope)?;
                }
            }
            stats.delivered += 1;
        }
        log::debug!(
            "{}: replay delivered {} messages",
            self.reader.name(),
            stats.delivered
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{TICKS_PER_MILLISECOND, TICKS_PER_SECOND};
    use crate::store::writer::{StoreWriter, WriterConfig};
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn write_two_streams(dir: &std::path::Path) {
        let mut writer = StoreWriter::create("s", dir, WriterConfig::default().with_extent_capacity(8192)).unwrap();
        let a = writer.open_stream("a", "u8").unwrap().id;
        let b = writer.open_stream("b", "u8").unwrap().id;
        writer.open_stream("unused", "u8").unwrap();
        for i in 0..10u8 {
            let stream = if i % 3 == 0 { b } else { a };
            writer
                .write_next(stream, &[i], i64::from(i) * 10 * TICKS_PER_MILLISECOND)
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn test_replay_preserves_commit_order() {
        let dir = TempDir::new().unwrap();
        write_two_streams(dir.path());
        let mut reader = StoreReader::open("s", dir.path()).unwrap();

        let seen = RefCell::new(Vec::new());
        let mut replay = reader.replay(ReplayDescriptor::all());
        replay
            .subscribe("a", |b: &[u8]| Ok(b[0]), |v, _| seen.borrow_mut().push(('a', v)))
            .unwrap()
            .subscribe("b", |b: &[u8]| Ok(b[0]), |v, _| seen.borrow_mut().push(('b', v)))
            .unwrap();
        let stats = replay.run().unwrap();

        assert_eq!(stats.delivered, 10);
        let order: Vec<u8> = seen.borrow().iter().map(|(_, v)| *v).collect();
        assert_eq!(order, (0..10).collect::<Vec<u8>>());
        assert_eq!(seen.borrow()[3], ('b', 3));
    }

    #[test]
    fn test_replay_interval_and_requested_interval() {
        let dir = TempDir::new().unwrap();
        write_two_streams(dir.path());
        let mut reader = StoreReader::open("s", dir.path()).unwrap();
        let ms = TICKS_PER_MILLISECOND;

        let mut seen = Vec::new();
        let mut replay = reader.replay(ReplayDescriptor::new(TimeInterval::closed(25 * ms, 1_000 * ms)));
        replay
            .subscribe_raw("b", |bytes, _| {
                seen.push(bytes[0]);
                Ok(())
            })
            .unwrap();
        assert_eq!(
            replay.requested_interval(),
            Some(TimeInterval::closed(25 * ms, 90 * ms))
        );
        replay.run().unwrap();
        assert_eq!(seen, vec![3, 6, 9]);
    }

    #[test]
    fn test_replay_unknown_stream() {
        let dir = TempDir::new().unwrap();
        write_two_streams(dir.path());
        let mut reader = StoreReader::open("s", dir.path()).unwrap();
        let mut replay = reader.replay(ReplayDescriptor::all());
        assert!(matches!(
            replay.subscribe_raw("nope", |_, _| Ok(())),
            Err(Error::StreamNotFound(_))
        ));
    }

    #[test]
    fn test_real_time_pacing_never_early() {
        let dir = TempDir::new().unwrap();
        write_two_streams(dir.path());
        let mut reader = StoreReader::open("s", dir.path()).unwrap();

        let started = Instant::now();
        let mut arrivals = Vec::new();
        let mut replay = reader.replay(ReplayDescriptor::all().real_time(2.0));
        replay
            .subscribe_raw("a", |bytes, _| {
                arrivals.push((bytes[0], started.elapsed()));
                Ok(())
            })
            .unwrap();
        replay.run().unwrap();

        // Stream "a" spans 10ms..80ms of recorded time: 35ms at 2x speed.
        let first = arrivals[0].0;
        for (value, at) in &arrivals {
            let recorded = Duration::from_millis(u64::from(value - first) * 10);
            assert!(*at >= recorded / 2);
        }
        assert!(started.elapsed() >= Duration::from_millis(35));
    }

    #[test]
    fn test_pacer_falls_behind_without_skipping() {
        let mut pacer = Pacer::new(ReplayPacing::RealTime { speed: 1.0 });
        assert_eq!(pacer.wait_for(0), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        // Overdue: delivered immediately.
        assert_eq!(pacer.wait_for(TICKS_PER_MILLISECOND), Duration::ZERO);
        assert!(pacer.due_at(100 * TICKS_PER_MILLISECOND).unwrap() > Instant::now());

        let mut unpaced = Pacer::new(ReplayPacing::RealTime { speed: 0.0 });
        assert!(unpaced.due_at(10).is_none());
        assert_eq!(unpaced.wait_for(10), Duration::ZERO);
    }

    #[test]
    fn test_pacer_saturates_at_tiny_speed() {
        let mut pacer = Pacer::new(ReplayPacing::RealTime { speed: 1e-20 });
        assert_eq!(pacer.wait_for(0), Duration::ZERO);
        let due = pacer.due_at(10 * TICKS_PER_SECOND).unwrap();
        assert!(due > Instant::now() + Duration::from_secs(3600));
        assert!(pacer.due_at(Ticks::MAX).is_some());
    }
}
