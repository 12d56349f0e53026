use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamps are ticks: 100 ns intervals since the UNIX epoch.
pub type Ticks = i64;

pub const TICKS_PER_SECOND: Ticks = 10_000_000;
pub const TICKS_PER_MILLISECOND: Ticks = 10_000;
pub const NANOS_PER_TICK: i64 = 100;

/// Stamps `creation_time` on messages the writer sequences itself.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Ticks;
}

/// Wall-clock ticks from `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ticks {
        wall_clock_ticks()
    }
}

/// Ticks from the TSC through `quanta`, anchored to the wall clock once at
/// construction. Monotonic across NTP steps.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    source: quanta::Clock,
    anchor_ticks: Ticks,
    anchor: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let source = quanta::Clock::new();
        let anchor = source.now();
        Self {
            source,
            anchor_ticks: wall_clock_ticks(),
            anchor,
        }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now(&self) -> Ticks {
        let elapsed = self.source.now().duration_since(self.anchor);
        let elapsed_ticks = i64::try_from(elapsed.as_nanos() / NANOS_PER_TICK as u128).unwrap_or(i64::MAX);
        self.anchor_ticks.saturating_add(elapsed_ticks)
    }
}

/// Current wall-clock time in ticks. Times before the epoch clamp to zero.
pub fn wall_clock_ticks() -> Ticks {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_nanos() / NANOS_PER_TICK as u128).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}

/// Converts a tick delta into a `Duration`, clamping negatives to zero.
pub fn ticks_to_duration(ticks: Ticks) -> std::time::Duration {
    if ticks <= 0 {
        return std::time::Duration::ZERO;
    }
    std::time::Duration::from_nanos((ticks as u64).saturating_mul(NANOS_PER_TICK as u64))
}
