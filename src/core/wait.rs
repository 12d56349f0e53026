use std::time::{Duration, Instant};

use crate::core::Result;

const DEFAULT_SPIN_US: u32 = 50;
const PARK_INTERVAL: Duration = Duration::from_millis(1);

/// How a tailing reader waits for the writer to commit more blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Polls without ever yielding; one core stays fully busy.
    BusySpin,
    /// Spins for a period, then polls with short sleeps.
    SpinThenPark { spin_us: u32 },
    /// Sleeps a fixed interval between polls.
    Sleep(Duration),
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::SpinThenPark {
            spin_us: DEFAULT_SPIN_US,
        }
    }
}

impl WaitStrategy {
    /// Polls `ready` until it returns `true` or `deadline` passes.
    ///
    /// Returns whether `ready` succeeded. A `None` deadline waits forever.
    pub fn wait_until<F>(&self, deadline: Option<Instant>, mut ready: F) -> Result<bool>
    where
        F: FnMut() -> Result<bool>,
    {
        let expired = |now: Instant| deadline.map_or(false, |d| now >= d);
        match *self {
            WaitStrategy::BusySpin => loop {
                if ready()? {
                    return Ok(true);
                }
                if expired(Instant::now()) {
                    return Ok(false);
                }
                std::hint::spin_loop();
            },
            WaitStrategy::Sleep(interval) => loop {
                if ready()? {
                    return Ok(true);
                }
                let now = Instant::now();
                if expired(now) {
                    return Ok(false);
                }
                std::thread::sleep(bounded_sleep(interval, now, deadline));
            },
            WaitStrategy::SpinThenPark { spin_us } => {
                let spin_deadline = Instant::now() + Duration::from_micros(spin_us as u64);
                let mut i = 0u32;
                loop {
                    if ready()? {
                        return Ok(true);
                    }
                    i = i.wrapping_add(1);
                    if i % 128 == 0 {
                        let now = Instant::now();
                        if expired(now) {
                            return Ok(false);
                        }
                        if now >= spin_deadline {
                            break;
                        }
                    }
                    std::hint::spin_loop();
                }
                loop {
                    if ready()? {
                        return Ok(true);
                    }
                    let now = Instant::now();
                    if expired(now) {
                        return Ok(false);
                    }
                    std::thread::sleep(bounded_sleep(PARK_INTERVAL, now, deadline));
                }
            }
        }
    }
}

fn bounded_sleep(interval: Duration, now: Instant, deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(d) => interval.min(d.saturating_duration_since(now)),
        None => interval,
    }
}
