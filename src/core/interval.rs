//! Time intervals over ticks.

use serde::{Deserialize, Serialize};

use crate::core::clock::Ticks;

/// An absolute time window; each endpoint can be inclusive or exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Ticks,
    pub end: Ticks,
    pub start_inclusive: bool,
    pub end_inclusive: bool,
}

impl TimeInterval {
    /// `[start, end]`
    pub fn closed(start: Ticks, end: Ticks) -> Self {
        Self {
            start,
            end,
            start_inclusive: true,
            end_inclusive: true,
        }
    }

    /// `[start, end)`
    pub fn half_open(start: Ticks, end: Ticks) -> Self {
        Self {
            start,
            end,
            start_inclusive: true,
            end_inclusive: false,
        }
    }

    pub fn infinite() -> Self {
        Self::closed(Ticks::MIN, Ticks::MAX)
    }

    pub fn is_infinite(&self) -> bool {
        self.start == Ticks::MIN && self.end == Ticks::MAX
    }

    pub fn contains(&self, time: Ticks) -> bool {
        let after_start = if self.start_inclusive {
            time >= self.start
        } else {
            time > self.start
        };
        let before_end = if self.end_inclusive {
            time <= self.end
        } else {
            time < self.end
        };
        after_start && before_end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
            || (self.start == self.end && !(self.start_inclusive && self.end_inclusive))
    }

    /// Smallest interval covering both.
    pub fn union(&self, other: &TimeInterval) -> TimeInterval {
        let (start, start_inclusive) = match self.start.cmp(&other.start) {
            std::cmp::Ordering::Less => (self.start, self.start_inclusive),
            std::cmp::Ordering::Greater => (other.start, other.start_inclusive),
            std::cmp::Ordering::Equal => (self.start, self.start_inclusive || other.start_inclusive),
        };
        let (end, end_inclusive) = match self.end.cmp(&other.end) {
            std::cmp::Ordering::Greater => (self.end, self.end_inclusive),
            std::cmp::Ordering::Less => (other.end, other.end_inclusive),
            std::cmp::Ordering::Equal => (self.end, self.end_inclusive || other.end_inclusive),
        };
        TimeInterval {
            start,
            end,
            start_inclusive,
            end_inclusive,
        }
    }

    /// Overlap of both; `None` when they do not intersect.
    pub fn intersection(&self, other: &TimeInterval) -> Option<TimeInterval> {
        let (start, start_inclusive) = match self.start.cmp(&other.start) {
            std::cmp::Ordering::Greater => (self.start, self.start_inclusive),
            std::cmp::Ordering::Less => (other.start, other.start_inclusive),
            std::cmp::Ordering::Equal => (self.start, self.start_inclusive && other.start_inclusive),
        };
        let (end, end_inclusive) = match self.end.cmp(&other.end) {
            std::cmp::Ordering::Less => (self.end, self.end_inclusive),
            std::cmp::Ordering::Greater => (other.end, other.end_inclusive),
            std::cmp::Ordering::Equal => (self.end, self.end_inclusive && other.end_inclusive),
        };
        let overlap = TimeInterval {
            start,
            end,
            start_inclusive,
            end_inclusive,
        };
        (!overlap.is_empty()).then_some(overlap)
    }

    /// Whether `time` lies beyond the end of the interval.
    pub fn is_past_end(&self, time: Ticks) -> bool {
        time > self.end || (time == self.end && !self.end_inclusive)
    }

    /// Folds a set of intervals into their coverage; `None` when empty.
    pub fn coverage<'a>(intervals: impl IntoIterator<Item = &'a TimeInterval>) -> Option<TimeInterval> {
        intervals
            .into_iter()
            .fold(None, |acc: Option<TimeInterval>, next| match acc {
                None => Some(*next),
                Some(acc) => Some(acc.union(next)),
            })
    }
}

/// A window relative to some instant, used as a search tolerance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelativeTimeInterval {
    pub left: Ticks,
    pub right: Ticks,
    pub left_inclusive: bool,
    pub right_inclusive: bool,
}

impl RelativeTimeInterval {
    pub fn closed(left: Ticks, right: Ticks) -> Self {
        Self {
            left,
            right,
            left_inclusive: true,
            right_inclusive: true,
        }
    }

    /// `[-radius, radius]`
    pub fn around(radius: Ticks) -> Self {
        Self::closed(-radius.abs(), radius.abs())
    }

    pub fn anchored_at(&self, time: Ticks) -> TimeInterval {
        TimeInterval {
            start: time.saturating_add(self.left),
            end: time.saturating_add(self.right),
            start_inclusive: self.left_inclusive,
            end_inclusive: self.right_inclusive,
        }
    }
}
