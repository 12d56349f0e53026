//! Time index over ordered positions.
//!
//! The search functions never see the underlying storage: they take a
//! position count and an oracle `time_at(index)` that must be monotonically
//! non-decreasing. [`StreamIndex`] materializes that oracle for one stream
//! from the envelopes met while scanning the extent log.

use crate::core::clock::Ticks;
use crate::core::envelope::Envelope;
use crate::core::extent::BlockPosition;
use crate::core::interval::RelativeTimeInterval;

/// Direction preference when no position matches exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Closest in absolute time; the earlier index wins an exact tie.
    Nearest,
    /// Closest at or before the query time.
    Previous,
    /// Closest at or after the query time.
    Next,
}

/// First index in `0..count` for which `pred` is false, assuming `pred`
/// is true on a prefix and false afterwards.
fn partition_point(count: usize, pred: impl Fn(usize) -> bool) -> usize {
    let mut lo = 0usize;
    let mut hi = count;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Candidates strictly before and strictly after `time`, plus the first
/// exact match if any.
struct Bracket {
    exact: Option<usize>,
    previous: Option<usize>,
    next: Option<usize>,
}

fn bracket(time: Ticks, count: usize, time_at: &impl Fn(usize) -> Ticks) -> Bracket {
    let lower = partition_point(count, |i| time_at(i) < time);
    let upper = partition_point(count, |i| time_at(i) <= time);
    // Runs of equal times resolve to their first index.
    let previous = lower.checked_sub(1).map(|last| {
        let previous_time = time_at(last);
        partition_point(last, |i| time_at(i) < previous_time)
    });
    Bracket {
        exact: (lower < upper).then_some(lower),
        previous,
        next: (upper < count).then_some(upper),
    }
}

/// Orders two candidates by distance to `time`; the earlier wins a tie.
fn by_distance(
    time: Ticks,
    previous: Option<usize>,
    next: Option<usize>,
    time_at: &impl Fn(usize) -> Ticks,
) -> [Option<usize>; 2] {
    match (previous, next) {
        (Some(p), Some(n)) => {
            let before = time.abs_diff(time_at(p));
            let after = time_at(n).abs_diff(time);
            if before <= after {
                [Some(p), Some(n)]
            } else {
                [Some(n), Some(p)]
            }
        }
        (p, n) => [p.or(n), None],
    }
}

/// Binary search over `count` time-ordered positions.
///
/// Returns an exact match when one exists (the first, if several share the
/// time). Otherwise `Previous` and `Next` return the bracketing index in
/// that direction even when the other side is closer, and `Nearest` picks
/// the closer of the two. `None` when `count == 0` or no position lies in
/// the requested direction.
pub fn locate(
    time: Ticks,
    count: usize,
    time_at: impl Fn(usize) -> Ticks,
    mode: SearchMode,
) -> Option<usize> {
    if count == 0 {
        return None;
    }
    let bracket = bracket(time, count, &time_at);
    if bracket.exact.is_some() {
        return bracket.exact;
    }
    match mode {
        SearchMode::Previous => bracket.previous,
        SearchMode::Next => bracket.next,
        SearchMode::Nearest => by_distance(time, bracket.previous, bracket.next, &time_at)[0],
    }
}

/// Like [`locate`] in `Nearest` mode, but the result must fall inside
/// `time + epsilon`.
///
/// Candidates are tried in order of increasing distance: when the nearer
/// bracketing position lies outside the window the farther one is still
/// checked before giving up.
pub fn locate_within_epsilon(
    time: Ticks,
    epsilon: RelativeTimeInterval,
    count: usize,
    time_at: impl Fn(usize) -> Ticks,
) -> Option<usize> {
    if count == 0 {
        return None;
    }
    let window = epsilon.anchored_at(time);
    let bracket = bracket(time, count, &time_at);
    if let Some(exact) = bracket.exact {
        if window.contains(time) {
            return Some(exact);
        }
    }
    by_distance(time, bracket.previous, bracket.next, &time_at)
        .into_iter()
        .flatten()
        .find(|&index| window.contains(time_at(index)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub envelope: Envelope,
    pub position: BlockPosition,
}

/// Per-stream list of committed messages in commit order.
#[derive(Clone, Debug, Default)]
pub struct StreamIndex {
    entries: Vec<IndexEntry>,
}

impl StreamIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, envelope: Envelope, position: BlockPosition) {
        self.entries.push(IndexEntry { envelope, position });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&IndexEntry> {
        self.entries.get(index)
    }

    pub fn locate(&self, time: Ticks, mode: SearchMode) -> Option<&IndexEntry> {
        let index = locate(
            time,
            self.entries.len(),
            |i| self.entries[i].envelope.originating_time,
            mode,
        )?;
        self.entries.get(index)
    }

    pub fn locate_within(&self, time: Ticks, epsilon: RelativeTimeInterval) -> Option<&IndexEntry> {
        let index = locate_within_epsilon(time, epsilon, self.entries.len(), |i| {
            self.entries[i].envelope.originating_time
        })?;
        self.entries.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(times: &[Ticks], time: Ticks, mode: SearchMode) -> Option<usize> {
        locate(time, times.len(), |i| times[i], mode)
    }

    fn search_eps(times: &[Ticks], time: Ticks, eps: RelativeTimeInterval) -> Option<usize> {
        locate_within_epsilon(time, eps, times.len(), |i| times[i])
    }

    #[test]
    fn empty_returns_none() {
        assert_eq!(search(&[], 5, SearchMode::Nearest), None);
        assert_eq!(search_eps(&[], 5, RelativeTimeInterval::around(100)), None);
    }

    #[test]
    fn single_point() {
        assert_eq!(search(&[10], 1_000, SearchMode::Nearest), Some(0));
        assert_eq!(search(&[10], -1_000, SearchMode::Nearest), Some(0));
        assert_eq!(search(&[10], 5, SearchMode::Previous), None);
        assert_eq!(search(&[10], 5, SearchMode::Next), Some(0));
        assert_eq!(search_eps(&[10], 12, RelativeTimeInterval::around(2)), Some(0));
        assert_eq!(search_eps(&[10], 13, RelativeTimeInterval::around(2)), None);
    }

    #[test]
    fn exact_match_wins() {
        let times = [0, 10, 20, 30];
        for mode in [SearchMode::Nearest, SearchMode::Previous, SearchMode::Next] {
            assert_eq!(search(&times, 20, mode), Some(2));
        }
    }

    #[test]
    fn duplicates_return_first() {
        let times = [0, 10, 10, 10, 20];
        assert_eq!(search(&times, 10, SearchMode::Nearest), Some(1));
    }

    #[test]
    fn nearest_breaks_ties_toward_earlier() {
        let times = [0, 10, 20];
        assert_eq!(search(&times, 15, SearchMode::Nearest), Some(1));
        assert_eq!(search(&times, 16, SearchMode::Nearest), Some(2));
        assert_eq!(search(&times, 14, SearchMode::Nearest), Some(1));
    }

    #[test]
    fn previous_and_next_ignore_distance() {
        let times = [0, 10, 100];
        assert_eq!(search(&times, 90, SearchMode::Previous), Some(1));
        assert_eq!(search(&times, 11, SearchMode::Next), Some(2));
        assert_eq!(search(&times, 101, SearchMode::Next), None);
        assert_eq!(search(&times, -1, SearchMode::Previous), None);
        assert_eq!(search(&times, 101, SearchMode::Previous), Some(2));
    }

    #[test]
    fn nearest_matches_brute_force() {
        let times: Vec<Ticks> = vec![-7, -7, -3, 0, 2, 2, 9, 15, 15, 16, 40];
        for query in -20..60 {
            let best = (0..times.len())
                .min_by_key(|&i| (times[i].abs_diff(query), i))
                .unwrap();
            assert_eq!(search(&times, query, SearchMode::Nearest), Some(best), "query {query}");
        }
    }

    #[test]
    fn epsilon_falls_back_to_farther_candidate() {
        let times = [0, 10];
        // 4 is nearer to 0, but the window [4, 10] excludes it.
        let window = RelativeTimeInterval::closed(0, 6);
        assert_eq!(search_eps(&times, 4, window), Some(1));
        // Nearer candidate inside the window wins.
        assert_eq!(search_eps(&times, 4, RelativeTimeInterval::around(6)), Some(0));
        // Neither inside.
        assert_eq!(search_eps(&times, 5, RelativeTimeInterval::around(1)), None);
    }

    #[test]
    fn epsilon_equidistant_prefers_earlier() {
        let times = [0, 10];
        assert_eq!(search_eps(&times, 5, RelativeTimeInterval::around(5)), Some(0));
        let right_only = RelativeTimeInterval {
            left: -5,
            right: 5,
            left_inclusive: false,
            right_inclusive: true,
        };
        assert_eq!(search_eps(&times, 5, right_only), Some(1));
    }

    #[test]
    fn epsilon_exact_outside_window_uses_neighbours() {
        let times = [0, 5, 8];
        let after_only = RelativeTimeInterval {
            left: 0,
            right: 4,
            left_inclusive: false,
            right_inclusive: true,
        };
        assert_eq!(search_eps(&times, 5, after_only), Some(2));
    }

    #[test]
    fn stream_index_locates_entries() {
        let mut index = StreamIndex::new();
        for (i, time) in [100, 200, 300].into_iter().enumerate() {
            index.push(
                Envelope::new(1, i as u32, time, time),
                BlockPosition::new(0, 64 + i as u64 * 40),
            );
        }
        let entry = index.locate(260, SearchMode::Nearest).unwrap();
        assert_eq!(entry.envelope.sequence_id, 2);
        let entry = index.locate(260, SearchMode::Previous).unwrap();
        assert_eq!(entry.position, BlockPosition::new(0, 104));
        assert!(index.locate_within(150, RelativeTimeInterval::around(10)).is_none());
    }
}
