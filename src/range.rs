//! Half-open ranges and range sets over `u32` positions.
//!
//! Byte ranges locate missing parts of a message; the same set type records
//! which sequence ids a best-effort subscription has already seen.

use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Half-open interval `[start, end)`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub struct ByteRange {
    start: u32,
    end: u32,
}

impl ByteRange {
    /// Create a range, swapping the bounds if they are inverted.
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    #[must_use]
    pub const fn start(self) -> u32 { self.start }

    #[must_use]
    pub const fn end(self) -> u32 { self.end }

    #[must_use]
    pub const fn len(self) -> u32 { self.end - self.start }

    #[must_use]
    pub const fn is_empty(self) -> bool { self.start == self.end }

    #[must_use]
    pub const fn contains(self, position: u32) -> bool {
        self.start <= position && position < self.end
    }

    /// Overlapping part of two ranges, if any.
    #[must_use]
    pub fn intersection(self, other: Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Self { start, end })
    }
}

/// Set of `u32` positions stored as disjoint, coalesced half-open intervals.
///
/// # Examples
///
/// ```
/// use dissemination::range::{ByteRange, RangeSet};
///
/// let mut set = RangeSet::new();
/// set.insert_range(ByteRange::new(0, 10));
/// set.insert_range(ByteRange::new(20, 30));
/// assert!(set.contains(5));
/// assert!(!set.contains(15));
/// assert_eq!(set.covered(), 20);
/// assert_eq!(set.gaps_within(ByteRange::new(0, 40)), vec![
///     ByteRange::new(10, 20),
///     ByteRange::new(30, 40),
/// ]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RangeSet {
    // start -> end
    spans: BTreeMap<u32, u32>,
}

impl RangeSet {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Insert a single position. Returns `false` when it was already present.
    pub fn insert(&mut self, position: u32) -> bool {
        if self.contains(position) {
            return false;
        }
        self.insert_range(ByteRange::new(position, position.saturating_add(1)));
        true
    }

    /// Insert every position in `range`, merging with neighbouring spans.
    pub fn insert_range(&mut self, range: ByteRange) {
        if range.is_empty() {
            return;
        }
        let mut start = range.start();
        let mut end = range.end();
        if let Some((&prev_start, &prev_end)) = self.spans.range(..=start).next_back()
            && prev_end >= start
        {
            start = prev_start;
            end = end.max(prev_end);
        }
        let absorbed: Vec<u32> = self
            .spans
            .range(start..=end)
            .map(|(&s, _)| s)
            .collect();
        for span_start in absorbed {
            if let Some(span_end) = self.spans.remove(&span_start) {
                end = end.max(span_end);
            }
        }
        self.spans.insert(start, end);
    }

    #[must_use]
    pub fn contains(&self, position: u32) -> bool {
        self.spans
            .range(..=position)
            .next_back()
            .is_some_and(|(_, &end)| position < end)
    }

    /// Whether every position of `range` is present.
    #[must_use]
    pub fn contains_range(&self, range: ByteRange) -> bool {
        if range.is_empty() {
            return true;
        }
        self.spans
            .range(..=range.start())
            .next_back()
            .is_some_and(|(_, &end)| range.end() <= end)
    }

    /// Number of positions present.
    #[must_use]
    pub fn covered(&self) -> u64 {
        self.spans
            .iter()
            .map(|(&start, &end)| u64::from(end - start))
            .sum()
    }

    /// Ranges inside `bounds` that are not present.
    #[must_use]
    pub fn gaps_within(&self, bounds: ByteRange) -> Vec<ByteRange> {
        let mut gaps = Vec::new();
        let mut cursor = bounds.start();
        for (&start, &end) in &self.spans {
            if end <= cursor {
                continue;
            }
            if start >= bounds.end() {
                break;
            }
            if start > cursor {
                gaps.push(ByteRange::new(cursor, start));
            }
            cursor = cursor.max(end);
        }
        if cursor < bounds.end() {
            gaps.push(ByteRange::new(cursor, bounds.end()));
        }
        gaps
    }

    /// Drop every position below `floor`.
    pub fn remove_below(&mut self, floor: u32) {
        let below: Vec<(u32, u32)> = self
            .spans
            .range(..floor)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (start, end) in below {
            self.spans.remove(&start);
            if end > floor {
                self.spans.insert(floor, end);
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.spans.is_empty() }

    /// Iterate over the stored spans in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ByteRange> + '_ {
        self.spans
            .iter()
            .map(|(&start, &end)| ByteRange::new(start, end))
    }
}
