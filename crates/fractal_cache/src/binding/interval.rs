//! Interval algebra over sorted result positions.

use crate::types::Interval;
use serde::{Deserialize, Serialize};

/// A sorted set of disjoint, non-touching intervals.
///
/// Inserting an interval that overlaps or touches existing ones coalesces
/// them, so `[0,4]` and `[5,9]` are stored as `[0,9]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntervalSet(Vec<Interval>);

impl IntervalSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from arbitrary intervals.
    pub fn from_intervals(intervals: impl IntoIterator<Item = Interval>) -> Self {
        let mut set = Self::new();
        for interval in intervals {
            set.insert(interval);
        }
        set
    }

    /// Intervals in ascending order.
    pub fn as_slice(&self) -> &[Interval] {
        &self.0
    }

    /// Iterates intervals in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.0.iter()
    }

    /// Number of intervals.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no position is covered.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Adds an interval, coalescing overlapping and touching neighbours.
    pub fn insert(&mut self, interval: Interval) {
        let first = self
            .0
            .partition_point(|iv| iv.end.saturating_add(1) < interval.start);
        let mut merged = interval;
        let mut last = first;
        while last < self.0.len() && self.0[last].start <= merged.end.saturating_add(1) {
            merged.start = merged.start.min(self.0[last].start);
            merged.end = merged.end.max(self.0[last].end);
            last += 1;
        }
        self.0.splice(first..last, [merged]);
    }

    /// The interval covering `index`, if any.
    pub fn covering(&self, index: usize) -> Option<Interval> {
        let i = self.0.partition_point(|iv| iv.end < index);
        self.0.get(i).filter(|iv| iv.start <= index).copied()
    }

    /// Whether `index` is covered.
    pub fn contains(&self, index: usize) -> bool {
        self.covering(index).is_some()
    }

    /// Last covered position.
    pub fn last_end(&self) -> Option<usize> {
        self.0.last().map(|iv| iv.end)
    }

    /// Uncovered sub-ranges of `window`, in ascending order.
    pub fn gaps_within(&self, window: Interval) -> Vec<Interval> {
        let mut gaps = Vec::new();
        let mut cursor = Some(window.start);
        let first = self.0.partition_point(|iv| iv.end < window.start);

        for iv in &self.0[first..] {
            let Some(pos) = cursor else { break };
            if iv.start > window.end {
                break;
            }
            if iv.start > pos {
                gaps.push(Interval::new(pos, iv.start - 1));
            }
            cursor = iv.end.checked_add(1).filter(|next| *next <= window.end);
        }
        if let Some(pos) = cursor {
            if pos <= window.end {
                gaps.push(Interval::new(pos, window.end));
            }
        }
        gaps
    }

    /// Drops every position after `last`. `None` drops everything.
    pub fn truncate_after(&mut self, last: Option<usize>) {
        match last {
            None => self.0.clear(),
            Some(last) => {
                self.0.retain(|iv| iv.start <= last);
                if let Some(tail) = self.0.last_mut() {
                    tail.end = tail.end.min(last);
                }
            }
        }
    }

    /// Whether the set is sorted, disjoint and non-touching.
    pub fn is_well_formed(&self) -> bool {
        self.0.iter().all(Interval::is_valid)
            && self
                .0
                .windows(2)
                .all(|pair| pair[0].end.saturating_add(1) < pair[1].start)
    }
}

/// Sorts intervals and coalesces those separated by at most `gap`
/// positions.
///
/// A `gap` of zero merges only overlapping or touching intervals.
pub fn coalesce(intervals: &[Interval], gap: usize) -> Vec<Interval> {
    let mut sorted = intervals.to_vec();
    sorted.sort();

    let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
    for iv in sorted {
        match merged.last_mut() {
            Some(last) if iv.start <= last.end.saturating_add(1).saturating_add(gap) => {
                last.end = last.end.max(iv.end);
            }
            _ => merged.push(iv),
        }
    }
    merged
}
