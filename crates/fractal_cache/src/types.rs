//! Core type definitions for the fractal cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Server-assigned identifier of an entity.
///
/// Ids are opaque strings scoped by entity type; the cache never
/// generates them.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An inclusive index range `[start, end]` over a sorted result list.
///
/// Serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct Interval {
    /// First covered index.
    pub start: usize,
    /// Last covered index (inclusive).
    pub end: usize,
}

impl Interval {
    /// Creates an interval. `start` must not exceed `end`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Interval covering `take` positions from `skip`.
    ///
    /// Returns `None` when `take` is zero.
    #[must_use]
    pub fn from_window(skip: usize, take: usize) -> Option<Self> {
        if take == 0 {
            None
        } else {
            Some(Self::new(skip, skip.saturating_add(take - 1)))
        }
    }

    /// Number of positions covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Intervals are never empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Whether `start <= end`.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// Whether `index` falls inside this interval.
    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }

    /// Intersection with another interval.
    #[must_use]
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(Interval::new(start, end))
    }

    /// Whether the two intervals overlap or sit next to each other.
    #[must_use]
    pub fn touches(&self, other: &Interval) -> bool {
        self.start <= other.end.saturating_add(1) && other.start <= self.end.saturating_add(1)
    }
}

impl From<(usize, usize)> for Interval {
    fn from((start, end): (usize, usize)) -> Self {
        Self::new(start, end)
    }
}

impl From<Interval> for (usize, usize) {
    fn from(interval: Interval) -> Self {
        (interval.start, interval.end)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_is_transparent() {
        let id = EntityId::from("u1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"u1\"");
        assert_eq!(id.to_string(), "u1");
        assert_eq!(format!("{id:?}"), "EntityId(u1)");
    }

    #[test]
    fn interval_window() {
        assert_eq!(Interval::from_window(5, 5), Some(Interval::new(5, 9)));
        assert_eq!(Interval::from_window(5, 0), None);
        assert_eq!(Interval::new(5, 9).len(), 5);
    }

    #[test]
    fn interval_touching() {
        let a = Interval::new(0, 4);
        assert!(a.touches(&Interval::new(5, 9)));
        assert!(a.touches(&Interval::new(3, 7)));
        assert!(!a.touches(&Interval::new(6, 9)));
        assert_eq!(a.intersect(&Interval::new(3, 9)), Some(Interval::new(3, 4)));
        assert_eq!(a.intersect(&Interval::new(5, 9)), None);
    }

    #[test]
    fn interval_serializes_as_pair() {
        let json = serde_json::to_string(&Interval::new(10, 14)).unwrap();
        assert_eq!(json, "[10,14]");
        let back: Interval = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Interval::new(10, 14));
    }
}
