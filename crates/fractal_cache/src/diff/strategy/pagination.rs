//! List-fetch request generation.

use super::horizontal::HorizontalResult;
use crate::binding::coalesce;
use crate::diff::request::DataRequest;
use crate::intent::Intent;
use crate::types::Interval;

/// Turns missing index ranges into pagination requests.
pub trait PaginationRequestStrategy: Send + Sync {
    /// Requests covering the gaps of `horizontal` for `intent`.
    fn generate_requests(&self, horizontal: &HorizontalResult, intent: &Intent) -> Vec<DataRequest>;
}

/// How missing intervals are combined before requesting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntervalMergeStrategy {
    /// One request group per interval.
    None,
    /// Touching intervals are combined.
    #[default]
    Adjacent,
    /// Everything from the first missing position to the last is one range.
    All,
}

/// Configuration for [`DefaultPaginationRequest`].
#[derive(Debug, Clone)]
pub struct PaginationRequestConfig {
    /// Interval combination.
    pub interval_merge: IntervalMergeStrategy,
    /// Allow requesting positions outside the intent's window.
    pub allow_overfetch: bool,
    /// Longest slice a single request may ask for.
    pub max_take_per_request: usize,
}

impl PaginationRequestConfig {
    /// Sets the interval combination.
    #[must_use]
    pub fn with_interval_merge(mut self, strategy: IntervalMergeStrategy) -> Self {
        self.interval_merge = strategy;
        self
    }

    /// Sets whether requests may reach outside the window.
    #[must_use]
    pub fn with_allow_overfetch(mut self, allow: bool) -> Self {
        self.allow_overfetch = allow;
        self
    }

    /// Sets the longest slice per request.
    #[must_use]
    pub fn with_max_take_per_request(mut self, max: usize) -> Self {
        self.max_take_per_request = max;
        self
    }
}

impl Default for PaginationRequestConfig {
    fn default() -> Self {
        Self {
            interval_merge: IntervalMergeStrategy::Adjacent,
            allow_overfetch: false,
            max_take_per_request: 100,
        }
    }
}

/// Chunked pagination requests.
#[derive(Debug, Clone, Default)]
pub struct DefaultPaginationRequest {
    config: PaginationRequestConfig,
}

impl DefaultPaginationRequest {
    /// Creates the strategy.
    pub fn new(config: PaginationRequestConfig) -> Self {
        Self { config }
    }

    fn merged(&self, horizontal: &HorizontalResult) -> (Vec<Interval>, Option<usize>) {
        let intervals = &horizontal.missing_intervals;
        let tail = horizontal.open_tail_start;
        match self.config.interval_merge {
            IntervalMergeStrategy::None => (intervals.clone(), tail),
            IntervalMergeStrategy::Adjacent => (coalesce(intervals, 0), tail),
            IntervalMergeStrategy::All => {
                let first = intervals.iter().map(|iv| iv.start).min();
                match (first, tail) {
                    (Some(first), Some(tail)) => (Vec::new(), Some(first.min(tail))),
                    (None, tail) => (Vec::new(), tail),
                    (Some(first), None) => {
                        let last = intervals.iter().map(|iv| iv.end).max().unwrap_or(first);
                        (vec![Interval::new(first, last)], None)
                    }
                }
            }
        }
    }

    fn clip(&self, intervals: Vec<Interval>, intent: &Intent) -> Vec<Interval> {
        if self.config.allow_overfetch {
            return intervals;
        }
        let window = match intent.take {
            Some(take) => match Interval::from_window(intent.skip, take) {
                Some(window) => window,
                None => return Vec::new(),
            },
            None => Interval::new(intent.skip, usize::MAX),
        };
        intervals
            .iter()
            .filter_map(|iv| iv.intersect(&window))
            .collect()
    }
}

impl PaginationRequestStrategy for DefaultPaginationRequest {
    fn generate_requests(&self, horizontal: &HorizontalResult, intent: &Intent) -> Vec<DataRequest> {
        let (intervals, tail) = self.merged(horizontal);
        let intervals = self.clip(intervals, intent);
        let chunk = self.config.max_take_per_request.max(1);

        let mut requests = Vec::new();
        for iv in intervals {
            let mut start = iv.start;
            loop {
                let take = chunk.min(iv.end - start + 1);
                requests.push(DataRequest::page(intent, start, Some(take)));
                match start.checked_add(take) {
                    Some(next) if next <= iv.end => start = next,
                    _ => break,
                }
            }
        }
        if let Some(start) = tail {
            requests.push(DataRequest::page(intent, start.max(intent.skip), None));
        }
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::request::RequestMode;

    fn horizontal(missing: &[(usize, usize)], tail: Option<usize>) -> HorizontalResult {
        HorizontalResult {
            definition_id: "d".into(),
            param_hash: "p".into(),
            window_ids: Vec::new(),
            missing_intervals: missing.iter().map(|&(s, e)| Interval::new(s, e)).collect(),
            open_tail_start: tail,
            need_id_fetch: true,
        }
    }

    fn windows(requests: &[DataRequest]) -> Vec<(usize, Option<usize>)> {
        requests
            .iter()
            .map(|r| match r.mode {
                RequestMode::Pagination { skip, take } => (skip, take),
                RequestMode::Ids { .. } => panic!("unexpected id request"),
            })
            .collect()
    }

    fn intent(skip: usize, take: usize) -> Intent {
        Intent::new("post").with_skip(skip).with_take(take)
    }

    #[test]
    fn chunks_by_max_take() {
        let strategy = DefaultPaginationRequest::new(
            PaginationRequestConfig::default().with_max_take_per_request(4),
        );
        let requests = strategy.generate_requests(&horizontal(&[(0, 9)], None), &intent(0, 10));
        assert_eq!(windows(&requests), vec![(0, Some(4)), (4, Some(4)), (8, Some(2))]);
    }

    #[test]
    fn merge_strategies() {
        let gaps = horizontal(&[(0, 1), (5, 6), (9, 9)], None);
        let intent = intent(0, 10);

        let none = DefaultPaginationRequest::new(
            PaginationRequestConfig::default().with_interval_merge(IntervalMergeStrategy::None),
        );
        assert_eq!(none.generate_requests(&gaps, &intent).len(), 3);

        let all = DefaultPaginationRequest::new(
            PaginationRequestConfig::default().with_interval_merge(IntervalMergeStrategy::All),
        );
        assert_eq!(windows(&all.generate_requests(&gaps, &intent)), vec![(0, Some(10))]);
    }

    #[test]
    fn clips_to_window_without_overfetch() {
        let gaps = horizontal(&[(0, 14)], None);
        let strategy = DefaultPaginationRequest::default();
        assert_eq!(
            windows(&strategy.generate_requests(&gaps, &intent(5, 5))),
            vec![(5, Some(5))]
        );

        let overfetch = DefaultPaginationRequest::new(
            PaginationRequestConfig::default().with_allow_overfetch(true),
        );
        assert_eq!(
            windows(&overfetch.generate_requests(&gaps, &intent(5, 5))),
            vec![(0, Some(15))]
        );
    }

    #[test]
    fn open_tail_is_one_request() {
        let strategy = DefaultPaginationRequest::default();
        let mut unbounded = Intent::new("post").with_skip(3);
        unbounded.take = None;

        let requests = strategy.generate_requests(&horizontal(&[(4, 5)], Some(8)), &unbounded);
        assert_eq!(windows(&requests), vec![(4, Some(2)), (8, None)]);

        let all = DefaultPaginationRequest::new(
            PaginationRequestConfig::default().with_interval_merge(IntervalMergeStrategy::All),
        );
        let requests = all.generate_requests(&horizontal(&[(4, 5)], Some(8)), &unbounded);
        assert_eq!(windows(&requests), vec![(4, None)]);
    }

    #[test]
    fn nothing_missing_nothing_requested() {
        let strategy = DefaultPaginationRequest::default();
        assert!(strategy
            .generate_requests(&horizontal(&[], None), &intent(0, 10))
            .is_empty());
    }
}
