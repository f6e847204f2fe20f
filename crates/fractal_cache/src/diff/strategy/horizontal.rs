//! Index-level coverage check.

use crate::binding::{coalesce, QueryBinding};
use crate::diff::FetchContext;
use crate::hash::QueryKey;
use crate::intent::Intent;
use crate::policy::InvalidationPolicy;
use crate::types::{EntityId, Interval};
use std::fmt;
use std::sync::Arc;

/// Which positions of an intent's window are cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HorizontalResult {
    /// Query definition id of the window's list.
    pub definition_id: String,
    /// Binding parameter hash of the window's list.
    pub param_hash: String,
    /// Known ids from the window start, `None` where unknown.
    ///
    /// Stops at the last cached position of the window, so an uncached
    /// window yields an empty list.
    pub window_ids: Vec<Option<EntityId>>,
    /// Uncached index ranges, ascending.
    pub missing_intervals: Vec<Interval>,
    /// Start of an uncached open-ended tail, for unbounded windows.
    pub open_tail_start: Option<usize>,
    /// Whether any list fetch is needed.
    pub need_id_fetch: bool,
}

impl HorizontalResult {
    fn new(key: &QueryKey, window_ids: Vec<Option<EntityId>>) -> Self {
        Self {
            definition_id: key.definition_id.clone(),
            param_hash: key.param_hash.clone(),
            window_ids,
            missing_intervals: Vec::new(),
            open_tail_start: None,
            need_id_fetch: false,
        }
    }

    /// Result for a window with nothing cached.
    pub fn uncovered(key: &QueryKey, skip: usize, take: Option<usize>) -> Self {
        let mut result = Self::new(key, Vec::new());
        match take {
            Some(take) => result.missing_intervals.extend(Interval::from_window(skip, take)),
            None => result.open_tail_start = Some(skip),
        }
        result.need_id_fetch = result.has_gaps();
        result
    }

    /// Cached ids of the window, in order, without gaps.
    pub fn cached_ids(&self) -> Vec<EntityId> {
        self.window_ids.iter().flatten().cloned().collect()
    }

    fn has_gaps(&self) -> bool {
        !self.missing_intervals.is_empty() || self.open_tail_start.is_some()
    }
}

/// Decides which positions of an intent's window must be listed again.
pub trait HorizontalCheckStrategy: Send + Sync {
    /// Checks the window of `intent` against the binding keyed by `key`.
    fn check(&self, intent: &Intent, key: &QueryKey, ctx: &FetchContext<'_>) -> HorizontalResult;
}

/// Configuration for [`DefaultHorizontalCheck`].
#[derive(Debug, Clone)]
pub struct HorizontalCheckConfig {
    /// Consult cached bindings at all.
    pub use_cache: bool,
    /// Serve a partially covered window from cache and fetch only the gaps.
    pub allow_partial_cache: bool,
    /// Missing intervals separated by at most this many cached positions
    /// are fetched as one.
    pub max_interval_merge_gap: usize,
}

impl HorizontalCheckConfig {
    /// Sets whether cached bindings are used.
    #[must_use]
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Sets whether partially covered windows are served from cache.
    #[must_use]
    pub fn with_allow_partial_cache(mut self, allow: bool) -> Self {
        self.allow_partial_cache = allow;
        self
    }

    /// Sets the interval merge gap.
    #[must_use]
    pub fn with_max_interval_merge_gap(mut self, gap: usize) -> Self {
        self.max_interval_merge_gap = gap;
        self
    }
}

impl Default for HorizontalCheckConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            allow_partial_cache: true,
            max_interval_merge_gap: 0,
        }
    }
}

/// Interval-based horizontal check.
///
/// A binding that is absent, dirty, or due for revalidation under the
/// optional invalidation policy leaves the whole window missing.
#[derive(Clone, Default)]
pub struct DefaultHorizontalCheck {
    config: HorizontalCheckConfig,
    invalidation: Option<Arc<dyn InvalidationPolicy>>,
}

impl DefaultHorizontalCheck {
    /// Creates the check.
    pub fn new(config: HorizontalCheckConfig) -> Self {
        Self {
            config,
            invalidation: None,
        }
    }

    /// Consults `policy` to expire bindings.
    #[must_use]
    pub fn with_invalidation(mut self, policy: Arc<dyn InvalidationPolicy>) -> Self {
        self.invalidation = Some(policy);
        self
    }

    fn usable<'b>(&self, binding: Option<&'b QueryBinding>, now_ms: u64) -> Option<&'b QueryBinding> {
        if !self.config.use_cache {
            return None;
        }
        binding.filter(|b| {
            !b.dirty
                && !self
                    .invalidation
                    .as_ref()
                    .is_some_and(|policy| policy.should_revalidate(b, now_ms))
        })
    }
}

impl fmt::Debug for DefaultHorizontalCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultHorizontalCheck")
            .field("config", &self.config)
            .field("invalidation", &self.invalidation.is_some())
            .finish()
    }
}

impl HorizontalCheckStrategy for DefaultHorizontalCheck {
    fn check(&self, intent: &Intent, key: &QueryKey, ctx: &FetchContext<'_>) -> HorizontalResult {
        let skip = intent.skip;
        let binding = ctx
            .bindings
            .get_binding(&key.definition_id, &key.param_hash);
        let Some(binding) = self.usable(binding, ctx.now_ms) else {
            return HorizontalResult::uncovered(key, skip, intent.take);
        };
        if intent.take == Some(0) {
            return HorizontalResult::new(key, Vec::new());
        }

        let requested_end = intent
            .take
            .map(|take| skip.saturating_add(take.saturating_sub(1)));
        let (end, mut tail) = match binding.known_len() {
            // Past the end of an exhausted list nothing exists.
            Some(len) => {
                if len <= skip {
                    return HorizontalResult::new(key, Vec::new());
                }
                (Some(requested_end.map_or(len - 1, |end| end.min(len - 1))), None)
            }
            None => match requested_end {
                Some(end) => (Some(end), None),
                None => {
                    let last = binding.intervals().last_end().filter(|last| *last >= skip);
                    let tail = last.map_or(skip, |last| last.saturating_add(1));
                    (last, Some(tail))
                }
            },
        };

        let (window_ids, gaps) = match end {
            Some(end) => {
                let cached_len = binding
                    .intervals()
                    .last_end()
                    .filter(|last| *last >= skip)
                    .map_or(0, |last| last.min(end) - skip + 1);
                (
                    binding.window_ids(skip, cached_len),
                    binding.intervals().gaps_within(Interval::new(skip, end)),
                )
            }
            None => (Vec::new(), Vec::new()),
        };

        if !self.config.allow_partial_cache && (!gaps.is_empty() || tail.is_some()) {
            return HorizontalResult::uncovered(key, skip, intent.take);
        }

        let gap = self.config.max_interval_merge_gap;
        let mut missing = coalesce(&gaps, gap);
        if let (Some(start), Some(last)) = (tail, missing.last().copied()) {
            if last.end.saturating_add(1).saturating_add(gap) >= start {
                tail = Some(last.start);
                missing.pop();
            }
        }

        let mut result = HorizontalResult::new(key, window_ids);
        result.missing_intervals = missing;
        result.open_tail_start = tail;
        result.need_id_fetch = result.has_gaps();
        result
    }
}
