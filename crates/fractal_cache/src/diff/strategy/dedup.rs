//! Request deduplication.

use crate::diff::request::{DataRequest, RequestMode};
use crate::types::EntityId;
use std::collections::{HashMap, HashSet};

/// Combines overlapping requests of a plan.
pub trait RequestDeduplicationStrategy: Send + Sync {
    /// Returns an equivalent, smaller request list.
    fn deduplicate(&self, requests: Vec<DataRequest>) -> Vec<DataRequest>;
}

/// Configuration for [`DefaultDeduplication`].
#[derive(Debug, Clone)]
pub struct DeduplicationConfig {
    /// Merge id-mode requests of the same type, selection and scope.
    pub merge_id_requests: bool,
    /// Largest id list a merge may produce.
    pub id_request_merge_max_size: usize,
}

impl DeduplicationConfig {
    /// Sets whether id requests merge.
    #[must_use]
    pub fn with_merge_id_requests(mut self, merge: bool) -> Self {
        self.merge_id_requests = merge;
        self
    }

    /// Sets the merged id list cap.
    #[must_use]
    pub fn with_id_request_merge_max_size(mut self, max: usize) -> Self {
        self.id_request_merge_max_size = max;
        self
    }
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            merge_id_requests: true,
            id_request_merge_max_size: 1000,
        }
    }
}

/// Merges id-mode requests sharing entity type, selection, filter and sort.
///
/// Pagination requests pass through untouched and come first; merged id
/// requests follow in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct DefaultDeduplication {
    config: DeduplicationConfig,
}

impl DefaultDeduplication {
    /// Creates the strategy.
    pub fn new(config: DeduplicationConfig) -> Self {
        Self { config }
    }
}

/// An id request being grown by merges.
struct Accumulator {
    request: DataRequest,
    ids: Vec<EntityId>,
    seen: HashSet<EntityId>,
}

impl Accumulator {
    fn new(request: DataRequest, ids: Vec<EntityId>) -> Self {
        let mut acc = Self {
            request,
            ids: Vec::with_capacity(ids.len()),
            seen: HashSet::with_capacity(ids.len()),
        };
        acc.absorb(ids);
        acc
    }

    fn union_len(&self, ids: &[EntityId]) -> usize {
        let fresh: HashSet<&EntityId> = ids.iter().filter(|id| !self.seen.contains(*id)).collect();
        self.ids.len() + fresh.len()
    }

    fn absorb(&mut self, ids: Vec<EntityId>) {
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.ids.push(id);
            }
        }
    }

    fn finish(mut self) -> DataRequest {
        self.request.mode = RequestMode::Ids { ids: self.ids };
        self.request
    }
}

impl RequestDeduplicationStrategy for DefaultDeduplication {
    fn deduplicate(&self, requests: Vec<DataRequest>) -> Vec<DataRequest> {
        if !self.config.merge_id_requests || requests.len() <= 1 {
            return requests;
        }
        let cap = self.config.id_request_merge_max_size;

        let mut passthrough = Vec::new();
        let mut accumulators: Vec<Accumulator> = Vec::new();
        let mut open: HashMap<(String, String, String, String), usize> = HashMap::new();

        for mut request in requests {
            if request.is_pagination() {
                passthrough.push(request);
                continue;
            }
            let ids = match &mut request.mode {
                RequestMode::Ids { ids } => std::mem::take(ids),
                RequestMode::Pagination { .. } => Vec::new(),
            };
            let key = (
                request.entity_type.clone(),
                request.select_signature(),
                request.filter.to_string(),
                format!("{:?}", request.order_by),
            );
            match open.get(&key).copied() {
                Some(at) if accumulators[at].union_len(&ids) <= cap => {
                    accumulators[at].absorb(ids);
                }
                _ => {
                    open.insert(key, accumulators.len());
                    accumulators.push(Accumulator::new(request, ids));
                }
            }
        }

        passthrough.extend(accumulators.into_iter().map(Accumulator::finish));
        passthrough
    }
}
