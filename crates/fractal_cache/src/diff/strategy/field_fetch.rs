//! Field completion request generation.

use super::vertical::{FieldMissingMap, MissingFields};
use crate::diff::request::DataRequest;
use crate::intent::Intent;
use crate::policy::CachePolicy;
use crate::types::EntityId;
use std::collections::{BTreeMap, BTreeSet};

/// Turns missing fields into id-mode requests.
pub trait FieldFetchStrategy: Send + Sync {
    /// Requests completing every entity in `missing`, scoped to the filter
    /// and sort of `intent`.
    fn generate_requests(&self, missing: &FieldMissingMap, intent: &Intent) -> Vec<DataRequest>;
}

/// Handling of fields missing on few entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LowFrequencyStrategy {
    /// One request per entity with its own field list.
    #[default]
    PerEntity,
    /// One request for every such entity with the union of their fields.
    MergeAll,
}

/// Configuration for [`DefaultFieldFetch`].
#[derive(Debug, Clone)]
pub struct FieldFetchConfig {
    /// A field missing on at least this fraction of incomplete entities is
    /// fetched in bulk.
    pub batch_threshold: f64,
    /// Most ids in a single request.
    pub max_batch_size: usize,
    /// Handling of fields below the threshold.
    pub low_frequency: LowFrequencyStrategy,
}

impl FieldFetchConfig {
    /// Default configuration with the policy's bulk threshold.
    pub fn from_policy(policy: &dyn CachePolicy) -> Self {
        Self::default().with_batch_threshold(policy.bulk_field_threshold())
    }

    /// Sets the bulk threshold.
    #[must_use]
    pub fn with_batch_threshold(mut self, threshold: f64) -> Self {
        self.batch_threshold = threshold;
        self
    }

    /// Sets the id cap per request.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the low-frequency handling.
    #[must_use]
    pub fn with_low_frequency(mut self, strategy: LowFrequencyStrategy) -> Self {
        self.low_frequency = strategy;
        self
    }
}

impl Default for FieldFetchConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 0.3,
            max_batch_size: 100,
            low_frequency: LowFrequencyStrategy::PerEntity,
        }
    }
}

/// Threshold-based field completion.
#[derive(Debug, Clone, Default)]
pub struct DefaultFieldFetch {
    config: FieldFetchConfig,
}

impl DefaultFieldFetch {
    /// Creates the strategy.
    pub fn new(config: FieldFetchConfig) -> Self {
        Self { config }
    }

    fn push_chunked(
        &self,
        out: &mut Vec<DataRequest>,
        intent: &Intent,
        ids: &[EntityId],
        select: Option<&BTreeSet<String>>,
    ) {
        for chunk in ids.chunks(self.config.max_batch_size.max(1)) {
            out.push(
                DataRequest::ids(&intent.entity_type, chunk.to_vec(), select.cloned())
                    .scoped_to(intent),
            );
        }
    }
}

impl FieldFetchStrategy for DefaultFieldFetch {
    fn generate_requests(&self, missing: &FieldMissingMap, intent: &Intent) -> Vec<DataRequest> {
        let mut requests = Vec::new();

        let whole: Vec<EntityId> = missing
            .iter()
            .filter(|(_, m)| matches!(m, MissingFields::Record))
            .map(|(id, _)| id.clone())
            .collect();
        self.push_chunked(&mut requests, intent, &whole, None);

        let partial: Vec<(&EntityId, &BTreeSet<String>)> = missing
            .iter()
            .filter_map(|(id, m)| match m {
                MissingFields::Fields(fields) => Some((id, fields)),
                MissingFields::Record => None,
            })
            .collect();
        if partial.is_empty() {
            return requests;
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, fields) in &partial {
            for field in *fields {
                *counts.entry(field.as_str()).or_default() += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let total = partial.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let bulk: BTreeSet<&str> = counts
            .into_iter()
            .filter(|(_, count)| *count as f64 / total >= self.config.batch_threshold)
            .map(|(field, _)| field)
            .collect();

        // Entities missing the same bulk fields share requests.
        let mut groups: Vec<(BTreeSet<String>, Vec<EntityId>)> = Vec::new();
        let mut low: Vec<(&EntityId, BTreeSet<String>)> = Vec::new();
        for (id, fields) in &partial {
            let (hot, cold): (BTreeSet<String>, BTreeSet<String>) = fields
                .iter()
                .cloned()
                .partition(|field| bulk.contains(field.as_str()));
            if !hot.is_empty() {
                match groups.iter_mut().find(|(set, _)| *set == hot) {
                    Some((_, ids)) => ids.push((*id).clone()),
                    None => groups.push((hot, vec![(*id).clone()])),
                }
            }
            if !cold.is_empty() {
                low.push((*id, cold));
            }
        }
        for (select, ids) in &groups {
            self.push_chunked(&mut requests, intent, ids, Some(select));
        }

        match self.config.low_frequency {
            LowFrequencyStrategy::PerEntity => {
                for (id, fields) in low {
                    requests.push(
                        DataRequest::ids(&intent.entity_type, vec![id.clone()], Some(fields))
                            .scoped_to(intent),
                    );
                }
            }
            LowFrequencyStrategy::MergeAll => {
                let fields: BTreeSet<String> = low.iter().flat_map(|(_, f)| f.iter().cloned()).collect();
                let ids: Vec<EntityId> = low.iter().map(|(id, _)| (*id).clone()).collect();
                self.push_chunked(&mut requests, intent, &ids, Some(&fields));
            }
        }
        requests
    }
}
