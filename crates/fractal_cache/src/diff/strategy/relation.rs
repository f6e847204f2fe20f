//! Relation request generation.

use crate::binding::QueryDefinition;
use crate::diff::request::{DataRequest, ParentBatchEntry, RelationMeta, RequestMetadata, RequestMode};
use crate::filter::FilterNode;
use crate::intent::RelationIntent;
use fractal_codec::Value;
use std::collections::BTreeSet;

/// Turns parents with uncached child windows into list requests.
pub trait RelationRequestStrategy: Send + Sync {
    /// Requests filling the child windows of `parents`.
    ///
    /// `definition` is the per-parent child query shape the results belong
    /// to.
    fn generate_requests(
        &self,
        parent_type: &str,
        relation: &RelationIntent,
        definition: &QueryDefinition,
        parents: &[ParentBatchEntry],
    ) -> Vec<DataRequest>;
}

/// How parents share relation requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationBatching {
    /// No grouping. Each parent is fetched on its own, producing the same
    /// requests as [`RelationBatching::ByParent`].
    None,
    /// One request per parent.
    ByParent,
    /// Parents are grouped behind a membership filter on the foreign key.
    #[default]
    ByParentBatch,
}

/// Configuration for [`DefaultRelationRequest`].
#[derive(Debug, Clone)]
pub struct RelationRequestConfig {
    /// Parent grouping.
    pub batching: RelationBatching,
    /// Most parents per batched request.
    pub max_batch_size: usize,
}

impl RelationRequestConfig {
    /// Sets the parent grouping.
    #[must_use]
    pub fn with_batching(mut self, batching: RelationBatching) -> Self {
        self.batching = batching;
        self
    }

    /// Sets the parent cap per batched request.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }
}

impl Default for RelationRequestConfig {
    fn default() -> Self {
        Self {
            batching: RelationBatching::ByParentBatch,
            max_batch_size: 50,
        }
    }
}

/// Per-parent or batched relation requests.
#[derive(Debug, Clone, Default)]
pub struct DefaultRelationRequest {
    config: RelationRequestConfig,
}

impl DefaultRelationRequest {
    /// Creates the strategy.
    pub fn new(config: RelationRequestConfig) -> Self {
        Self { config }
    }
}

/// The child selection plus the foreign key, so results can be grouped by
/// parent.
fn select_with_key(relation: &RelationIntent) -> Option<BTreeSet<String>> {
    relation.intent.select.as_ref().map(|fields| {
        let mut fields = fields.clone();
        fields.insert(relation.foreign_key.clone());
        fields
    })
}

fn relation_meta(
    parent_type: &str,
    relation: &RelationIntent,
    definition: &QueryDefinition,
    batched: bool,
) -> RelationMeta {
    RelationMeta {
        parent_type: parent_type.to_string(),
        relation_name: relation.relation_name.clone(),
        foreign_key: relation.foreign_key.clone(),
        definition: definition.clone(),
        batched,
    }
}

impl RelationRequestStrategy for DefaultRelationRequest {
    fn generate_requests(
        &self,
        parent_type: &str,
        relation: &RelationIntent,
        definition: &QueryDefinition,
        parents: &[ParentBatchEntry],
    ) -> Vec<DataRequest> {
        let select = select_with_key(relation);
        let child = &relation.intent;

        if self.config.batching != RelationBatching::ByParentBatch {
            return parents
                .iter()
                .map(|parent| {
                    let intent = relation.child_intent(parent.parent_id.as_str());
                    let mut request = DataRequest::page(&intent, intent.skip, intent.take);
                    request.select.clone_from(&select);
                    request.metadata = RequestMetadata {
                        parent_batch: vec![parent.clone()],
                        relation: Some(relation_meta(parent_type, relation, definition, false)),
                    };
                    request
                })
                .collect();
        }

        parents
            .chunks(self.config.max_batch_size.max(1))
            .map(|group| {
                let ids: Vec<Value> = group
                    .iter()
                    .map(|p| Value::from(p.parent_id.as_str()))
                    .collect();
                // Each parent's window is a prefix of its own child list.
                let take = group.iter().try_fold(0usize, |sum, p| {
                    p.original_take
                        .map(|take| sum.saturating_add(p.original_skip.saturating_add(take)))
                });
                DataRequest {
                    entity_type: child.entity_type.clone(),
                    mode: RequestMode::Pagination { skip: 0, take },
                    filter: child
                        .filter
                        .clone()
                        .and(FilterNode::is_in(relation.foreign_key.as_str(), ids)),
                    order_by: child.order_by.clone(),
                    select: select.clone(),
                    metadata: RequestMetadata {
                        parent_batch: group.to_vec(),
                        relation: Some(relation_meta(parent_type, relation, definition, true)),
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterParams;
    use crate::hash::QueryKey;
    use crate::intent::Intent;
    use crate::types::EntityId;

    fn relation() -> RelationIntent {
        RelationIntent::new(
            "comments",
            "postId",
            Intent::new("comment").with_take(3).with_select(["body"]),
        )
    }

    fn parents(n: usize) -> Vec<ParentBatchEntry> {
        (0..n)
            .map(|i| ParentBatchEntry {
                parent_id: EntityId::new(format!("p{i}")),
                param_hash: format!("h{i}"),
                parameters: FilterParams::new(),
                original_skip: i,
                original_take: Some(3),
            })
            .collect()
    }

    fn definition() -> QueryDefinition {
        let rel = relation();
        let child = rel.child_intent("p0");
        QueryKey::resolve(&child.entity_type, &child.order_by, &child.filter)
            .unwrap()
            .definition()
    }

    #[test]
    fn batches_parents_in_groups() {
        let strategy = DefaultRelationRequest::new(
            RelationRequestConfig::default()
                .with_batching(RelationBatching::ByParentBatch)
                .with_max_batch_size(2),
        );
        let requests = strategy.generate_requests("post", &relation(), &definition(), &parents(5));

        let sizes: Vec<usize> = requests.iter().map(|r| r.metadata.parent_batch.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let first = &requests[0];
        let ids: Vec<&str> = first
            .metadata
            .parent_batch
            .iter()
            .map(|p| p.parent_id.as_str())
            .collect();
        assert_eq!(ids, vec!["p0", "p1"]);
        // p0 needs 0 + 3 rows and p1 needs 1 + 3.
        assert_eq!(first.mode, RequestMode::Pagination { skip: 0, take: Some(7) });
        assert!(first.filter.to_string().contains("postId IN"));
        assert!(first.select.as_ref().unwrap().contains("postId"));
        assert!(first.metadata.relation.as_ref().unwrap().batched);
    }

    #[test]
    fn unbounded_parent_makes_batch_unbounded() {
        let mut entries = parents(2);
        entries[1].original_take = None;
        let requests = DefaultRelationRequest::default().generate_requests(
            "post",
            &relation(),
            &definition(),
            &entries,
        );
        assert_eq!(requests[0].mode, RequestMode::Pagination { skip: 0, take: None });
    }

    #[test]
    fn per_parent_requests() {
        let strategy = DefaultRelationRequest::new(
            RelationRequestConfig::default().with_batching(RelationBatching::ByParent),
        );
        let requests = strategy.generate_requests("post", &relation(), &definition(), &parents(3));

        assert_eq!(requests.len(), 3);
        let second = &requests[1];
        assert_eq!(second.mode, RequestMode::Pagination { skip: 0, take: Some(3) });
        assert!(second.filter.to_string().contains("postId = \"p1\""));
        assert_eq!(second.metadata.parent_batch.len(), 1);
        assert!(!second.metadata.relation.as_ref().unwrap().batched);
    }

    #[test]
    fn unbatched_matches_per_parent() {
        let generate = |batching| {
            DefaultRelationRequest::new(RelationRequestConfig::default().with_batching(batching))
                .generate_requests("post", &relation(), &definition(), &parents(3))
        };
        let unbatched = generate(RelationBatching::None);
        let per_parent = generate(RelationBatching::ByParent);

        assert_eq!(unbatched.len(), 3);
        for (a, b) in unbatched.iter().zip(&per_parent) {
            assert_eq!(a.mode, b.mode);
            assert_eq!(a.filter.to_string(), b.filter.to_string());
        }
    }

    #[test]
    fn no_parents_no_requests() {
        assert!(DefaultRelationRequest::default()
            .generate_requests("post", &relation(), &definition(), &[])
            .is_empty());
    }
}
