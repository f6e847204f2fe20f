//! Merging fetch results back into the cache.
//!
//! Results of one request are merged under a single write lock, so readers
//! never observe a binding that points at ids whose records are not yet in
//! the pool.

use crate::adapter::{EntityData, IdListResponse};
use crate::error::{SyncError, SyncResult};
use fractal_cache::{
    now_ms, CacheContext, CacheState, DataRequest, EntityId, EntityRecord, FilterParams, Interval,
    ParentBatchEntry, QueryBinding, QueryDefinition, QueryKey, RelationMeta, RequestMode,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{trace, warn};

/// Everything the backend returned for one plan request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    /// Id list slice, for pagination requests.
    pub ids: Option<IdListResponse>,
    /// Entity fields.
    pub entities: Vec<EntityData>,
}

/// Counts of one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entity records inserted or updated.
    pub entities: usize,
    /// List positions merged into bindings.
    pub positions: usize,
    /// Bindings written.
    pub bindings: usize,
}

impl ReconcileReport {
    fn absorb(&mut self, other: ReconcileReport) {
        self.entities += other.entities;
        self.positions += other.positions;
        self.bindings += other.bindings;
    }
}

/// Merges backend responses into cache state.
pub trait Reconciler: Send + Sync {
    /// Merges an id list slice into the binding of the request's list.
    fn reconcile_ids(
        &self,
        request: &DataRequest,
        response: &IdListResponse,
    ) -> SyncResult<ReconcileReport>;

    /// Inserts or extends entity records.
    fn reconcile_entities(&self, entities: &[EntityData]) -> SyncResult<ReconcileReport>;

    /// Attributes relation children to the bindings of their parents.
    fn reconcile_relation(
        &self,
        request: &DataRequest,
        response: &IdListResponse,
        children: &[EntityData],
    ) -> SyncResult<ReconcileReport>;

    /// Merges everything returned for `request`.
    fn reconcile(
        &self,
        request: &DataRequest,
        response: &FetchResponse,
    ) -> SyncResult<ReconcileReport> {
        let mut report = self.reconcile_entities(&response.entities)?;
        if let Some(ids) = &response.ids {
            let listed = if request.metadata.relation.is_some() {
                self.reconcile_relation(request, ids, &response.entities)?
            } else {
                self.reconcile_ids(request, ids)?
            };
            report.absorb(listed);
        }
        Ok(report)
    }
}

/// The [`Reconciler`] writing into a [`CacheContext`].
pub struct CacheReconciler {
    context: Arc<CacheContext>,
}

impl CacheReconciler {
    /// Creates a reconciler for `context`.
    pub fn new(context: Arc<CacheContext>) -> Self {
        Self { context }
    }

    /// The cache written to.
    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }
}

impl Reconciler for CacheReconciler {
    fn reconcile_ids(
        &self,
        request: &DataRequest,
        response: &IdListResponse,
    ) -> SyncResult<ReconcileReport> {
        let mut state = self.context.write();
        merge_list(&mut state, request, response)
    }

    fn reconcile_entities(&self, entities: &[EntityData]) -> SyncResult<ReconcileReport> {
        let mut state = self.context.write();
        Ok(merge_entities(&mut state, entities))
    }

    fn reconcile_relation(
        &self,
        request: &DataRequest,
        response: &IdListResponse,
        children: &[EntityData],
    ) -> SyncResult<ReconcileReport> {
        let mut state = self.context.write();
        merge_relation(&mut state, request, response, children)
    }

    fn reconcile(
        &self,
        request: &DataRequest,
        response: &FetchResponse,
    ) -> SyncResult<ReconcileReport> {
        let mut state = self.context.write();
        let mut report = merge_entities(&mut state, &response.entities);
        if let Some(ids) = &response.ids {
            let listed = if request.metadata.relation.is_some() {
                merge_relation(&mut state, request, ids, &response.entities)?
            } else {
                merge_list(&mut state, request, ids)?
            };
            report.absorb(listed);
        }
        trace!(
            entity_type = %request.entity_type,
            entities = report.entities,
            positions = report.positions,
            "reconciled request"
        );
        Ok(report)
    }
}

fn merge_entities(state: &mut CacheState, entities: &[EntityData]) -> ReconcileReport {
    for entity in entities {
        let mut fresh = Some(entity.data.clone());
        let updated = state
            .pool
            .update_record(&entity.entity_type, &entity.id, &mut |record| {
                if let Some(data) = fresh.take() {
                    record.merge_data(data);
                }
                record.meta_mut().is_optimistic = false;
            });
        if !updated {
            state.pool.insert_record(EntityRecord::with_data(
                entity.entity_type.as_str(),
                entity.id.clone(),
                entity.data.clone(),
            ));
        }
    }
    ReconcileReport {
        entities: entities.len(),
        ..ReconcileReport::default()
    }
}

/// Window of an id-list request: `(skip, take)`.
fn window(request: &DataRequest) -> SyncResult<(usize, Option<usize>)> {
    match request.mode {
        RequestMode::Pagination { skip, take } => Ok((skip, take)),
        RequestMode::Ids { .. } => Err(SyncError::protocol(format!(
            "id list returned for an id-mode {} request",
            request.entity_type
        ))),
    }
}

fn merge_list(
    state: &mut CacheState,
    request: &DataRequest,
    response: &IdListResponse,
) -> SyncResult<ReconcileReport> {
    let (skip, take) = window(request)?;
    let key = QueryKey::resolve(&request.entity_type, &request.order_by, &request.filter)?;
    let definition = key.definition();
    let mut binding = load_binding(state, &definition, &key.param_hash, &key.params);

    let short = take.is_some_and(|take| response.ids.len() < take);
    let positions = apply_slice(&mut binding, skip, &response.ids, short || !response.has_more)?;
    state.bindings.save_binding(binding);
    Ok(ReconcileReport {
        positions,
        bindings: 1,
        ..ReconcileReport::default()
    })
}

fn merge_relation(
    state: &mut CacheState,
    request: &DataRequest,
    response: &IdListResponse,
    children: &[EntityData],
) -> SyncResult<ReconcileReport> {
    let Some(relation) = &request.metadata.relation else {
        return merge_list(state, request, response);
    };
    let (skip, take) = window(request)?;
    let mut report = ReconcileReport::default();

    if !relation.batched {
        let short = take.is_some_and(|take| response.ids.len() < take);
        let exhausted = short || !response.has_more;
        for parent in &request.metadata.parent_batch {
            report.absorb(attribute(state, relation, parent, skip, &response.ids, exhausted)?);
        }
        return Ok(report);
    }

    let by_id: HashMap<&EntityId, &EntityData> = children.iter().map(|c| (&c.id, c)).collect();
    let mut grouped: BTreeMap<String, Vec<EntityId>> = BTreeMap::new();
    for id in &response.ids {
        let Some(child) = by_id.get(id) else {
            warn!(%id, relation = %relation.relation_name, "listed child was not returned");
            continue;
        };
        let parent = child
            .data
            .get(&relation.foreign_key)
            .and_then(|v| v.as_text())
            .ok_or_else(|| {
                SyncError::protocol(format!(
                    "child {id} of {} lacks foreign key {}",
                    relation.relation_name, relation.foreign_key
                ))
            })?;
        grouped.entry(parent.to_string()).or_default().push(id.clone());
    }

    // A batched slice starts at zero, so each parent's share is a prefix of
    // its own list.
    let empty = Vec::new();
    for parent in &request.metadata.parent_batch {
        let ids = grouped.get(parent.parent_id.as_str()).unwrap_or(&empty);
        report.absorb(attribute(state, relation, parent, 0, ids, !response.has_more)?);
    }
    Ok(report)
}

/// Writes one parent's slice of children to its binding and edges.
fn attribute(
    state: &mut CacheState,
    relation: &RelationMeta,
    parent: &ParentBatchEntry,
    skip: usize,
    ids: &[EntityId],
    exhausted: bool,
) -> SyncResult<ReconcileReport> {
    let definition = &relation.definition;
    let mut binding = load_binding(state, definition, &parent.param_hash, &parent.parameters);
    let positions = apply_slice(&mut binding, skip, ids, exhausted)?;

    let edges = binding.prefix_ids();
    let complete = binding.known_len() == Some(edges.len());
    state.bindings.save_binding(binding);

    let name = relation.relation_name.as_str();
    state
        .pool
        .update_record(&relation.parent_type, &parent.parent_id, &mut |record| {
            record.set_relation(name, edges.clone());
        });
    if complete {
        let filter = definition.where_template.bind(&parent.parameters);
        state
            .relation_predicates
            .set_exhausted(&relation.parent_type, name, &filter);
    } else {
        state.relation_predicates.forget_parent(
            &relation.parent_type,
            name,
            &relation.foreign_key,
            &parent.parent_id,
        );
    }
    Ok(ReconcileReport {
        positions,
        bindings: 1,
        ..ReconcileReport::default()
    })
}

/// The stored binding for a key, registering the definition on first use.
/// Dirty bindings start over.
fn load_binding(
    state: &mut CacheState,
    definition: &QueryDefinition,
    param_hash: &str,
    parameters: &FilterParams,
) -> QueryBinding {
    if state.bindings.get_definition(&definition.id).is_none() {
        state.bindings.save_definition(definition.clone());
    }
    let mut binding = state
        .bindings
        .get_binding(&definition.id, param_hash)
        .cloned()
        .unwrap_or_else(|| QueryBinding::new(&definition.id, param_hash, parameters.clone()));
    if binding.dirty {
        binding.reset();
    }
    binding
}

/// Merges `ids` at `skip` and records exhaustion. Returns positions merged.
fn apply_slice(
    binding: &mut QueryBinding,
    skip: usize,
    ids: &[EntityId],
    exhausted: bool,
) -> SyncResult<usize> {
    if !ids.is_empty() {
        let last = skip + ids.len() - 1;
        let id_map = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (skip + i, id.clone()))
            .collect();
        binding.merge(Interval::new(skip, last), id_map)?;
    }
    if exhausted {
        binding.mark_exhausted((skip + ids.len()).checked_sub(1));
    }
    binding.last_validate_at = Some(now_ms());
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fractal_cache::{
        DiffEngine, EntityConfig, FilterNode, Intent, RelationConfig, RelationIntent, Schema, Value,
    };
    use fractal_cache::diff::strategy::{
        DefaultRelationRequest, RelationBatching, RelationRequestConfig,
    };
    use fractal_cache::DiffConfig;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .with_entity(EntityConfig::new("post", ["title", "authorId"]))
                .with_entity(EntityConfig::new("comment", ["body", "postId"]))
                .with_relation(RelationConfig::new("comments", "post", "comment", "postId")),
        )
    }

    fn entity(entity_type: &str, id: &str, fields: &[(&str, &str)]) -> EntityData {
        EntityData {
            id: EntityId::from(id),
            entity_type: entity_type.to_string(),
            data: fields
                .iter()
                .map(|(k, v)| (k.to_string(), Value::from(*v)))
                .collect(),
        }
    }

    fn ids(names: &[&str]) -> Vec<EntityId> {
        names.iter().map(|n| EntityId::from(*n)).collect()
    }

    fn posts() -> Vec<EntityData> {
        ["p1", "p2", "p3"]
            .iter()
            .map(|id| entity("post", id, &[("title", "t"), ("authorId", "u1")]))
            .collect()
    }

    #[test]
    fn list_slice_then_entities_covers_intent() {
        let schema = schema();
        let context = Arc::new(CacheContext::new(Arc::clone(&schema)));
        let engine = DiffEngine::with_defaults(schema);
        let reconciler = CacheReconciler::new(Arc::clone(&context));
        let intent = Intent::new("post").with_take(5);

        let plan = context.plan(&engine, &intent).unwrap();
        assert_eq!(plan.len(), 1);
        let response = FetchResponse {
            ids: Some(IdListResponse {
                ids: ids(&["p1", "p2", "p3"]),
                total: Some(3),
                has_more: false,
            }),
            entities: posts(),
        };
        let report = reconciler.reconcile(&plan.requests[0], &response).unwrap();
        assert_eq!((report.entities, report.positions, report.bindings), (3, 3, 1));

        assert!(context.plan(&engine, &intent).unwrap().is_empty());
        let stats = context.stats();
        assert_eq!((stats.records, stats.bindings, stats.exhausted_bindings), (3, 1, 1));
    }

    #[test]
    fn entity_fields_extend_existing_records() {
        let context = Arc::new(CacheContext::new(schema()));
        let reconciler = CacheReconciler::new(Arc::clone(&context));

        reconciler
            .reconcile_entities(&[entity("post", "p1", &[("title", "a")])])
            .unwrap();
        reconciler
            .reconcile_entities(&[entity("post", "p1", &[("authorId", "u1")])])
            .unwrap();

        let state = context.read();
        let record = state.pool.get_record("post", &EntityId::from("p1")).unwrap();
        assert_eq!(record.field_mask().len(), 2);
        assert_eq!(record.get("title"), Some(&Value::from("a")));
        assert!(record.is_sound());
    }

    #[test]
    fn dirty_binding_starts_over() {
        let schema = schema();
        let context = Arc::new(CacheContext::new(Arc::clone(&schema)));
        let reconciler = CacheReconciler::new(Arc::clone(&context));
        let request = DataRequest::page(&Intent::new("post"), 0, Some(2));

        let first = IdListResponse {
            ids: ids(&["p1", "p2"]),
            total: None,
            has_more: true,
        };
        reconciler.reconcile_ids(&request, &first).unwrap();
        let key = QueryKey::resolve("post", &[], &FilterNode::all()).unwrap();
        {
            let mut state = context.write();
            assert!(state.bindings.mark_dirty(&key.definition_id, &key.param_hash));
        }

        let second = IdListResponse {
            ids: ids(&["p9"]),
            total: Some(1),
            has_more: false,
        };
        reconciler.reconcile_ids(&request, &second).unwrap();
        let state = context.read();
        let binding = state.bindings.get_binding(&key.definition_id, &key.param_hash).unwrap();
        assert!(!binding.dirty);
        assert!(binding.is_exhausted());
        assert_eq!(binding.prefix_ids(), ids(&["p9"]));
        assert!(binding.last_validate_at.is_some());
    }

    #[test]
    fn empty_slice_past_start_marks_end() {
        let context = Arc::new(CacheContext::new(schema()));
        let reconciler = CacheReconciler::new(Arc::clone(&context));
        let request = DataRequest::page(&Intent::new("post"), 0, Some(10));

        reconciler
            .reconcile_ids(&request, &IdListResponse::default())
            .unwrap();
        let key = QueryKey::resolve("post", &[], &FilterNode::all()).unwrap();
        let state = context.read();
        let binding = state.bindings.get_binding(&key.definition_id, &key.param_hash).unwrap();
        assert_eq!(binding.known_len(), Some(0));
    }

    #[test]
    fn empty_late_page_leaves_earlier_pages_uncached() {
        let schema = schema();
        let context = Arc::new(CacheContext::new(Arc::clone(&schema)));
        let engine = DiffEngine::with_defaults(schema);
        let reconciler = CacheReconciler::new(Arc::clone(&context));

        let late = DataRequest::page(&Intent::new("post"), 10, Some(5));
        let empty = IdListResponse {
            ids: Vec::new(),
            total: None,
            has_more: false,
        };
        reconciler.reconcile_ids(&late, &empty).unwrap();

        let plan = context.plan(&engine, &Intent::new("post").with_take(10)).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(
            plan.requests[0].mode,
            RequestMode::Pagination {
                skip: 0,
                take: Some(10)
            }
        );
        assert!(context
            .plan(&engine, &Intent::new("post").with_skip(10).with_take(5))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn id_list_for_id_request_is_rejected() {
        let context = Arc::new(CacheContext::new(schema()));
        let reconciler = CacheReconciler::new(context);
        let request = DataRequest::ids("post", ids(&["p1"]), None);
        let err = reconciler
            .reconcile_ids(&request, &IdListResponse::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    fn relation_engine(schema: Arc<Schema>) -> DiffEngine {
        let config = DiffConfig::default().with_relation(DefaultRelationRequest::new(
            RelationRequestConfig::default().with_batching(RelationBatching::ByParentBatch),
        ));
        DiffEngine::new(config, schema)
    }

    #[test]
    fn batched_children_are_split_by_parent() {
        let schema = schema();
        let context = Arc::new(CacheContext::new(Arc::clone(&schema)));
        let engine = relation_engine(Arc::clone(&schema));
        let reconciler = CacheReconciler::new(Arc::clone(&context));
        let intent = Intent::new("post").with_take(3).with_include(RelationIntent::new(
            "comments",
            "postId",
            Intent::new("comment").with_take(2),
        ));

        // Round one lists the posts.
        let plan = context.plan(&engine, &intent).unwrap();
        assert_eq!(plan.len(), 1);
        let listed = FetchResponse {
            ids: Some(IdListResponse {
                ids: ids(&["p1", "p2", "p3"]),
                total: Some(3),
                has_more: false,
            }),
            entities: posts(),
        };
        reconciler.reconcile(&plan.requests[0], &listed).unwrap();

        // Round two batches the children of every post.
        let plan = context.plan(&engine, &intent).unwrap();
        let relation_requests: Vec<&DataRequest> = plan
            .requests
            .iter()
            .filter(|r| r.metadata.relation.is_some())
            .collect();
        assert_eq!(relation_requests.len(), 1);
        let request = relation_requests[0];
        assert_eq!(request.metadata.parent_batch.len(), 3);

        let children = vec![
            entity("comment", "c1", &[("body", "x"), ("postId", "p1")]),
            entity("comment", "c2", &[("body", "x"), ("postId", "p2")]),
            entity("comment", "c3", &[("body", "x"), ("postId", "p1")]),
        ];
        let response = FetchResponse {
            ids: Some(IdListResponse {
                ids: ids(&["c1", "c2", "c3"]),
                total: Some(3),
                has_more: false,
            }),
            entities: children,
        };
        let report = reconciler.reconcile(request, &response).unwrap();
        assert_eq!(report.bindings, 3);

        {
            let state = context.read();
            let edges = |id: &str| {
                state
                    .pool
                    .get_record("post", &EntityId::from(id))
                    .unwrap()
                    .relations()
                    .get("comments")
                    .cloned()
            };
            assert_eq!(edges("p1"), Some(ids(&["c1", "c3"])));
            assert_eq!(edges("p2"), Some(ids(&["c2"])));
            assert_eq!(edges("p3"), Some(Vec::new()));
        }
        assert!(context.is_relation_exhausted("post", "comments", &FilterNode::eq("postId", "p1")));
        assert!(context.plan(&engine, &intent).unwrap().is_empty());
    }

    #[test]
    fn reopened_child_list_forgets_its_predicate() {
        let context = Arc::new(CacheContext::new(schema()));
        let reconciler = CacheReconciler::new(Arc::clone(&context));
        let filter = FilterNode::eq("postId", "p1");
        let key = QueryKey::resolve("comment", &[], &filter).unwrap();
        context
            .write()
            .relation_predicates
            .set_exhausted("post", "comments", &filter);

        let mut request = DataRequest::page(&Intent::new("comment").with_filter(filter.clone()), 0, Some(2));
        request.metadata.parent_batch = vec![ParentBatchEntry {
            parent_id: EntityId::from("p1"),
            param_hash: key.param_hash.clone(),
            parameters: key.params.clone(),
            original_skip: 0,
            original_take: Some(2),
        }];
        request.metadata.relation = Some(RelationMeta {
            parent_type: "post".into(),
            relation_name: "comments".into(),
            foreign_key: "postId".into(),
            definition: key.definition(),
            batched: false,
        });
        let response = FetchResponse {
            ids: Some(IdListResponse {
                ids: ids(&["c1", "c2"]),
                total: None,
                has_more: true,
            }),
            entities: Vec::new(),
        };
        reconciler.reconcile(&request, &response).unwrap();
        assert!(!context.is_relation_exhausted("post", "comments", &filter));
    }

    #[test]
    fn batched_child_without_key_is_a_protocol_error() {
        let context = Arc::new(CacheContext::new(schema()));
        let reconciler = CacheReconciler::new(context);
        let intent = Intent::new("comment").with_take(2);
        let key = QueryKey::resolve(
            "comment",
            &[],
            &FilterNode::eq("postId", "p1"),
        )
        .unwrap();
        let mut request = DataRequest::page(&intent, 0, Some(2));
        request.metadata.parent_batch = vec![ParentBatchEntry {
            parent_id: EntityId::from("p1"),
            param_hash: key.param_hash.clone(),
            parameters: key.params.clone(),
            original_skip: 0,
            original_take: Some(2),
        }];
        request.metadata.relation = Some(RelationMeta {
            parent_type: "post".into(),
            relation_name: "comments".into(),
            foreign_key: "postId".into(),
            definition: key.definition(),
            batched: true,
        });
        let response = FetchResponse {
            ids: Some(IdListResponse {
                ids: ids(&["c1"]),
                total: Some(1),
                has_more: false,
            }),
            entities: vec![entity("comment", "c1", &[("body", "x")])],
        };
        let err = reconciler.reconcile(&request, &response).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
