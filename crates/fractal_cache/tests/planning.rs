//! Planning scenarios against a shared cache context.

use fractal_cache::diff::strategy::{
    DefaultRelationRequest, RelationBatching, RelationRequestConfig,
};
use fractal_cache::{
    CacheContext, CacheSnapshot, DataRequest, DiffConfig, DiffEngine, EntityConfig, EntityId,
    EntityRecord, FilterNode, Intent, Interval, QueryBinding, QueryKey, RelationConfig,
    RelationIntent, RequestMode, Schema, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new()
            .with_entity(EntityConfig::new("post", ["title", "status"]))
            .with_entity(EntityConfig::new("comment", ["body", "postId"]))
            .with_relation(RelationConfig::new("comments", "post", "comment", "postId")),
    )
}

fn published() -> Intent {
    Intent::new("post").with_filter(FilterNode::eq("status", "published"))
}

fn post(id: &str) -> EntityRecord {
    let data: BTreeMap<String, Value> = [
        ("title".to_string(), Value::from(format!("title of {id}"))),
        ("status".to_string(), Value::from("published")),
    ]
    .into_iter()
    .collect();
    EntityRecord::with_data("post", EntityId::from(id), data)
}

/// Caches the given slices of `published()`, with complete records.
fn cache_slices(cache: &CacheContext, slices: &[Interval], exhausted_after: Option<usize>) {
    let intent = published();
    let key = QueryKey::resolve(&intent.entity_type, &intent.order_by, &intent.filter).unwrap();
    let mut state = cache.write();
    state.bindings.save_definition(key.definition());
    state.bindings.save_binding(QueryBinding::new(
        &key.definition_id,
        &key.param_hash,
        key.params.clone(),
    ));
    for slice in slices {
        let mut ids = BTreeMap::new();
        for i in slice.start..=slice.end {
            let id = format!("p{i}");
            state.pool.insert_record(post(&id));
            ids.insert(i, EntityId::from(id));
        }
        state
            .bindings
            .merge_interval(&key.definition_id, &key.param_hash, *slice, ids)
            .unwrap();
    }
    if let Some(last) = exhausted_after {
        state
            .bindings
            .mark_exhausted(&key.definition_id, &key.param_hash, Some(last))
            .unwrap();
    }
}

fn windows(requests: &[DataRequest]) -> Vec<(usize, Option<usize>)> {
    requests
        .iter()
        .filter_map(|r| match r.mode {
            RequestMode::Pagination { skip, take } => Some((skip, take)),
            RequestMode::Ids { .. } => None,
        })
        .collect()
}

#[test]
fn window_gaps_become_page_requests() {
    let cache = CacheContext::new(schema());
    let engine = DiffEngine::with_defaults(Arc::clone(cache.schema()));
    cache_slices(&cache, &[Interval::new(0, 4), Interval::new(10, 14)], None);

    let first = cache.plan(&engine, &published().with_take(15)).unwrap();
    assert_eq!(windows(&first.requests), vec![(5, Some(5))]);

    let wider = cache.plan(&engine, &published().with_take(20)).unwrap();
    assert_eq!(windows(&wider.requests), vec![(5, Some(5)), (15, Some(5))]);

    let cached = cache.plan(&engine, &published().with_skip(10).with_take(5)).unwrap();
    assert!(cached.is_empty());
}

#[test]
fn relation_children_are_batched_per_parent_group() {
    let cache = CacheContext::new(schema());
    let engine = DiffEngine::new(
        DiffConfig::default().with_relation(DefaultRelationRequest::new(
            RelationRequestConfig::default()
                .with_batching(RelationBatching::ByParentBatch)
                .with_max_batch_size(2),
        )),
        Arc::clone(cache.schema()),
    );
    cache_slices(&cache, &[Interval::new(0, 4)], Some(4));

    let intent = published().with_take(10).with_include(RelationIntent::new(
        "comments",
        "postId",
        Intent::new("comment").with_take(3),
    ));
    let plan = cache.plan(&engine, &intent).unwrap();

    let batches: Vec<Vec<&str>> = plan
        .requests
        .iter()
        .filter(|r| r.metadata.relation.is_some())
        .map(|r| {
            r.metadata
                .parent_batch
                .iter()
                .map(|p| p.parent_id.as_str())
                .collect()
        })
        .collect();
    assert_eq!(batches, vec![vec!["p0", "p1"], vec!["p2", "p3"], vec!["p4"]]);
    assert_eq!(plan.len(), 3);
}

#[test]
fn exhausted_list_needs_nothing_past_its_end() {
    let cache = CacheContext::new(schema());
    let engine = DiffEngine::with_defaults(Arc::clone(cache.schema()));
    cache_slices(&cache, &[Interval::new(0, 2)], Some(2));

    assert!(cache.plan(&engine, &published().with_take(50)).unwrap().is_empty());
    assert!(cache
        .plan(&engine, &published().with_skip(7).with_take(5))
        .unwrap()
        .is_empty());
}

#[test]
fn restored_snapshot_plans_like_the_original() {
    let cache = CacheContext::new(schema());
    let engine = DiffEngine::with_defaults(Arc::clone(cache.schema()));
    cache_slices(&cache, &[Interval::new(0, 4), Interval::new(10, 14)], None);

    let json = serde_json::to_string(&cache.snapshot()).unwrap();
    let snapshot: CacheSnapshot = serde_json::from_str(&json).unwrap();
    let restored = CacheContext::from_snapshot(snapshot).unwrap();

    let intent = published().with_take(20);
    assert_eq!(
        cache.plan(&engine, &intent).unwrap(),
        restored.plan(&engine, &intent).unwrap()
    );
    assert_eq!(restored.stats(), cache.stats());
}
