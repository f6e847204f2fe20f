//! In-memory network adapter.
//!
//! [`MemoryAdapter`] answers requests from a fixed [`Dataset`] the way a
//! well-behaved backend would: filter, sort with an id tiebreak, slice,
//! project. It is used by tests, benchmarks and the `simulate` command.

use crate::adapter::{EntityData, EntityFetchRequest, IdListRequest, IdListResponse, NetworkAdapter};
use crate::error::{SyncError, SyncResult};
use fractal_cache::order::compare_rows;
use fractal_cache::{EntityId, Schema, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Backend contents: every entity, by type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Entities by type.
    pub entities: BTreeMap<String, Vec<EntityData>>,
}

impl Dataset {
    /// Creates an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity.
    #[must_use]
    pub fn with_entity<I, K>(mut self, entity_type: &str, id: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.insert(EntityData {
            id: EntityId::from(id),
            entity_type: entity_type.to_string(),
            data: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        });
        self
    }

    /// Adds or replaces an entity.
    pub fn insert(&mut self, entity: EntityData) {
        let rows = self.entities.entry(entity.entity_type.clone()).or_default();
        match rows.iter_mut().find(|row| row.id == entity.id) {
            Some(row) => *row = entity,
            None => rows.push(entity),
        }
    }

    /// Removes an entity. Returns whether it existed.
    pub fn remove(&mut self, entity_type: &str, id: &EntityId) -> bool {
        let Some(rows) = self.entities.get_mut(entity_type) else {
            return false;
        };
        let before = rows.len();
        rows.retain(|row| &row.id != id);
        rows.len() != before
    }

    /// Looks up an entity.
    pub fn get(&self, entity_type: &str, id: &EntityId) -> Option<&EntityData> {
        self.entities
            .get(entity_type)?
            .iter()
            .find(|row| &row.id == id)
    }

    /// Total number of entities.
    pub fn len(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    /// Whether the dataset holds no entity.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request counters of a [`MemoryAdapter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    /// `fetch_ids` calls answered.
    pub id_requests: u64,
    /// `fetch_entities` calls answered.
    pub entity_requests: u64,
}

/// A [`NetworkAdapter`] serving a [`Dataset`] from memory.
pub struct MemoryAdapter {
    schema: Arc<Schema>,
    dataset: RwLock<Dataset>,
    offline: AtomicBool,
    id_requests: AtomicU64,
    entity_requests: AtomicU64,
}

impl MemoryAdapter {
    /// Creates an adapter over `dataset`.
    pub fn new(schema: Arc<Schema>, dataset: Dataset) -> Self {
        Self {
            schema,
            dataset: RwLock::new(dataset),
            offline: AtomicBool::new(false),
            id_requests: AtomicU64::new(0),
            entity_requests: AtomicU64::new(0),
        }
    }

    /// Makes every request fail with a retryable error while `offline`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Applies `f` to the served dataset.
    pub fn update_dataset(&self, f: impl FnOnce(&mut Dataset)) {
        f(&mut self.dataset.write());
    }

    /// Requests answered so far.
    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            id_requests: self.id_requests.load(Ordering::SeqCst),
            entity_requests: self.entity_requests.load(Ordering::SeqCst),
        }
    }

    /// Total requests answered so far.
    pub fn request_count(&self) -> u64 {
        let stats = self.stats();
        stats.id_requests + stats.entity_requests
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::adapter_retryable("backend unreachable"));
        }
        Ok(())
    }

    /// Every id of the sorted, filtered list.
    fn list(&self, request: &IdListRequest) -> Vec<EntityId> {
        let dataset = self.dataset.read();
        let Some(rows) = dataset.entities.get(&request.entity_type) else {
            return Vec::new();
        };
        let mut matched: Vec<Row<'_>> = rows
            .iter()
            .map(|data| (data, Value::from(data.id.as_str())))
            .filter(|row| request.filter.matches(&|field| field_of(row, field)) == Some(true))
            .collect();
        matched.sort_by(|a, b| {
            compare_rows(&request.order_by, a, b, field_of).then_with(|| a.0.id.cmp(&b.0.id))
        });
        let ids: Vec<EntityId> = matched.into_iter().map(|(data, _)| data.id.clone()).collect();
        ids
    }

    fn project(&self, row: &EntityData, fields: Option<&BTreeSet<String>>) -> EntityData {
        let wanted = match fields {
            Some(fields) => fields.clone(),
            None => self.schema.fields_of(&row.entity_type),
        };
        let data = wanted
            .into_iter()
            .map(|field| {
                let value = row.data.get(&field).cloned().unwrap_or(Value::Null);
                (field, value)
            })
            .collect();
        EntityData {
            id: row.id.clone(),
            entity_type: row.entity_type.clone(),
            data,
        }
    }
}

/// An entity paired with its id as a value.
type Row<'a> = (&'a EntityData, Value);

/// Field lookup with `id` resolving to the entity id.
fn field_of<'r>(row: &'r Row<'_>, field: &str) -> Option<&'r Value> {
    if field == "id" {
        Some(&row.1)
    } else {
        row.0.data.get(field)
    }
}

impl NetworkAdapter for MemoryAdapter {
    fn fetch_ids(&self, request: &IdListRequest) -> SyncResult<IdListResponse> {
        self.check_online()?;
        self.id_requests.fetch_add(1, Ordering::SeqCst);

        let all = self.list(request);
        let total = all.len();
        let ids: Vec<EntityId> = all
            .into_iter()
            .skip(request.skip)
            .take(request.take.unwrap_or(usize::MAX))
            .collect();
        let has_more = request.skip.saturating_add(ids.len()) < total;
        trace!(
            entity_type = %request.entity_type,
            skip = request.skip,
            returned = ids.len(),
            total,
            "served id list"
        );
        Ok(IdListResponse {
            ids,
            total: Some(total),
            has_more,
        })
    }

    fn fetch_entities(&self, request: &EntityFetchRequest) -> SyncResult<Vec<EntityData>> {
        self.check_online()?;
        self.entity_requests.fetch_add(1, Ordering::SeqCst);

        let dataset = self.dataset.read();
        let rows = request
            .ids
            .iter()
            .filter_map(|id| dataset.get(&request.entity_type, id))
            .map(|row| self.project(row, request.fields.as_ref()))
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fractal_cache::{EntityConfig, FilterNode, FilterOp, OrderSpec};

    fn adapter() -> MemoryAdapter {
        let schema = Arc::new(
            Schema::new().with_entity(EntityConfig::new("user", ["name", "age", "team"])),
        );
        let dataset = Dataset::new()
            .with_entity("user", "u1", [("name", Value::from("ann")), ("age", Value::from(31))])
            .with_entity("user", "u2", [("name", Value::from("bob")), ("age", Value::from(25))])
            .with_entity("user", "u3", [("name", Value::from("cid")), ("age", Value::from(31))])
            .with_entity("user", "u4", [("name", Value::from("dee")), ("age", Value::from(40))]);
        MemoryAdapter::new(schema, dataset)
    }

    fn list(filter: FilterNode, order_by: Vec<OrderSpec>, skip: usize, take: Option<usize>) -> IdListRequest {
        IdListRequest {
            entity_type: "user".into(),
            filter,
            order_by,
            skip,
            take,
        }
    }

    fn names(response: &IdListResponse) -> Vec<&str> {
        response.ids.iter().map(EntityId::as_str).collect()
    }

    #[test]
    fn sorts_with_id_tiebreak() {
        let adapter = adapter();
        let response = adapter
            .fetch_ids(&list(FilterNode::all(), vec![OrderSpec::desc("age")], 0, None))
            .unwrap();
        assert_eq!(names(&response), vec!["u4", "u1", "u3", "u2"]);
        assert_eq!(response.total, Some(4));
        assert!(!response.has_more);
    }

    #[test]
    fn slices_and_reports_more() {
        let adapter = adapter();
        let filter = FilterNode::compare("age", FilterOp::Gt, 26);
        let response = adapter.fetch_ids(&list(filter, Vec::new(), 1, Some(1))).unwrap();
        assert_eq!(names(&response), vec!["u3"]);
        assert_eq!(response.total, Some(3));
        assert!(response.has_more);

        let past_end = adapter
            .fetch_ids(&list(FilterNode::all(), Vec::new(), 10, Some(5)))
            .unwrap();
        assert!(past_end.ids.is_empty());
        assert!(!past_end.has_more);
    }

    #[test]
    fn filters_on_id() {
        let adapter = adapter();
        let filter = FilterNode::is_in("id", vec!["u2".into(), "u4".into()]);
        let response = adapter.fetch_ids(&list(filter, Vec::new(), 0, None)).unwrap();
        assert_eq!(names(&response), vec!["u2", "u4"]);
    }

    #[test]
    fn projects_fields() {
        let adapter = adapter();
        let request = EntityFetchRequest {
            entity_type: "user".into(),
            ids: vec!["u2".into(), "missing".into(), "u1".into()],
            fields: Some(["name".to_string()].into_iter().collect()),
        };
        let rows = adapter.fetch_entities(&request).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id.as_str(), "u2");
        assert_eq!(rows[0].data.keys().collect::<Vec<_>>(), vec!["name"]);

        // Whole records carry every schema field, null when unset.
        let whole = adapter
            .fetch_entities(&EntityFetchRequest {
                fields: None,
                ..request
            })
            .unwrap();
        assert_eq!(whole[0].data.get("team"), Some(&Value::Null));
        assert_eq!(whole[0].data.len(), 3);
    }

    #[test]
    fn offline_requests_fail_retryably() {
        let adapter = adapter();
        adapter.set_offline(true);
        let err = adapter
            .fetch_ids(&list(FilterNode::all(), Vec::new(), 0, None))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(adapter.request_count(), 0);

        adapter.set_offline(false);
        adapter.fetch_ids(&list(FilterNode::all(), Vec::new(), 0, None)).unwrap();
        assert_eq!(adapter.stats().id_requests, 1);
    }

    #[test]
    fn dataset_edits_are_served() {
        let adapter = adapter();
        adapter.update_dataset(|dataset| {
            assert!(dataset.remove("user", &EntityId::from("u1")));
            assert!(!dataset.remove("user", &EntityId::from("u1")));
        });
        let response = adapter
            .fetch_ids(&list(FilterNode::all(), Vec::new(), 0, None))
            .unwrap();
        assert_eq!(response.total, Some(3));
    }

    #[test]
    fn dataset_json_shape() {
        let dataset = Dataset::new().with_entity("user", "u1", [("name", Value::from("ann"))]);
        let json = serde_json::to_value(&dataset).unwrap();
        assert_eq!(json["entities"]["user"][0]["id"], "u1");
        assert_eq!(json["entities"]["user"][0]["data"]["name"], "ann");
        let back: Dataset = serde_json::from_value(json).unwrap();
        assert_eq!(back, dataset);
    }
}
