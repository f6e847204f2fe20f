//! In-memory binding store.

use super::{BindingStore, QueryBinding, QueryDefinition};
use crate::error::{CacheError, CacheResult};
use crate::schema::Schema;
use crate::types::{EntityId, Interval};
use fractal_codec::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

/// Binding store backed by ordered in-memory maps.
///
/// The schema supplies the relation links used by
/// [`BindingStore::invalidate_by_parent`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBindingStore {
    schema: Arc<Schema>,
    definitions: BTreeMap<String, QueryDefinition>,
    bindings: BTreeMap<(String, String), QueryBinding>,
}

impl MemoryBindingStore {
    /// Creates an empty store without relation knowledge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store resolving relations against `schema`.
    pub fn with_schema(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Number of stored bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    fn key(definition_id: &str, param_hash: &str) -> (String, String) {
        (definition_id.to_string(), param_hash.to_string())
    }

    fn binding_mut(&mut self, definition_id: &str, param_hash: &str) -> CacheResult<&mut QueryBinding> {
        self.bindings
            .get_mut(&Self::key(definition_id, param_hash))
            .ok_or_else(|| CacheError::binding_not_found(definition_id, param_hash))
    }
}

/// Whether a parameter value links to `parent_id` (directly or as a member
/// of an id list).
fn binds_parent(value: &Value, parent_id: &EntityId) -> bool {
    let parent = parent_id.as_str();
    match value {
        Value::Text(id) => id == parent,
        Value::Array(items) => items.iter().any(|item| item.as_text() == Some(parent)),
        _ => false,
    }
}

impl BindingStore for MemoryBindingStore {
    fn get_definition(&self, id: &str) -> Option<&QueryDefinition> {
        self.definitions.get(id)
    }

    fn save_definition(&mut self, definition: QueryDefinition) {
        self.definitions.insert(definition.id.clone(), definition);
    }

    fn all_definitions(&self) -> Vec<&QueryDefinition> {
        self.definitions.values().collect()
    }

    fn get_binding(&self, definition_id: &str, param_hash: &str) -> Option<&QueryBinding> {
        self.bindings.get(&Self::key(definition_id, param_hash))
    }

    fn save_binding(&mut self, binding: QueryBinding) {
        let key = Self::key(&binding.definition_id, &binding.param_hash);
        self.bindings.insert(key, binding);
    }

    fn delete_binding(&mut self, definition_id: &str, param_hash: &str) -> Option<QueryBinding> {
        self.bindings.remove(&Self::key(definition_id, param_hash))
    }

    fn find_bindings_by_definition(&self, definition_id: &str) -> Vec<&QueryBinding> {
        self.bindings
            .values()
            .filter(|b| b.definition_id == definition_id)
            .collect()
    }

    fn all_bindings(&self) -> Vec<&QueryBinding> {
        self.bindings.values().collect()
    }

    fn merge_interval(
        &mut self,
        definition_id: &str,
        param_hash: &str,
        interval: Interval,
        id_map: BTreeMap<usize, EntityId>,
    ) -> CacheResult<()> {
        trace!(definition_id, param_hash, %interval, ids = id_map.len(), "merging interval");
        self.binding_mut(definition_id, param_hash)?
            .merge(interval, id_map)
    }

    fn mark_dirty(&mut self, definition_id: &str, param_hash: &str) -> bool {
        match self.bindings.get_mut(&Self::key(definition_id, param_hash)) {
            Some(binding) => {
                binding.dirty = true;
                true
            }
            None => false,
        }
    }

    fn mark_exhausted(
        &mut self,
        definition_id: &str,
        param_hash: &str,
        last_index: Option<usize>,
    ) -> CacheResult<()> {
        self.binding_mut(definition_id, param_hash)?
            .mark_exhausted(last_index);
        Ok(())
    }

    fn invalidate_by_parent(
        &mut self,
        parent_type: &str,
        parent_id: &EntityId,
        relation: Option<&str>,
    ) -> usize {
        // (definition id, placeholder names bound to the foreign key)
        let mut linked: Vec<(String, Vec<String>)> = Vec::new();
        for rel in self.schema.relations_from(parent_type) {
            if relation.is_some_and(|name| name != rel.key) {
                continue;
            }
            for def in self.definitions.values() {
                if def.entity_type != rel.target_entity {
                    continue;
                }
                let names = def.where_template.linking_placeholders(&rel.foreign_key);
                if !names.is_empty() {
                    linked.push((def.id.clone(), names.into_iter().map(String::from).collect()));
                }
            }
        }

        let mut marked = 0;
        for binding in self.bindings.values_mut() {
            let hit = linked.iter().any(|(def_id, names)| {
                *def_id == binding.definition_id
                    && names.iter().any(|name| {
                        binding
                            .parameters
                            .get(name)
                            .is_some_and(|value| binds_parent(value, parent_id))
                    })
            });
            if hit && !binding.dirty {
                binding.dirty = true;
                marked += 1;
            }
        }
        trace!(parent_type, %parent_id, marked, "invalidated by parent");
        marked
    }

    fn mark_dirty_referencing(&mut self, entity_type: &str, ids: &BTreeSet<EntityId>) -> usize {
        let definitions: BTreeSet<&str> = self
            .definitions
            .values()
            .filter(|d| d.entity_type == entity_type)
            .map(|d| d.id.as_str())
            .collect();

        let mut marked = 0;
        for binding in self.bindings.values_mut() {
            if binding.dirty || !definitions.contains(binding.definition_id.as_str()) {
                continue;
            }
            if ids.iter().any(|id| binding.references(id)) {
                binding.dirty = true;
                marked += 1;
            }
        }
        marked
    }

    fn clear(&mut self) {
        self.definitions.clear();
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterNode;
    use crate::hash::QueryKey;
    use crate::schema::{EntityConfig, RelationConfig};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .with_entity(EntityConfig::new("post", ["title"]))
                .with_entity(EntityConfig::new("comment", ["body", "postId"]))
                .with_relation(RelationConfig::new("comments", "post", "comment", "postId")),
        )
    }

    fn register(store: &mut MemoryBindingStore, key: &QueryKey) {
        store.save_definition(key.definition());
        store.save_binding(QueryBinding::new(
            &key.definition_id,
            &key.param_hash,
            key.params.clone(),
        ));
    }

    fn comments_of(post: &str) -> QueryKey {
        QueryKey::resolve("comment", &[], &FilterNode::eq("postId", post)).unwrap()
    }

    #[test]
    fn merge_requires_binding() {
        let mut store = MemoryBindingStore::new();
        let err = store
            .merge_interval("d", "p", Interval::new(0, 0), BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, CacheError::BindingNotFound { .. }));
    }

    #[test]
    fn window_ids_for_unknown_binding() {
        let store = MemoryBindingStore::new();
        assert_eq!(store.get_window_ids("d", "p", 3, 4), vec![None; 4]);
    }

    #[test]
    fn bindings_share_definition() {
        let mut store = MemoryBindingStore::with_schema(schema());
        let p1 = comments_of("p1");
        let p2 = comments_of("p2");
        register(&mut store, &p1);
        register(&mut store, &p2);

        assert_eq!(store.all_definitions().len(), 1);
        assert_eq!(store.find_bindings_by_definition(&p1.definition_id).len(), 2);
        assert!(store.delete_binding(&p2.definition_id, &p2.param_hash).is_some());
        assert_eq!(store.binding_count(), 1);
    }

    #[test]
    fn invalidate_by_parent_marks_linked_bindings_only() {
        let mut store = MemoryBindingStore::with_schema(schema());
        let p1 = comments_of("p1");
        let p2 = comments_of("p2");
        register(&mut store, &p1);
        register(&mut store, &p2);

        let marked = store.invalidate_by_parent("post", &EntityId::from("p1"), None);
        assert_eq!(marked, 1);
        assert!(store.get_binding(&p1.definition_id, &p1.param_hash).unwrap().dirty);
        assert!(!store.get_binding(&p2.definition_id, &p2.param_hash).unwrap().dirty);

        // Scoped to a relation the parent type does not have.
        assert_eq!(
            store.invalidate_by_parent("post", &EntityId::from("p2"), Some("likes")),
            0
        );
        assert_eq!(
            store.invalidate_by_parent("post", &EntityId::from("p2"), Some("comments")),
            1
        );
    }

    #[test]
    fn invalidate_by_parent_sees_batched_links() {
        let mut store = MemoryBindingStore::with_schema(schema());
        let batch = QueryKey::resolve(
            "comment",
            &[],
            &FilterNode::is_in("postId", vec!["p1".into(), "p3".into()]),
        )
        .unwrap();
        register(&mut store, &batch);

        assert_eq!(
            store.invalidate_by_parent("post", &EntityId::from("p3"), None),
            1
        );
    }

    #[test]
    fn referencing_bindings_are_dirtied() {
        let mut store = MemoryBindingStore::with_schema(schema());
        let p1 = comments_of("p1");
        register(&mut store, &p1);
        store
            .merge_interval(
                &p1.definition_id,
                &p1.param_hash,
                Interval::new(0, 1),
                [(0, EntityId::from("c1")), (1, EntityId::from("c2"))]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        let evicted: BTreeSet<EntityId> = [EntityId::from("c2")].into_iter().collect();
        assert_eq!(store.mark_dirty_referencing("post", &evicted), 0);
        assert_eq!(store.mark_dirty_referencing("comment", &evicted), 1);
    }

    #[test]
    fn clear_empties_store() {
        let mut store = MemoryBindingStore::with_schema(schema());
        register(&mut store, &comments_of("p1"));
        store.clear();
        assert!(store.all_definitions().is_empty());
        assert!(store.all_bindings().is_empty());
    }
}
