//! Reading cached results.
//!
//! [`assemble`] turns a fully cached intent into nested entity views. It
//! never plans or fetches: any gap in a window, a missing field or a child
//! list that is not cached makes the whole result unavailable.
//!
//! Includes follow their join flag. A required include drops parents whose
//! child list is empty; an optional one keeps them with no children.

use crate::binding::BindingStore;
use crate::error::CacheResult;
use crate::hash::QueryKey;
use crate::intent::Intent;
use crate::pool::EntityPool;
use crate::schema::Schema;
use crate::types::EntityId;
use fractal_codec::Value;
use serde::Serialize;
use std::collections::BTreeMap;

/// One cached entity with its included relations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    /// Entity id.
    pub id: EntityId,
    /// Selected fields, or every known field without a selection.
    pub data: BTreeMap<String, Value>,
    /// Included children by relation name.
    pub relations: BTreeMap<String, Vec<EntityView>>,
}

/// Assembles the cached result of `intent`.
///
/// Returns `Ok(None)` when anything the intent needs is not cached.
///
/// # Errors
///
/// Returns a hashing error when a filter literal cannot be keyed.
pub fn assemble(
    intent: &Intent,
    schema: &Schema,
    pool: &dyn EntityPool,
    bindings: &dyn BindingStore,
) -> CacheResult<Option<Vec<EntityView>>> {
    let key = QueryKey::resolve(&intent.entity_type, &intent.order_by, &intent.filter)?;
    let Some(binding) = bindings
        .get_binding(&key.definition_id, &key.param_hash)
        .filter(|b| !b.dirty)
    else {
        return Ok(None);
    };

    let requested_end = intent.take.map(|take| intent.skip.saturating_add(take));
    let end = match (binding.known_len(), requested_end) {
        (Some(len), Some(end)) => len.min(end),
        (Some(len), None) => len,
        (None, Some(end)) => end,
        // An open window over a list of unknown length is never complete.
        (None, None) => return Ok(None),
    };

    let required = intent.required_fields(schema);
    let mut views = Vec::new();
    for index in intent.skip..end.max(intent.skip) {
        let Some(id) = binding.index_to_id().get(&index) else {
            return Ok(None);
        };
        let Some(record) = pool.get_record(&intent.entity_type, id) else {
            return Ok(None);
        };
        if !record.missing_fields(&required).is_empty() {
            return Ok(None);
        }
        let data = match &intent.select {
            Some(fields) => record
                .data()
                .iter()
                .filter(|(field, _)| fields.contains(*field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
            None => record.data().clone(),
        };

        let mut relations = BTreeMap::new();
        let mut joined = true;
        for relation in &intent.include {
            let child = relation.child_intent(id.as_str());
            let Some(children) = assemble(&child, schema, pool, bindings)? else {
                return Ok(None);
            };
            if relation.required && children.is_empty() {
                joined = false;
            }
            relations.insert(relation.relation_name.clone(), children);
        }
        if joined {
            views.push(EntityView {
                id: id.clone(),
                data,
                relations,
            });
        }
    }
    Ok(Some(views))
}
