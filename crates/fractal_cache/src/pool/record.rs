//! Partial entity records.

use crate::types::EntityId;
use fractal_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache bookkeeping attached to a record.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RecordMeta {
    last_access: AtomicU64,
    /// Server version of the record, when the backend reports one.
    #[serde(default)]
    pub version: Option<u64>,
    /// Record came from an unconfirmed local mutation.
    #[serde(default)]
    pub is_optimistic: bool,
}

impl RecordMeta {
    /// Last read or write time in milliseconds since the epoch.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Records an access at `now_ms`.
    pub fn touch(&self, now_ms: u64) {
        self.last_access.fetch_max(now_ms, Ordering::Relaxed);
    }
}

impl Clone for RecordMeta {
    fn clone(&self) -> Self {
        Self {
            last_access: AtomicU64::new(self.last_access()),
            version: self.version,
            is_optimistic: self.is_optimistic,
        }
    }
}

impl PartialEq for RecordMeta {
    fn eq(&self, other: &Self) -> bool {
        self.last_access() == other.last_access()
            && self.version == other.version
            && self.is_optimistic == other.is_optimistic
    }
}

/// One partially known entity.
///
/// Only fields named in the field mask are known. A field outside the mask
/// is unknown, never empty, and [`EntityRecord::get`] does not return it
/// even if stale data exists elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    entity_type: String,
    id: EntityId,
    /// Creation time reported by the server.
    #[serde(default)]
    pub created_at: Option<u64>,
    /// Last update time reported by the server.
    #[serde(default)]
    pub updated_at: Option<u64>,
    data: BTreeMap<String, Value>,
    field_mask: BTreeSet<String>,
    #[serde(default)]
    relations: BTreeMap<String, Vec<EntityId>>,
    #[serde(default)]
    meta: RecordMeta,
}

impl EntityRecord {
    /// Creates a record with no known fields.
    pub fn new(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            created_at: None,
            updated_at: None,
            data: BTreeMap::new(),
            field_mask: BTreeSet::new(),
            relations: BTreeMap::new(),
            meta: RecordMeta::default(),
        }
    }

    /// Creates a record whose known fields are exactly `data`.
    pub fn with_data(
        entity_type: impl Into<String>,
        id: EntityId,
        data: BTreeMap<String, Value>,
    ) -> Self {
        let mut record = Self::new(entity_type, id);
        record.merge_data(data);
        record
    }

    /// Entity type.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Entity id.
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Known field values.
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Names of known fields.
    pub fn field_mask(&self) -> &BTreeSet<String> {
        &self.field_mask
    }

    /// Relation name -> ordered target ids.
    pub fn relations(&self) -> &BTreeMap<String, Vec<EntityId>> {
        &self.relations
    }

    /// Cache metadata.
    pub fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    /// Mutable cache metadata.
    pub fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    /// Value of a known field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        if self.field_mask.contains(field) {
            self.data.get(field)
        } else {
            None
        }
    }

    /// Whether `field` is known.
    pub fn has_field(&self, field: &str) -> bool {
        self.field_mask.contains(field)
    }

    /// Fields of `required` that are not known.
    pub fn missing_fields(&self, required: &BTreeSet<String>) -> BTreeSet<String> {
        required.difference(&self.field_mask).cloned().collect()
    }

    /// Sets a field and marks it known.
    pub fn set_field(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        self.field_mask.insert(field.clone());
        self.data.insert(field, value);
    }

    /// Sets every field in `data` and marks them known.
    pub fn merge_data(&mut self, data: BTreeMap<String, Value>) {
        for (field, value) in data {
            self.set_field(field, value);
        }
    }

    /// Forgets a field. Returns whether it was known.
    pub fn clear_field(&mut self, field: &str) -> bool {
        self.data.remove(field);
        self.field_mask.remove(field)
    }

    /// Replaces the target ids of a relation.
    pub fn set_relation(&mut self, relation: impl Into<String>, targets: Vec<EntityId>) {
        self.relations.insert(relation.into(), targets);
    }

    /// Whether `data` holds a value for exactly the fields in the mask.
    pub fn is_sound(&self) -> bool {
        self.data.len() == self.field_mask.len()
            && self.data.keys().all(|k| self.field_mask.contains(k))
    }
}
