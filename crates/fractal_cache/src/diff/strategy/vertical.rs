//! Field-level completeness check.

use crate::pool::EntityPool;
use crate::types::EntityId;
use std::collections::{BTreeSet, HashMap};

/// What an entity lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingFields {
    /// These fields are unknown.
    Fields(BTreeSet<String>),
    /// The record is absent and nothing specific was requested.
    Record,
}

/// Missing fields per entity, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMissingMap {
    entries: Vec<(EntityId, MissingFields)>,
    index: HashMap<EntityId, usize>,
}

impl FieldMissingMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records what `id` lacks, replacing an earlier entry.
    pub fn insert(&mut self, id: EntityId, missing: MissingFields) {
        match self.index.get(&id) {
            Some(&at) => self.entries[at].1 = missing,
            None => {
                self.index.insert(id.clone(), self.entries.len());
                self.entries.push((id, missing));
            }
        }
    }

    /// What `id` lacks.
    pub fn get(&self, id: &EntityId) -> Option<&MissingFields> {
        self.index.get(id).map(|&at| &self.entries[at].1)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &MissingFields)> {
        self.entries.iter().map(|(id, missing)| (id, missing))
    }

    /// Number of incomplete entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether every entity is complete.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decides which fields of listed entities must be fetched.
pub trait VerticalCheckStrategy: Send + Sync {
    /// Compares `required` against the field masks of `ids`.
    fn check(
        &self,
        entity_type: &str,
        ids: &[EntityId],
        required: &BTreeSet<String>,
        pool: &dyn EntityPool,
    ) -> FieldMissingMap;
}

/// Treatment of ids with no cached record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequiredFieldsPolicy {
    /// An absent record misses every required field.
    #[default]
    Strict,
    /// Absent records are skipped.
    Relaxed,
}

/// Configuration for [`DefaultVerticalCheck`].
#[derive(Debug, Clone, Default)]
pub struct VerticalCheckConfig {
    /// Absent-record handling.
    pub required_fields_policy: RequiredFieldsPolicy,
}

impl VerticalCheckConfig {
    /// Sets the absent-record handling.
    #[must_use]
    pub fn with_required_fields_policy(mut self, policy: RequiredFieldsPolicy) -> Self {
        self.required_fields_policy = policy;
        self
    }
}

/// Field-mask based vertical check.
#[derive(Debug, Clone, Default)]
pub struct DefaultVerticalCheck {
    config: VerticalCheckConfig,
}

impl DefaultVerticalCheck {
    /// Creates the check.
    pub fn new(config: VerticalCheckConfig) -> Self {
        Self { config }
    }
}

impl VerticalCheckStrategy for DefaultVerticalCheck {
    fn check(
        &self,
        entity_type: &str,
        ids: &[EntityId],
        required: &BTreeSet<String>,
        pool: &dyn EntityPool,
    ) -> FieldMissingMap {
        let mut missing = FieldMissingMap::new();
        for (id, record) in ids.iter().zip(pool.get_records(entity_type, ids)) {
            match record {
                Some(record) => {
                    let lacking = record.missing_fields(required);
                    if !lacking.is_empty() {
                        missing.insert(id.clone(), MissingFields::Fields(lacking));
                    }
                }
                None => match self.config.required_fields_policy {
                    RequiredFieldsPolicy::Strict if required.is_empty() => {
                        missing.insert(id.clone(), MissingFields::Record);
                    }
                    RequiredFieldsPolicy::Strict => {
                        missing.insert(id.clone(), MissingFields::Fields(required.clone()));
                    }
                    RequiredFieldsPolicy::Relaxed => {}
                },
            }
        }
        missing
    }
}
