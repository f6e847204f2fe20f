//! Cache and invalidation policies.

use crate::binding::{BindingStore, QueryBinding};
use crate::pool::EntityPool;
use crate::types::EntityId;
use std::collections::BTreeSet;
use tracing::debug;

/// Default fraction of incomplete entities above which a missing field is
/// fetched in bulk.
pub const DEFAULT_BULK_FIELD_THRESHOLD: f64 = 0.3;

/// Global cache tuning.
pub trait CachePolicy: Send + Sync {
    /// A field missing on at least this fraction of incomplete entities is
    /// fetched for all of them in one request.
    fn bulk_field_threshold(&self) -> f64 {
        DEFAULT_BULK_FIELD_THRESHOLD
    }
}

/// Policy with a configurable bulk threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultCachePolicy {
    bulk_field_threshold: f64,
}

impl DefaultCachePolicy {
    /// Sets the bulk threshold, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_bulk_field_threshold(mut self, threshold: f64) -> Self {
        self.bulk_field_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

impl Default for DefaultCachePolicy {
    fn default() -> Self {
        Self {
            bulk_field_threshold: DEFAULT_BULK_FIELD_THRESHOLD,
        }
    }
}

impl CachePolicy for DefaultCachePolicy {
    fn bulk_field_threshold(&self) -> f64 {
        self.bulk_field_threshold
    }
}

/// Reacts to entity changes and decides when cached lists are stale.
pub trait InvalidationPolicy: Send + Sync {
    /// Applies a change notification for one entity.
    ///
    /// `changed_fields` of `None` means the entity changed in unknown ways
    /// or was deleted. Returns the number of bindings newly marked dirty.
    fn on_entity_updated(
        &self,
        pool: &mut dyn EntityPool,
        bindings: &mut dyn BindingStore,
        entity_type: &str,
        id: &EntityId,
        changed_fields: Option<&BTreeSet<String>>,
    ) -> usize;

    /// Whether a binding must be refetched before its coverage is trusted.
    fn should_revalidate(&self, binding: &QueryBinding, now_ms: u64) -> bool;
}

/// Type-wide invalidation with an optional time-to-live.
///
/// On a change the record forgets the changed fields (or is dropped when
/// the change is unknown), every binding listing the entity's type is
/// marked dirty, and child lists linked to the entity through a relation
/// are marked dirty.
///
/// With field narrowing, a known set of changed fields only dirties the
/// bindings whose filter or sort reads one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultInvalidationPolicy {
    /// Bindings older than this are revalidated. `None` disables the TTL.
    pub ttl_ms: Option<u64>,
    /// Spare bindings that read none of the changed fields.
    pub narrow_to_fields: bool,
}

impl DefaultInvalidationPolicy {
    /// Creates a policy without a TTL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time-to-live of confirmed bindings.
    #[must_use]
    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    /// Sets whether known changed fields narrow the dirtied bindings.
    #[must_use]
    pub fn with_field_narrowing(mut self, narrow: bool) -> Self {
        self.narrow_to_fields = narrow;
        self
    }
}

impl InvalidationPolicy for DefaultInvalidationPolicy {
    fn on_entity_updated(
        &self,
        pool: &mut dyn EntityPool,
        bindings: &mut dyn BindingStore,
        entity_type: &str,
        id: &EntityId,
        changed_fields: Option<&BTreeSet<String>>,
    ) -> usize {
        match changed_fields {
            Some(fields) => {
                pool.update_record(entity_type, id, &mut |record| {
                    for field in fields {
                        record.clear_field(field);
                    }
                });
            }
            None => {
                pool.delete_record(entity_type, id);
            }
        }

        let stale: Vec<(String, String)> = bindings
            .all_definitions()
            .into_iter()
            .filter(|def| def.entity_type == entity_type)
            .filter(|def| match changed_fields {
                Some(fields) if self.narrow_to_fields => {
                    def.references_any(fields.iter().map(String::as_str))
                }
                _ => true,
            })
            .flat_map(|def| bindings.find_bindings_by_definition(&def.id))
            .filter(|binding| !binding.dirty)
            .map(|binding| (binding.definition_id.clone(), binding.param_hash.clone()))
            .collect();

        let mut marked = 0;
        for (definition_id, param_hash) in &stale {
            if bindings.mark_dirty(definition_id, param_hash) {
                marked += 1;
            }
        }
        marked += bindings.invalidate_by_parent(entity_type, id, None);

        debug!(
            entity_type,
            id = %id,
            fields = ?changed_fields,
            dirtied = marked,
            "entity update invalidated bindings"
        );
        marked
    }

    fn should_revalidate(&self, binding: &QueryBinding, now_ms: u64) -> bool {
        match (self.ttl_ms, binding.last_validate_at) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(ttl), Some(at)) => now_ms.saturating_sub(at) > ttl,
        }
    }
}
