//! Query binding store.
//!
//! One [`QueryDefinition`] exists per query shape (entity type, sort and
//! filter template) and one [`QueryBinding`] per concrete parameter set of
//! that shape. Bindings record which index ranges of the sorted result list
//! have been fetched and which id sits at each fetched position.
//!
//! # Invariants
//!
//! - Intervals are sorted, disjoint and never touch
//! - Every position in `index_to_id` lies inside an interval
//! - A dirty binding is treated as uncovered until the next merge resets it

mod interval;
mod memory;
mod model;

pub use interval::{coalesce, IntervalSet};
pub use memory::MemoryBindingStore;
pub use model::{QueryBinding, QueryDefinition};

use crate::error::CacheResult;
use crate::filter::{FilterNode, FilterParams};
use crate::hash;
use crate::order::OrderSpec;
use crate::types::{EntityId, Interval};
use std::collections::{BTreeMap, BTreeSet};

/// Storage contract for query definitions and bindings.
pub trait BindingStore: Send + Sync {
    /// Looks up a definition.
    fn get_definition(&self, id: &str) -> Option<&QueryDefinition>;

    /// Stores a definition, replacing one with the same id.
    fn save_definition(&mut self, definition: QueryDefinition);

    /// Every stored definition.
    fn all_definitions(&self) -> Vec<&QueryDefinition>;

    /// Looks up a binding.
    fn get_binding(&self, definition_id: &str, param_hash: &str) -> Option<&QueryBinding>;

    /// Stores a binding, replacing one with the same key.
    fn save_binding(&mut self, binding: QueryBinding);

    /// Removes a binding.
    fn delete_binding(&mut self, definition_id: &str, param_hash: &str) -> Option<QueryBinding>;

    /// Bindings of one definition.
    fn find_bindings_by_definition(&self, definition_id: &str) -> Vec<&QueryBinding>;

    /// Every stored binding.
    fn all_bindings(&self) -> Vec<&QueryBinding>;

    /// Merges a fetched range into a binding.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CacheError::BindingNotFound`] for an unknown binding
    /// and a consistency error when `id_map` strays outside `interval`.
    fn merge_interval(
        &mut self,
        definition_id: &str,
        param_hash: &str,
        interval: Interval,
        id_map: BTreeMap<usize, EntityId>,
    ) -> CacheResult<()>;

    /// Ids for `[skip, skip + take)`; all `None` for an unknown binding.
    fn get_window_ids(
        &self,
        definition_id: &str,
        param_hash: &str,
        skip: usize,
        take: usize,
    ) -> Vec<Option<EntityId>> {
        match self.get_binding(definition_id, param_hash) {
            Some(binding) => binding.window_ids(skip, take),
            None => vec![None; take],
        }
    }

    /// Forces revalidation of a binding. Returns whether it exists.
    fn mark_dirty(&mut self, definition_id: &str, param_hash: &str) -> bool;

    /// Records that the list ends after `last_index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CacheError::BindingNotFound`] for an unknown binding.
    fn mark_exhausted(
        &mut self,
        definition_id: &str,
        param_hash: &str,
        last_index: Option<usize>,
    ) -> CacheResult<()>;

    /// Marks dirty every binding linked to a parent entity.
    ///
    /// A binding is linked when its definition lists the target of a
    /// relation whose source is `parent_type` and its parameters bind the
    /// relation's foreign key to `parent_id`. With `relation` set only that
    /// relation is considered. Returns the number of bindings marked.
    fn invalidate_by_parent(
        &mut self,
        parent_type: &str,
        parent_id: &EntityId,
        relation: Option<&str>,
    ) -> usize;

    /// Marks dirty every binding of `entity_type` whose positions reference
    /// one of `ids`. Returns the number of bindings marked.
    fn mark_dirty_referencing(&mut self, entity_type: &str, ids: &BTreeSet<EntityId>) -> usize;

    /// Definition id for a query shape.
    ///
    /// # Errors
    ///
    /// See [`hash::compute_definition_id`].
    fn compute_definition_id(
        &self,
        entity_type: &str,
        order_by: &[OrderSpec],
        where_template: &FilterNode,
    ) -> CacheResult<String> {
        hash::compute_definition_id(entity_type, order_by, where_template)
    }

    /// Hash of a parameter map.
    ///
    /// # Errors
    ///
    /// See [`hash::compute_param_hash`].
    fn compute_param_hash(&self, params: &FilterParams) -> CacheResult<String> {
        hash::compute_param_hash(params)
    }

    /// Drops every definition and binding.
    fn clear(&mut self);
}
