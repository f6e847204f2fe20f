//! Normalized entity pool.
//!
//! The pool keeps exactly one partial [`EntityRecord`] per
//! `(entity type, id)`. Records carry a field mask so the planner can tell
//! unknown fields apart from empty ones.
//!
//! Lookups never perform I/O: [`EntityPool::find_records`] scans cached
//! records only, and a record whose filter fields are unknown does not
//! match.

mod memory;
mod record;

pub use memory::MemoryEntityPool;
pub use record::{EntityRecord, RecordMeta};

use crate::filter::FilterNode;
use crate::types::EntityId;

/// Storage contract for normalized entity records.
pub trait EntityPool: Send + Sync {
    /// Looks up one record. Reading refreshes its last-access time.
    fn get_record(&self, entity_type: &str, id: &EntityId) -> Option<&EntityRecord>;

    /// Looks up several records, preserving order; misses are `None`.
    fn get_records(&self, entity_type: &str, ids: &[EntityId]) -> Vec<Option<&EntityRecord>> {
        ids.iter()
            .map(|id| self.get_record(entity_type, id))
            .collect()
    }

    /// Applies `updater` to an existing record.
    ///
    /// Returns `false` and does nothing when the record is absent; records
    /// are created through [`EntityPool::insert_record`].
    fn update_record(
        &mut self,
        entity_type: &str,
        id: &EntityId,
        updater: &mut dyn FnMut(&mut EntityRecord),
    ) -> bool;

    /// Cached records of `entity_type` known to match `filter`.
    fn find_records(&self, entity_type: &str, filter: &FilterNode) -> Vec<&EntityRecord>;

    /// Removes a record.
    fn delete_record(&mut self, entity_type: &str, id: &EntityId) -> Option<EntityRecord>;

    /// Stores a record, replacing any previous one with the same key.
    fn insert_record(&mut self, record: EntityRecord) -> Option<EntityRecord>;

    /// Cached records of one type.
    fn iter_type<'a>(&'a self, entity_type: &str) -> Box<dyn Iterator<Item = &'a EntityRecord> + 'a>;

    /// Every cached record.
    fn iter_all(&self) -> Box<dyn Iterator<Item = &EntityRecord> + '_>;

    /// Number of cached records.
    fn len(&self) -> usize;

    /// Whether the pool is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every record.
    fn clear(&mut self);
}
