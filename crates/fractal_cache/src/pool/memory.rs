//! In-memory entity pool.

use super::{EntityPool, EntityRecord};
use crate::filter::FilterNode;
use crate::types::{now_ms, EntityId};
use fractal_codec::Value;
use std::collections::BTreeMap;

/// Entity pool backed by ordered in-memory maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryEntityPool {
    records: BTreeMap<String, BTreeMap<EntityId, EntityRecord>>,
}

impl MemoryEntityPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Field lookup used for filter evaluation. `id` is always known.
fn matches(record: &EntityRecord, filter: &FilterNode) -> bool {
    let id = Value::from(record.id().as_str());
    let resolve = |field: &str| {
        if field == "id" {
            Some(&id)
        } else {
            record.get(field)
        }
    };
    filter.matches(&resolve) == Some(true)
}

impl EntityPool for MemoryEntityPool {
    fn get_record(&self, entity_type: &str, id: &EntityId) -> Option<&EntityRecord> {
        let record = self.records.get(entity_type)?.get(id)?;
        record.meta().touch(now_ms());
        Some(record)
    }

    fn update_record(
        &mut self,
        entity_type: &str,
        id: &EntityId,
        updater: &mut dyn FnMut(&mut EntityRecord),
    ) -> bool {
        match self
            .records
            .get_mut(entity_type)
            .and_then(|by_id| by_id.get_mut(id))
        {
            Some(record) => {
                updater(record);
                record.meta().touch(now_ms());
                true
            }
            None => false,
        }
    }

    fn find_records(&self, entity_type: &str, filter: &FilterNode) -> Vec<&EntityRecord> {
        let now = now_ms();
        self.iter_type(entity_type)
            .filter(|record| matches(record, filter))
            .inspect(|record| record.meta().touch(now))
            .collect()
    }

    fn delete_record(&mut self, entity_type: &str, id: &EntityId) -> Option<EntityRecord> {
        let by_id = self.records.get_mut(entity_type)?;
        let removed = by_id.remove(id);
        if by_id.is_empty() {
            self.records.remove(entity_type);
        }
        removed
    }

    fn insert_record(&mut self, record: EntityRecord) -> Option<EntityRecord> {
        record.meta().touch(now_ms());
        self.records
            .entry(record.entity_type().to_string())
            .or_default()
            .insert(record.id().clone(), record)
    }

    fn iter_type<'a>(&'a self, entity_type: &str) -> Box<dyn Iterator<Item = &'a EntityRecord> + 'a> {
        match self.records.get(entity_type) {
            Some(by_id) => Box::new(by_id.values()),
            None => Box::new(std::iter::empty()),
        }
    }

    fn iter_all(&self) -> Box<dyn Iterator<Item = &EntityRecord> + '_> {
        Box::new(self.records.values().flat_map(|by_id| by_id.values()))
    }

    fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}
