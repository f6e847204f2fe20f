//! Record eviction.
//!
//! Eviction runs out of band and bounds the entity pool by age and by
//! size. It works on the pool and the binding store together so that no
//! binding keeps pointing at an evicted record.
//!
//! ## Invariants
//!
//! - Optimistic records are never evicted
//! - Every binding referencing an evicted record is marked dirty in the same
//!   pass
//! - Age eviction runs before size eviction; size eviction removes the least
//!   recently accessed records first

use crate::binding::BindingStore;
use crate::pool::EntityPool;
use crate::types::EntityId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Limits enforced by [`EvictionPolicy::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Records not accessed for longer than this are evicted.
    pub max_age_ms: Option<u64>,
    /// Most records kept after eviction.
    pub max_records: Option<usize>,
}

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Records removed because of their age.
    pub expired: usize,
    /// Records removed to satisfy the size limit.
    pub over_capacity: usize,
    /// Bindings marked dirty because they referenced a removed record.
    pub dirtied_bindings: usize,
    /// Removed record ids, by entity type.
    pub evicted_ids: BTreeMap<String, BTreeSet<EntityId>>,
}

impl EvictionReport {
    /// Total records removed.
    pub fn evicted(&self) -> usize {
        self.expired + self.over_capacity
    }
}

impl EvictionPolicy {
    /// A policy that evicts nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the age limit.
    #[must_use]
    pub fn with_max_age_ms(mut self, max_age_ms: u64) -> Self {
        self.max_age_ms = Some(max_age_ms);
        self
    }

    /// Sets the size limit.
    #[must_use]
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    /// Evicts records and dirties the bindings that referenced them.
    pub fn run(
        &self,
        pool: &mut dyn EntityPool,
        bindings: &mut dyn BindingStore,
        now_ms: u64,
    ) -> EvictionReport {
        let mut candidates: Vec<(u64, String, EntityId)> = pool
            .iter_all()
            .filter(|record| !record.meta().is_optimistic)
            .map(|record| {
                (
                    record.meta().last_access(),
                    record.entity_type().to_string(),
                    record.id().clone(),
                )
            })
            .collect();
        candidates.sort();

        let mut report = EvictionReport::default();
        let mut victims: Vec<(String, EntityId)> = Vec::new();

        if let Some(max_age) = self.max_age_ms {
            let cutoff = now_ms.saturating_sub(max_age);
            let split = candidates.partition_point(|(at, _, _)| *at < cutoff);
            report.expired = split;
            victims.extend(candidates.drain(..split).map(|(_, t, id)| (t, id)));
        }

        if let Some(max_records) = self.max_records {
            let remaining = pool.len().saturating_sub(victims.len());
            let excess = remaining.saturating_sub(max_records).min(candidates.len());
            report.over_capacity = excess;
            victims.extend(candidates.drain(..excess).map(|(_, t, id)| (t, id)));
        }

        if victims.is_empty() {
            return report;
        }

        for (entity_type, id) in victims {
            pool.delete_record(&entity_type, &id);
            report.evicted_ids.entry(entity_type).or_default().insert(id);
        }
        for (entity_type, ids) in &report.evicted_ids {
            report.dirtied_bindings += bindings.mark_dirty_referencing(entity_type, ids);
        }

        info!(
            expired = report.expired,
            over_capacity = report.over_capacity,
            dirtied_bindings = report.dirtied_bindings,
            remaining = pool.len(),
            "evicted records"
        );
        report
    }
}
