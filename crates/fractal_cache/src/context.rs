//! Shared cache state.
//!
//! [`CacheContext`] owns the entity pool and the binding store behind one
//! `parking_lot::RwLock`. Planning takes the read lock, so plans for
//! different intents can be computed concurrently; every mutation takes the
//! write lock.
//!
//! # Example
//!
//! ```
//! use fractal_cache::{CacheContext, DiffEngine, Intent, Schema};
//! use std::sync::Arc;
//!
//! let schema = Arc::new(Schema::new());
//! let cache = CacheContext::new(Arc::clone(&schema));
//! let engine = DiffEngine::with_defaults(schema);
//!
//! let plan = cache.plan(&engine, &Intent::new("post").with_take(10)).unwrap();
//! assert_eq!(plan.len(), 1);
//! ```

use crate::binding::{BindingStore, MemoryBindingStore, QueryBinding, QueryDefinition};
use crate::diff::{DiffEngine, FetchPlan};
use crate::error::{CacheError, CacheResult};
use crate::eviction::{EvictionPolicy, EvictionReport};
use crate::filter::FilterNode;
use crate::intent::Intent;
use crate::policy::{DefaultInvalidationPolicy, InvalidationPolicy};
use crate::pool::{EntityPool, EntityRecord, MemoryEntityPool};
use crate::predicate::RelationPredicateCache;
use crate::schema::Schema;
use crate::types::{now_ms, EntityId};
use crate::view::{self, EntityView};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The stores guarded by a [`CacheContext`].
pub struct CacheState {
    /// Entity records.
    pub pool: Box<dyn EntityPool>,
    /// Query definitions and bindings.
    pub bindings: Box<dyn BindingStore>,
    /// Fully fetched relation predicates.
    pub relation_predicates: RelationPredicateCache,
}

impl CacheState {
    fn clear(&mut self) {
        self.pool.clear();
        self.bindings.clear();
        self.relation_predicates.clear();
    }

    /// Forgets relation predicates that may cover children of `parent_id`.
    fn forget_parent(
        &mut self,
        schema: &Schema,
        parent_type: &str,
        parent_id: &EntityId,
        relation: Option<&str>,
    ) -> usize {
        schema
            .relations_from(parent_type)
            .filter(|rel| relation.map_or(true, |name| name == rel.key))
            .map(|rel| {
                self.relation_predicates
                    .forget_parent(parent_type, &rel.key, &rel.foreign_key, parent_id)
            })
            .sum()
    }

    /// Forgets every predicate over relations whose children are
    /// `entity_type`.
    fn forget_children_of_type(&mut self, schema: &Schema, entity_type: &str) -> usize {
        schema
            .relations_to(entity_type)
            .map(|rel| {
                self.relation_predicates
                    .forget_relation(&rel.source_entity, &rel.key)
            })
            .sum()
    }
}

/// Counters describing the cache contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Cached records.
    pub records: usize,
    /// Query definitions.
    pub definitions: usize,
    /// Query bindings.
    pub bindings: usize,
    /// Bindings awaiting revalidation.
    pub dirty_bindings: usize,
    /// Exhausted bindings.
    pub exhausted_bindings: usize,
}

/// Serializable copy of the whole cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Format version.
    pub version: u32,
    /// Schema the cache was built against.
    pub schema: Schema,
    /// Every record.
    pub records: Vec<EntityRecord>,
    /// Every query definition.
    pub definitions: Vec<QueryDefinition>,
    /// Every query binding.
    pub bindings: Vec<QueryBinding>,
    /// Fully fetched relation predicates.
    #[serde(default)]
    pub relation_predicates: RelationPredicateCache,
}

impl CacheSnapshot {
    /// Checks the snapshot before it is loaded.
    ///
    /// # Errors
    ///
    /// Returns a snapshot error for an unknown version, an unsound record,
    /// a binding violating the interval invariant or a binding without its
    /// definition.
    pub fn validate(&self) -> CacheResult<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(CacheError::snapshot(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                self.version
            )));
        }
        if let Some(record) = self.records.iter().find(|r| !r.is_sound()) {
            return Err(CacheError::snapshot(format!(
                "record {}/{} has data outside its field mask",
                record.entity_type(),
                record.id()
            )));
        }
        let defined: BTreeSet<&str> = self.definitions.iter().map(|d| d.id.as_str()).collect();
        for binding in &self.bindings {
            if !defined.contains(binding.definition_id.as_str()) {
                return Err(CacheError::snapshot(format!(
                    "binding {} refers to unknown definition {}",
                    binding.param_hash, binding.definition_id
                )));
            }
            binding.check_invariants().map_err(|e| {
                CacheError::snapshot(format!("binding {}: {e}", binding.param_hash))
            })?;
        }
        Ok(())
    }
}

/// The entity pool and binding store shared by planners and reconcilers.
pub struct CacheContext {
    schema: Arc<Schema>,
    state: RwLock<CacheState>,
    invalidation: Arc<dyn InvalidationPolicy>,
}

impl CacheContext {
    /// Creates an empty in-memory cache.
    pub fn new(schema: Arc<Schema>) -> Self {
        let bindings = MemoryBindingStore::with_schema(Arc::clone(&schema));
        Self::with_stores(schema, Box::new(MemoryEntityPool::new()), Box::new(bindings))
    }

    /// Creates a cache over custom stores.
    pub fn with_stores(
        schema: Arc<Schema>,
        pool: Box<dyn EntityPool>,
        bindings: Box<dyn BindingStore>,
    ) -> Self {
        Self {
            schema,
            state: RwLock::new(CacheState {
                pool,
                bindings,
                relation_predicates: RelationPredicateCache::new(),
            }),
            invalidation: Arc::new(DefaultInvalidationPolicy::default()),
        }
    }

    /// Replaces the invalidation policy used by [`CacheContext::on_entity_updated`].
    #[must_use]
    pub fn with_invalidation(mut self, policy: Arc<dyn InvalidationPolicy>) -> Self {
        self.invalidation = policy;
        self
    }

    /// Builds an in-memory cache from a snapshot.
    ///
    /// # Errors
    ///
    /// See [`CacheSnapshot::validate`].
    pub fn from_snapshot(snapshot: CacheSnapshot) -> CacheResult<Self> {
        let context = Self::new(Arc::new(snapshot.schema.clone()));
        context.restore(snapshot)?;
        Ok(context)
    }

    /// The schema shared by the stores.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Takes the read lock.
    pub fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read()
    }

    /// Takes the write lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write()
    }

    /// Plans `intent` under the read lock.
    ///
    /// # Errors
    ///
    /// See [`DiffEngine::compute_fetch_plan`].
    pub fn plan(&self, engine: &DiffEngine, intent: &Intent) -> CacheResult<FetchPlan> {
        let state = self.state.read();
        engine.compute_fetch_plan(intent, state.pool.as_ref(), state.bindings.as_ref())
    }

    /// Plans field completion for explicit ids under the read lock.
    pub fn plan_entities(
        &self,
        engine: &DiffEngine,
        entity_type: &str,
        ids: &[EntityId],
        select: Option<&BTreeSet<String>>,
    ) -> FetchPlan {
        let state = self.state.read();
        engine.compute_entity_plan(entity_type, ids, select, state.pool.as_ref())
    }

    /// Assembles the cached result of `intent` under the read lock.
    ///
    /// Returns `Ok(None)` when part of it is not cached.
    ///
    /// # Errors
    ///
    /// See [`view::assemble`].
    pub fn view(&self, intent: &Intent) -> CacheResult<Option<Vec<EntityView>>> {
        let state = self.state.read();
        view::assemble(intent, &self.schema, state.pool.as_ref(), state.bindings.as_ref())
    }

    /// Applies an entity change through the invalidation policy.
    ///
    /// Relation predicates covering the entity, as a parent or as a child,
    /// are forgotten. Returns the number of bindings marked dirty.
    pub fn on_entity_updated(
        &self,
        entity_type: &str,
        id: &EntityId,
        changed_fields: Option<&BTreeSet<String>>,
    ) -> usize {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let marked = self.invalidation.on_entity_updated(
            state.pool.as_mut(),
            state.bindings.as_mut(),
            entity_type,
            id,
            changed_fields,
        );
        let forgotten = state.forget_parent(&self.schema, entity_type, id, None)
            + state.forget_children_of_type(&self.schema, entity_type);
        if forgotten > 0 {
            debug!(entity_type, id = %id, forgotten, "forgot relation predicates");
        }
        marked
    }

    /// Marks dirty the child lists linked to a parent and forgets the
    /// relation predicates covering its children.
    ///
    /// Without a relation name every relation sourced at `parent_type` is
    /// considered. Returns the number of bindings marked dirty.
    pub fn invalidate_by_parent(
        &self,
        parent_type: &str,
        parent_id: &EntityId,
        relation: Option<&str>,
    ) -> usize {
        let mut state = self.state.write();
        let marked = state
            .bindings
            .invalidate_by_parent(parent_type, parent_id, relation);
        state.forget_parent(&self.schema, parent_type, parent_id, relation);
        marked
    }

    /// Whether every child of `relation` matching `filter` is known to be
    /// cached.
    pub fn is_relation_exhausted(
        &self,
        entity_type: &str,
        relation: &str,
        filter: &FilterNode,
    ) -> bool {
        self.state
            .read()
            .relation_predicates
            .is_exhausted_subset(entity_type, relation, filter)
    }

    /// Runs an eviction pass under the write lock.
    ///
    /// Relation predicates over an evicted parent, or over relations
    /// listing an evicted child, are forgotten.
    pub fn evict(&self, policy: &EvictionPolicy) -> EvictionReport {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let report = policy.run(state.pool.as_mut(), state.bindings.as_mut(), now_ms());
        for (entity_type, ids) in &report.evicted_ids {
            for id in ids {
                state.forget_parent(&self.schema, entity_type, id, None);
            }
            state.forget_children_of_type(&self.schema, entity_type);
        }
        report
    }

    /// Drops every record, definition and binding.
    pub fn clear(&self) {
        self.state.write().clear();
        debug!("cache cleared");
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        let bindings = state.bindings.all_bindings();
        CacheStats {
            records: state.pool.len(),
            definitions: state.bindings.all_definitions().len(),
            bindings: bindings.len(),
            dirty_bindings: bindings.iter().filter(|b| b.dirty).count(),
            exhausted_bindings: bindings.iter().filter(|b| b.is_exhausted()).count(),
        }
    }

    /// Copies the whole cache.
    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.state.read();
        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            schema: (*self.schema).clone(),
            records: state.pool.iter_all().cloned().collect(),
            definitions: state.bindings.all_definitions().into_iter().cloned().collect(),
            bindings: state.bindings.all_bindings().into_iter().cloned().collect(),
            relation_predicates: state.relation_predicates.clone(),
        }
    }

    /// Replaces the cache contents with a snapshot.
    ///
    /// The snapshot is validated first; on error the cache is unchanged.
    ///
    /// # Errors
    ///
    /// Returns a snapshot error when the snapshot fails
    /// [`CacheSnapshot::validate`] or was taken against another schema.
    pub fn restore(&self, snapshot: CacheSnapshot) -> CacheResult<()> {
        snapshot.validate()?;
        if snapshot.schema != *self.schema {
            return Err(CacheError::snapshot("snapshot schema differs from cache schema"));
        }

        let mut state = self.state.write();
        state.clear();
        let records = snapshot.records.len();
        let bindings = snapshot.bindings.len();
        for record in snapshot.records {
            state.pool.insert_record(record);
        }
        for definition in snapshot.definitions {
            state.bindings.save_definition(definition);
        }
        for binding in snapshot.bindings {
            state.bindings.save_binding(binding);
        }
        state.relation_predicates = snapshot.relation_predicates;
        info!(records, bindings, "restored cache snapshot");
        Ok(())
    }
}

impl fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheContext")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
