//! The fetch planner.
//!
//! [`DiffEngine::compute_fetch_plan`] compares an [`Intent`] against the
//! entity pool and the binding store and returns the backend requests that
//! fill every gap. Planning is synchronous and never performs I/O.
//!
//! ## Pipeline
//!
//! 1. Horizontal check: which window positions have known ids
//! 2. Vertical check: which fields the known entities lack
//! 3. Pagination requests for the missing positions
//! 4. Field-fetch requests for the missing fields
//! 5. Relation requests for parents whose child windows are missing
//! 6. Optional deduplication
//!
//! Relations are planned in two phases. Only parents already cached are
//! inspected; parents listed by this same plan get their children planned
//! on the next call, once the parent list has been reconciled.

mod request;
pub mod strategy;

pub use request::{
    DataRequest, FetchPlan, ParentBatchEntry, RelationMeta, RequestMetadata, RequestMode,
};

use crate::binding::BindingStore;
use crate::error::CacheResult;
use crate::hash::QueryKey;
use crate::intent::{Intent, RelationIntent};
use crate::pool::EntityPool;
use crate::schema::Schema;
use crate::types::{now_ms, EntityId};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use strategy::{
    DefaultDeduplication, DefaultFieldFetch, DefaultHorizontalCheck, DefaultPaginationRequest,
    DefaultRelationRequest, DefaultVerticalCheck, FieldFetchStrategy, HorizontalCheckStrategy,
    PaginationRequestStrategy, RelationRequestStrategy, RequestDeduplicationStrategy,
    VerticalCheckStrategy,
};
use tracing::{debug, trace};

/// Read-only view of the cache handed to strategies.
#[derive(Clone, Copy)]
pub struct FetchContext<'a> {
    /// Entity records.
    pub pool: &'a dyn EntityPool,
    /// Query bindings.
    pub bindings: &'a dyn BindingStore,
    /// Entity and relation declarations.
    pub schema: &'a Schema,
    /// Planning time in milliseconds since the epoch.
    pub now_ms: u64,
}

/// Strategies used by a [`DiffEngine`].
#[derive(Clone)]
pub struct DiffConfig {
    /// Window coverage.
    pub horizontal: Arc<dyn HorizontalCheckStrategy>,
    /// Field completeness.
    pub vertical: Arc<dyn VerticalCheckStrategy>,
    /// List requests.
    pub pagination: Arc<dyn PaginationRequestStrategy>,
    /// Field completion requests.
    pub field_fetch: Arc<dyn FieldFetchStrategy>,
    /// Relation requests.
    pub relation: Arc<dyn RelationRequestStrategy>,
    /// Final request merging, if any.
    pub deduplication: Option<Arc<dyn RequestDeduplicationStrategy>>,
}

impl DiffConfig {
    /// Replaces the horizontal check.
    #[must_use]
    pub fn with_horizontal(mut self, strategy: impl HorizontalCheckStrategy + 'static) -> Self {
        self.horizontal = Arc::new(strategy);
        self
    }

    /// Replaces the vertical check.
    #[must_use]
    pub fn with_vertical(mut self, strategy: impl VerticalCheckStrategy + 'static) -> Self {
        self.vertical = Arc::new(strategy);
        self
    }

    /// Replaces the pagination strategy.
    #[must_use]
    pub fn with_pagination(mut self, strategy: impl PaginationRequestStrategy + 'static) -> Self {
        self.pagination = Arc::new(strategy);
        self
    }

    /// Replaces the field-fetch strategy.
    #[must_use]
    pub fn with_field_fetch(mut self, strategy: impl FieldFetchStrategy + 'static) -> Self {
        self.field_fetch = Arc::new(strategy);
        self
    }

    /// Replaces the relation strategy.
    #[must_use]
    pub fn with_relation(mut self, strategy: impl RelationRequestStrategy + 'static) -> Self {
        self.relation = Arc::new(strategy);
        self
    }

    /// Replaces the deduplication strategy.
    #[must_use]
    pub fn with_deduplication(
        mut self,
        strategy: impl RequestDeduplicationStrategy + 'static,
    ) -> Self {
        self.deduplication = Some(Arc::new(strategy));
        self
    }

    /// Disables deduplication.
    #[must_use]
    pub fn without_deduplication(mut self) -> Self {
        self.deduplication = None;
        self
    }
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            horizontal: Arc::new(DefaultHorizontalCheck::default()),
            vertical: Arc::new(DefaultVerticalCheck::default()),
            pagination: Arc::new(DefaultPaginationRequest::default()),
            field_fetch: Arc::new(DefaultFieldFetch::default()),
            relation: Arc::new(DefaultRelationRequest::default()),
            deduplication: Some(Arc::new(DefaultDeduplication::default())),
        }
    }
}

impl fmt::Debug for DiffConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffConfig")
            .field("deduplication", &self.deduplication.is_some())
            .finish_non_exhaustive()
    }
}

/// Computes fetch plans.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    config: DiffConfig,
    schema: Arc<Schema>,
}

impl DiffEngine {
    /// Creates an engine.
    pub fn new(config: DiffConfig, schema: Arc<Schema>) -> Self {
        Self { config, schema }
    }

    /// Creates an engine with the default strategies.
    pub fn with_defaults(schema: Arc<Schema>) -> Self {
        Self::new(DiffConfig::default(), schema)
    }

    /// The schema the engine plans against.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The strategies in use.
    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Plans the requests needed to answer `intent`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed intent and a hashing error
    /// when a filter literal cannot be hashed. No partial plan is returned.
    pub fn compute_fetch_plan(
        &self,
        intent: &Intent,
        pool: &dyn EntityPool,
        bindings: &dyn BindingStore,
    ) -> CacheResult<FetchPlan> {
        intent.validate()?;
        let ctx = self.context(pool, bindings);

        let mut requests = Vec::new();
        self.plan_list(intent, &ctx, &mut requests)?;
        let plan = self.finish(requests);
        debug!(
            entity_type = %intent.entity_type,
            requests = plan.len(),
            pagination = plan.pagination_count(),
            "computed fetch plan"
        );
        Ok(plan)
    }

    /// Plans field completion for explicit ids.
    ///
    /// `select` of `None` requires every field the schema declares.
    pub fn compute_entity_plan(
        &self,
        entity_type: &str,
        ids: &[EntityId],
        select: Option<&BTreeSet<String>>,
        pool: &dyn EntityPool,
    ) -> FetchPlan {
        let required = select.cloned().unwrap_or_else(|| self.schema.fields_of(entity_type));
        let missing = self.config.vertical.check(entity_type, ids, &required, pool);
        let requests = self
            .config
            .field_fetch
            .generate_requests(&missing, &Intent::new(entity_type));
        self.finish(requests)
    }

    fn context<'a>(
        &'a self,
        pool: &'a dyn EntityPool,
        bindings: &'a dyn BindingStore,
    ) -> FetchContext<'a> {
        FetchContext {
            pool,
            bindings,
            schema: &self.schema,
            now_ms: now_ms(),
        }
    }

    fn finish(&self, requests: Vec<DataRequest>) -> FetchPlan {
        let requests = match &self.config.deduplication {
            Some(dedup) => dedup.deduplicate(requests),
            None => requests,
        };
        for request in &requests {
            trace!(%request, "planned request");
        }
        FetchPlan { requests }
    }

    fn plan_list(
        &self,
        intent: &Intent,
        ctx: &FetchContext<'_>,
        out: &mut Vec<DataRequest>,
    ) -> CacheResult<()> {
        let key = QueryKey::resolve(&intent.entity_type, &intent.order_by, &intent.filter)?;
        let horizontal = self.config.horizontal.check(intent, &key, ctx);
        debug!(
            entity_type = %intent.entity_type,
            missing = horizontal.missing_intervals.len(),
            open_tail = ?horizontal.open_tail_start,
            "horizontal check"
        );
        out.extend(self.config.pagination.generate_requests(&horizontal, intent));
        self.plan_entities(intent, &horizontal.cached_ids(), ctx, out)
    }

    /// Vertical check, field completion and relations for known entities.
    fn plan_entities(
        &self,
        intent: &Intent,
        ids: &[EntityId],
        ctx: &FetchContext<'_>,
        out: &mut Vec<DataRequest>,
    ) -> CacheResult<()> {
        let required = intent.required_fields(ctx.schema);
        let missing = self
            .config
            .vertical
            .check(&intent.entity_type, ids, &required, ctx.pool);
        debug!(
            entity_type = %intent.entity_type,
            checked = ids.len(),
            incomplete = missing.len(),
            "vertical check"
        );
        out.extend(
            self.config
                .field_fetch
                .generate_requests(&missing, intent),
        );

        for relation in &intent.include {
            self.plan_relation(&intent.entity_type, relation, ids, ctx, out)?;
        }
        Ok(())
    }

    fn plan_relation(
        &self,
        parent_type: &str,
        relation: &RelationIntent,
        parent_ids: &[EntityId],
        ctx: &FetchContext<'_>,
        out: &mut Vec<DataRequest>,
    ) -> CacheResult<()> {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        let mut definition = None;

        for parent_id in parent_ids {
            if !seen.insert(parent_id) {
                continue;
            }
            let child = relation.child_intent(parent_id.as_str());
            let key = QueryKey::resolve(&child.entity_type, &child.order_by, &child.filter)?;
            let horizontal = self.config.horizontal.check(&child, &key, ctx);
            if horizontal.need_id_fetch {
                definition.get_or_insert_with(|| key.definition());
                pending.push(ParentBatchEntry {
                    parent_id: parent_id.clone(),
                    param_hash: key.param_hash,
                    parameters: key.params,
                    original_skip: child.skip,
                    original_take: child.take,
                });
            } else {
                self.plan_entities(&child, &horizontal.cached_ids(), ctx, out)?;
            }
        }

        debug!(
            parent_type,
            relation = %relation.relation_name,
            parents = seen.len(),
            uncached = pending.len(),
            "relation check"
        );
        if let Some(definition) = definition {
            out.extend(self.config.relation.generate_requests(
                parent_type,
                relation,
                &definition,
                &pending,
            ));
        }
        Ok(())
    }
}
