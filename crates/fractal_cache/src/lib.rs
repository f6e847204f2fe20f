//! # Fractal Cache
//!
//! Client-side partial-result cache for entity-shaped list queries.
//!
//! This crate provides:
//! - A normalized entity pool with field-level presence tracking
//! - A query binding store recording which pages of which lists are cached
//! - A diff engine that plans the backend requests filling a query's gaps
//! - The intent model, its normalization and validation
//! - Invalidation, eviction and snapshot support over a shared cache context
//! - Assembly of fully cached results into nested entity views
//!
//! ## Flow
//!
//! 1. A consumer builds an [`Intent`] (directly or from an [`IntentUnit`])
//! 2. [`DiffEngine::compute_fetch_plan`] compares it against the cache
//! 3. The requests of the resulting [`FetchPlan`] go to a backend
//! 4. A reconciler merges the responses into the pool and binding store
//! 5. Planning the same intent again yields an empty plan
//!
//! Planning is synchronous and never performs I/O. Executing plans lives in
//! the `fractal_sync` crate.
//!
//! ## Key Invariants
//!
//! - A field outside a record's field mask is unknown, never empty
//! - Binding intervals are sorted, disjoint and never touch
//! - Every known position of a binding lies inside one of its intervals
//! - A dirty binding is treated as uncovered

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod binding;
mod context;
pub mod diff;
mod error;
pub mod eviction;
pub mod filter;
pub mod hash;
pub mod intent;
pub mod order;
pub mod policy;
pub mod pool;
pub mod predicate;
pub mod schema;
mod types;
pub mod view;

pub use binding::{BindingStore, MemoryBindingStore, QueryBinding, QueryDefinition};
pub use context::{CacheContext, CacheSnapshot, CacheState, CacheStats, SNAPSHOT_VERSION};
pub use diff::{
    DataRequest, DiffConfig, DiffEngine, FetchContext, FetchPlan, ParentBatchEntry, RelationMeta,
    RequestMetadata, RequestMode,
};
pub use error::{CacheError, CacheResult, ValidationError};
pub use eviction::{EvictionPolicy, EvictionReport};
pub use filter::{FilterNode, FilterOp, FilterParams, Operand};
pub use hash::QueryKey;
pub use intent::{Intent, IntentNormalizer, IntentSource, IntentUnit, Operation, RelationIntent};
pub use order::{OrderSpec, SortDirection};
pub use policy::{CachePolicy, DefaultCachePolicy, DefaultInvalidationPolicy, InvalidationPolicy};
pub use pool::{EntityPool, EntityRecord, MemoryEntityPool, RecordMeta};
pub use predicate::{PredicateUtils, RelationPredicateCache};
pub use schema::{EntityConfig, RelationConfig, Schema};
pub use types::{now_ms, EntityId, Interval};
pub use view::EntityView;

pub use fractal_codec::Value;
