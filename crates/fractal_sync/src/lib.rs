//! # Fractal Sync
//!
//! Plan execution for the fractal cache.
//!
//! This crate provides:
//! - The network adapter contract a backend implements
//! - An in-memory adapter serving a fixed dataset
//! - A reconciler merging responses into a [`fractal_cache::CacheContext`]
//! - A plan executor, sequential or bounded-concurrent, with cancellation
//!
//! ## Round trip
//!
//! 1. The diff engine turns an intent into a fetch plan
//! 2. The executor sends each request to the adapter
//! 3. The reconciler writes ids, records and relation edges back
//! 4. The executor re-plans until the plan is empty
//!
//! ## Key Invariants
//!
//! - One response is reconciled under one write lock
//! - Responses received after cancellation are discarded
//! - Adapter errors are never retried here; retries are the adapter's job

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod error;
mod executor;
mod memory;
mod reconciler;

pub use adapter::{EntityData, EntityFetchRequest, IdListRequest, IdListResponse, NetworkAdapter};
pub use config::ExecutorConfig;
pub use error::{SyncError, SyncResult};
pub use executor::{
    fetch_request, ExecutionReport, ExecutionStats, ExecutorState, PlanExecutor, ResolveReport,
};
pub use memory::{AdapterStats, Dataset, MemoryAdapter};
pub use reconciler::{CacheReconciler, FetchResponse, ReconcileReport, Reconciler};
