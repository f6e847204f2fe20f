//! # Fractal Testkit
//!
//! Testing utilities for the fractal cache.
//!
//! This crate provides:
//! - A blog schema and deterministic dataset
//! - A harness wiring a cache, a planner and an in-memory backend
//! - Temporary workspaces for JSON files
//! - Property-based test generators

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Re-export commonly used items.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use fractal_cache::*;
    pub use fractal_sync::*;
}

pub use fixtures::{blog_dataset, blog_schema, CacheHarness, TempWorkspace};
