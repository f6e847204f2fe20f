//! CLI command implementations.

pub mod files;
pub mod inspect;
pub mod plan;
pub mod simulate;
