//! Validation of operation sequences before normalization.

use super::unit::{IntentSource, IntentUnit, Operation};
use crate::error::ValidationError;

/// Operations an entity-sourced unit may use.
pub const SUPPORTED_OPERATIONS: &[&str] = &["where", "order_by", "skip", "take", "select", "include"];

/// Checks that a unit can be translated into backend requests.
///
/// Entity-sourced units may only use [`SUPPORTED_OPERATIONS`]; includes are
/// checked recursively. Derived units are accepted as they are.
///
/// # Errors
///
/// Returns the first violation found, wrapped once per enclosing include.
pub fn validate_for_cache(unit: &IntentUnit) -> Result<(), ValidationError> {
    let entity_type = match &unit.source {
        IntentSource::Entity(name) => name,
        IntentSource::Unit(_) => return Ok(()),
    };
    if entity_type.is_empty() {
        return Err(ValidationError::EmptyEntityType);
    }

    for operation in &unit.operations {
        if !SUPPORTED_OPERATIONS.contains(&operation.name()) {
            return Err(ValidationError::unsupported(operation.name()));
        }
        if let Operation::Include { relation, unit, .. } = operation {
            validate_for_cache(unit).map_err(|e| ValidationError::nested(relation, e))?;
        }
    }
    Ok(())
}
