//! Folding operation sequences into intents.

use super::unit::{IntentSource, IntentUnit, Operation};
use super::validation::validate_for_cache;
use super::{Intent, RelationIntent};
use crate::error::{CacheResult, ValidationError};
use crate::hash;
use crate::order::OrderSpec;
use crate::schema::Schema;
use tracing::trace;

/// Translates builder output into [`Intent`]s.
///
/// Operations fold left to right: `where` ANDs into the filter, `order_by`
/// appends (first applied is the primary key), `skip` and `take` keep the
/// last value written, `select` replaces the selection and `include`
/// normalizes its sub-unit against the relation declared in the schema.
pub struct IntentNormalizer<'a> {
    schema: &'a Schema,
}

impl<'a> IntentNormalizer<'a> {
    /// Creates a normalizer resolving relations against `schema`.
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Validates and normalizes a unit.
    ///
    /// Validation covers the whole tree before anything is folded, so a
    /// rejected unit is never partially applied.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unsupported operations, derived
    /// sources, unknown relations or mismatched include targets.
    pub fn normalize(&self, unit: &IntentUnit) -> CacheResult<Intent> {
        validate_for_cache(unit)?;
        let intent = self.fold(unit)?;
        trace!(entity_type = %intent.entity_type, "normalized intent");
        Ok(intent)
    }

    fn fold(&self, unit: &IntentUnit) -> Result<Intent, ValidationError> {
        let entity_type = match &unit.source {
            IntentSource::Entity(name) => name,
            IntentSource::Unit(name) => {
                return Err(ValidationError::NonEntitySource { name: name.clone() })
            }
        };

        let mut intent = Intent::new(entity_type.as_str());
        for operation in &unit.operations {
            match operation {
                Operation::Where { filter } => {
                    intent = intent.with_filter(filter.clone());
                }
                Operation::OrderBy { field, direction } => {
                    intent.order_by.push(OrderSpec {
                        field: field.clone(),
                        direction: *direction,
                    });
                }
                Operation::Skip { count } => intent.skip = *count,
                Operation::Take { count } => intent.take = Some(*count),
                Operation::Select { fields } => {
                    intent.select = Some(fields.iter().cloned().collect());
                }
                Operation::Include {
                    relation,
                    required,
                    unit: sub,
                } => {
                    let include = self
                        .include(entity_type, relation, *required, sub)
                        .map_err(|e| ValidationError::nested(relation, e))?;
                    intent.include.push(include);
                }
                other => return Err(ValidationError::unsupported(other.name())),
            }
        }
        Ok(intent)
    }

    fn include(
        &self,
        parent_type: &str,
        relation: &str,
        required: bool,
        sub: &IntentUnit,
    ) -> Result<RelationIntent, ValidationError> {
        let config = self.schema.relation(parent_type, relation).ok_or_else(|| {
            ValidationError::UnknownRelation {
                entity_type: parent_type.to_string(),
                relation: relation.to_string(),
            }
        })?;

        let child = self.fold(sub)?;
        if child.entity_type != config.target_entity {
            return Err(ValidationError::RelationTargetMismatch {
                relation: relation.to_string(),
                expected: config.target_entity.clone(),
                actual: child.entity_type,
            });
        }

        Ok(RelationIntent {
            relation_name: relation.to_string(),
            required,
            foreign_key: config.foreign_key.clone(),
            intent: child,
        })
    }

    /// Stable hash of an intent's sort list.
    ///
    /// # Errors
    ///
    /// See [`hash::sort_hash`].
    pub fn sort_hash(intent: &Intent) -> CacheResult<String> {
        hash::sort_hash(&intent.order_by)
    }

    /// Stable hash of an intent's concrete filter.
    ///
    /// # Errors
    ///
    /// Returns a hashing error when a literal cannot be encoded.
    pub fn filter_hash(intent: &Intent) -> CacheResult<String> {
        hash::filter_hash(&intent.filter)
    }
}
