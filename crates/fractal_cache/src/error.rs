//! Error types for the fractal cache.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised while normalizing, hashing or planning.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Intent failed validation before planning.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A query key could not be hashed into a stable id.
    #[error("hashing error: {message}")]
    Hashing {
        /// Description of the failure.
        message: String,
    },

    /// Cache state would violate an invariant.
    #[error("consistency error: {message}")]
    Consistency {
        /// Description of the violation.
        message: String,
    },

    /// Binding lookup failed for a write that requires one.
    #[error("binding not found: definition {definition_id}, params {param_hash}")]
    BindingNotFound {
        /// Query definition id.
        definition_id: String,
        /// Parameter hash.
        param_hash: String,
    },

    /// Snapshot could not be restored.
    #[error("snapshot error: {message}")]
    Snapshot {
        /// Description of the failure.
        message: String,
    },
}

impl CacheError {
    /// Creates a hashing error.
    pub fn hashing(message: impl Into<String>) -> Self {
        Self::Hashing {
            message: message.into(),
        }
    }

    /// Creates a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Creates a binding-not-found error.
    pub fn binding_not_found(definition_id: &str, param_hash: &str) -> Self {
        Self::BindingNotFound {
            definition_id: definition_id.to_string(),
            param_hash: param_hash.to_string(),
        }
    }

    /// Creates a snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }
}

impl From<fractal_codec::CodecError> for CacheError {
    fn from(err: fractal_codec::CodecError) -> Self {
        Self::hashing(err.to_string())
    }
}

/// An intent the cache cannot translate into backend requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Entity-sourced unit uses an operation outside the cacheable set.
    #[error("operation `{operation}` is not supported on entity sources")]
    UnsupportedOperation {
        /// Name of the offending operation.
        operation: String,
    },

    /// A nested include failed validation.
    #[error("include `{relation}`: {source}")]
    NestedInclude {
        /// Relation whose sub-unit failed.
        relation: String,
        /// Underlying failure.
        #[source]
        source: Box<ValidationError>,
    },

    /// Derived units cannot be planned against the cache.
    #[error("unit source `{name}` cannot be normalized for caching")]
    NonEntitySource {
        /// Name of the derived unit.
        name: String,
    },

    /// Relation name is not declared for the entity type.
    #[error("unknown relation `{relation}` on entity `{entity_type}`")]
    UnknownRelation {
        /// Parent entity type.
        entity_type: String,
        /// Requested relation.
        relation: String,
    },

    /// Included unit targets a different entity than the relation.
    #[error("relation `{relation}` targets `{expected}`, include selects `{actual}`")]
    RelationTargetMismatch {
        /// Relation name.
        relation: String,
        /// Entity type the relation points at.
        expected: String,
        /// Entity type of the included unit.
        actual: String,
    },

    /// Entity type is empty.
    #[error("entity type must not be empty")]
    EmptyEntityType,
}

impl ValidationError {
    /// Creates an unsupported-operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Wraps an error raised inside an include.
    pub fn nested(relation: impl Into<String>, source: ValidationError) -> Self {
        Self::NestedInclude {
            relation: relation.into(),
            source: Box::new(source),
        }
    }
}
