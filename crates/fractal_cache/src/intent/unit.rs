//! Operation sequences produced by query builders.

use crate::filter::FilterNode;
use crate::order::SortDirection;
use serde::{Deserialize, Serialize};

/// Where a unit reads its rows from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum IntentSource {
    /// A backend entity type.
    Entity(String),
    /// Another, derived unit.
    Unit(String),
}

/// One builder step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Adds a predicate.
    Where {
        /// Predicate ANDed into the filter.
        filter: FilterNode,
    },
    /// Appends a sort key.
    OrderBy {
        /// Sort field.
        field: String,
        /// Direction.
        #[serde(default)]
        direction: SortDirection,
    },
    /// Sets the window start.
    Skip {
        /// Number of rows to skip.
        count: usize,
    },
    /// Sets the window length.
    Take {
        /// Number of rows to take.
        count: usize,
    },
    /// Replaces the field selection.
    Select {
        /// Selected fields.
        fields: Vec<String>,
    },
    /// Nests a relation.
    Include {
        /// Relation name.
        relation: String,
        /// Inner-join semantics when true.
        #[serde(default = "default_required")]
        required: bool,
        /// Sub-unit describing the children.
        unit: Box<IntentUnit>,
    },
    /// Aggregates rows into a value.
    Aggregate {
        /// Aggregate function name.
        function: String,
        /// Aggregated field, if any.
        #[serde(default)]
        field: Option<String>,
    },
    /// Groups rows by fields.
    GroupBy {
        /// Grouping fields.
        fields: Vec<String>,
    },
    /// Removes duplicate rows.
    Distinct,
}

fn default_required() -> bool {
    true
}

impl Operation {
    /// Operation name as reported in validation errors.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Where { .. } => "where",
            Operation::OrderBy { .. } => "order_by",
            Operation::Skip { .. } => "skip",
            Operation::Take { .. } => "take",
            Operation::Select { .. } => "select",
            Operation::Include { .. } => "include",
            Operation::Aggregate { .. } => "aggregate",
            Operation::GroupBy { .. } => "group_by",
            Operation::Distinct => "distinct",
        }
    }
}

/// A source plus the ordered operations applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentUnit {
    /// Row source.
    pub source: IntentSource,
    /// Steps in application order.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl IntentUnit {
    /// Unit over an entity type.
    pub fn entity(entity_type: impl Into<String>) -> Self {
        Self {
            source: IntentSource::Entity(entity_type.into()),
            operations: Vec::new(),
        }
    }

    /// Unit over another, derived unit.
    pub fn derived(name: impl Into<String>) -> Self {
        Self {
            source: IntentSource::Unit(name.into()),
            operations: Vec::new(),
        }
    }

    /// Appends an operation.
    #[must_use]
    pub fn then(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Appends a `where` step.
    #[must_use]
    pub fn filter(self, filter: FilterNode) -> Self {
        self.then(Operation::Where { filter })
    }

    /// Appends an `order_by` step.
    #[must_use]
    pub fn order_by(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.then(Operation::OrderBy {
            field: field.into(),
            direction,
        })
    }

    /// Appends a `skip` step.
    #[must_use]
    pub fn skip(self, count: usize) -> Self {
        self.then(Operation::Skip { count })
    }

    /// Appends a `take` step.
    #[must_use]
    pub fn take(self, count: usize) -> Self {
        self.then(Operation::Take { count })
    }

    /// Appends a `select` step.
    #[must_use]
    pub fn select<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(Operation::Select {
            fields: fields.into_iter().map(Into::into).collect(),
        })
    }

    /// Appends a required `include` step.
    #[must_use]
    pub fn include(self, relation: impl Into<String>, unit: IntentUnit) -> Self {
        self.then(Operation::Include {
            relation: relation.into(),
            required: true,
            unit: Box::new(unit),
        })
    }

    /// Appends an optional (left-join) `include` step.
    #[must_use]
    pub fn include_optional(self, relation: impl Into<String>, unit: IntentUnit) -> Self {
        self.then(Operation::Include {
            relation: relation.into(),
            required: false,
            unit: Box::new(unit),
        })
    }
}
