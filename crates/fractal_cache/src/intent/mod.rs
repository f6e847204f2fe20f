//! The intent model.
//!
//! An [`Intent`] is the normalized, executable description of one list
//! query: entity type, filter, sort, window, field selection and nested
//! relation sub-intents. Intents are built fresh per planning call and never
//! mutated once handed to the planner.
//!
//! Builders produce an [`IntentUnit`] (an ordered operation sequence), which
//! [`IntentNormalizer`] validates and folds into an [`Intent`].

mod normalize;
mod unit;
mod validation;

pub use normalize::IntentNormalizer;
pub use unit::{IntentSource, IntentUnit, Operation};
pub use validation::{validate_for_cache, SUPPORTED_OPERATIONS};

use crate::error::ValidationError;
use crate::filter::FilterNode;
use crate::order::OrderSpec;
use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A normalized list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Entity type being listed.
    pub entity_type: String,
    /// Concrete filter.
    #[serde(default, rename = "where")]
    pub filter: FilterNode,
    /// Sort keys, primary first.
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    /// Window start.
    #[serde(default)]
    pub skip: usize,
    /// Window length. `None` reads to the end of the list.
    #[serde(default)]
    pub take: Option<usize>,
    /// Requested fields. `None` requests every known field.
    #[serde(default)]
    pub select: Option<BTreeSet<String>>,
    /// Nested relation sub-intents.
    #[serde(default)]
    pub include: Vec<RelationIntent>,
}

/// A relation include attached to a parent intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationIntent {
    /// Relation name.
    pub relation_name: String,
    /// Inner-join semantics when true, left-join when false.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Child field holding the parent id.
    pub foreign_key: String,
    /// Child query applied per parent.
    pub intent: Intent,
}

fn default_required() -> bool {
    true
}

impl Intent {
    /// Creates an intent over every entity of `entity_type`.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            filter: FilterNode::all(),
            order_by: Vec::new(),
            skip: 0,
            take: None,
            select: None,
            include: Vec::new(),
        }
    }

    /// ANDs a predicate into the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(filter);
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn with_order(mut self, spec: OrderSpec) -> Self {
        self.order_by.push(spec);
        self
    }

    /// Sets the window start.
    #[must_use]
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the window length.
    #[must_use]
    pub fn with_take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }

    /// Replaces the field selection.
    #[must_use]
    pub fn with_select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Attaches a relation include.
    #[must_use]
    pub fn with_include(mut self, relation: RelationIntent) -> Self {
        self.include.push(relation);
        self
    }

    /// Fields the caller needs on every listed entity.
    ///
    /// The selection when present, otherwise every field the schema
    /// declares for the type.
    pub fn required_fields(&self, schema: &Schema) -> BTreeSet<String> {
        match &self.select {
            Some(fields) => fields.clone(),
            None => schema.fields_of(&self.entity_type),
        }
    }

    /// Rejects structurally malformed intents.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty entity type anywhere in the
    /// tree.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.entity_type.is_empty() {
            return Err(ValidationError::EmptyEntityType);
        }
        for relation in &self.include {
            relation
                .intent
                .validate()
                .map_err(|e| ValidationError::nested(&relation.relation_name, e))?;
        }
        Ok(())
    }
}

impl RelationIntent {
    /// Creates a required include.
    pub fn new(
        relation_name: impl Into<String>,
        foreign_key: impl Into<String>,
        intent: Intent,
    ) -> Self {
        Self {
            relation_name: relation_name.into(),
            required: true,
            foreign_key: foreign_key.into(),
            intent,
        }
    }

    /// Child intent for one parent: the relation's filter plus the link to
    /// `parent_id`.
    pub fn child_intent(&self, parent_id: &str) -> Intent {
        let mut child = self.intent.clone();
        child.filter = child
            .filter
            .and(FilterNode::eq(self.foreign_key.as_str(), parent_id));
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_ands_filters() {
        let intent = Intent::new("post")
            .with_filter(FilterNode::eq("authorId", "u1"))
            .with_filter(FilterNode::eq("status", "published"))
            .with_skip(10)
            .with_take(5);

        assert_eq!(intent.filter.conjuncts().len(), 2);
        assert_eq!((intent.skip, intent.take), (10, Some(5)));
    }

    #[test]
    fn child_intent_links_parent() {
        let relation = RelationIntent::new(
            "comments",
            "postId",
            Intent::new("comment").with_filter(FilterNode::eq("approved", true)),
        );
        let child = relation.child_intent("p1");

        assert_eq!(child.entity_type, "comment");
        assert!(child
            .filter
            .conjuncts()
            .contains(&&FilterNode::eq("postId", "p1")));
        assert_eq!(child.filter.conjuncts().len(), 2);
    }

    #[test]
    fn empty_entity_type_rejected() {
        let nested = Intent::new("user").with_include(RelationIntent::new("posts", "authorId", Intent::new("")));
        assert!(matches!(
            nested.validate(),
            Err(ValidationError::NestedInclude { .. })
        ));
    }

    #[test]
    fn json_uses_where_key() {
        let intent: Intent = serde_json::from_str(
            r#"{
                "entity_type": "post",
                "where": {"kind": "compare", "field": "authorId", "op": "eq", "operand": {"literal": "u1"}},
                "take": 10
            }"#,
        )
        .unwrap();
        assert_eq!(intent.filter, FilterNode::eq("authorId", "u1"));
        assert_eq!(intent.take, Some(10));
        assert!(intent.select.is_none());
    }
}
