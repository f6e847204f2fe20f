//! Entity and relation declarations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Known fields of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Entity type name.
    pub name: String,
    /// Every field the backend can return for this type.
    pub fields: Vec<String>,
}

impl EntityConfig {
    /// Creates an entity declaration.
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// A one-to-many link from a parent entity to child entities.
///
/// Children carry the parent's id in `foreign_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Relation name used in includes.
    pub key: String,
    /// Parent entity type.
    pub source_entity: String,
    /// Child entity type.
    pub target_entity: String,
    /// Child field holding the parent id.
    pub foreign_key: String,
}

impl RelationConfig {
    /// Creates a relation declaration.
    pub fn new(
        key: impl Into<String>,
        source_entity: impl Into<String>,
        target_entity: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            source_entity: source_entity.into(),
            target_entity: target_entity.into(),
            foreign_key: foreign_key.into(),
        }
    }
}

/// Entity and relation declarations shared by every cache component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Declared entity types.
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    /// Declared relations.
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity declaration.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityConfig) -> Self {
        self.entities.push(entity);
        self
    }

    /// Adds a relation declaration.
    #[must_use]
    pub fn with_relation(mut self, relation: RelationConfig) -> Self {
        self.relations.push(relation);
        self
    }

    /// Looks up an entity declaration.
    pub fn entity(&self, name: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Known fields of an entity type, empty when undeclared.
    pub fn fields_of(&self, entity_type: &str) -> BTreeSet<String> {
        self.entity(entity_type)
            .map(|e| e.fields.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Looks up a relation by its source entity and name.
    pub fn relation(&self, source_entity: &str, key: &str) -> Option<&RelationConfig> {
        self.relations
            .iter()
            .find(|r| r.source_entity == source_entity && r.key == key)
    }

    /// Relations whose parent is `source_entity`.
    pub fn relations_from<'a>(
        &'a self,
        source_entity: &'a str,
    ) -> impl Iterator<Item = &'a RelationConfig> + 'a {
        self.relations
            .iter()
            .filter(move |r| r.source_entity == source_entity)
    }

    /// Relations whose children are `target_entity`.
    pub fn relations_to<'a>(
        &'a self,
        target_entity: &'a str,
    ) -> impl Iterator<Item = &'a RelationConfig> + 'a {
        self.relations
            .iter()
            .filter(move |r| r.target_entity == target_entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog() -> Schema {
        Schema::new()
            .with_entity(EntityConfig::new("user", ["name", "email"]))
            .with_entity(EntityConfig::new("post", ["title", "authorId"]))
            .with_relation(RelationConfig::new("posts", "user", "post", "authorId"))
            .with_relation(RelationConfig::new("drafts", "user", "post", "authorId"))
    }

    #[test]
    fn lookups() {
        let schema = blog();
        assert_eq!(schema.fields_of("user").len(), 2);
        assert!(schema.fields_of("tag").is_empty());
        assert_eq!(
            schema.relation("user", "posts").map(|r| r.foreign_key.as_str()),
            Some("authorId")
        );
        assert!(schema.relation("post", "posts").is_none());
        assert_eq!(schema.relations_from("user").count(), 2);
        assert_eq!(schema.relations_to("post").count(), 2);
        assert_eq!(schema.relations_to("user").count(), 0);
    }

    #[test]
    fn json_roundtrip() {
        let schema = blog();
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
