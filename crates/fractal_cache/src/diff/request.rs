//! Fetch plan request descriptors.

use crate::binding::QueryDefinition;
use crate::filter::{FilterNode, FilterParams};
use crate::intent::Intent;
use crate::order::OrderSpec;
use crate::types::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// How a request addresses the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestMode {
    /// Fetch the given entities.
    Ids {
        /// Entity ids, in request order.
        ids: Vec<EntityId>,
    },
    /// Fetch a slice of the sorted, filtered list.
    Pagination {
        /// Slice start.
        skip: usize,
        /// Slice length. `None` reads to the end of the list.
        take: Option<usize>,
    },
}

/// One parent's share of a relation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentBatchEntry {
    /// Parent entity id.
    pub parent_id: EntityId,
    /// Hash of the parent's own child-binding parameters.
    pub param_hash: String,
    /// Child-binding parameters (the relation filter plus the parent link).
    pub parameters: FilterParams,
    /// Window start the parent asked for.
    pub original_skip: usize,
    /// Window length the parent asked for.
    pub original_take: Option<usize>,
}

/// Relation a request fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMeta {
    /// Entity type of the parents.
    pub parent_type: String,
    /// Relation name on the parent.
    pub relation_name: String,
    /// Child field holding the parent id.
    pub foreign_key: String,
    /// Per-parent child query shape the results are attributed to.
    pub definition: QueryDefinition,
    /// Several parents share the request through a membership filter.
    pub batched: bool,
}

/// Reconciliation hints attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Parents whose child windows this request fills.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_batch: Vec<ParentBatchEntry>,
    /// Relation being filled, for relation requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationMeta>,
}

/// One backend request of a fetch plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Entity type requested.
    pub entity_type: String,
    /// Addressing mode.
    pub mode: RequestMode,
    /// Concrete filter.
    #[serde(rename = "where")]
    pub filter: FilterNode,
    /// Sort keys.
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    /// Requested fields. `None` requests whole records.
    #[serde(default)]
    pub select: Option<BTreeSet<String>>,
    /// Reconciliation hints.
    #[serde(default)]
    pub metadata: RequestMetadata,
}

impl DataRequest {
    /// Creates an id-mode request.
    pub fn ids(
        entity_type: impl Into<String>,
        ids: Vec<EntityId>,
        select: Option<BTreeSet<String>>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            mode: RequestMode::Ids { ids },
            filter: FilterNode::all(),
            order_by: Vec::new(),
            select,
            metadata: RequestMetadata::default(),
        }
    }

    /// Carries the filter and sort of `intent`, which the backend applies
    /// to id-mode requests as well.
    #[must_use]
    pub fn scoped_to(mut self, intent: &Intent) -> Self {
        self.filter = intent.filter.clone();
        self.order_by = intent.order_by.clone();
        self
    }

    /// Creates a pagination request over an intent's list.
    pub fn page(intent: &Intent, skip: usize, take: Option<usize>) -> Self {
        Self {
            entity_type: intent.entity_type.clone(),
            mode: RequestMode::Pagination { skip, take },
            filter: intent.filter.clone(),
            order_by: intent.order_by.clone(),
            select: intent.select.clone(),
            metadata: RequestMetadata::default(),
        }
    }

    /// Ids of an id-mode request.
    pub fn id_list(&self) -> Option<&[EntityId]> {
        match &self.mode {
            RequestMode::Ids { ids } => Some(ids),
            RequestMode::Pagination { .. } => None,
        }
    }

    /// Whether this is a pagination request.
    pub fn is_pagination(&self) -> bool {
        matches!(self.mode, RequestMode::Pagination { .. })
    }

    /// Sorted selection signature: the field list, or `all`.
    pub fn select_signature(&self) -> String {
        match &self.select {
            Some(fields) => fields.iter().cloned().collect::<Vec<_>>().join(","),
            None => "all".to_string(),
        }
    }
}

impl fmt::Display for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            RequestMode::Ids { ids } => {
                write!(f, "{} ids({})", self.entity_type, ids.len())?;
            }
            RequestMode::Pagination { skip, take } => {
                write!(f, "{} page(skip={skip}, take=", self.entity_type)?;
                match take {
                    Some(take) => write!(f, "{take})")?,
                    None => f.write_str("all)")?,
                }
                write!(f, " where {}", self.filter)?;
            }
        }
        write!(f, " select {}", self.select_signature())?;
        if let Some(relation) = &self.metadata.relation {
            write!(
                f,
                " for {}.{} ({} parents)",
                relation.parent_type,
                relation.relation_name,
                self.metadata.parent_batch.len()
            )?;
        }
        Ok(())
    }
}

/// Independent backend requests filling a diff's gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchPlan {
    /// Requests, in no particular execution order.
    pub requests: Vec<DataRequest>,
}

impl FetchPlan {
    /// Whether the cache already answers the intent.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Number of requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Number of pagination requests.
    pub fn pagination_count(&self) -> usize {
        self.requests.iter().filter(|r| r.is_pagination()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_signature_is_sorted() {
        let request = DataRequest::ids(
            "user",
            vec![EntityId::from("u1")],
            Some(["name", "bio"].into_iter().map(String::from).collect()),
        );
        assert_eq!(request.select_signature(), "bio,name");
        assert_eq!(DataRequest::ids("user", vec![], None).select_signature(), "all");
    }

    #[test]
    fn page_copies_intent_query() {
        let intent = Intent::new("post")
            .with_filter(FilterNode::eq("authorId", "u1"))
            .with_order(OrderSpec::desc("createdAt"))
            .with_select(["title"]);
        let request = DataRequest::page(&intent, 20, None);

        assert!(request.is_pagination());
        assert!(request.id_list().is_none());
        assert_eq!(request.filter, intent.filter);
        assert_eq!(request.select, intent.select);
        assert_eq!(
            request.to_string(),
            "post page(skip=20, take=all) where authorId = \"u1\" select title"
        );
    }

    #[test]
    fn plan_json_shape() {
        let plan = FetchPlan {
            requests: vec![DataRequest::ids("user", vec![EntityId::from("u1")], None)],
        };
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["requests"][0]["mode"]["type"], "ids");
        assert_eq!(json["requests"][0]["mode"]["ids"][0], "u1");
        assert!(json["requests"][0]["metadata"].get("relation").is_none());
    }
}
