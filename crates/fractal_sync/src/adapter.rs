//! Network adapter abstraction.

use crate::error::SyncResult;
use fractal_cache::{EntityId, FilterNode, OrderSpec};
use fractal_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Request for a slice of a sorted, filtered id list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdListRequest {
    /// Listed entity type.
    pub entity_type: String,
    /// Concrete filter.
    #[serde(rename = "where")]
    pub filter: FilterNode,
    /// Sort keys.
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    /// Slice start.
    pub skip: usize,
    /// Slice length. `None` reads to the end.
    pub take: Option<usize>,
}

/// Ids of a list slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdListResponse {
    /// Ids in list order, starting at the requested `skip`.
    pub ids: Vec<EntityId>,
    /// Total list length, when the backend reports it.
    #[serde(default)]
    pub total: Option<usize>,
    /// More items exist past this slice.
    pub has_more: bool,
}

/// Request for entity fields by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFetchRequest {
    /// Entity type.
    pub entity_type: String,
    /// Entities to fetch.
    pub ids: Vec<EntityId>,
    /// Fields to return. `None` returns whole records.
    #[serde(default)]
    pub fields: Option<BTreeSet<String>>,
}

/// Fields of one entity as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    /// Entity id.
    pub id: EntityId,
    /// Entity type.
    pub entity_type: String,
    /// Returned field values. Every listed field is authoritative.
    pub data: BTreeMap<String, Value>,
}

/// A backend capable of answering list and entity requests.
///
/// Retries and timeouts are the adapter's business; callers see one
/// result per call.
pub trait NetworkAdapter: Send + Sync {
    /// Fetches a slice of an id list.
    fn fetch_ids(&self, request: &IdListRequest) -> SyncResult<IdListResponse>;

    /// Fetches entity fields. Unknown ids are omitted from the result.
    fn fetch_entities(&self, request: &EntityFetchRequest) -> SyncResult<Vec<EntityData>>;

    /// Renders a filter in the backend's query language.
    fn serialize_filter(&self, filter: &FilterNode) -> String {
        filter.to_string()
    }
}
