//! Sort specifications.

use fractal_codec::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    /// Stable direction name used in hashing.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// One sort key. The first key in a list is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Field to sort on.
    pub field: String,
    /// Direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderSpec {
    /// Ascending key.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending key.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Normalizes a sort list by dropping repeated fields.
///
/// A later key on a field that already sorts the list can never change the
/// order, so only the first occurrence is kept.
pub fn normalize_order(order_by: &[OrderSpec]) -> Vec<OrderSpec> {
    let mut seen = HashSet::new();
    order_by
        .iter()
        .filter(|spec| seen.insert(spec.field.as_str()))
        .cloned()
        .collect()
}

static NULL: Value = Value::Null;

/// Compares two rows by a sort list.
///
/// `lookup` fetches a field of a row; missing fields sort as null.
pub fn compare_rows<R, F>(order_by: &[OrderSpec], a: &R, b: &R, lookup: F) -> Ordering
where
    F: for<'r> Fn(&'r R, &str) -> Option<&'r Value>,
{
    for spec in order_by {
        let left = lookup(a, &spec.field).unwrap_or(&NULL);
        let right = lookup(b, &spec.field).unwrap_or(&NULL);
        let ord = match spec.direction {
            SortDirection::Asc => left.sort_cmp(right),
            SortDirection::Desc => right.sort_cmp(left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
