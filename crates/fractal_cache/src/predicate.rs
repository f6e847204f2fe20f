//! Predicate containment over conjunctive filters.
//!
//! [`PredicateUtils`] answers "does every entity matching A also match B"
//! conservatively: a `true` answer is always correct, a `false` answer may
//! be a missed containment. Only top-level conjunctions of literal
//! comparisons are reasoned about; anything else must match structurally.

use crate::filter::{FilterNode, FilterOp, Operand};
use crate::types::EntityId;
use fractal_codec::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Containment checks between filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredicateUtils;

impl PredicateUtils {
    /// Whether every entity matching `a` also matches `b`.
    pub fn is_subset(a: &FilterNode, b: &FilterNode) -> bool {
        let (Ok(a), Ok(b)) = (a.canonical(), b.canonical()) else {
            return false;
        };
        let narrow = a.conjuncts();
        b.conjuncts()
            .into_iter()
            .all(|wide| narrow.iter().any(|n| implies(n, wide)))
    }

    /// Whether every entity matching `b` also matches `a`.
    pub fn is_superset(a: &FilterNode, b: &FilterNode) -> bool {
        Self::is_subset(b, a)
    }

    /// A filter matching the entities of `a` that `b` does not match.
    ///
    /// Conjuncts of `b` already implied by `a` are dropped before negating;
    /// when nothing is left the result matches nothing.
    pub fn difference(a: &FilterNode, b: &FilterNode) -> FilterNode {
        let (Ok(ca), Ok(cb)) = (a.canonical(), b.canonical()) else {
            return a.clone().and(FilterNode::not(b.clone()));
        };
        let narrow = ca.conjuncts();
        let mut remaining: Vec<FilterNode> = cb
            .conjuncts()
            .into_iter()
            .filter(|wide| !narrow.iter().any(|n| implies(n, wide)))
            .cloned()
            .collect();

        let excluded = match remaining.len() {
            0 => return FilterNode::or(Vec::new()),
            1 => remaining.swap_remove(0),
            _ => FilterNode::And { nodes: remaining },
        };
        ca.clone().and(FilterNode::not(excluded))
    }
}

/// Whether leaf `a` implies leaf `b`.
fn implies(a: &FilterNode, b: &FilterNode) -> bool {
    if a == b {
        return true;
    }
    let (
        FilterNode::Compare {
            field: fa,
            op: oa,
            operand: Operand::Literal(va),
        },
        FilterNode::Compare {
            field: fb,
            op: ob,
            operand: Operand::Literal(vb),
        },
    ) = (a, b)
    else {
        return false;
    };
    if fa != fb {
        return false;
    }

    match (oa, ob) {
        (FilterOp::Eq, _) => ob.apply(va, vb),
        (FilterOp::In, _) => members(va).iter().all(|v| ob.apply(v, vb)),
        (FilterOp::Gt | FilterOp::Gte, FilterOp::Gt | FilterOp::Gte) => {
            bound_implies(va.compare(vb), *oa == FilterOp::Gte && *ob == FilterOp::Gt, Ordering::Greater)
        }
        (FilterOp::Lt | FilterOp::Lte, FilterOp::Lt | FilterOp::Lte) => {
            bound_implies(va.compare(vb), *oa == FilterOp::Lte && *ob == FilterOp::Lt, Ordering::Less)
        }
        (FilterOp::Neq | FilterOp::NotIn, FilterOp::Neq | FilterOp::NotIn) => {
            let excluded = members(va);
            members(vb)
                .iter()
                .all(|w| excluded.iter().any(|v| FilterOp::Eq.apply(v, w)))
        }
        _ => false,
    }
}

/// A bound at `a` implies a bound at `b` when `a` is tighter, or equal and
/// not looser in strictness.
fn bound_implies(ord: Option<Ordering>, inclusive_vs_strict: bool, tighter: Ordering) -> bool {
    match ord {
        Some(o) if o == tighter => true,
        Some(Ordering::Equal) => !inclusive_vs_strict,
        _ => false,
    }
}

/// Whether `filter` pins `foreign_key` to values other than `parent_id`.
fn excludes_parent(filter: &FilterNode, foreign_key: &str, parent_id: &EntityId) -> bool {
    filter.conjuncts().into_iter().any(|node| match node {
        FilterNode::Compare {
            field,
            op: FilterOp::Eq | FilterOp::In,
            operand: Operand::Literal(value),
        } if field == foreign_key => members(value)
            .iter()
            .all(|v| v.as_text() != Some(parent_id.as_str())),
        _ => false,
    })
}

fn members(value: &Value) -> Vec<&Value> {
    match value.as_array() {
        Some(items) => items.iter().collect(),
        None => vec![value],
    }
}

/// Relation child lists known to be fully fetched, by predicate.
///
/// Once every child matching a filter has been fetched, any stricter
/// filter over the same relation is answerable from the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationPredicateCache {
    exhausted: BTreeMap<String, Vec<FilterNode>>,
}

impl RelationPredicateCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(entity_type: &str, relation: &str) -> String {
        format!("{entity_type}.{relation}")
    }

    /// Records that every child of `relation` matching `filter` is cached.
    pub fn set_exhausted(&mut self, entity_type: &str, relation: &str, filter: &FilterNode) {
        let filter = filter.canonical().unwrap_or_else(|_| filter.clone());
        let known = self.exhausted.entry(Self::key(entity_type, relation)).or_default();
        if known.iter().any(|f| PredicateUtils::is_subset(&filter, f)) {
            return;
        }
        known.retain(|f| !PredicateUtils::is_subset(f, &filter));
        known.push(filter);
    }

    /// Whether `filter` is covered by an exhausted predicate.
    pub fn is_exhausted_subset(&self, entity_type: &str, relation: &str, filter: &FilterNode) -> bool {
        self.exhausted
            .get(&Self::key(entity_type, relation))
            .is_some_and(|known| known.iter().any(|f| PredicateUtils::is_subset(filter, f)))
    }

    /// Forgets the predicates of `relation` that may cover children of
    /// `parent_id`, linked through `foreign_key`. Returns how many were
    /// dropped.
    pub fn forget_parent(
        &mut self,
        entity_type: &str,
        relation: &str,
        foreign_key: &str,
        parent_id: &EntityId,
    ) -> usize {
        let key = Self::key(entity_type, relation);
        let Some(known) = self.exhausted.get_mut(&key) else {
            return 0;
        };
        let before = known.len();
        known.retain(|f| excludes_parent(f, foreign_key, parent_id));
        let dropped = before - known.len();
        if known.is_empty() {
            self.exhausted.remove(&key);
        }
        dropped
    }

    /// Forgets every predicate of `relation`.
    pub fn forget_relation(&mut self, entity_type: &str, relation: &str) -> usize {
        self.exhausted
            .remove(&Self::key(entity_type, relation))
            .map_or(0, |known| known.len())
    }

    /// Number of recorded predicates.
    pub fn len(&self) -> usize {
        self.exhausted.values().map(Vec::len).sum()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.exhausted.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.exhausted.clear();
    }
}
