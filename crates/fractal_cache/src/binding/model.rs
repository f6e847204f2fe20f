//! Query definitions and bindings.

use super::interval::IntervalSet;
use crate::error::{CacheError, CacheResult};
use crate::filter::{FilterNode, FilterParams};
use crate::order::OrderSpec;
use crate::types::{EntityId, Interval};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The shape of a list query: entity type, sort and filter template.
///
/// Queries differing only in literal values share one definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    /// Stable hash of the shape.
    pub id: String,
    /// Listed entity type.
    pub entity_type: String,
    /// Normalized sort list.
    pub order_by: Vec<OrderSpec>,
    /// Filter with placeholders instead of literals.
    pub where_template: FilterNode,
}

impl QueryDefinition {
    /// Whether the shape reads any of `fields` through its filter or sort.
    pub fn references_any<'a>(&self, mut fields: impl Iterator<Item = &'a str>) -> bool {
        let filtered = self.where_template.referenced_fields();
        fields.any(|field| {
            filtered.contains(field) || self.order_by.iter().any(|spec| spec.field == field)
        })
    }
}

/// Cached pagination state of one concrete parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBinding {
    /// Owning definition.
    pub definition_id: String,
    /// Hash of `parameters`.
    pub param_hash: String,
    /// Values of the template's placeholders.
    pub parameters: FilterParams,
    intervals: IntervalSet,
    index_to_id: BTreeMap<usize, EntityId>,
    /// List length reported by the server, once it said no more items exist.
    #[serde(default)]
    known_len: Option<usize>,
    /// Coverage must be revalidated before use.
    pub dirty: bool,
    /// Last time the server confirmed this binding, in ms since the epoch.
    pub last_validate_at: Option<u64>,
}

impl QueryBinding {
    /// Creates an empty binding.
    pub fn new(
        definition_id: impl Into<String>,
        param_hash: impl Into<String>,
        parameters: FilterParams,
    ) -> Self {
        Self {
            definition_id: definition_id.into(),
            param_hash: param_hash.into(),
            parameters,
            intervals: IntervalSet::new(),
            index_to_id: BTreeMap::new(),
            known_len: None,
            dirty: false,
            last_validate_at: None,
        }
    }

    /// Fetched index ranges.
    pub fn intervals(&self) -> &IntervalSet {
        &self.intervals
    }

    /// Known ids by position.
    pub fn index_to_id(&self) -> &BTreeMap<usize, EntityId> {
        &self.index_to_id
    }

    /// Number of positions known to exist, when the list is exhausted.
    ///
    /// Positions below it need not be cached: an empty page fetched past
    /// the end of a cold list bounds the length without covering anything.
    pub fn known_len(&self) -> Option<usize> {
        self.known_len
    }

    /// Whether no item exists past [`Self::known_len`].
    pub fn is_exhausted(&self) -> bool {
        self.known_len.is_some()
    }

    /// Merges a fetched range.
    ///
    /// Positions inside `interval` take the ids of `id_map`, replacing
    /// whatever was known before.
    ///
    /// # Errors
    ///
    /// Returns a consistency error if `interval` is reversed or `id_map`
    /// names a position outside it. The binding is left untouched.
    pub fn merge(
        &mut self,
        interval: Interval,
        id_map: BTreeMap<usize, EntityId>,
    ) -> CacheResult<()> {
        if !interval.is_valid() {
            return Err(CacheError::consistency(format!(
                "reversed interval {interval}"
            )));
        }
        if let Some(outside) = id_map.keys().find(|i| !interval.contains(**i)) {
            return Err(CacheError::consistency(format!(
                "index {outside} lies outside merged interval {interval}"
            )));
        }

        let stale: Vec<usize> = self
            .index_to_id
            .range(interval.start..=interval.end)
            .map(|(i, _)| *i)
            .collect();
        for i in stale {
            self.index_to_id.remove(&i);
        }
        self.index_to_id.extend(id_map);

        if self.known_len.is_some_and(|len| interval.end >= len) {
            self.known_len = None;
        }
        self.intervals.insert(interval);
        Ok(())
    }

    /// Ids for `[skip, skip + take)`, `None` where unknown.
    pub fn window_ids(&self, skip: usize, take: usize) -> Vec<Option<EntityId>> {
        (skip..skip.saturating_add(take))
            .map(|i| self.index_to_id.get(&i).cloned())
            .collect()
    }

    /// Marks the list complete after `last_index` and drops anything
    /// recorded past it. `None` means the list is empty.
    ///
    /// An already exhausted list keeps the shorter of the two lengths.
    pub fn mark_exhausted(&mut self, last_index: Option<usize>) {
        let len = last_index.map_or(0, |last| last.saturating_add(1));
        let len = self.known_len.map_or(len, |known| known.min(len));
        self.intervals.truncate_after(len.checked_sub(1));
        let _ = self.index_to_id.split_off(&len);
        self.known_len = Some(len);
    }

    /// Forgets all coverage.
    pub fn reset(&mut self) {
        self.intervals = IntervalSet::new();
        self.index_to_id.clear();
        self.known_len = None;
        self.dirty = false;
    }

    /// Whether any position maps to `id`.
    pub fn references(&self, id: &EntityId) -> bool {
        self.index_to_id.values().any(|known| known == id)
    }

    /// Ids of the covered prefix starting at position zero.
    pub fn prefix_ids(&self) -> Vec<EntityId> {
        match self.intervals.covering(0) {
            Some(head) => self
                .index_to_id
                .range(0..=head.end)
                .map(|(_, id)| id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Verifies the interval invariant.
    ///
    /// # Errors
    ///
    /// Returns a consistency error when intervals overlap, touch, are out of
    /// order, reach past the known length, or an id sits outside every
    /// interval.
    pub fn check_invariants(&self) -> CacheResult<()> {
        if !self.intervals.is_well_formed() {
            return Err(CacheError::consistency(format!(
                "malformed intervals {:?}",
                self.intervals.as_slice()
            )));
        }
        if let (Some(len), Some(end)) = (self.known_len, self.intervals.last_end()) {
            if end >= len {
                return Err(CacheError::consistency(format!(
                    "interval end {end} lies past known length {len}"
                )));
            }
        }
        if let Some(stray) = self.index_to_id.keys().find(|i| !self.intervals.contains(**i)) {
            return Err(CacheError::consistency(format!(
                "index {stray} is outside every interval"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(start: usize, names: &[&str]) -> BTreeMap<usize, EntityId> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (start + i, EntityId::from(*name)))
            .collect()
    }

    fn binding() -> QueryBinding {
        QueryBinding::new("def", "params", FilterParams::new())
    }

    #[test]
    fn merge_and_window() {
        let mut b = binding();
        b.merge(Interval::new(0, 2), ids(0, &["a", "b", "c"])).unwrap();
        b.merge(Interval::new(5, 6), ids(5, &["f", "g"])).unwrap();

        let window = b.window_ids(1, 6);
        assert_eq!(window.len(), 6);
        assert_eq!(window[0], Some(EntityId::from("b")));
        assert_eq!(window[2], None);
        assert_eq!(window[4], Some(EntityId::from("f")));
        b.check_invariants().unwrap();
    }

    #[test]
    fn refetch_overwrites_positions() {
        let mut b = binding();
        b.merge(Interval::new(0, 2), ids(0, &["a", "b", "c"])).unwrap();
        b.merge(Interval::new(1, 3), ids(1, &["x", "y", "z"])).unwrap();

        assert_eq!(b.intervals().as_slice(), &[Interval::new(0, 3)]);
        let window: Vec<String> = b
            .window_ids(0, 4)
            .into_iter()
            .map(|id| id.unwrap().to_string())
            .collect();
        assert_eq!(window, vec!["a", "x", "y", "z"]);
    }

    #[test]
    fn ids_outside_interval_are_rejected() {
        let mut b = binding();
        let err = b.merge(Interval::new(0, 1), ids(0, &["a", "b", "c"])).unwrap_err();
        assert!(matches!(err, CacheError::Consistency { .. }));
        assert!(b.intervals().is_empty());
        assert!(b.index_to_id().is_empty());

        let err = b.merge(Interval::new(3, 1), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CacheError::Consistency { .. }));
    }

    #[test]
    fn exhaustion_truncates() {
        let mut b = binding();
        b.merge(Interval::new(0, 4), ids(0, &["a", "b", "c", "d", "e"])).unwrap();
        b.mark_exhausted(Some(2));

        assert_eq!(b.known_len(), Some(3));
        assert_eq!(b.index_to_id().len(), 3);
        b.check_invariants().unwrap();

        // Growing past the known end means the list is longer than thought.
        b.merge(Interval::new(3, 3), ids(3, &["d"])).unwrap();
        assert!(!b.is_exhausted());
    }

    #[test]
    fn empty_page_past_cold_start_keeps_its_bound() {
        let mut b = binding();
        // Positions 10.. are empty; 0..10 were never listed.
        b.mark_exhausted(Some(9));
        assert_eq!(b.known_len(), Some(10));
        assert!(b.intervals().is_empty());
        b.check_invariants().unwrap();

        b.merge(Interval::new(0, 2), ids(0, &["a", "b", "c"])).unwrap();
        assert_eq!(b.known_len(), Some(10));
        b.mark_exhausted(Some(2));
        assert_eq!(b.known_len(), Some(3));

        // A later, looser bound does not widen the list.
        b.mark_exhausted(Some(9));
        assert_eq!(b.known_len(), Some(3));
        b.check_invariants().unwrap();
    }

    #[test]
    fn empty_list_is_exhausted_at_zero() {
        let mut b = binding();
        b.mark_exhausted(None);
        assert_eq!(b.known_len(), Some(0));
    }

    #[test]
    fn prefix_and_references() {
        let mut b = binding();
        b.merge(Interval::new(0, 1), ids(0, &["a", "b"])).unwrap();
        b.merge(Interval::new(4, 4), ids(4, &["e"])).unwrap();

        assert_eq!(b.prefix_ids(), vec![EntityId::from("a"), EntityId::from("b")]);
        assert!(b.references(&EntityId::from("e")));
        assert!(!b.references(&EntityId::from("z")));

        b.reset();
        assert!(b.prefix_ids().is_empty());
    }

    #[test]
    fn definition_field_references() {
        let def = QueryDefinition {
            id: "d".into(),
            entity_type: "post".into(),
            order_by: vec![OrderSpec::desc("createdAt")],
            where_template: FilterNode::eq("title", "x").split().unwrap().0,
        };
        assert!(def.references_any(["title"].into_iter()));
        assert!(def.references_any(["createdAt"].into_iter()));
        assert!(!def.references_any(["body"].into_iter()));
    }
}
