//! Property tests over interval algebra, query keys and resolution.

use fractal_cache::binding::IntervalSet;
use fractal_cache::{BindingStore, EntityId, FilterNode, FilterParams, Interval, QueryBinding, QueryKey};
use fractal_testkit::generators::*;
use fractal_testkit::CacheHarness;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn covered_by_any(intervals: &[Interval], index: usize) -> bool {
    intervals.iter().any(|iv| iv.contains(index))
}

proptest! {
    #[test]
    fn insert_keeps_set_well_formed(intervals in intervals_strategy(12)) {
        let set = IntervalSet::from_intervals(intervals.iter().copied());
        prop_assert!(set.is_well_formed());
        for index in 0..130 {
            prop_assert_eq!(set.contains(index), covered_by_any(&intervals, index));
        }
    }

    #[test]
    fn gaps_complement_coverage(
        intervals in intervals_strategy(8),
        window in interval_strategy(100, 30),
    ) {
        let set = IntervalSet::from_intervals(intervals.iter().copied());
        let gaps = set.gaps_within(window);
        for index in window.start..=window.end {
            let in_gap = covered_by_any(&gaps, index);
            prop_assert_eq!(in_gap, !set.contains(index));
        }
        for pair in gaps.windows(2) {
            prop_assert!(pair[0].end + 1 < pair[1].start);
        }
    }

    #[test]
    fn merges_keep_binding_invariants(slices in intervals_strategy(10), exhaust_at in prop::option::of(0usize..120)) {
        let mut binding = QueryBinding::new("def", "params", FilterParams::new());
        for (n, slice) in slices.iter().enumerate() {
            let ids: BTreeMap<usize, EntityId> = (slice.start..=slice.end)
                .map(|i| (i, EntityId::from(format!("e{n}_{i}"))))
                .collect();
            binding.merge(*slice, ids).unwrap();
            prop_assert!(binding.check_invariants().is_ok());
        }
        if let Some(last) = exhaust_at {
            binding.mark_exhausted(Some(last));
            prop_assert!(binding.check_invariants().is_ok());
            prop_assert_eq!(binding.known_len(), Some(last + 1));
            prop_assert!(binding.intervals().last_end().map_or(true, |end| end <= last));
        }
    }

    #[test]
    fn conjunct_order_does_not_change_the_key(
        (conjuncts, shuffled) in post_conjuncts_strategy()
            .prop_flat_map(|c| (Just(c.clone()), Just(c).prop_shuffle())),
        order_by in post_order_strategy(),
    ) {
        let a = QueryKey::resolve("post", &order_by, &conjunction(conjuncts)).unwrap();
        let b = QueryKey::resolve("post", &order_by, &conjunction(shuffled)).unwrap();
        prop_assert_eq!(&a.definition_id, &b.definition_id);
        prop_assert_eq!(&a.param_hash, &b.param_hash);
        prop_assert_eq!(a.template, b.template);
    }

    #[test]
    fn different_parameters_share_a_definition(
        left in status_strategy(),
        right in status_strategy(),
    ) {
        let a = QueryKey::resolve("post", &[], &FilterNode::eq("status", left)).unwrap();
        let b = QueryKey::resolve("post", &[], &FilterNode::eq("status", right)).unwrap();
        prop_assert_eq!(&a.definition_id, &b.definition_id);
        prop_assert_eq!(a.param_hash == b.param_hash, left == right);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn resolved_intents_plan_nothing(intent in post_intent_strategy()) {
        let harness = CacheHarness::blog();
        let report = harness.executor().resolve(&intent).unwrap();
        prop_assert!(report.converged);
        prop_assert_eq!(harness.plan_len(&intent), 0);
        prop_assert!(harness.all_records_sound());
        prop_assert!(harness.context.snapshot().validate().is_ok());
    }

    #[test]
    fn cached_window_matches_backend_order(intent in post_intent_strategy()) {
        let harness = CacheHarness::blog();
        harness.executor().resolve(&intent).unwrap();

        let key = QueryKey::resolve(&intent.entity_type, &intent.order_by, &intent.filter).unwrap();
        let state = harness.context.read();
        let binding = state.bindings.get_binding(&key.definition_id, &key.param_hash).unwrap();
        let take = intent.take.unwrap_or_default();
        let cached: Vec<EntityId> = binding
            .window_ids(intent.skip, take)
            .into_iter()
            .flatten()
            .collect();

        let request = fractal_sync::IdListRequest {
            entity_type: "post".into(),
            filter: intent.filter.clone(),
            order_by: intent.order_by.clone(),
            skip: intent.skip,
            take: intent.take,
        };
        let expected = fractal_sync::NetworkAdapter::fetch_ids(harness.adapter.as_ref(), &request).unwrap();
        prop_assert_eq!(cached, expected.ids);
    }
}
