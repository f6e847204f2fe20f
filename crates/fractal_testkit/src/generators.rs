//! Property-based test generators.
//!
//! Filters, orders and intents are generated over the fields of
//! [`crate::fixtures::blog_schema`].

use crate::fixtures::STATUSES;
use fractal_cache::{EntityId, FilterNode, FilterOp, Intent, Interval, OrderSpec, Value};
use proptest::prelude::*;

/// Generates an entity id.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    "[a-z][a-z0-9]{0,7}".prop_map(EntityId::from)
}

/// Generates an interval starting below `max_start` and at most `max_len` long.
pub fn interval_strategy(max_start: usize, max_len: usize) -> impl Strategy<Value = Interval> {
    (0..max_start, 1..=max_len.max(1)).prop_map(|(start, len)| Interval::new(start, start + len - 1))
}

/// Generates up to `max_count` possibly overlapping intervals.
pub fn intervals_strategy(max_count: usize) -> impl Strategy<Value = Vec<Interval>> {
    prop::collection::vec(interval_strategy(100, 12), 0..=max_count)
}

/// Generates a scalar value. Floats are always finite.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::Integer),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        "[a-z ]{0,12}".prop_map(Value::Text),
    ]
}

/// Generates a status literal.
pub fn status_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(STATUSES.to_vec())
}

/// Generates a comparison operator valid for scalar operands.
pub fn scalar_op_strategy() -> impl Strategy<Value = FilterOp> {
    prop::sample::select(vec![
        FilterOp::Eq,
        FilterOp::Neq,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
    ])
}

/// Generates a leaf filter over post fields.
pub fn post_leaf_strategy() -> impl Strategy<Value = FilterNode> {
    prop_oneof![
        status_strategy().prop_map(|status| FilterNode::eq("status", status)),
        (scalar_op_strategy(), 0i64..10)
            .prop_map(|(op, score)| FilterNode::compare("score", op, score)),
        prop::collection::vec(0usize..4, 1..3).prop_map(|users| {
            FilterNode::is_in(
                "authorId",
                users.into_iter().map(|u| Value::from(format!("u{u}"))).collect(),
            )
        }),
    ]
}

/// Generates the conjuncts of a post filter.
pub fn post_conjuncts_strategy() -> impl Strategy<Value = Vec<FilterNode>> {
    prop::collection::vec(
        prop_oneof![
            3 => post_leaf_strategy(),
            1 => post_leaf_strategy().prop_map(FilterNode::not),
            1 => prop::collection::vec(post_leaf_strategy(), 2..4).prop_map(FilterNode::or),
        ],
        0..4,
    )
}

/// Folds conjuncts into a single conjunction.
pub fn conjunction(conjuncts: Vec<FilterNode>) -> FilterNode {
    conjuncts.into_iter().fold(FilterNode::all(), FilterNode::and)
}

/// Generates a filter over post fields.
pub fn post_filter_strategy() -> impl Strategy<Value = FilterNode> {
    post_conjuncts_strategy().prop_map(conjunction)
}

/// Generates a sort list over post fields.
pub fn post_order_strategy() -> impl Strategy<Value = Vec<OrderSpec>> {
    let key = (prop::sample::select(vec!["title", "score", "status"]), any::<bool>()).prop_map(
        |(field, ascending)| {
            if ascending {
                OrderSpec::asc(field)
            } else {
                OrderSpec::desc(field)
            }
        },
    );
    prop::collection::vec(key, 0..3)
}

/// Generates a windowed post intent.
pub fn post_intent_strategy() -> impl Strategy<Value = Intent> {
    (post_filter_strategy(), post_order_strategy(), 0usize..12, 1usize..8).prop_map(
        |(filter, order_by, skip, take)| {
            order_by
                .into_iter()
                .fold(Intent::new("post").with_filter(filter), Intent::with_order)
                .with_skip(skip)
                .with_take(take)
        },
    )
}
