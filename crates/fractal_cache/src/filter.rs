//! Backend-agnostic filter predicate tree.
//!
//! A [`FilterNode`] describes the subset of entities a query addresses.
//! Literal operands can be lifted out into named placeholders so that
//! queries differing only in their literals share one template:
//!
//! ```
//! use fractal_cache::filter::{FilterNode, FilterOp};
//!
//! let a = FilterNode::eq("authorId", "u1");
//! let b = FilterNode::eq("authorId", "u2");
//!
//! let (template_a, params_a) = a.split().unwrap();
//! let (template_b, params_b) = b.split().unwrap();
//! assert_eq!(template_a, template_b);
//! assert_ne!(params_a, params_b);
//! ```

use crate::error::CacheResult;
use fractal_codec::{to_canonical_cbor, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Placeholder name -> concrete value.
pub type FilterParams = BTreeMap<String, Value>;

/// Comparison operator of a leaf predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Member of a list.
    In,
    /// Not a member of a list.
    NotIn,
}

impl FilterOp {
    /// Stable operator name used in hashing.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::NotIn => "not_in",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Neq => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT IN",
        }
    }

    /// Applies the operator to a field value and an operand.
    ///
    /// Values of incomparable kinds are never equal and never ordered.
    pub fn apply(&self, left: &Value, right: &Value) -> bool {
        let ord = left.compare(right);
        match self {
            FilterOp::Eq => ord == Some(Ordering::Equal),
            FilterOp::Neq => ord != Some(Ordering::Equal),
            FilterOp::Gt => ord == Some(Ordering::Greater),
            FilterOp::Gte => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::Lt => ord == Some(Ordering::Less),
            FilterOp::Lte => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            FilterOp::In => member_of(left, right),
            FilterOp::NotIn => !member_of(left, right),
        }
    }
}

fn member_of(left: &Value, set: &Value) -> bool {
    match set.as_array() {
        Some(items) => items.iter().any(|item| FilterOp::Eq.apply(left, item)),
        None => FilterOp::Eq.apply(left, set),
    }
}

/// Right-hand side of a leaf predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// A concrete value.
    Literal(Value),
    /// A named slot filled from a binding's parameters.
    Placeholder(String),
}

/// A node in the filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterNode {
    /// All children hold. An empty conjunction matches everything.
    And {
        /// Conjuncts.
        nodes: Vec<FilterNode>,
    },
    /// At least one child holds. An empty disjunction matches nothing.
    Or {
        /// Disjuncts.
        nodes: Vec<FilterNode>,
    },
    /// The child does not hold.
    Not {
        /// Negated predicate.
        node: Box<FilterNode>,
    },
    /// Leaf comparison of a field against an operand.
    Compare {
        /// Field name.
        field: String,
        /// Operator.
        op: FilterOp,
        /// Right-hand side.
        operand: Operand,
    },
}

impl Default for FilterNode {
    fn default() -> Self {
        Self::all()
    }
}

impl FilterNode {
    /// Filter matching every entity.
    pub fn all() -> Self {
        FilterNode::And { nodes: Vec::new() }
    }

    /// Leaf comparison against a literal.
    pub fn compare(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        FilterNode::Compare {
            field: field.into(),
            op,
            operand: Operand::Literal(value.into()),
        }
    }

    /// Equality leaf.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, FilterOp::Eq, value)
    }

    /// Set membership leaf.
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::compare(field, FilterOp::In, Value::Array(values))
    }

    /// Negation.
    pub fn not(node: FilterNode) -> Self {
        FilterNode::Not {
            node: Box::new(node),
        }
    }

    /// Disjunction.
    pub fn or(nodes: Vec<FilterNode>) -> Self {
        FilterNode::Or { nodes }
    }

    /// Conjunction of `self` and `other`, flattening existing conjunctions.
    #[must_use]
    pub fn and(self, other: FilterNode) -> Self {
        let mut nodes = match self {
            FilterNode::And { nodes } => nodes,
            node => vec![node],
        };
        match other {
            FilterNode::And { nodes: more } => nodes.extend(more),
            node => nodes.push(node),
        }
        FilterNode::And { nodes }
    }

    /// Whether this filter is the empty conjunction.
    pub fn is_match_all(&self) -> bool {
        matches!(self, FilterNode::And { nodes } if nodes.is_empty())
    }

    /// Evaluates the filter with three-valued logic.
    ///
    /// `resolve` returns the value of a field, or `None` when the field is
    /// unknown. The result is `None` when the outcome depends on an unknown
    /// field or an unbound placeholder.
    pub fn matches<'v, F>(&self, resolve: &F) -> Option<bool>
    where
        F: Fn(&str) -> Option<&'v Value>,
    {
        match self {
            FilterNode::And { nodes } => {
                let mut unknown = false;
                for node in nodes {
                    match node.matches(resolve) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                (!unknown).then_some(true)
            }
            FilterNode::Or { nodes } => {
                let mut unknown = false;
                for node in nodes {
                    match node.matches(resolve) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                (!unknown).then_some(false)
            }
            FilterNode::Not { node } => node.matches(resolve).map(|b| !b),
            FilterNode::Compare { field, op, operand } => {
                let left = resolve(field)?;
                match operand {
                    Operand::Literal(right) => Some(op.apply(left, right)),
                    Operand::Placeholder(_) => None,
                }
            }
        }
    }

    /// Names of all fields the filter reads.
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            FilterNode::And { nodes } | FilterNode::Or { nodes } => {
                for node in nodes {
                    node.collect_fields(out);
                }
            }
            FilterNode::Not { node } => node.collect_fields(out),
            FilterNode::Compare { field, .. } => {
                out.insert(field.clone());
            }
        }
    }

    /// Top-level conjuncts. A non-conjunction is its own single conjunct.
    pub fn conjuncts(&self) -> Vec<&FilterNode> {
        match self {
            FilterNode::And { nodes } => nodes.iter().flat_map(FilterNode::conjuncts).collect(),
            node => vec![node],
        }
    }

    /// Placeholders bound to `field` through an equality or membership
    /// test in the top-level conjunction.
    pub fn linking_placeholders(&self, field: &str) -> Vec<&str> {
        self.conjuncts()
            .into_iter()
            .filter_map(|node| match node {
                FilterNode::Compare {
                    field: f,
                    op: FilterOp::Eq | FilterOp::In,
                    operand: Operand::Placeholder(name),
                } if f == field => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Canonical form of the filter.
    ///
    /// Nested conjunctions and disjunctions are flattened, single-child
    /// groups are unwrapped, double negation is removed, membership lists
    /// are sorted and deduplicated, and sibling order is made deterministic.
    /// Logically identical trees built in a different order canonicalize to
    /// the same tree.
    ///
    /// # Errors
    ///
    /// Returns a hashing error if a literal cannot be encoded (NaN).
    pub fn canonical(&self) -> CacheResult<FilterNode> {
        match self {
            FilterNode::And { nodes } => {
                let flat = flatten(nodes, |n| match n {
                    FilterNode::And { nodes } => Ok(nodes),
                    other => Err(other),
                })?;
                regroup(flat, |nodes| FilterNode::And { nodes })
            }
            FilterNode::Or { nodes } => {
                let flat = flatten(nodes, |n| match n {
                    FilterNode::Or { nodes } => Ok(nodes),
                    other => Err(other),
                })?;
                regroup(flat, |nodes| FilterNode::Or { nodes })
            }
            FilterNode::Not { node } => Ok(match node.canonical()? {
                FilterNode::Not { node: inner } => *inner,
                other => FilterNode::not(other),
            }),
            FilterNode::Compare { field, op, operand } => {
                let operand = match (op, operand) {
                    (FilterOp::In | FilterOp::NotIn, Operand::Literal(Value::Array(items))) => {
                        let mut items = items.clone();
                        items.sort_by(Value::sort_cmp);
                        items.dedup();
                        Operand::Literal(Value::Array(items))
                    }
                    (_, operand) => operand.clone(),
                };
                Ok(FilterNode::Compare {
                    field: field.clone(),
                    op: *op,
                    operand,
                })
            }
        }
    }

    /// Splits the canonical filter into a template and its parameters.
    ///
    /// Every literal operand is replaced by a placeholder named `p0`, `p1`,
    /// ... in depth-first order, and the literal is recorded under that name.
    ///
    /// # Errors
    ///
    /// Returns a hashing error if a literal cannot be encoded (NaN).
    pub fn split(&self) -> CacheResult<(FilterNode, FilterParams)> {
        let mut params = FilterParams::new();
        let template = self.canonical()?.lift_literals(&mut params);
        Ok((template, params))
    }

    fn lift_literals(self, params: &mut FilterParams) -> FilterNode {
        match self {
            FilterNode::And { nodes } => FilterNode::And {
                nodes: nodes.into_iter().map(|n| n.lift_literals(params)).collect(),
            },
            FilterNode::Or { nodes } => FilterNode::Or {
                nodes: nodes.into_iter().map(|n| n.lift_literals(params)).collect(),
            },
            FilterNode::Not { node } => FilterNode::not(node.lift_literals(params)),
            FilterNode::Compare { field, op, operand } => {
                let operand = match operand {
                    Operand::Literal(value) => {
                        let name = format!("p{}", params.len());
                        params.insert(name.clone(), value);
                        Operand::Placeholder(name)
                    }
                    placeholder => placeholder,
                };
                FilterNode::Compare { field, op, operand }
            }
        }
    }

    /// Substitutes placeholders with values from `params`.
    ///
    /// Placeholders without a value are left in place.
    #[must_use]
    pub fn bind(&self, params: &FilterParams) -> FilterNode {
        match self {
            FilterNode::And { nodes } => FilterNode::And {
                nodes: nodes.iter().map(|n| n.bind(params)).collect(),
            },
            FilterNode::Or { nodes } => FilterNode::Or {
                nodes: nodes.iter().map(|n| n.bind(params)).collect(),
            },
            FilterNode::Not { node } => FilterNode::not(node.bind(params)),
            FilterNode::Compare { field, op, operand } => {
                let operand = match operand {
                    Operand::Placeholder(name) => params
                        .get(name)
                        .map_or_else(|| operand.clone(), |v| Operand::Literal(v.clone())),
                    literal => literal.clone(),
                };
                FilterNode::Compare {
                    field: field.clone(),
                    op: *op,
                    operand,
                }
            }
        }
    }

    /// Structural encoding of the tree as a [`Value`].
    ///
    /// With `with_literals` off, every literal collapses to the same marker
    /// so that only the shape of the tree is encoded.
    pub fn to_value(&self, with_literals: bool) -> Value {
        match self {
            FilterNode::And { nodes } => Value::Array(vec![
                Value::from("and"),
                Value::Array(nodes.iter().map(|n| n.to_value(with_literals)).collect()),
            ]),
            FilterNode::Or { nodes } => Value::Array(vec![
                Value::from("or"),
                Value::Array(nodes.iter().map(|n| n.to_value(with_literals)).collect()),
            ]),
            FilterNode::Not { node } => {
                Value::Array(vec![Value::from("not"), node.to_value(with_literals)])
            }
            FilterNode::Compare { field, op, operand } => {
                let operand = match operand {
                    Operand::Literal(v) if with_literals => {
                        Value::Array(vec![Value::from("lit"), v.clone()])
                    }
                    Operand::Literal(_) => Value::Array(vec![Value::from("lit")]),
                    Operand::Placeholder(name) => {
                        Value::Array(vec![Value::from("ph"), Value::from(name.as_str())])
                    }
                };
                Value::Array(vec![
                    Value::from("cmp"),
                    Value::from(field.as_str()),
                    Value::from(op.as_str()),
                    operand,
                ])
            }
        }
    }
}

fn flatten(
    nodes: &[FilterNode],
    unwrap_same: impl Fn(FilterNode) -> Result<Vec<FilterNode>, FilterNode>,
) -> CacheResult<Vec<FilterNode>> {
    let mut flat = Vec::with_capacity(nodes.len());
    for node in nodes {
        match unwrap_same(node.canonical()?) {
            Ok(inner) => flat.extend(inner),
            Err(other) => flat.push(other),
        }
    }
    Ok(flat)
}

fn regroup(
    mut nodes: Vec<FilterNode>,
    build: impl Fn(Vec<FilterNode>) -> FilterNode,
) -> CacheResult<FilterNode> {
    let mut keyed = Vec::with_capacity(nodes.len());
    for node in nodes.drain(..) {
        let shape = to_canonical_cbor(&node.to_value(false))?;
        let full = to_canonical_cbor(&node.to_value(true))?;
        keyed.push(((shape, full), node));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);

    let mut sorted: Vec<FilterNode> = keyed.into_iter().map(|(_, node)| node).collect();
    if sorted.len() == 1 {
        if let Some(only) = sorted.pop() {
            return Ok(only);
        }
    }
    Ok(build(sorted))
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterNode::And { nodes } if nodes.is_empty() => f.write_str("TRUE"),
            FilterNode::Or { nodes } if nodes.is_empty() => f.write_str("FALSE"),
            FilterNode::And { nodes } | FilterNode::Or { nodes } => {
                let joiner = if matches!(self, FilterNode::And { .. }) {
                    " AND "
                } else {
                    " OR "
                };
                if nodes.len() > 1 {
                    f.write_str("(")?;
                }
                for (i, node) in nodes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    write!(f, "{node}")?;
                }
                if nodes.len() > 1 {
                    f.write_str(")")?;
                }
                Ok(())
            }
            FilterNode::Not { node } => write!(f, "NOT {node}"),
            FilterNode::Compare { field, op, operand } => match operand {
                Operand::Literal(v) => write!(f, "{field} {} {v}", op.symbol()),
                Operand::Placeholder(name) => write!(f, "{field} {} ${name}", op.symbol()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn operators() {
        let five = Value::Integer(5);
        assert!(FilterOp::Eq.apply(&five, &Value::Float(5.0)));
        assert!(FilterOp::Neq.apply(&five, &Value::from("5")));
        assert!(FilterOp::Gt.apply(&five, &Value::Integer(4)));
        assert!(FilterOp::Gte.apply(&five, &Value::Integer(5)));
        assert!(FilterOp::Lt.apply(&five, &Value::Integer(6)));
        assert!(!FilterOp::Lte.apply(&five, &Value::Integer(4)));
        assert!(!FilterOp::Gt.apply(&five, &Value::from("a")));

        let set = Value::from(vec![1i64, 5, 9]);
        assert!(FilterOp::In.apply(&five, &set));
        assert!(!FilterOp::NotIn.apply(&five, &set));
        assert!(FilterOp::NotIn.apply(&Value::Integer(2), &set));
    }

    #[test]
    fn unknown_fields_make_results_unknown() {
        let data = record(&[("status", Value::from("published"))]);
        let resolve = |field: &str| data.get(field);

        let known = FilterNode::eq("status", "published");
        assert_eq!(known.matches(&resolve), Some(true));

        let unknown = FilterNode::eq("title", "x");
        assert_eq!(unknown.matches(&resolve), None);

        // A false conjunct decides the conjunction even with unknowns.
        let decided = FilterNode::eq("status", "draft").and(FilterNode::eq("title", "x"));
        assert_eq!(decided.matches(&resolve), Some(false));

        let undecided = FilterNode::eq("status", "published").and(FilterNode::eq("title", "x"));
        assert_eq!(undecided.matches(&resolve), None);

        assert_eq!(FilterNode::all().matches(&resolve), Some(true));
        assert_eq!(FilterNode::or(vec![]).matches(&resolve), Some(false));
    }

    #[test]
    fn and_flattens() {
        let filter = FilterNode::all()
            .and(FilterNode::eq("a", 1))
            .and(FilterNode::eq("b", 2).and(FilterNode::eq("c", 3)));
        assert_eq!(filter.conjuncts().len(), 3);
    }

    #[test]
    fn split_shares_template_across_literals() {
        let a = FilterNode::eq("authorId", "u1").and(FilterNode::compare("views", FilterOp::Gt, 10));
        let b = FilterNode::eq("authorId", "u2").and(FilterNode::compare("views", FilterOp::Gt, 99));

        let (ta, pa) = a.split().unwrap();
        let (tb, pb) = b.split().unwrap();
        assert_eq!(ta, tb);
        assert_eq!(pa.len(), 2);
        assert_ne!(pa, pb);
    }

    #[test]
    fn conjunct_order_does_not_matter() {
        let a = FilterNode::eq("x", 1).and(FilterNode::eq("y", 2));
        let b = FilterNode::eq("y", 2).and(FilterNode::eq("x", 1));
        assert_eq!(a.split().unwrap(), b.split().unwrap());
    }

    #[test]
    fn placeholders_are_numbered_depth_first() {
        let filter = FilterNode::or(vec![
            FilterNode::eq("a", 1),
            FilterNode::not(FilterNode::eq("b", 2)),
        ]);
        let (template, params) = filter.split().unwrap();

        assert_eq!(params.len(), 2);
        let rebound = template.bind(&params);
        assert_eq!(rebound, filter.canonical().unwrap());
        for name in params.keys() {
            assert!(name == "p0" || name == "p1");
        }
    }

    #[test]
    fn canonical_simplifies() {
        let single = FilterNode::all().and(FilterNode::eq("a", 1));
        assert_eq!(single.canonical().unwrap(), FilterNode::eq("a", 1));

        let double_not = FilterNode::not(FilterNode::not(FilterNode::eq("a", 1)));
        assert_eq!(double_not.canonical().unwrap(), FilterNode::eq("a", 1));

        let set = FilterNode::is_in("id", vec!["b".into(), "a".into(), "b".into()]);
        assert_eq!(
            set.canonical().unwrap(),
            FilterNode::is_in("id", vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn nan_literal_fails_canonicalization() {
        let filter = FilterNode::eq("score", f64::NAN).and(FilterNode::eq("a", 1));
        assert!(filter.split().is_err());
    }

    #[test]
    fn linking_placeholders_found() {
        let (template, _) = FilterNode::eq("postId", "p1")
            .and(FilterNode::eq("approved", true))
            .split()
            .unwrap();
        let names = template.linking_placeholders("postId");
        assert_eq!(names.len(), 1);
        assert!(template.linking_placeholders("authorId").is_empty());
    }

    #[test]
    fn referenced_fields_collected() {
        let filter = FilterNode::eq("a", 1).and(FilterNode::not(FilterNode::eq("b", 2)));
        let fields: Vec<String> = filter.referenced_fields().into_iter().collect();
        assert_eq!(fields, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn display_reads_like_sql() {
        let filter = FilterNode::eq("status", "draft").and(FilterNode::compare("views", FilterOp::Gte, 3));
        assert_eq!(filter.to_string(), "(status = \"draft\" AND views >= 3)");
        assert_eq!(FilterNode::all().to_string(), "TRUE");
    }

    #[test]
    fn json_shape() {
        let filter = FilterNode::eq("authorId", "u1");
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["kind"], "compare");
        assert_eq!(json["op"], "eq");
        assert_eq!(json["operand"]["literal"], "u1");

        let back: FilterNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, filter);
    }
}
