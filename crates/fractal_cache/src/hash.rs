//! Stable hashing of query shapes and parameters.
//!
//! Every hash is the hex SHA-256 of a canonical encoding, so keys are
//! stable across processes and independent of map key order. Each kind of
//! key is prefixed with its own tag to keep the key spaces apart.

use crate::binding::QueryDefinition;
use crate::error::CacheResult;
use crate::filter::{FilterNode, FilterParams};
use crate::order::{normalize_order, OrderSpec};
use fractal_codec::{to_canonical_cbor, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write;

const DEFINITION_TAG: &str = "fractal/definition/v1";
const PARAMS_TAG: &str = "fractal/params/v1";
const SORT_TAG: &str = "fractal/sort/v1";
const FILTER_TAG: &str = "fractal/filter/v1";

/// Hex SHA-256 of the canonical encoding of `value`.
///
/// # Errors
///
/// Returns a hashing error when the value has no canonical encoding.
pub fn hash_value(value: &Value) -> CacheResult<String> {
    let bytes = to_canonical_cbor(value)?;
    let digest = Sha256::digest(&bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Writing to a String cannot fail.
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

fn order_value(order_by: &[OrderSpec]) -> Value {
    Value::Array(
        normalize_order(order_by)
            .iter()
            .map(|spec| {
                Value::Array(vec![
                    Value::from(spec.field.as_str()),
                    Value::from(spec.direction.as_str()),
                ])
            })
            .collect(),
    )
}

/// Id of the query definition for `(entity_type, order_by, template)`.
///
/// # Errors
///
/// Returns a hashing error when the template has no canonical encoding.
pub fn compute_definition_id(
    entity_type: &str,
    order_by: &[OrderSpec],
    where_template: &FilterNode,
) -> CacheResult<String> {
    hash_value(&Value::Array(vec![
        Value::from(DEFINITION_TAG),
        Value::from(entity_type),
        order_value(order_by),
        where_template.to_value(true),
    ]))
}

/// Hash of a binding's parameter map.
///
/// # Errors
///
/// Returns a hashing error when a parameter is NaN or infinite.
pub fn compute_param_hash(params: &FilterParams) -> CacheResult<String> {
    hash_value(&Value::Array(vec![
        Value::from(PARAMS_TAG),
        Value::Map(params.clone()),
    ]))
}

/// Hash of a sort list.
///
/// # Errors
///
/// Never fails for well-formed sort lists; the signature matches the other
/// hashes.
pub fn sort_hash(order_by: &[OrderSpec]) -> CacheResult<String> {
    hash_value(&Value::Array(vec![Value::from(SORT_TAG), order_value(order_by)]))
}

/// Hash of a concrete filter, literals included.
///
/// # Errors
///
/// Returns a hashing error when a literal has no canonical encoding.
pub fn filter_hash(filter: &FilterNode) -> CacheResult<String> {
    hash_value(&Value::Array(vec![
        Value::from(FILTER_TAG),
        filter.canonical()?.to_value(true),
    ]))
}

/// A resolved `(definition, binding)` key for one list query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryKey {
    /// Entity type of the list.
    pub entity_type: String,
    /// Normalized sort list.
    pub order_by: Vec<OrderSpec>,
    /// Filter template with placeholders.
    pub template: FilterNode,
    /// Values for the template's placeholders.
    pub params: FilterParams,
    /// Query definition id.
    pub definition_id: String,
    /// Parameter hash.
    pub param_hash: String,
}

impl QueryKey {
    /// Splits a concrete query into its definition and binding keys.
    ///
    /// # Errors
    ///
    /// Returns a hashing error when the filter has no canonical encoding.
    pub fn resolve(
        entity_type: &str,
        order_by: &[OrderSpec],
        filter: &FilterNode,
    ) -> CacheResult<Self> {
        let (template, params) = filter.split()?;
        let order_by = normalize_order(order_by);
        let definition_id = compute_definition_id(entity_type, &order_by, &template)?;
        let param_hash = compute_param_hash(&params)?;
        Ok(Self {
            entity_type: entity_type.to_string(),
            order_by,
            template,
            params,
            definition_id,
            param_hash,
        })
    }

    /// The query definition this key belongs to.
    pub fn definition(&self) -> QueryDefinition {
        QueryDefinition {
            id: self.definition_id.clone(),
            entity_type: self.entity_type.clone(),
            order_by: self.order_by.clone(),
            where_template: self.template.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;

    #[test]
    fn hashes_are_hex_sha256() {
        let hash = compute_param_hash(&FilterParams::new()).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_shape_shares_definition() {
        let order = [OrderSpec::desc("createdAt")];
        let a = QueryKey::resolve("post", &order, &FilterNode::eq("authorId", "u1")).unwrap();
        let b = QueryKey::resolve("post", &order, &FilterNode::eq("authorId", "u2")).unwrap();

        assert_eq!(a.definition_id, b.definition_id);
        assert_ne!(a.param_hash, b.param_hash);
    }

    #[test]
    fn shape_differences_change_definition() {
        let filter = FilterNode::eq("authorId", "u1");
        let base = QueryKey::resolve("post", &[], &filter).unwrap();

        let other_type = QueryKey::resolve("comment", &[], &filter).unwrap();
        let sorted = QueryKey::resolve("post", &[OrderSpec::asc("title")], &filter).unwrap();
        let other_op = QueryKey::resolve(
            "post",
            &[],
            &FilterNode::compare("authorId", FilterOp::Neq, "u1"),
        )
        .unwrap();

        assert_ne!(base.definition_id, other_type.definition_id);
        assert_ne!(base.definition_id, sorted.definition_id);
        assert_ne!(base.definition_id, other_op.definition_id);
        // Identical literals under different shapes still hash identically.
        assert_eq!(base.param_hash, other_type.param_hash);
    }

    #[test]
    fn param_hash_ignores_insertion_order() {
        let mut a = FilterParams::new();
        a.insert("p0".into(), Value::from("x"));
        a.insert("p1".into(), Value::Integer(2));
        let mut b = FilterParams::new();
        b.insert("p1".into(), Value::Integer(2));
        b.insert("p0".into(), Value::from("x"));

        assert_eq!(compute_param_hash(&a).unwrap(), compute_param_hash(&b).unwrap());
    }

    #[test]
    fn integral_float_shares_integer_key() {
        let int = QueryKey::resolve("post", &[], &FilterNode::eq("score", 5)).unwrap();
        let float = QueryKey::resolve("post", &[], &FilterNode::eq("score", 5.0)).unwrap();
        let half = QueryKey::resolve("post", &[], &FilterNode::eq("score", 5.5)).unwrap();

        assert_eq!(int.param_hash, float.param_hash);
        assert_ne!(int.param_hash, half.param_hash);
    }

    #[test]
    fn nan_parameter_fails_fast() {
        let err = QueryKey::resolve("post", &[], &FilterNode::eq("score", f64::NAN)).unwrap_err();
        assert!(matches!(err, crate::CacheError::Hashing { .. }));
    }

    #[test]
    fn filter_hash_ignores_conjunct_order() {
        let a = FilterNode::eq("x", 1).and(FilterNode::eq("y", 2));
        let b = FilterNode::eq("y", 2).and(FilterNode::eq("x", 1));
        assert_eq!(filter_hash(&a).unwrap(), filter_hash(&b).unwrap());
        assert_ne!(
            filter_hash(&a).unwrap(),
            filter_hash(&FilterNode::eq("x", 1)).unwrap()
        );
    }

    #[test]
    fn sort_hash_depends_on_order() {
        let a = sort_hash(&[OrderSpec::asc("a"), OrderSpec::asc("b")]).unwrap();
        let b = sort_hash(&[OrderSpec::asc("b"), OrderSpec::asc("a")]).unwrap();
        assert_ne!(a, b);
    }
}
