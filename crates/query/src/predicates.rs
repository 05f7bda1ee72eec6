//! Predicate analysis
//!
//! Walks a WHERE conjunction and extracts the conditions an index can
//! resolve: equality, membership, and range comparisons between a property
//! reference and a literal. The optimizer matches these against a
//! collection's index catalog before streaming; everything it cannot
//! extract stays in the filter chain as a residual predicate.

use crate::expr::{Expr, PropRef};
use rillet_core::Value;
use serde::{Deserialize, Serialize};

/// Inclusive/exclusive range bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    /// The bound value
    pub value: Value,
    /// True when the bound itself is included
    pub inclusive: bool,
}

/// A condition an index can resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexablePredicate {
    /// `path = value`
    Eq {
        /// Source alias the path is scoped to
        alias: String,
        /// Field path within the record (alias stripped)
        path: Vec<String>,
        /// The literal compared against
        value: Value,
    },
    /// `path IN (values...)`
    In {
        /// Source alias
        alias: String,
        /// Field path within the record
        path: Vec<String>,
        /// Literal list members
        values: Vec<Value>,
    },
    /// `path < | <= | > | >= value`, folded into a half-open range
    Range {
        /// Source alias
        alias: String,
        /// Field path within the record
        path: Vec<String>,
        /// Lower bound, when present
        lower: Option<Bound>,
        /// Upper bound, when present
        upper: Option<Bound>,
    },
}

impl IndexablePredicate {
    /// Alias this predicate scopes to
    pub fn alias(&self) -> &str {
        match self {
            IndexablePredicate::Eq { alias, .. }
            | IndexablePredicate::In { alias, .. }
            | IndexablePredicate::Range { alias, .. } => alias,
        }
    }

    /// Field path within the record
    pub fn path(&self) -> &[String] {
        match self {
            IndexablePredicate::Eq { path, .. }
            | IndexablePredicate::In { path, .. }
            | IndexablePredicate::Range { path, .. } => path,
        }
    }
}

/// Extract index-resolvable conditions from a WHERE conjunction.
///
/// Only top-level conjuncts are inspected; disjunctions and nested
/// expressions are left to the filter chain. Virtual namespaces
/// (`$selected`) and virtual fields are never indexable.
pub fn analyze_filters(filters: &[Expr]) -> Vec<IndexablePredicate> {
    let mut out = Vec::new();
    for filter in filters {
        collect(filter, &mut out);
    }
    out
}

fn collect(expr: &Expr, out: &mut Vec<IndexablePredicate>) {
    let (name, args) = match expr {
        Expr::Func { name, args } => (name.as_str(), args.as_slice()),
        _ => return,
    };

    // a top-level AND contributes each conjunct
    if name == "and" {
        for arg in args {
            collect(arg, out);
        }
        return;
    }

    let (prop, literal, reversed) = match split_ref_literal(args) {
        Some(parts) => parts,
        None => return,
    };
    let (alias, path) = match split_alias(prop) {
        Some(parts) => parts,
        None => return,
    };

    match (name, reversed) {
        ("eq", _) => out.push(IndexablePredicate::Eq {
            alias,
            path,
            value: literal.clone(),
        }),
        ("in", false) => {
            if let Value::List(values) = literal {
                out.push(IndexablePredicate::In {
                    alias,
                    path,
                    values: values.clone(),
                });
            }
        }
        ("gt", false) | ("lt", true) => out.push(IndexablePredicate::Range {
            alias,
            path,
            lower: Some(Bound {
                value: literal.clone(),
                inclusive: false,
            }),
            upper: None,
        }),
        ("gte", false) | ("lte", true) => out.push(IndexablePredicate::Range {
            alias,
            path,
            lower: Some(Bound {
                value: literal.clone(),
                inclusive: true,
            }),
            upper: None,
        }),
        ("lt", false) | ("gt", true) => out.push(IndexablePredicate::Range {
            alias,
            path,
            lower: None,
            upper: Some(Bound {
                value: literal.clone(),
                inclusive: false,
            }),
        }),
        ("lte", false) | ("gte", true) => out.push(IndexablePredicate::Range {
            alias,
            path,
            lower: None,
            upper: Some(Bound {
                value: literal.clone(),
                inclusive: true,
            }),
        }),
        _ => {}
    }
}

/// Match `(ref, literal)` or `(literal, ref)` argument shapes. The
/// returned flag says whether the pair arrived reversed.
fn split_ref_literal(args: &[Expr]) -> Option<(&PropRef, &Value, bool)> {
    match args {
        [Expr::Ref(prop), Expr::Value(value)] => Some((prop, value, false)),
        [Expr::Value(value), Expr::Ref(prop)] => Some((prop, value, true)),
        _ => None,
    }
}

/// Split `alias.field.sub` into the alias and the in-record path. Paths
/// into virtual namespaces or virtual fields are not indexable.
fn split_alias(prop: &PropRef) -> Option<(String, Vec<String>)> {
    let (alias, rest) = prop.segments.split_first()?;
    if rest.is_empty() || alias.starts_with('$') || rest.iter().any(|s| s.starts_with('$')) {
        return None;
    }
    Some((alias.clone(), rest.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{col, eq, gt, in_list, lit, lte, or_};

    #[test]
    fn test_eq_extraction() {
        let predicates = analyze_filters(&[eq(col("t.completed"), lit(false))]);
        assert_eq!(
            predicates,
            vec![IndexablePredicate::Eq {
                alias: "t".to_string(),
                path: vec!["completed".to_string()],
                value: Value::Bool(false),
            }]
        );
    }

    #[test]
    fn test_reversed_comparison_flips_bound() {
        // 5 < t.age is the same as t.age > 5
        let predicates = analyze_filters(&[crate::builder::lt(lit(5i64), col("t.age"))]);
        match &predicates[0] {
            IndexablePredicate::Range { lower, upper, .. } => {
                assert_eq!(
                    lower.as_ref().map(|b| (&b.value, b.inclusive)),
                    Some((&Value::Int(5), false))
                );
                assert!(upper.is_none());
            }
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn test_and_conjuncts_all_extract() {
        let predicates = analyze_filters(&[crate::builder::and_([
            eq(col("t.status"), lit("open")),
            lte(col("t.age"), lit(10i64)),
        ])]);
        assert_eq!(predicates.len(), 2);
    }

    #[test]
    fn test_or_is_not_extracted() {
        let predicates = analyze_filters(&[or_([
            eq(col("t.a"), lit(1i64)),
            eq(col("t.b"), lit(2i64)),
        ])]);
        assert!(predicates.is_empty());
    }

    #[test]
    fn test_in_list_extraction() {
        let predicates = analyze_filters(&[in_list(col("t.id"), [Value::Int(1), Value::Int(2)])]);
        match &predicates[0] {
            IndexablePredicate::In { values, .. } => assert_eq!(values.len(), 2),
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn test_virtual_fields_are_not_indexable() {
        assert!(analyze_filters(&[eq(col("t.$synced"), lit(true))]).is_empty());
        assert!(analyze_filters(&[eq(col("$selected.x"), lit(1i64))]).is_empty());
    }

    #[test]
    fn test_ref_to_ref_comparison_is_residual() {
        assert!(analyze_filters(&[gt(col("t.a"), col("t.b"))]).is_empty());
    }
}
