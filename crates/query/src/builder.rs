//! Query builder
//!
//! Fluent construction surface over the IR. `Ref` is the typed path
//! builder: starting from an alias, each `.field(..)` appends a segment,
//! and the result converts into a `PropRef` expression. `col("e.managerId")`
//! is shorthand for the same thing.
//!
//! Predicate helpers (`eq`, `gt`, `and_`, ...) assemble `Func` nodes with
//! builtin names; the compiler resolves them against the registry.

use crate::aggregate::AggregateExpr;
use crate::expr::{Expr, PropRef};
use crate::ir::{JoinClause, JoinType, OrderBySpec, Query, SelectItem, SelectMap, Source};
use rillet_core::Value;

/// Literal expression
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Value(value.into())
}

/// Null literal
pub fn null() -> Expr {
    Expr::Value(Value::Null)
}

/// Column reference from a dotted path (`"alias.field.sub"`)
pub fn col(path: &str) -> Expr {
    Expr::Ref(PropRef::parse(path))
}

/// Path builder that records segments as it is chained
#[derive(Debug, Clone)]
pub struct Ref {
    segments: Vec<String>,
}

impl Ref {
    /// Start a path at a source alias
    pub fn alias(alias: impl Into<String>) -> Self {
        Ref {
            segments: vec![alias.into()],
        }
    }

    /// Start a path at the SELECT output namespace
    pub fn selected() -> Self {
        Ref {
            segments: vec![crate::expr::SELECTED_NAMESPACE.to_string()],
        }
    }

    /// Append a field segment
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.segments.push(name.into());
        self
    }

    /// Finish as an expression
    pub fn expr(self) -> Expr {
        Expr::Ref(PropRef {
            segments: self.segments,
        })
    }
}

impl From<Ref> for Expr {
    fn from(r: Ref) -> Self {
        r.expr()
    }
}

fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Func {
        name: name.to_string(),
        args,
    }
}

/// `a = b`
pub fn eq(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    func("eq", vec![a.into(), b.into()])
}

/// `a <> b`
pub fn neq(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    func("neq", vec![a.into(), b.into()])
}

/// `a < b`
pub fn lt(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    func("lt", vec![a.into(), b.into()])
}

/// `a <= b`
pub fn lte(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    func("lte", vec![a.into(), b.into()])
}

/// `a > b`
pub fn gt(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    func("gt", vec![a.into(), b.into()])
}

/// `a >= b`
pub fn gte(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    func("gte", vec![a.into(), b.into()])
}

/// SQL AND over any number of predicates
pub fn and_(predicates: impl IntoIterator<Item = Expr>) -> Expr {
    func("and", predicates.into_iter().collect())
}

/// SQL OR over any number of predicates
pub fn or_(predicates: impl IntoIterator<Item = Expr>) -> Expr {
    func("or", predicates.into_iter().collect())
}

/// SQL NOT
pub fn not_(predicate: impl Into<Expr>) -> Expr {
    func("not", vec![predicate.into()])
}

/// `a IN (values...)`
pub fn in_list(needle: impl Into<Expr>, values: impl IntoIterator<Item = Value>) -> Expr {
    func(
        "in",
        vec![
            needle.into(),
            Expr::Value(Value::List(values.into_iter().collect())),
        ],
    )
}

/// The query builder
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Start from a collection source
    pub fn from(collection_id: impl Into<String>, alias: impl Into<String>) -> Self {
        QueryBuilder {
            query: Query::from_source(Source::Collection {
                collection_id: collection_id.into(),
                alias: alias.into(),
            }),
        }
    }

    /// Start from a subquery source
    pub fn from_query(query: Query, alias: impl Into<String>) -> Self {
        QueryBuilder {
            query: Query::from_source(Source::Subquery {
                query: Box::new(query),
                alias: alias.into(),
            }),
        }
    }

    /// Add a join against another collection
    pub fn join(
        mut self,
        collection_id: impl Into<String>,
        alias: impl Into<String>,
        join_type: JoinType,
        left: impl Into<Expr>,
        right: impl Into<Expr>,
    ) -> Self {
        self.query.joins.push(JoinClause {
            source: Source::Collection {
                collection_id: collection_id.into(),
                alias: alias.into(),
            },
            join_type,
            left: left.into(),
            right: right.into(),
        });
        self
    }

    /// Add a WHERE predicate (conjoined with earlier ones)
    pub fn where_(mut self, predicate: impl Into<Expr>) -> Self {
        self.query.filters.push(predicate.into());
        self
    }

    /// Set the GROUP BY keys
    pub fn group_by(mut self, keys: impl IntoIterator<Item = Expr>) -> Self {
        self.query.group_by = keys.into_iter().collect();
        self
    }

    /// Add a HAVING predicate
    pub fn having(mut self, predicate: impl Into<Expr>) -> Self {
        self.query.having.push(predicate.into());
        self
    }

    /// Set the SELECT shape
    pub fn select(mut self, items: impl IntoIterator<Item = (&'static str, SelectItem)>) -> Self {
        self.query.select = Some(
            items
                .into_iter()
                .map(|(name, item)| (name.to_string(), item))
                .collect::<SelectMap>(),
        );
        self
    }

    /// Append an ORDER BY entry
    pub fn order_by(mut self, spec: OrderBySpec) -> Self {
        self.query.order_by.push(spec);
        self
    }

    /// Set LIMIT
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Set OFFSET
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = offset;
        self
    }

    /// Mark DISTINCT
    pub fn distinct(mut self) -> Self {
        self.query.distinct = true;
        self
    }

    /// Union with another query
    pub fn union(mut self, other: Query) -> Self {
        self.query.unions.push(other);
        self
    }

    /// Finish
    pub fn build(self) -> Query {
        self.query
    }
}

/// Select helpers: aggregate shorthand for builder call sites
pub mod agg {
    use super::*;

    /// `count(*)`
    pub fn count() -> SelectItem {
        SelectItem::Agg(AggregateExpr::count())
    }

    /// `sum(expr)`
    pub fn sum(arg: impl Into<Expr>) -> SelectItem {
        SelectItem::Agg(AggregateExpr::sum(arg.into()))
    }

    /// `avg(expr)`
    pub fn avg(arg: impl Into<Expr>) -> SelectItem {
        SelectItem::Agg(AggregateExpr::avg(arg.into()))
    }

    /// `min(expr)`
    pub fn min(arg: impl Into<Expr>) -> SelectItem {
        SelectItem::Agg(AggregateExpr::min(arg.into()))
    }

    /// `max(expr)`
    pub fn max(arg: impl Into<Expr>) -> SelectItem {
        SelectItem::Agg(AggregateExpr::max(arg.into()))
    }

    /// `min_str(expr)`
    pub fn min_str(arg: impl Into<Expr>) -> SelectItem {
        SelectItem::Agg(AggregateExpr::min_str(arg.into()))
    }

    /// `max_str(expr)`
    pub fn max_str(arg: impl Into<Expr>) -> SelectItem {
        SelectItem::Agg(AggregateExpr::max_str(arg.into()))
    }
}
