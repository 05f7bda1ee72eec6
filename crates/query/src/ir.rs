//! Query IR
//!
//! The tree the compiler consumes. Collaborators usually assemble it
//! through `QueryBuilder`, but the IR is public: anything that can build
//! these nodes can run a query.

use crate::aggregate::AggregateExpr;
use crate::expr::Expr;
use serde::{Deserialize, Serialize};

/// A query source: a collection or a subquery, bound to an alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    /// Reference to a collection by id
    Collection {
        /// The collection id
        collection_id: String,
        /// Alias the source's records appear under in expressions
        alias: String,
    },
    /// An inline subquery
    Subquery {
        /// The inner query
        query: Box<Query>,
        /// Alias for the subquery's output rows
        alias: String,
    },
}

impl Source {
    /// The alias this source binds
    pub fn alias(&self) -> &str {
        match self {
            Source::Collection { alias, .. } | Source::Subquery { alias, .. } => alias,
        }
    }
}

/// Join variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    /// Matched pairs only
    Inner,
    /// Preserve unmatched left rows
    Left,
    /// Preserve unmatched right rows
    Right,
    /// Preserve unmatched rows on both sides
    Full,
}

/// One join clause. Joins are equi-joins: `left` is evaluated against the
/// accumulated row, `right` against the joined source's row, and rows pair
/// when the two keys are equal (null keys never match).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    /// The joined source
    pub source: Source,
    /// Join variant
    pub join_type: JoinType,
    /// Key expression over the pre-join row
    pub left: Expr,
    /// Key expression over the joined source's row
    pub right: Expr,
}

/// One SELECT output entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// A scalar expression
    Expr(Expr),
    /// An aggregate (grouped queries)
    Agg(AggregateExpr),
    /// A nested output map
    Nested(SelectMap),
    /// Spread: the expression must evaluate to a map, whose entries merge
    /// into the output at this position (later fields win)
    Spread(Expr),
}

impl From<Expr> for SelectItem {
    fn from(expr: Expr) -> Self {
        SelectItem::Expr(expr)
    }
}

impl From<AggregateExpr> for SelectItem {
    fn from(agg: AggregateExpr) -> Self {
        SelectItem::Agg(agg)
    }
}

/// Ordered SELECT map. Field order matters for spread composition.
pub type SelectMap = Vec<(String, SelectItem)>;

/// Sort direction and null placement for one ORDER BY entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBySpec {
    /// Sort key expression
    pub expr: Expr,
    /// Descending when true
    pub desc: bool,
    /// Null placement. Default: nulls first ascending, last descending.
    pub nulls_first: Option<bool>,
}

impl OrderBySpec {
    /// Ascending entry with default null placement
    pub fn asc(expr: Expr) -> Self {
        OrderBySpec {
            expr,
            desc: false,
            nulls_first: None,
        }
    }

    /// Descending entry with default null placement
    pub fn desc(expr: Expr) -> Self {
        OrderBySpec {
            expr,
            desc: true,
            nulls_first: None,
        }
    }

    /// Whether nulls sort before non-nulls for this entry
    pub fn nulls_sort_first(&self) -> bool {
        self.nulls_first.unwrap_or(!self.desc)
    }
}

/// The query tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Primary source
    pub from: Source,
    /// Join clauses, applied in order
    pub joins: Vec<JoinClause>,
    /// WHERE conjunction
    pub filters: Vec<Expr>,
    /// GROUP BY key expressions
    pub group_by: Vec<Expr>,
    /// HAVING conjunction (may contain aggregates)
    pub having: Vec<Expr>,
    /// SELECT shape; `None` passes rows through
    pub select: Option<SelectMap>,
    /// ORDER BY entries
    pub order_by: Vec<OrderBySpec>,
    /// LIMIT
    pub limit: Option<usize>,
    /// OFFSET
    pub offset: usize,
    /// DISTINCT
    pub distinct: bool,
    /// UNION branches. Output keys across all branches must stay disjoint;
    /// a duplicate key at runtime is a `KeyConflict`.
    pub unions: Vec<Query>,
}

impl Query {
    /// Minimal query over one source
    pub fn from_source(from: Source) -> Self {
        Query {
            from,
            joins: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            select: None,
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            distinct: false,
            unions: Vec::new(),
        }
    }

    /// Every `(collection_id, alias)` pair referenced by this query,
    /// including joins, subqueries, and union branches. The same
    /// collection id appears once per alias, which is what makes
    /// self-joins work: each alias gets its own input feed.
    pub fn collection_aliases(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_aliases(&mut out);
        out
    }

    fn collect_aliases(&self, out: &mut Vec<(String, String)>) {
        let mut visit_source = |source: &Source, out: &mut Vec<(String, String)>| match source {
            Source::Collection {
                collection_id,
                alias,
            } => {
                let pair = (collection_id.clone(), alias.clone());
                if !out.contains(&pair) {
                    out.push(pair);
                }
            }
            Source::Subquery { query, .. } => query.collect_aliases(out),
        };
        visit_source(&self.from, out);
        for join in &self.joins {
            visit_source(&join.source, out);
        }
        for union in &self.unions {
            union.collect_aliases(out);
        }
    }

    /// True when this query (or a union branch) groups
    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty() || self.select_has_aggregate()
    }

    fn select_has_aggregate(&self) -> bool {
        fn item_has_aggregate(item: &SelectItem) -> bool {
            match item {
                SelectItem::Agg(_) => true,
                SelectItem::Nested(map) => map.iter().any(|(_, i)| item_has_aggregate(i)),
                SelectItem::Expr(_) | SelectItem::Spread(_) => false,
            }
        }
        self.select
            .as_ref()
            .map(|map| map.iter().any(|(_, item)| item_has_aggregate(item)))
            .unwrap_or(false)
    }
}
