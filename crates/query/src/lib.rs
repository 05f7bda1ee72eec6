//! Query IR and compiler for Rillet
//!
//! Queries are built programmatically (there is no text parser): the
//! builder assembles a `Query` IR tree, and the compiler lowers it into a
//! dataflow graph whose sink maintains the result keyed by a synthesized
//! result key.
//!
//! Layers:
//! - `expr`: expression IR, compiled evaluators, three-valued logic
//! - `functions`: builtin scalar functions and the user registry
//! - `aggregate`: aggregate functions over group histograms
//! - `ir`: the query node types
//! - `builder`: the fluent construction surface and the `Ref` path builder
//! - `compiler`: IR to dataflow lowering
//! - `predicates`: extraction of index-resolvable conditions from WHERE

pub mod aggregate;
pub mod builder;
pub mod compiler;
pub mod expr;
pub mod functions;
pub mod ir;
pub mod predicates;

pub use aggregate::{AggregateExpr, AggregateFunc, ValueTransform};
pub use builder::{col, lit, QueryBuilder, Ref};
pub use compiler::{CompiledQuery, SourceInput, ORDER_INDEX_FIELD};
pub use expr::{CompiledExpr, EvalContext, Expr, PropRef, Truth};
pub use functions::FunctionRegistry;
pub use ir::{JoinClause, JoinType, OrderBySpec, Query, SelectItem, SelectMap, Source};
pub use predicates::{analyze_filters, IndexablePredicate};
