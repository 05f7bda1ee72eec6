//! Expression IR and evaluation
//!
//! Expressions evaluate against a *namespaced row*: a map from source
//! alias to record, plus an optional `$selected` namespace holding the
//! SELECT output (used by HAVING and ORDER BY over selected fields).
//!
//! Evaluation follows SQL three-valued logic. `Null` doubles as UNKNOWN:
//! navigating a missing field yields `Null`, comparisons against `Null`
//! yield `Null`, and predicate sinks (WHERE, HAVING) collapse UNKNOWN to
//! exclusion.
//!
//! Expressions are compiled before evaluation: property paths are
//! pre-split into segments, function names are resolved against the
//! registry (unknown names fail compilation), and aggregate references are
//! replaced by slot indexes filled in by the reduce operator.

use crate::aggregate::AggregateExpr;
use crate::functions::{FunctionRegistry, ScalarFn};
use rillet_core::{Result, RilletError, Value};
use serde::{Deserialize, Serialize};

/// A property path: alias (or virtual namespace) followed by field
/// segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropRef {
    /// Path segments, `["e", "managerId"]` for `e.managerId`
    pub segments: Vec<String>,
}

impl PropRef {
    /// Build from a dotted path
    pub fn parse(path: &str) -> Self {
        PropRef {
            segments: path.split('.').map(|s| s.to_string()).collect(),
        }
    }

    /// Leading segment (the alias or virtual namespace)
    pub fn root(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }
}

/// Namespace that refers to the SELECT output row
pub const SELECTED_NAMESPACE: &str = "$selected";

/// Expression IR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value
    Value(Value),
    /// Property reference
    Ref(PropRef),
    /// Scalar function application, resolved by name at compile time
    Func {
        /// Function name
        name: String,
        /// Argument expressions
        args: Vec<Expr>,
    },
    /// Aggregate reference. Only valid inside SELECT/HAVING of a grouped
    /// query; compilation outside that context fails.
    Agg(AggregateExpr),
}

/// Three-valued logic truth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    /// Definitely true
    True,
    /// Definitely false
    False,
    /// NULL operand somewhere: unknown
    Unknown,
}

impl Truth {
    /// Truth of a value: `Bool` maps directly, `Null` is UNKNOWN, anything
    /// else is UNKNOWN as well (a non-boolean predicate is not an error,
    /// it just never passes a filter)
    pub fn of(value: &Value) -> Truth {
        match value {
            Value::Bool(true) => Truth::True,
            Value::Bool(false) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    /// SQL AND
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    /// SQL OR
    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    /// SQL NOT
    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    /// Collapse at a filter sink: only definite truth passes
    pub fn passes(self) -> bool {
        self == Truth::True
    }

    /// Back to a `Value` (UNKNOWN becomes `Null`)
    pub fn to_value(self) -> Value {
        match self {
            Truth::True => Value::Bool(true),
            Truth::False => Value::Bool(false),
            Truth::Unknown => Value::Null,
        }
    }
}

/// Evaluation context: the namespaced row and, when present, the SELECT
/// output
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Map from alias to record
    pub row: &'a Value,
    /// SELECT output row, for `$selected` references
    pub selected: Option<&'a Value>,
}

impl<'a> EvalContext<'a> {
    /// Context over a namespaced row only
    pub fn new(row: &'a Value) -> Self {
        EvalContext {
            row,
            selected: None,
        }
    }

    /// Context with a `$selected` namespace
    pub fn with_selected(row: &'a Value, selected: &'a Value) -> Self {
        EvalContext {
            row,
            selected: Some(selected),
        }
    }
}

/// A compiled, ready-to-evaluate expression
#[derive(Clone)]
pub enum CompiledExpr {
    /// Literal
    Value(Value),
    /// Pre-split property path
    Ref(Vec<String>),
    /// Resolved function call
    Call {
        /// Name kept for error reports
        name: String,
        /// Resolved evaluator
        func: ScalarFn,
        /// Compiled arguments
        args: Vec<CompiledExpr>,
    },
    /// Aggregate slot, filled by the reduce operator
    AggSlot(usize),
}

impl std::fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompiledExpr::Value(v) => write!(f, "Value({v:?})"),
            CompiledExpr::Ref(path) => write!(f, "Ref({})", path.join(".")),
            CompiledExpr::Call { name, args, .. } => write!(f, "Call({name}, {args:?})"),
            CompiledExpr::AggSlot(i) => write!(f, "AggSlot({i})"),
        }
    }
}

impl CompiledExpr {
    /// Evaluate against a context. `agg_values` supplies aggregate slots;
    /// passing an empty slice outside grouped evaluation is fine because
    /// compilation rejects stray `Agg` nodes.
    pub fn eval(&self, ctx: &EvalContext<'_>, agg_values: &[Value]) -> Result<Value> {
        match self {
            CompiledExpr::Value(v) => Ok(v.clone()),
            CompiledExpr::Ref(path) => Ok(navigate(ctx, path)),
            CompiledExpr::Call { name, func, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(arg.eval(ctx, agg_values)?);
                }
                func(&evaluated).map_err(|e| {
                    RilletError::graph(format!("fn:{name}"), e.to_string())
                })
            }
            CompiledExpr::AggSlot(index) => agg_values.get(*index).cloned().ok_or_else(|| {
                RilletError::internal(format!("aggregate slot {index} not populated"))
            }),
        }
    }
}

/// Navigate a pre-split path. Missing namespaces and fields yield `Null`
/// (UNKNOWN), never an error.
fn navigate(ctx: &EvalContext<'_>, path: &[String]) -> Value {
    let (root, rest) = match path.split_first() {
        Some(parts) => parts,
        None => return Value::Null,
    };

    let mut current: &Value = if root == SELECTED_NAMESPACE {
        match ctx.selected {
            Some(selected) => selected,
            None => return Value::Null,
        }
    } else {
        match ctx.row.field(root) {
            Some(record) => record,
            None => return Value::Null,
        }
    };

    for segment in rest {
        match current.field(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Compilation environment: the function registry plus the aggregate
/// collection sink for grouped queries
pub struct ExprCompiler<'a> {
    registry: &'a FunctionRegistry,
    /// When `Some`, aggregate nodes are collected here and replaced by
    /// slots; when `None`, aggregates are rejected.
    aggregates: Option<&'a mut Vec<AggregateExpr>>,
}

impl<'a> ExprCompiler<'a> {
    /// Compiler for scalar-only contexts (WHERE, join keys, group keys)
    pub fn scalar(registry: &'a FunctionRegistry) -> Self {
        ExprCompiler {
            registry,
            aggregates: None,
        }
    }

    /// Compiler for grouped contexts (SELECT, HAVING): aggregates collect
    /// into `aggregates`, deduplicated structurally
    pub fn grouped(
        registry: &'a FunctionRegistry,
        aggregates: &'a mut Vec<AggregateExpr>,
    ) -> Self {
        ExprCompiler {
            registry,
            aggregates: Some(aggregates),
        }
    }

    /// Compile one expression
    pub fn compile(&mut self, expr: &Expr) -> Result<CompiledExpr> {
        match expr {
            Expr::Value(v) => Ok(CompiledExpr::Value(v.clone())),
            Expr::Ref(prop) => Ok(CompiledExpr::Ref(prop.segments.clone())),
            Expr::Func { name, args } => {
                let func = self.registry.resolve(name).ok_or_else(|| {
                    RilletError::invalid_input(format!("unknown function '{name}'"))
                })?;
                let mut compiled_args = Vec::with_capacity(args.len());
                for arg in args {
                    compiled_args.push(self.compile(arg)?);
                }
                Ok(CompiledExpr::Call {
                    name: name.clone(),
                    func,
                    args: compiled_args,
                })
            }
            Expr::Agg(agg) => match self.aggregates.as_mut() {
                Some(aggregates) => {
                    let slot = match aggregates.iter().position(|a| a == agg) {
                        Some(existing) => existing,
                        None => {
                            aggregates.push(agg.clone());
                            aggregates.len() - 1
                        }
                    };
                    Ok(CompiledExpr::AggSlot(slot))
                }
                None => Err(RilletError::invalid_input(
                    "aggregate used outside a grouped select/having",
                )),
            },
        }
    }
}
