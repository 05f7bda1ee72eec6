//! IR to dataflow lowering
//!
//! The compiler walks a `Query` and instantiates the operator pipeline:
//!
//! 1. enumerate `(collection, alias)` sources, one input per alias (a
//!    self-join is two aliases fed from the same collection)
//! 2. wrap each source's records under its alias namespace
//! 3. wire joins with key-extractor maps and the declared outer semantics
//! 4. stack WHERE predicates as a filter chain with three-valued logic
//! 5. lower GROUP BY into a keyed reduce computing the SELECT aggregates
//!    and the HAVING conjunction
//! 6. evaluate SELECT shapes (nested maps, spread composition)
//! 7. insert top-k for ORDER BY + LIMIT/OFFSET, fractionally indexed, or
//!    the plain windowed variant when no order is requested
//! 8. append DISTINCT
//! 9. concat UNION branches (duplicate result keys surface at the sink)
//!
//! Stream elements are `(result key, namespaced row)` pairs. Keys travel
//! out of band: a SELECT that renames fields does not disturb the result
//! key, and grouped queries rekey to their group key.

use crate::aggregate::{self, AggregateExpr};
use crate::expr::{CompiledExpr, EvalContext, ExprCompiler, Truth};
use crate::functions::FunctionRegistry;
use crate::ir::{JoinType, Query, SelectItem, SelectMap, Source};
use rillet_dataflow::graph::{DataflowGraph, InputSession, OutputHandle};
use rillet_dataflow::operators::{
    ConcatOperator, ConsolidateOperator, DistinctOperator, FilterOperator, FractionalTopKOperator,
    JoinKind, JoinOperator, MapOperator, ReduceOperator, TopKOperator, WindowHandle,
};
use rillet_dataflow::stream::StreamWriter;
use rillet_core::virtuals::{self, origin_value};
use rillet_core::{Result, RilletError, SchedulerLimits, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Field carrying the fractional position key on ordered results
pub const ORDER_INDEX_FIELD: &str = "$orderIndex";

/// Stream element: result key and namespaced row
type Keyed = (Value, Value);

/// One source feed of a compiled query
pub struct SourceInput {
    /// Collection the feed reads
    pub collection_id: String,
    /// Alias this feed populates
    pub alias: String,
    /// Push `(key value, record)` differences here
    pub session: InputSession<Keyed>,
}

/// A query lowered onto a dataflow graph
pub struct CompiledQuery {
    /// The graph; run after feeding inputs
    pub graph: DataflowGraph,
    /// Source feeds, one per alias
    pub inputs: Vec<SourceInput>,
    /// Consolidated result differences
    pub output: OutputHandle<Keyed>,
    /// True when the query unions branches: the sink must watch for
    /// duplicate result keys
    pub has_union: bool,
    /// True when result rows carry `$orderIndex`
    pub ordered: bool,
    /// Runtime window hook, present for plain (unordered) limit/offset
    pub window: Option<WindowHandle>,
}

/// Compile a query against a function registry
pub fn compile(
    query: &Query,
    registry: &FunctionRegistry,
    limits: SchedulerLimits,
) -> Result<CompiledQuery> {
    let mut cx = CompileContext {
        graph: DataflowGraph::with_limits(limits),
        inputs: Vec::new(),
        registry,
        window: None,
        ordered: false,
    };

    let mut branches = vec![cx.compile_pipeline(query)?];
    for union in &query.unions {
        if !union.unions.is_empty() {
            return Err(RilletError::invalid_input(
                "nested unions are not supported; chain them on the outer query",
            ));
        }
        branches.push(cx.compile_pipeline(union)?);
    }

    let final_writer = if branches.len() == 1 {
        branches.pop().expect("one branch")
    } else {
        let readers = branches.iter().map(|w| w.subscribe()).collect();
        let merged = StreamWriter::new();
        cx.graph
            .add_operator(Box::new(ConcatOperator::new(readers, merged.clone())));
        merged
    };

    let sink_writer: StreamWriter<Keyed> = StreamWriter::new();
    cx.graph.add_operator(Box::new(ConsolidateOperator::new(
        final_writer.subscribe(),
        sink_writer.clone(),
    )));
    let sink_reader = sink_writer.subscribe();
    let output = cx.graph.output(sink_reader);

    tracing::debug!(
        operators = cx.graph.operator_count(),
        sources = cx.inputs.len(),
        "query compiled"
    );

    Ok(CompiledQuery {
        graph: cx.graph,
        inputs: cx.inputs,
        output,
        has_union: !query.unions.is_empty(),
        ordered: cx.ordered,
        window: cx.window,
    })
}

struct CompileContext<'a> {
    graph: DataflowGraph,
    inputs: Vec<SourceInput>,
    registry: &'a FunctionRegistry,
    window: Option<WindowHandle>,
    ordered: bool,
}

impl<'a> CompileContext<'a> {
    /// Lower one query (without union branches) and return the writer of
    /// its final stream.
    fn compile_pipeline(&mut self, query: &Query) -> Result<StreamWriter<Keyed>> {
        let mut aliases = vec![query.from.alias().to_string()];
        let mut current = self.compile_source(&query.from)?;

        // joins
        for join in &query.joins {
            let right_alias = join.source.alias().to_string();
            let right = self.compile_source(&join.source)?;
            current = self.compile_join(current, right, &aliases, &right_alias, join)?;
            aliases.push(right_alias);
        }

        // where
        if !query.filters.is_empty() {
            current = self.compile_filters(current, &query.filters)?;
        }

        // Stage order follows SQL, with one twist: without DISTINCT or
        // GROUP BY, the ordering window runs before SELECT so ORDER BY can
        // reference source aliases; SELECT then carries the position key
        // over. Under DISTINCT or GROUP BY the rows are already shaped, so
        // ORDER BY references the shaped output instead.
        if query.is_grouped() {
            current = self.compile_group_by(current, query)?;
            if query.distinct {
                current = self.compile_distinct(current);
            }
            current = self.compile_window(current, query, SortContext::Shaped)?;
        } else {
            if !query.having.is_empty() {
                return Err(RilletError::invalid_input(
                    "HAVING requires GROUP BY or aggregates",
                ));
            }
            if query.distinct {
                current = self.compile_select_stage(current, query, &aliases, false)?;
                current = self.compile_distinct(current);
                current = self.compile_window(current, query, SortContext::Shaped)?;
            } else {
                current = self.compile_window(current, query, SortContext::Namespaced)?;
                current = self.compile_select_stage(current, query, &aliases, true)?;
            }
        }

        Ok(current)
    }

    fn compile_window(
        &mut self,
        current: StreamWriter<Keyed>,
        query: &Query,
        sort_context: SortContext,
    ) -> Result<StreamWriter<Keyed>> {
        if !query.order_by.is_empty() {
            self.compile_ordered_window(current, query, sort_context)
        } else if query.limit.is_some() || query.offset > 0 {
            Ok(self.compile_plain_window(current, query))
        } else {
            Ok(current)
        }
    }

    /// Source stream: records arrive as `(key, record)` and leave as
    /// `(key, {alias: record})`.
    fn compile_source(&mut self, source: &Source) -> Result<StreamWriter<Keyed>> {
        match source {
            Source::Collection {
                collection_id,
                alias,
            } => {
                let session = self.graph.add_input::<Keyed>();
                let reader = session.subscribe();
                self.inputs.push(SourceInput {
                    collection_id: collection_id.clone(),
                    alias: alias.clone(),
                    session,
                });
                let out = StreamWriter::new();
                let alias = alias.clone();
                self.graph.add_operator(Box::new(MapOperator::new(
                    reader,
                    out.clone(),
                    move |(key, record): &Keyed| {
                        Ok((key.clone(), Value::map([(alias.as_str(), record.clone())])))
                    },
                )));
                Ok(out)
            }
            Source::Subquery { query, alias } => {
                let inner = self.compile_pipeline(query)?;
                let out = StreamWriter::new();
                let alias = alias.clone();
                self.graph.add_operator(Box::new(MapOperator::new(
                    inner.subscribe(),
                    out.clone(),
                    move |(key, row): &Keyed| {
                        Ok((key.clone(), Value::map([(alias.as_str(), row.clone())])))
                    },
                )));
                Ok(out)
            }
        }
    }

    fn compile_join(
        &mut self,
        left: StreamWriter<Keyed>,
        right: StreamWriter<Keyed>,
        left_aliases: &[String],
        right_alias: &str,
        join: &crate::ir::JoinClause,
    ) -> Result<StreamWriter<Keyed>> {
        let left_key = ExprCompiler::scalar(self.registry).compile(&join.left)?;
        let right_key = ExprCompiler::scalar(self.registry).compile(&join.right)?;

        // key extraction: (k, row) -> (join key, (k, row))
        let left_keyed: StreamWriter<(Value, Keyed)> = StreamWriter::new();
        self.graph.add_operator(Box::new(MapOperator::new(
            left.subscribe(),
            left_keyed.clone(),
            move |(key, row): &Keyed| {
                let ctx = EvalContext::new(row);
                let jk = left_key.eval(&ctx, &[])?;
                Ok((join_key(jk, 0, key), (key.clone(), row.clone())))
            },
        )));
        let right_keyed: StreamWriter<(Value, Keyed)> = StreamWriter::new();
        self.graph.add_operator(Box::new(MapOperator::new(
            right.subscribe(),
            right_keyed.clone(),
            move |(key, row): &Keyed| {
                let ctx = EvalContext::new(row);
                let jk = right_key.eval(&ctx, &[])?;
                Ok((join_key(jk, 1, key), (key.clone(), row.clone())))
            },
        )));

        let kind = match join.join_type {
            JoinType::Inner => JoinKind::Inner,
            JoinType::Left => JoinKind::Left,
            JoinType::Right => JoinKind::Right,
            JoinType::Full => JoinKind::Full,
        };
        let joined: StreamWriter<(Value, (Option<Keyed>, Option<Keyed>))> = StreamWriter::new();
        self.graph.add_operator(Box::new(JoinOperator::new(
            left_keyed.subscribe(),
            right_keyed.subscribe(),
            joined.clone(),
            kind,
        )));

        // merge: composite key, both namespaces (null-filled when unmatched)
        let out: StreamWriter<Keyed> = StreamWriter::new();
        let fill_left: Vec<String> = left_aliases.to_vec();
        let fill_right = right_alias.to_string();
        self.graph.add_operator(Box::new(MapOperator::new(
            joined.subscribe(),
            out.clone(),
            move |(_, (left_side, right_side)): &(Value, (Option<Keyed>, Option<Keyed>))| {
                let mut row = BTreeMap::new();
                let left_key = match left_side {
                    Some((k, l_row)) => {
                        if let Some(m) = l_row.as_map() {
                            row.extend(m.clone());
                        }
                        k.clone()
                    }
                    None => {
                        for alias in &fill_left {
                            row.insert(alias.clone(), Value::Null);
                        }
                        Value::Null
                    }
                };
                let right_key = match right_side {
                    Some((k, r_row)) => {
                        if let Some(m) = r_row.as_map() {
                            row.extend(m.clone());
                        }
                        k.clone()
                    }
                    None => {
                        row.insert(fill_right.clone(), Value::Null);
                        Value::Null
                    }
                };
                Ok((
                    Value::List(vec![left_key, right_key]),
                    Value::Map(row),
                ))
            },
        )));
        Ok(out)
    }

    fn compile_filters(
        &mut self,
        current: StreamWriter<Keyed>,
        filters: &[crate::expr::Expr],
    ) -> Result<StreamWriter<Keyed>> {
        let mut compiled = Vec::with_capacity(filters.len());
        for filter in filters {
            compiled.push(ExprCompiler::scalar(self.registry).compile(filter)?);
        }
        let out = StreamWriter::new();
        self.graph.add_operator(Box::new(FilterOperator::new(
            current.subscribe(),
            out.clone(),
            move |(_, row): &Keyed| {
                let ctx = EvalContext::new(row);
                let mut truth = Truth::True;
                for predicate in &compiled {
                    truth = truth.and(Truth::of(&predicate.eval(&ctx, &[])?));
                    if truth == Truth::False {
                        break;
                    }
                }
                Ok(truth.passes())
            },
        )));
        Ok(out)
    }

    /// GROUP BY: rekey to the group key, then reduce computing aggregates,
    /// the SELECT shape, and the HAVING conjunction in one pass.
    fn compile_group_by(
        &mut self,
        current: StreamWriter<Keyed>,
        query: &Query,
    ) -> Result<StreamWriter<Keyed>> {
        let select = query.select.as_ref().ok_or_else(|| {
            RilletError::invalid_input("grouped queries require an explicit select")
        })?;

        let mut group_keys = Vec::with_capacity(query.group_by.len());
        for key_expr in &query.group_by {
            group_keys.push(ExprCompiler::scalar(self.registry).compile(key_expr)?);
        }

        // collect aggregates from select and having into shared slots
        let mut aggregates: Vec<AggregateExpr> = Vec::new();
        let compiled_select = {
            let mut compiler = ExprCompiler::grouped(self.registry, &mut aggregates);
            compile_select_map(select, &mut compiler)?
        };
        let mut compiled_having = Vec::with_capacity(query.having.len());
        for having in &query.having {
            let mut compiler = ExprCompiler::grouped(self.registry, &mut aggregates);
            compiled_having.push(compiler.compile(having)?);
        }
        let compiled_aggs = compile_aggregates(&aggregates, self.registry)?;

        // rekey: (k, row) -> (group key, row)
        let keyed: StreamWriter<Keyed> = StreamWriter::new();
        self.graph.add_operator(Box::new(MapOperator::new(
            current.subscribe(),
            keyed.clone(),
            move |(_, row): &Keyed| {
                let ctx = EvalContext::new(row);
                let mut parts = Vec::with_capacity(group_keys.len());
                for key in &group_keys {
                    parts.push(key.eval(&ctx, &[])?);
                }
                Ok((Value::List(parts), row.clone()))
            },
        )));

        let out: StreamWriter<Keyed> = StreamWriter::new();
        self.graph.add_operator(Box::new(ReduceOperator::new(
            keyed.subscribe(),
            out.clone(),
            move |group_key: &Value, histogram: &BTreeMap<Value, isize>| {
                reduce_group(
                    group_key,
                    histogram,
                    &compiled_aggs,
                    &compiled_select,
                    &compiled_having,
                )
            },
        )));
        Ok(out)
    }

    /// Ungrouped SELECT, or pass-through shaping when there is none.
    /// `carry_order_index` copies the `$orderIndex` stamped by an upstream
    /// window onto the shaped output.
    fn compile_select_stage(
        &mut self,
        current: StreamWriter<Keyed>,
        query: &Query,
        aliases: &[String],
        carry_order_index: bool,
    ) -> Result<StreamWriter<Keyed>> {
        let out: StreamWriter<Keyed> = StreamWriter::new();
        match &query.select {
            Some(select) => {
                let compiled = {
                    let mut compiler = ExprCompiler::scalar(self.registry);
                    compile_select_map(select, &mut compiler)?
                };
                self.graph.add_operator(Box::new(MapOperator::new(
                    current.subscribe(),
                    out.clone(),
                    move |(key, row): &Keyed| {
                        let ctx = EvalContext::new(row);
                        let mut selected = eval_select_map(&compiled, &ctx, &[])?;
                        stamp_row_virtuals(&mut selected, row, Some(key));
                        if carry_order_index {
                            copy_order_index(row, &mut selected);
                        }
                        Ok((key.clone(), selected))
                    },
                )));
            }
            None if aliases.len() == 1 => {
                // single source, no select: unwrap the namespace
                let alias = aliases[0].clone();
                self.graph.add_operator(Box::new(MapOperator::new(
                    current.subscribe(),
                    out.clone(),
                    move |(key, row): &Keyed| {
                        let mut record = row.field(&alias).cloned().unwrap_or(Value::Null);
                        if carry_order_index {
                            copy_order_index(row, &mut record);
                        }
                        Ok((key.clone(), record))
                    },
                )));
            }
            None => {
                // joined sources, no select: keep namespaces, stamp folded
                // virtuals at the top level
                self.graph.add_operator(Box::new(MapOperator::new(
                    current.subscribe(),
                    out.clone(),
                    move |(key, row): &Keyed| {
                        let mut shaped = row.clone();
                        stamp_row_virtuals(&mut shaped, row, Some(key));
                        Ok((key.clone(), shaped))
                    },
                )));
            }
        }
        Ok(out)
    }

    fn compile_distinct(&mut self, current: StreamWriter<Keyed>) -> StreamWriter<Keyed> {
        // distinct is over rows: rekey to the row itself so identical rows
        // from different source keys collapse
        let rekeyed: StreamWriter<Keyed> = StreamWriter::new();
        self.graph.add_operator(Box::new(MapOperator::new(
            current.subscribe(),
            rekeyed.clone(),
            move |(_, row): &Keyed| Ok((row.clone(), row.clone())),
        )));
        let out: StreamWriter<Keyed> = StreamWriter::new();
        self.graph.add_operator(Box::new(DistinctOperator::new(
            rekeyed.subscribe(),
            out.clone(),
        )));
        out
    }

    /// ORDER BY (+ LIMIT/OFFSET): fractional top-k over one global group
    fn compile_ordered_window(
        &mut self,
        current: StreamWriter<Keyed>,
        query: &Query,
        sort_context: SortContext,
    ) -> Result<StreamWriter<Keyed>> {
        self.ordered = true;
        let mut sort_exprs = Vec::with_capacity(query.order_by.len());
        for spec in &query.order_by {
            sort_exprs.push(ExprCompiler::scalar(self.registry).compile(&spec.expr)?);
        }
        let directions: Vec<(bool, bool)> = query
            .order_by
            .iter()
            .map(|s| (s.desc, s.nulls_sort_first()))
            .collect();

        // envelope: [sort key list, result key, row]
        let enveloped: StreamWriter<(Value, Value)> = StreamWriter::new();
        self.graph.add_operator(Box::new(MapOperator::new(
            current.subscribe(),
            enveloped.clone(),
            move |(key, row): &Keyed| {
                let ctx = match sort_context {
                    SortContext::Namespaced => EvalContext::new(row),
                    // shaped rows resolve both bare fields and $selected
                    SortContext::Shaped => EvalContext::with_selected(row, row),
                };
                let mut sort_key = Vec::with_capacity(sort_exprs.len());
                for expr in &sort_exprs {
                    sort_key.push(expr.eval(&ctx, &[])?);
                }
                Ok((
                    Value::Null,
                    Value::List(vec![Value::List(sort_key), key.clone(), row.clone()]),
                ))
            },
        )));

        let offset = query.offset;
        let limit = query.limit.unwrap_or(usize::MAX - offset);
        let windowed: StreamWriter<(Value, (Value, String))> = StreamWriter::new();
        self.graph.add_operator(Box::new(FractionalTopKOperator::new(
            enveloped.subscribe(),
            windowed.clone(),
            move |a: &Value, b: &Value| compare_envelopes(a, b, &directions),
            offset,
            limit,
        )));

        // unpack: (_, ([sk, key, row], frac)) -> (key, row + $orderIndex)
        let out: StreamWriter<Keyed> = StreamWriter::new();
        self.graph.add_operator(Box::new(MapOperator::new(
            windowed.subscribe(),
            out.clone(),
            move |(_, (envelope, frac)): &(Value, (Value, String))| {
                let parts = envelope.as_list().unwrap_or(&[]);
                let key = parts.get(1).cloned().unwrap_or(Value::Null);
                let mut row = parts.get(2).cloned().unwrap_or(Value::Null);
                if let Some(map) = row.as_map_mut() {
                    map.insert(ORDER_INDEX_FIELD.to_string(), Value::Str(frac.clone()));
                }
                Ok((key, row))
            },
        )));
        Ok(out)
    }

    /// LIMIT/OFFSET without ORDER BY: plain windowed top-k over the value
    /// order, with a runtime `move_window` hook
    fn compile_plain_window(
        &mut self,
        current: StreamWriter<Keyed>,
        query: &Query,
    ) -> StreamWriter<Keyed> {
        let enveloped: StreamWriter<(Value, Value)> = StreamWriter::new();
        self.graph.add_operator(Box::new(MapOperator::new(
            current.subscribe(),
            enveloped.clone(),
            move |(key, row): &Keyed| {
                Ok((Value::Null, Value::List(vec![key.clone(), row.clone()])))
            },
        )));

        let offset = query.offset;
        let limit = query.limit.unwrap_or(usize::MAX - offset);
        let windowed: StreamWriter<(Value, Value)> = StreamWriter::new();
        let topk = TopKOperator::new(
            enveloped.subscribe(),
            windowed.clone(),
            |a: &Value, b: &Value| a.cmp(b),
            offset,
            limit,
        );
        self.window = Some(topk.window_handle());
        self.graph.add_operator(Box::new(topk));

        let out: StreamWriter<Keyed> = StreamWriter::new();
        self.graph.add_operator(Box::new(MapOperator::new(
            windowed.subscribe(),
            out.clone(),
            move |(_, envelope): &(Value, Value)| {
                let parts = envelope.as_list().unwrap_or(&[]);
                Ok((
                    parts.first().cloned().unwrap_or(Value::Null),
                    parts.get(1).cloned().unwrap_or(Value::Null),
                ))
            },
        )));
        out
    }
}

/// Which row shape ORDER BY expressions evaluate against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortContext {
    /// Pre-select namespaced rows: references are alias-qualified
    Namespaced,
    /// Post-select/grouped rows: references hit the shaped output, either
    /// bare or through `$selected`
    Shaped,
}

/// Carry the window's `$orderIndex` stamp from the pre-select row onto the
/// shaped output
fn copy_order_index(source_row: &Value, shaped: &mut Value) {
    if let Some(index) = source_row.field(ORDER_INDEX_FIELD) {
        if let Some(map) = shaped.as_map_mut() {
            map.insert(ORDER_INDEX_FIELD.to_string(), index.clone());
        }
    }
}

/// Join keys: real keys compare by value across sides; null keys are made
/// unique per row and side so they never match anything (SQL null-key
/// semantics) while still flowing through outer preservation.
fn join_key(jk: Value, side: i64, row_key: &Value) -> Value {
    if jk.is_null() {
        Value::List(vec![Value::Int(1), Value::Int(side), row_key.clone()])
    } else {
        Value::List(vec![Value::Int(0), jk])
    }
}

/// Compare sort-key envelopes `[sort keys, key, row]` by the first element
/// under the declared directions
fn compare_envelopes(a: &Value, b: &Value, directions: &[(bool, bool)]) -> Ordering {
    let empty: [Value; 0] = [];
    let a_keys = a
        .as_list()
        .and_then(|l| l.first())
        .and_then(Value::as_list)
        .unwrap_or(&empty);
    let b_keys = b
        .as_list()
        .and_then(|l| l.first())
        .and_then(Value::as_list)
        .unwrap_or(&empty);

    for (index, (desc, nulls_first)) in directions.iter().enumerate() {
        let av = a_keys.get(index).unwrap_or(&Value::Null);
        let bv = b_keys.get(index).unwrap_or(&Value::Null);
        let ordering = match (av.is_null(), bv.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if *nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if *nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {
                let natural = av.cmp(bv);
                if *desc {
                    natural.reverse()
                } else {
                    natural
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Compiled SELECT entry
enum CompiledSelectItem {
    Expr(CompiledExpr),
    Nested(Vec<(String, CompiledSelectItem)>),
    Spread(CompiledExpr),
}

type CompiledSelectMap = Vec<(String, CompiledSelectItem)>;

fn compile_select_map(
    select: &SelectMap,
    compiler: &mut ExprCompiler<'_>,
) -> Result<CompiledSelectMap> {
    let mut out = Vec::with_capacity(select.len());
    for (name, item) in select {
        let compiled = match item {
            SelectItem::Expr(expr) => CompiledSelectItem::Expr(compiler.compile(expr)?),
            SelectItem::Agg(agg) => {
                CompiledSelectItem::Expr(compiler.compile(&crate::expr::Expr::Agg(agg.clone()))?)
            }
            SelectItem::Nested(nested) => {
                CompiledSelectItem::Nested(compile_select_map(nested, compiler)?)
            }
            SelectItem::Spread(expr) => CompiledSelectItem::Spread(compiler.compile(expr)?),
        };
        out.push((name.clone(), compiled));
    }
    Ok(out)
}

fn eval_select_map(
    select: &CompiledSelectMap,
    ctx: &EvalContext<'_>,
    agg_values: &[Value],
) -> Result<Value> {
    let mut out = BTreeMap::new();
    for (name, item) in select {
        match item {
            CompiledSelectItem::Expr(expr) => {
                out.insert(name.clone(), expr.eval(ctx, agg_values)?);
            }
            CompiledSelectItem::Nested(nested) => {
                out.insert(name.clone(), eval_select_map(nested, ctx, agg_values)?);
            }
            CompiledSelectItem::Spread(expr) => {
                // spread merges map entries in place; later fields win
                if let Value::Map(m) = expr.eval(ctx, agg_values)? {
                    for (k, v) in m {
                        out.insert(k, v);
                    }
                }
            }
        }
    }
    Ok(Value::Map(out))
}

struct CompiledAggregate {
    func: crate::aggregate::AggregateFunc,
    arg: Option<CompiledExpr>,
}

fn compile_aggregates(
    aggregates: &[AggregateExpr],
    registry: &FunctionRegistry,
) -> Result<Vec<CompiledAggregate>> {
    let mut out = Vec::with_capacity(aggregates.len());
    for agg in aggregates {
        let arg = match &agg.arg {
            Some(expr) => Some(ExprCompiler::scalar(registry).compile(expr)?),
            None => None,
        };
        out.push(CompiledAggregate {
            func: agg.func,
            arg,
        });
    }
    Ok(out)
}

/// Reduce logic for one group: aggregates, SELECT, HAVING, and virtual
/// folding in a single pass over the histogram
fn reduce_group(
    group_key: &Value,
    histogram: &BTreeMap<Value, isize>,
    aggregates: &[CompiledAggregate],
    select: &CompiledSelectMap,
    having: &[CompiledExpr],
) -> Result<Vec<(Value, isize)>> {
    // aggregate argument values, weighted by multiplicity
    let mut agg_values = Vec::with_capacity(aggregates.len());
    for aggregate in aggregates {
        let mut weighted = Vec::with_capacity(histogram.len());
        for (row, multiplicity) in histogram {
            let value = match &aggregate.arg {
                // count(*): every row counts
                None => Value::Int(1),
                Some(expr) => expr.eval(&EvalContext::new(row), &[])?,
            };
            weighted.push((value, *multiplicity));
        }
        agg_values.push(aggregate::fold(aggregate.func, &weighted)?);
    }

    // the representative row resolves group-key column references; any
    // expression that varies within the group is a query bug, as in SQL
    let representative = histogram
        .keys()
        .next()
        .ok_or_else(|| RilletError::internal("reduce invoked with empty histogram"))?;
    let ctx = EvalContext::new(representative);
    let mut selected = eval_select_map(select, &ctx, &agg_values)?;

    // having sees both the raw row and the select output
    let having_ctx = EvalContext::with_selected(representative, &selected);
    for predicate in having {
        if !Truth::of(&predicate.eval(&having_ctx, &agg_values)?).passes() {
            return Ok(Vec::new());
        }
    }

    // fold virtuals across every member row
    let mut synced = true;
    let mut any_local = false;
    for row in histogram.keys() {
        let (row_synced, row_local) = fold_virtuals(row);
        synced &= row_synced;
        any_local |= row_local;
    }
    if let Some(map) = selected.as_map_mut() {
        map.entry(virtuals::SYNCED.to_string())
            .or_insert(Value::Bool(synced));
        map.entry(virtuals::ORIGIN.to_string()).or_insert_with(|| {
            origin_value(if any_local {
                rillet_core::Origin::Local
            } else {
                rillet_core::Origin::Remote
            })
        });
        map.entry(virtuals::KEY.to_string())
            .or_insert_with(|| group_key.clone());
    }

    Ok(vec![(selected, 1)])
}

/// Fold `$synced` / `$origin` across the alias records of a namespaced row
fn fold_virtuals(row: &Value) -> (bool, bool) {
    let mut synced = true;
    let mut any_local = false;
    if let Some(namespaces) = row.as_map() {
        for record in namespaces.values() {
            if let Some(fields) = record.as_map() {
                if let Some(Value::Bool(false)) = fields.get(virtuals::SYNCED) {
                    synced = false;
                }
                if let Some(Value::Str(origin)) = fields.get(virtuals::ORIGIN) {
                    if origin == "local" {
                        any_local = true;
                    }
                }
            }
        }
    }
    (synced, any_local)
}

/// Stamp folded virtuals onto a shaped row ("add if absent")
fn stamp_row_virtuals(shaped: &mut Value, source_row: &Value, key: Option<&Value>) {
    let (synced, any_local) = fold_virtuals(source_row);
    if let Some(map) = shaped.as_map_mut() {
        map.entry(virtuals::SYNCED.to_string())
            .or_insert(Value::Bool(synced));
        map.entry(virtuals::ORIGIN.to_string()).or_insert_with(|| {
            origin_value(if any_local {
                rillet_core::Origin::Local
            } else {
                rillet_core::Origin::Remote
            })
        });
        if let Some(key) = key {
            map.entry(virtuals::KEY.to_string())
                .or_insert_with(|| key.clone());
        }
    }
}
