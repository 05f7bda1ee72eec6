//! Dataflow graph and scheduler
//!
//! The graph owns a DAG of operators connected by difference streams and
//! drives them to quiescence. Scheduling is single-threaded cooperative:
//! `run()` repeatedly steps operators that have pending input until none
//! do, then gives buffering operators one chance to flush, and repeats
//! until the whole graph is quiet.
//!
//! Two hard caps bound pathological graphs (a fixpoint that never
//! converges, an operator that keeps producing): a total step cap and an
//! idle-step cap. Exceeding either logs a warning and truncates the run,
//! keeping best-effort results. Truncation is reported on the summary, not
//! raised as an error; the graph stays live.

use crate::multiset::MultiSet;
use crate::stream::{StreamReader, StreamWriter};
use rillet_core::{Result, RilletError, SchedulerLimits};
use tracing::{debug, warn};

/// Identity of an operator within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(pub usize);

impl std::fmt::Display for OperatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// A node in the dataflow graph
///
/// Operators own their input readers and output writers; the graph only
/// sees this object-safe surface. `step` processes at most one pending
/// input message and reports whether it emitted anything. `on_quiesce`
/// runs when no operator has pending input; buffering operators use it to
/// flush (returning `true` re-enters the scheduling loop).
pub trait Operator: Send {
    /// Identity assigned at `add_operator` time
    fn id(&self) -> OperatorId;

    /// Install the graph-assigned identity. Called once.
    fn set_id(&mut self, id: OperatorId);

    /// Short name for logs and error reports ("join", "topk", ...)
    fn name(&self) -> &'static str;

    /// True when input is waiting
    fn has_pending(&self) -> bool;

    /// Process one pending message. Returns whether output was produced.
    fn step(&mut self) -> Result<bool>;

    /// Called at quiescence. Returns whether output was produced.
    fn on_quiesce(&mut self) -> Result<bool> {
        Ok(false)
    }
}

/// Step accounting for one `run()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Operator steps taken
    pub steps: usize,
    /// Steps that produced output
    pub productive_steps: usize,
    /// True when a cap fired and the run was truncated
    pub truncated: bool,
}

/// Handle for pushing source data into a graph
///
/// Each source collection gets one session; change batches are converted
/// into multiset differences and sent here.
pub struct InputSession<T> {
    writer: StreamWriter<T>,
}

impl<T: Clone> InputSession<T> {
    /// Push one difference batch
    pub fn send(&self, batch: MultiSet<T>) {
        self.writer.send(batch);
    }
}

impl<T> InputSession<T> {
    /// Attach a reader to this input (one per consuming operator; a second
    /// reader sees the same messages, which is how self-joins read one
    /// source under two aliases)
    pub fn subscribe(&self) -> StreamReader<T> {
        self.writer.subscribe()
    }
}

/// Draining handle on a graph's sink stream
pub struct OutputHandle<T> {
    reader: StreamReader<T>,
}

impl<T: Clone + Ord> OutputHandle<T> {
    /// Take everything produced since the last drain, consolidated
    pub fn drain(&self) -> MultiSet<T> {
        let mut all = MultiSet::new();
        for message in self.reader.drain() {
            all.extend(message);
        }
        all.consolidate();
        all
    }

    /// True when output is waiting
    pub fn has_pending(&self) -> bool {
        self.reader.has_pending()
    }
}

/// The operator DAG and its scheduler
pub struct DataflowGraph {
    operators: Vec<Box<dyn Operator>>,
    limits: SchedulerLimits,
    /// Sticky error: once an operator fails the graph refuses to run
    failed: Option<String>,
}

impl DataflowGraph {
    /// Empty graph with default limits
    pub fn new() -> Self {
        Self::with_limits(SchedulerLimits::default())
    }

    /// Empty graph with explicit limits
    pub fn with_limits(limits: SchedulerLimits) -> Self {
        DataflowGraph {
            operators: Vec::new(),
            limits,
            failed: None,
        }
    }

    /// The limits this graph runs under
    pub fn limits(&self) -> SchedulerLimits {
        self.limits
    }

    /// Register an operator, assigning its id
    pub fn add_operator(&mut self, mut op: Box<dyn Operator>) -> OperatorId {
        let id = OperatorId(self.operators.len());
        op.set_id(id);
        self.operators.push(op);
        id
    }

    /// Create an input session for source data
    pub fn add_input<T>(&mut self) -> InputSession<T> {
        InputSession {
            writer: StreamWriter::new(),
        }
    }

    /// Wrap a reader as a sink handle
    pub fn output<T>(&mut self, reader: StreamReader<T>) -> OutputHandle<T> {
        OutputHandle { reader }
    }

    /// Number of registered operators
    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// True when any operator has pending input
    pub fn has_pending(&self) -> bool {
        self.operators.iter().any(|op| op.has_pending())
    }

    /// Run operators until quiescence or a cap fires.
    ///
    /// Returns the step summary. Operator failures poison the graph: the
    /// error is returned and subsequent runs fail fast with the same
    /// cause.
    pub fn run(&mut self) -> Result<RunSummary> {
        if let Some(cause) = &self.failed {
            return Err(RilletError::internal(format!(
                "graph previously failed: {cause}"
            )));
        }

        let mut summary = RunSummary::default();
        let mut idle_steps = 0usize;

        'outer: loop {
            let mut any_stepped = false;
            for index in 0..self.operators.len() {
                if !self.operators[index].has_pending() {
                    continue;
                }
                let produced = self.step_operator(index)?;
                any_stepped = true;
                summary.steps += 1;
                if produced {
                    summary.productive_steps += 1;
                    idle_steps = 0;
                } else {
                    idle_steps += 1;
                }

                if summary.steps >= self.limits.max_steps {
                    self.truncate(&mut summary, "total step cap");
                    break 'outer;
                }
                if idle_steps >= self.limits.max_idle_steps {
                    self.truncate(&mut summary, "idle step cap");
                    break 'outer;
                }
            }

            if any_stepped {
                continue;
            }

            // Quiescent: let buffering operators flush. Any output re-enters
            // the loop.
            let mut flushed = false;
            for index in 0..self.operators.len() {
                if self.quiesce_operator(index)? {
                    flushed = true;
                }
            }
            if !flushed {
                break;
            }
        }

        debug!(
            steps = summary.steps,
            productive = summary.productive_steps,
            truncated = summary.truncated,
            "graph run complete"
        );
        Ok(summary)
    }

    fn step_operator(&mut self, index: usize) -> Result<bool> {
        let (name, id, result) = {
            let op = &mut self.operators[index];
            (op.name(), op.id(), op.step())
        };
        result.map_err(|e| {
            let wrapped = match e {
                e @ RilletError::Graph { .. } => e,
                other => RilletError::graph(name, other.to_string()),
            };
            self.failed = Some(wrapped.to_string());
            warn!(operator = %id, name, error = %wrapped, "operator failed");
            wrapped
        })
    }

    fn quiesce_operator(&mut self, index: usize) -> Result<bool> {
        let (name, result) = {
            let op = &mut self.operators[index];
            (op.name(), op.on_quiesce())
        };
        result.map_err(|e| {
            let wrapped = RilletError::graph(name, e.to_string());
            self.failed = Some(wrapped.to_string());
            wrapped
        })
    }

    fn truncate(&self, summary: &mut RunSummary, reason: &str) {
        summary.truncated = true;
        let cap = RilletError::iteration_cap(summary.steps, reason);
        warn!(error = %cap, "scheduler cap exceeded, truncating run");
    }
}

impl Default for DataflowGraph {
    fn default() -> Self {
        Self::new()
    }
}
