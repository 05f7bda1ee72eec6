//! Incremental dataflow engine for Rillet
//!
//! The engine maintains query results incrementally: collections feed
//! *differences* (multisets of records with signed multiplicities) into a
//! DAG of operators, and the scheduler runs operators until quiescence.
//! Work done is proportional to the size of the change, not the size of
//! the inputs.
//!
//! Layers:
//! - `multiset`: the difference representation and its consolidation
//! - `stream`: typed channels connecting operator outputs to inputs
//! - `graph`: the operator DAG, scheduler, and step accounting
//! - `operators`: the algebra (map, filter, join, reduce, topk, ...)
//! - `fractional`: lexicographically sortable position keys for ordered
//!   windows

pub mod fractional;
pub mod graph;
pub mod multiset;
pub mod operators;
pub mod stream;

pub use graph::{DataflowGraph, InputSession, OperatorId, OutputHandle, RunSummary};
pub use multiset::{Diff, MultiSet};
pub use stream::{StreamReader, StreamWriter};
