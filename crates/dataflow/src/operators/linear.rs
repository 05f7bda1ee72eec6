//! Stateless operators: map, filter, negate, concat
//!
//! These translate entries one at a time and keep no state. Map and filter
//! run user-compiled evaluators, so their logic is fallible; an evaluator
//! error fails the step and poisons the graph.

use crate::graph::{Operator, OperatorId};
use crate::multiset::MultiSet;
use crate::stream::{StreamReader, StreamWriter};
use rillet_core::Result;

/// Applies a function to each value, keeping multiplicities
pub struct MapOperator<A, B, F> {
    id: OperatorId,
    input: StreamReader<A>,
    output: StreamWriter<B>,
    logic: F,
}

impl<A, B, F> MapOperator<A, B, F>
where
    F: FnMut(&A) -> Result<B>,
{
    /// Wire a map operator between `input` and `output`
    pub fn new(input: StreamReader<A>, output: StreamWriter<B>, logic: F) -> Self {
        MapOperator {
            id: OperatorId(0),
            input,
            output,
            logic,
        }
    }
}

impl<A, B, F> Operator for MapOperator<A, B, F>
where
    A: Send,
    B: Clone + Send,
    F: FnMut(&A) -> Result<B> + Send,
{
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "map"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        let message = match self.input.recv() {
            Some(m) => m,
            None => return Ok(false),
        };
        let mut out = MultiSet::new();
        for (value, diff) in message.iter() {
            out.push((self.logic)(value)?, *diff);
        }
        let produced = !out.is_empty();
        self.output.send(out);
        Ok(produced)
    }
}

/// Keeps entries whose value satisfies a predicate
pub struct FilterOperator<T, P> {
    id: OperatorId,
    input: StreamReader<T>,
    output: StreamWriter<T>,
    predicate: P,
}

impl<T, P> FilterOperator<T, P>
where
    P: FnMut(&T) -> Result<bool>,
{
    /// Wire a filter operator between `input` and `output`
    pub fn new(input: StreamReader<T>, output: StreamWriter<T>, predicate: P) -> Self {
        FilterOperator {
            id: OperatorId(0),
            input,
            output,
            predicate,
        }
    }
}

impl<T, P> Operator for FilterOperator<T, P>
where
    T: Clone + Send,
    P: FnMut(&T) -> Result<bool> + Send,
{
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "filter"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        let message = match self.input.recv() {
            Some(m) => m,
            None => return Ok(false),
        };
        let mut out = MultiSet::new();
        for (value, diff) in message.into_iter() {
            if (self.predicate)(&value)? {
                out.push(value, diff);
            }
        }
        let produced = !out.is_empty();
        self.output.send(out);
        Ok(produced)
    }
}

/// Flips the sign of every multiplicity
pub struct NegateOperator<T> {
    id: OperatorId,
    input: StreamReader<T>,
    output: StreamWriter<T>,
}

impl<T> NegateOperator<T> {
    /// Wire a negate operator between `input` and `output`
    pub fn new(input: StreamReader<T>, output: StreamWriter<T>) -> Self {
        NegateOperator {
            id: OperatorId(0),
            input,
            output,
        }
    }
}

impl<T: Clone + Send> Operator for NegateOperator<T> {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "negate"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        let message = match self.input.recv() {
            Some(m) => m,
            None => return Ok(false),
        };
        self.output.send(message.negate());
        Ok(true)
    }
}

/// Unions any number of input streams, passing entries through unchanged
pub struct ConcatOperator<T> {
    id: OperatorId,
    inputs: Vec<StreamReader<T>>,
    output: StreamWriter<T>,
}

impl<T> ConcatOperator<T> {
    /// Wire a concat operator over `inputs`
    pub fn new(inputs: Vec<StreamReader<T>>, output: StreamWriter<T>) -> Self {
        ConcatOperator {
            id: OperatorId(0),
            inputs,
            output,
        }
    }
}

impl<T: Clone + Send> Operator for ConcatOperator<T> {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "concat"
    }

    fn has_pending(&self) -> bool {
        self.inputs.iter().any(|input| input.has_pending())
    }

    fn step(&mut self) -> Result<bool> {
        for input in &self.inputs {
            if let Some(message) = input.recv() {
                self.output.send(message);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
