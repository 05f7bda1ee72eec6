//! Buffer and unbuffer
//!
//! `buffer` holds everything that arrives during a scheduler pass and
//! releases it as one message when the graph quiesces, aligning emission
//! with commit boundaries. `unbuffer` does the opposite at quiescence:
//! each held entry leaves as its own single-entry message, for consumers
//! that want per-record granularity.

use crate::graph::{Operator, OperatorId};
use crate::multiset::MultiSet;
use crate::stream::{StreamReader, StreamWriter};
use rillet_core::Result;

/// Delays emission until quiescence, then releases one combined batch
pub struct BufferOperator<T> {
    id: OperatorId,
    input: StreamReader<T>,
    output: StreamWriter<T>,
    held: MultiSet<T>,
}

impl<T> BufferOperator<T> {
    /// Wire a buffer operator between `input` and `output`
    pub fn new(input: StreamReader<T>, output: StreamWriter<T>) -> Self {
        BufferOperator {
            id: OperatorId(0),
            input,
            output,
            held: MultiSet::new(),
        }
    }
}

impl<T: Clone + Ord + Send> Operator for BufferOperator<T> {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "buffer"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        if let Some(message) = self.input.recv() {
            self.held.extend(message);
        }
        Ok(false)
    }

    fn on_quiesce(&mut self) -> Result<bool> {
        if self.held.is_empty() {
            return Ok(false);
        }
        let batch = std::mem::take(&mut self.held);
        self.output.send(batch);
        Ok(true)
    }
}

/// Splits batches into single-entry messages at quiescence
pub struct UnbufferOperator<T> {
    id: OperatorId,
    input: StreamReader<T>,
    output: StreamWriter<T>,
    held: MultiSet<T>,
}

impl<T> UnbufferOperator<T> {
    /// Wire an unbuffer operator between `input` and `output`
    pub fn new(input: StreamReader<T>, output: StreamWriter<T>) -> Self {
        UnbufferOperator {
            id: OperatorId(0),
            input,
            output,
            held: MultiSet::new(),
        }
    }
}

impl<T: Clone + Ord + Send> Operator for UnbufferOperator<T> {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "unbuffer"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        if let Some(message) = self.input.recv() {
            self.held.extend(message);
        }
        Ok(false)
    }

    fn on_quiesce(&mut self) -> Result<bool> {
        if self.held.is_empty() {
            return Ok(false);
        }
        let held = std::mem::take(&mut self.held);
        for (value, diff) in held.into_iter() {
            self.output.send(MultiSet::from_entries(vec![(value, diff)]));
        }
        Ok(true)
    }
}
