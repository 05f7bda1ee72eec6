//! Consolidate and distinct
//!
//! `consolidate` buffers everything that arrives during a scheduler pass
//! and flushes one canonical batch at quiescence: summed multiplicities,
//! no zeros. Sinks read clean per-commit batches because of it.
//!
//! `distinct` projects accumulated multiplicity to set membership: a value
//! is emitted with +1 when its sum crosses above zero and retracted with
//! -1 when it returns to zero or below.

use crate::graph::{Operator, OperatorId};
use crate::multiset::MultiSet;
use crate::stream::{StreamReader, StreamWriter};
use rillet_core::Result;
use rustc_hash::FxHashMap;
use std::hash::Hash;

/// Sums multiplicities per value at quiescence and drops zeros
pub struct ConsolidateOperator<T> {
    id: OperatorId,
    input: StreamReader<T>,
    output: StreamWriter<T>,
    pending: MultiSet<T>,
}

impl<T> ConsolidateOperator<T> {
    /// Wire a consolidate operator between `input` and `output`
    pub fn new(input: StreamReader<T>, output: StreamWriter<T>) -> Self {
        ConsolidateOperator {
            id: OperatorId(0),
            input,
            output,
            pending: MultiSet::new(),
        }
    }
}

impl<T: Clone + Ord + Send> Operator for ConsolidateOperator<T> {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "consolidate"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        if let Some(message) = self.input.recv() {
            self.pending.extend(message);
        }
        // nothing emitted until quiescence
        Ok(false)
    }

    fn on_quiesce(&mut self) -> Result<bool> {
        if self.pending.is_empty() {
            return Ok(false);
        }
        let mut batch = std::mem::take(&mut self.pending);
        batch.consolidate();
        let produced = !batch.is_empty();
        self.output.send(batch);
        Ok(produced)
    }
}

/// Projects multiplicity to `1 if sum > 0 else 0`
pub struct DistinctOperator<T> {
    id: OperatorId,
    input: StreamReader<T>,
    output: StreamWriter<T>,
    sums: FxHashMap<T, isize>,
}

impl<T> DistinctOperator<T> {
    /// Wire a distinct operator between `input` and `output`
    pub fn new(input: StreamReader<T>, output: StreamWriter<T>) -> Self {
        DistinctOperator {
            id: OperatorId(0),
            input,
            output,
            sums: FxHashMap::default(),
        }
    }
}

impl<T: Clone + Ord + Hash + Send> Operator for DistinctOperator<T> {
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "distinct"
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
            let sum = self.sums.entry(value.clone()).or_insert(0);
            let before = *sum;
            *sum += diff;
            let after = *sum;
            if *sum == 0 {
                self.sums.remove(&value);
            }
            if before <= 0 && after > 0 {
                out.push(value, 1);
            } else if before > 0 && after <= 0 {
                out.push(value, -1);
            }
        }
        let produced = !out.is_empty();
        self.output.send(out);
        Ok(produced)
    }
}
