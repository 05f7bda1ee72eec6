//! Bounded fixpoint iteration
//!
//! `iterate` computes the least fixpoint of `X = input ∪ body(X)`,
//! reading its own output on every round. The loop is bounded by the
//! scheduler's fixpoint budget: a body that never converges is truncated
//! with a warning and the best-effort result is kept.
//!
//! Self-joins do not come through here (they duplicate an input reader
//! under a second alias); this operator exists for genuinely recursive
//! queries such as reachability over an edge set.

use crate::graph::{Operator, OperatorId};
use crate::multiset::MultiSet;
use crate::stream::{StreamReader, StreamWriter};
use rillet_core::Result;
use std::collections::BTreeMap;
use tracing::warn;

/// Fixpoint operator
pub struct IterateOperator<T, F> {
    id: OperatorId,
    input: StreamReader<T>,
    output: StreamWriter<T>,
    body: F,
    max_iterations: usize,
    /// accumulated input (the loop's base)
    base: BTreeMap<T, isize>,
    /// fixpoint reached for the current base, as emitted downstream
    emitted: BTreeMap<T, isize>,
}

impl<T, F> IterateOperator<T, F>
where
    T: Clone + Ord + Send,
    F: FnMut(&MultiSet<T>) -> Result<MultiSet<T>>,
{
    /// Wire a fixpoint operator. `body` is one round of the loop: given
    /// the current set it produces the derived additions. `max_iterations`
    /// comes from the scheduler limits.
    pub fn new(
        input: StreamReader<T>,
        output: StreamWriter<T>,
        body: F,
        max_iterations: usize,
    ) -> Self {
        IterateOperator {
            id: OperatorId(0),
            input,
            output,
            body,
            max_iterations,
            base: BTreeMap::new(),
            emitted: BTreeMap::new(),
        }
    }

    fn solve(&mut self) -> Result<BTreeMap<T, isize>> {
        // X starts from the base and grows by body(X) until stable.
        let mut current = self.base.clone();
        current.retain(|_, m| *m != 0);

        for _ in 0..self.max_iterations {
            let as_multiset: MultiSet<T> = current
                .iter()
                .map(|(v, m)| (v.clone(), *m))
                .collect();
            let derived = (self.body)(&as_multiset)?;

            let mut next = self.base.clone();
            for (value, diff) in derived.into_iter() {
                *next.entry(value).or_insert(0) += diff;
            }
            next.retain(|_, m| *m != 0);

            if next == current {
                return Ok(current);
            }
            current = next;
        }

        warn!(
            iterations = self.max_iterations,
            "fixpoint budget exhausted, keeping best-effort result"
        );
        Ok(current)
    }
}

impl<T, F> Operator for IterateOperator<T, F>
where
    T: Clone + Ord + Send,
    F: FnMut(&MultiSet<T>) -> Result<MultiSet<T>> + Send,
{
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "iterate"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        let message = match self.input.recv() {
            Some(m) => m,
            None => return Ok(false),
        };
        for (value, diff) in message.into_iter() {
            *self.base.entry(value).or_insert(0) += diff;
        }
        self.base.retain(|_, m| *m != 0);

        let fixpoint = self.solve()?;

        // emit the delta between the new fixpoint and what is downstream
        let mut out = MultiSet::new();
        for (value, m) in &self.emitted {
            out.push(value.clone(), -m);
        }
        for (value, m) in &fixpoint {
            out.push(value.clone(), *m);
        }
        out.consolidate();
        self.emitted = fixpoint;

        let produced = !out.is_empty();
        self.output.send(out);
        Ok(produced)
    }
}
