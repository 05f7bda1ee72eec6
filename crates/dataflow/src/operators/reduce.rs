//! Keyed reduction
//!
//! Maintains, per group key, the consolidated histogram of input values
//! with their multiplicities, plus the outputs last emitted for the group.
//! When a group is touched, the reduction function runs over the full
//! histogram and the operator emits the difference between the new outputs
//! and the previous ones.
//!
//! The histogram is what makes non-invertible aggregates correct under
//! retraction: when the current minimum is deleted, the previous extremum
//! is still in the histogram. Invertible aggregates (sum, count) simply
//! fold over the histogram; groups are touched proportionally to the
//! change, so the fold cost is bounded by group size, not input size.
//!
//! A group whose histogram drains to empty emits retractions for its prior
//! outputs and drops its state.

use crate::graph::{Operator, OperatorId};
use crate::multiset::{Diff, MultiSet};
use crate::stream::{StreamReader, StreamWriter};
use rillet_core::Result;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::hash::Hash;

/// Incremental keyed reduce
pub struct ReduceOperator<K, V, O, F> {
    id: OperatorId,
    input: StreamReader<(K, V)>,
    output: StreamWriter<(K, O)>,
    logic: F,
    /// group key -> value histogram (consolidated, no zeros)
    histograms: FxHashMap<K, BTreeMap<V, Diff>>,
    /// group key -> outputs last emitted
    last_outputs: FxHashMap<K, Vec<(O, Diff)>>,
}

impl<K, V, O, F> ReduceOperator<K, V, O, F>
where
    K: Clone + Ord + Hash + Send,
    V: Clone + Ord + Send,
    O: Clone + Ord + Send,
    F: FnMut(&K, &BTreeMap<V, Diff>) -> Result<Vec<(O, Diff)>>,
{
    /// Wire a reduce operator. `logic` maps a group's histogram to its
    /// output entries (usually a single aggregate row with multiplicity 1).
    pub fn new(input: StreamReader<(K, V)>, output: StreamWriter<(K, O)>, logic: F) -> Self {
        ReduceOperator {
            id: OperatorId(0),
            input,
            output,
            logic,
            histograms: FxHashMap::default(),
            last_outputs: FxHashMap::default(),
        }
    }
}

impl<K, V, O, F> Operator for ReduceOperator<K, V, O, F>
where
    K: Clone + Ord + Hash + Send,
    V: Clone + Ord + Send,
    O: Clone + Ord + Send,
    F: FnMut(&K, &BTreeMap<V, Diff>) -> Result<Vec<(O, Diff)>> + Send,
{
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "reduce"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        let message = match self.input.recv() {
            Some(m) => m,
            None => return Ok(false),
        };

        // Fold the message into histograms, remembering touched groups.
        let mut touched: SmallVec<[K; 8]> = SmallVec::new();
        for ((key, value), diff) in message.into_iter() {
            let histogram = self.histograms.entry(key.clone()).or_default();
            let m = histogram.entry(value).or_insert(0);
            *m += diff;
            if *m == 0 {
                histogram.retain(|_, d| *d != 0);
            }
            if !touched.contains(&key) {
                touched.push(key);
            }
        }

        let mut out = MultiSet::new();
        for key in touched {
            let new_outputs = match self.histograms.get(&key) {
                Some(histogram) if !histogram.is_empty() => (self.logic)(&key, histogram)?,
                _ => {
                    self.histograms.remove(&key);
                    Vec::new()
                }
            };

            let old_outputs = self.last_outputs.remove(&key).unwrap_or_default();
            for (value, diff) in &old_outputs {
                out.push((key.clone(), value.clone()), -diff);
            }
            for (value, diff) in &new_outputs {
                out.push((key.clone(), value.clone()), *diff);
            }
            if !new_outputs.is_empty() {
                self.last_outputs.insert(key, new_outputs);
            }
        }

        out.consolidate();
        let produced = !out.is_empty();
        self.output.send(out);
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_logic(_k: &&str, histogram: &BTreeMap<i64, Diff>) -> Result<Vec<(i64, Diff)>> {
        let total: i64 = histogram.iter().map(|(v, d)| v * (*d as i64)).sum();
        Ok(vec![(total, 1)])
    }

    fn setup() -> (
        StreamWriter<(&'static str, i64)>,
        ReduceOperator<
            &'static str,
            i64,
            i64,
            fn(&&'static str, &BTreeMap<i64, Diff>) -> Result<Vec<(i64, Diff)>>,
        >,
        StreamReader<(&'static str, i64)>,
    ) {
        let in_w = StreamWriter::new();
        let out_w = StreamWriter::new();
        let out_r = out_w.subscribe();
        let op = ReduceOperator::new(
            in_w.subscribe(),
            out_w,
            sum_logic as fn(&&'static str, &BTreeMap<i64, Diff>) -> Result<Vec<(i64, Diff)>>,
        );
        (in_w, op, out_r)
    }

    fn drain(r: &StreamReader<(&'static str, i64)>) -> Vec<((&'static str, i64), Diff)> {
        let mut all = MultiSet::new();
        for m in r.drain() {
            all.extend(m);
        }
        all.consolidate();
        all.into_entries()
    }

    #[test]
    fn test_first_batch_emits_aggregates() {
        let (in_w, mut op, out) = setup();
        in_w.send(MultiSet::from_entries(vec![
            (("a", 1), 1),
            (("a", 2), 1),
            (("b", 5), 1),
        ]));
        op.step().unwrap();
        assert_eq!(drain(&out), vec![(("a", 3), 1), (("b", 5), 1)]);
    }

    #[test]
    fn test_change_emits_retract_and_insert() {
        let (in_w, mut op, out) = setup();
        in_w.send(MultiSet::from_entries(vec![(("a", 1), 1), (("a", 2), 1)]));
        op.step().unwrap();
        drain(&out);

        in_w.send(MultiSet::from_entries(vec![(("a", 10), 1)]));
        op.step().unwrap();
        assert_eq!(drain(&out), vec![(("a", 3), -1), (("a", 13), 1)]);
    }

    #[test]
    fn test_untouched_groups_stay_silent() {
        let (in_w, mut op, out) = setup();
        in_w.send(MultiSet::from_entries(vec![(("a", 1), 1), (("b", 2), 1)]));
        op.step().unwrap();
        drain(&out);

        in_w.send(MultiSet::from_entries(vec![(("a", 1), 1)]));
        op.step().unwrap();
        let changes = drain(&out);
        assert!(changes.iter().all(|((k, _), _)| *k == "a"));
    }

    #[test]
    fn test_drained_group_retracts_output_and_state() {
        let (in_w, mut op, out) = setup();
        in_w.send(MultiSet::from_entries(vec![(("a", 7), 1)]));
        op.step().unwrap();
        drain(&out);

        in_w.send(MultiSet::from_entries(vec![(("a", 7), -1)]));
        op.step().unwrap();
        assert_eq!(drain(&out), vec![(("a", 7), -1)]);
        assert!(op.histograms.is_empty());
        assert!(op.last_outputs.is_empty());
    }

    #[test]
    fn test_min_survives_retraction_via_histogram() {
        // a min aggregate built on the histogram: deleting the minimum
        // restores the previous one
        let in_w = StreamWriter::new();
        let out_w: StreamWriter<(&str, i64)> = StreamWriter::new();
        let out_r = out_w.subscribe();
        let mut op = ReduceOperator::new(in_w.subscribe(), out_w, |_k: &&str, h: &BTreeMap<i64, Diff>| {
            Ok(vec![(*h.keys().next().unwrap(), 1)])
        });

        in_w.send(MultiSet::from_entries(vec![(("a", 3), 1), (("a", 8), 1)]));
        op.step().unwrap();
        assert_eq!(drain(&out_r), vec![(("a", 3), 1)]);

        in_w.send(MultiSet::from_entries(vec![(("a", 3), -1)]));
        op.step().unwrap();
        assert_eq!(drain(&out_r), vec![(("a", 3), -1), (("a", 8), 1)]);
    }
}
