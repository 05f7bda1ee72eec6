//! Algebraic operator laws: for an operator `O` with algebra `a`,
//! `consolidate(O(M))` equals `consolidate(a(consolidate(M)))`. Feeding an
//! operator raw or pre-consolidated input must accumulate to the same
//! canonical output.

use proptest::prelude::*;
use rillet_dataflow::graph::{Operator, OperatorId};
use rillet_dataflow::multiset::{Diff, MultiSet};
use rillet_dataflow::operators::{DistinctOperator, FilterOperator, MapOperator};
use rillet_dataflow::stream::{StreamReader, StreamWriter};

fn wire<T>() -> (StreamWriter<T>, StreamReader<T>) {
    let writer = StreamWriter::new();
    let reader = writer.subscribe();
    (writer, reader)
}

fn drain_consolidated<T: Clone + Ord>(reader: &StreamReader<T>) -> Vec<(T, Diff)> {
    let mut all = MultiSet::new();
    for message in reader.drain() {
        all.extend(message);
    }
    all.consolidate();
    all.into_entries()
}

fn run_to_quiescence(op: &mut dyn Operator) {
    while op.has_pending() {
        op.step().unwrap();
    }
}

fn entries_strategy() -> impl Strategy<Value = Vec<(u8, Diff)>> {
    proptest::collection::vec((0u8..16, -2isize..3), 0..48)
}

proptest! {
    #[test]
    fn map_commutes_with_consolidation(entries in entries_strategy()) {
        // raw path
        let (in_w, in_r) = wire::<u8>();
        let (out_w, out_r) = wire::<u16>();
        let mut raw = MapOperator::new(in_r, out_w, |v: &u8| Ok(*v as u16 * 3));
        raw.set_id(OperatorId(0));
        in_w.send(MultiSet::from_entries(entries.clone()));
        run_to_quiescence(&mut raw);

        // consolidated path
        let (in_w2, in_r2) = wire::<u8>();
        let (out_w2, out_r2) = wire::<u16>();
        let mut pre = MapOperator::new(in_r2, out_w2, |v: &u8| Ok(*v as u16 * 3));
        pre.set_id(OperatorId(0));
        let mut consolidated = MultiSet::from_entries(entries);
        consolidated.consolidate();
        in_w2.send(consolidated);
        run_to_quiescence(&mut pre);

        prop_assert_eq!(drain_consolidated(&out_r), drain_consolidated(&out_r2));
    }

    #[test]
    fn filter_commutes_with_consolidation(entries in entries_strategy()) {
        let (in_w, in_r) = wire::<u8>();
        let (out_w, out_r) = wire::<u8>();
        let mut raw = FilterOperator::new(in_r, out_w, |v: &u8| Ok(v % 2 == 0));
        raw.set_id(OperatorId(0));
        in_w.send(MultiSet::from_entries(entries.clone()));
        run_to_quiescence(&mut raw);

        let (in_w2, in_r2) = wire::<u8>();
        let (out_w2, out_r2) = wire::<u8>();
        let mut pre = FilterOperator::new(in_r2, out_w2, |v: &u8| Ok(v % 2 == 0));
        pre.set_id(OperatorId(0));
        let mut consolidated = MultiSet::from_entries(entries);
        consolidated.consolidate();
        in_w2.send(consolidated);
        run_to_quiescence(&mut pre);

        prop_assert_eq!(drain_consolidated(&out_r), drain_consolidated(&out_r2));
    }

    #[test]
    fn distinct_matches_set_semantics(entries in entries_strategy()) {
        // distinct is stateful: the law compares its accumulated output
        // against the set projection of the accumulated input
        let (in_w, in_r) = wire::<u8>();
        let (out_w, out_r) = wire::<u8>();
        let mut distinct = DistinctOperator::new(in_r, out_w);
        distinct.set_id(OperatorId(0));
        // deliver entry by entry to exercise incremental transitions
        for (value, diff) in &entries {
            in_w.send(MultiSet::from_entries(vec![(*value, *diff)]));
        }
        run_to_quiescence(&mut distinct);

        let mut accumulated = MultiSet::from_entries(entries);
        accumulated.consolidate();
        let expected: Vec<(u8, Diff)> = accumulated
            .into_entries()
            .into_iter()
            .filter(|(_, diff)| *diff > 0)
            .map(|(value, _)| (value, 1))
            .collect();

        prop_assert_eq!(drain_consolidated(&out_r), expected);
    }
}
