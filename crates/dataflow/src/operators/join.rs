//! Incremental equi-join
//!
//! Both sides are indexed by join key. Arriving differences cross-join
//! against the opposite index: a left entry `(k, l, dl)` joined with an
//! indexed right entry `(r, mr)` contributes `(k, (l, r))` with
//! multiplicity `dl * mr`. Retractions flow through the same product with
//! negative signs.
//!
//! Outer variants additionally maintain synthetic "no match" rows: a
//! preserved value pairs with `None` while the opposite index is empty for
//! its key. The moment the opposite side gains its first entry the null
//! rows are retracted, and when it drains to empty they come back. Those
//! transitions are detected while the indexes are updated, entry by entry,
//! so interleaved batches from both sides accumulate exactly.
//!
//! Entries are processed sequentially: each delta joins against the
//! opposite index as it stands at that moment. The telescoping sum
//! `ΔL⋈R + L'⋈ΔR` keeps the output exact without re-scanning either side.

use crate::graph::{Operator, OperatorId};
use crate::multiset::{Diff, MultiSet};
use crate::stream::{StreamReader, StreamWriter};
use rillet_core::Result;
use rustc_hash::FxHashMap;
use std::hash::Hash;

/// Which side(s) of the join preserve unmatched values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Only matched pairs
    Inner,
    /// Unmatched left values pair with None
    Left,
    /// Unmatched right values pair with None
    Right,
    /// Unmatched values on both sides pair with None
    Full,
}

impl JoinKind {
    fn preserves_left(self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Full)
    }

    fn preserves_right(self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Full)
    }
}

type Index<K, V> = FxHashMap<K, FxHashMap<V, Diff>>;

/// Joined output: the key plus one value from each side, `None` standing
/// for "no match" under outer semantics
pub type JoinOutput<K, L, R> = (K, (Option<L>, Option<R>));

/// Incremental equi-join over two keyed streams
pub struct JoinOperator<K, L, R> {
    id: OperatorId,
    left: StreamReader<(K, L)>,
    right: StreamReader<(K, R)>,
    output: StreamWriter<JoinOutput<K, L, R>>,
    kind: JoinKind,
    left_index: Index<K, L>,
    right_index: Index<K, R>,
}

impl<K, L, R> JoinOperator<K, L, R>
where
    K: Clone + Ord + Hash + Send,
    L: Clone + Ord + Hash + Send,
    R: Clone + Ord + Hash + Send,
{
    /// Wire a join operator over keyed left/right inputs
    pub fn new(
        left: StreamReader<(K, L)>,
        right: StreamReader<(K, R)>,
        output: StreamWriter<JoinOutput<K, L, R>>,
        kind: JoinKind,
    ) -> Self {
        JoinOperator {
            id: OperatorId(0),
            left,
            right,
            output,
            kind,
            left_index: Index::default(),
            right_index: Index::default(),
        }
    }

    fn process_left(&mut self, message: MultiSet<(K, L)>) -> MultiSet<JoinOutput<K, L, R>> {
        let mut out = MultiSet::new();
        for ((key, value), diff) in message.into_iter() {
            let was_empty = index_is_empty(&self.left_index, &key);
            index_add(&mut self.left_index, key.clone(), value.clone(), diff);
            let is_empty = index_is_empty(&self.left_index, &key);

            match self.right_index.get(&key) {
                Some(matches) if !matches.is_empty() => {
                    for (rv, rm) in matches {
                        out.push(
                            (key.clone(), (Some(value.clone()), Some(rv.clone()))),
                            diff * rm,
                        );
                    }
                }
                _ => {
                    if self.kind.preserves_left() {
                        out.push((key.clone(), (Some(value.clone()), None)), diff);
                    }
                }
            }

            // Left emptiness transitions drive right-side null rows.
            if self.kind.preserves_right() && was_empty != is_empty {
                if let Some(rights) = self.right_index.get(&key) {
                    let sign = if is_empty { 1 } else { -1 };
                    for (rv, rm) in rights {
                        out.push((key.clone(), (None, Some(rv.clone()))), sign * rm);
                    }
                }
            }
        }
        out
    }

    fn process_right(&mut self, message: MultiSet<(K, R)>) -> MultiSet<JoinOutput<K, L, R>> {
        let mut out = MultiSet::new();
        for ((key, value), diff) in message.into_iter() {
            let was_empty = index_is_empty(&self.right_index, &key);
            index_add(&mut self.right_index, key.clone(), value.clone(), diff);
            let is_empty = index_is_empty(&self.right_index, &key);

            match self.left_index.get(&key) {
                Some(matches) if !matches.is_empty() => {
                    for (lv, lm) in matches {
                        out.push(
                            (key.clone(), (Some(lv.clone()), Some(value.clone()))),
                            diff * lm,
                        );
                    }
                }
                _ => {
                    if self.kind.preserves_right() {
                        out.push((key.clone(), (None, Some(value.clone()))), diff);
                    }
                }
            }

            if self.kind.preserves_left() && was_empty != is_empty {
                if let Some(lefts) = self.left_index.get(&key) {
                    let sign = if is_empty { 1 } else { -1 };
                    for (lv, lm) in lefts {
                        out.push((key.clone(), (Some(lv.clone()), None)), sign * lm);
                    }
                }
            }
        }
        out
    }
}

fn index_is_empty<K: Eq + Hash, V>(index: &Index<K, V>, key: &K) -> bool {
    index.get(key).map_or(true, |m| m.is_empty())
}

fn index_add<K, V>(index: &mut Index<K, V>, key: K, value: V, diff: Diff)
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    let entry = index.entry(key).or_default();
    let m = entry.entry(value).or_insert(0);
    *m += diff;
    if *m == 0 {
        entry.retain(|_, d| *d != 0);
    }
}

impl<K, L, R> Operator for JoinOperator<K, L, R>
where
    K: Clone + Ord + Hash + Send,
    L: Clone + Ord + Hash + Send,
    R: Clone + Ord + Hash + Send,
{
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "join"
    }

    fn has_pending(&self) -> bool {
        self.left.has_pending() || self.right.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        let mut out = MultiSet::new();
        if let Some(message) = self.left.recv() {
            out.extend(self.process_left(message));
        } else if let Some(message) = self.right.recv() {
            out.extend(self.process_right(message));
        } else {
            return Ok(false);
        }
        out.consolidate();
        let produced = !out.is_empty();
        self.output.send(out);
        Ok(produced)
    }
}
