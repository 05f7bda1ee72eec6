//! Windowed ordered output (top-k)
//!
//! Maintains, per group, every row of the group in comparator order, and
//! exposes the window `[offset, offset + limit)`. Each change recomputes
//! the window for touched groups only and emits the multiset difference
//! between the old and new window contents, so one moved row produces one
//! `moveOut` and one `moveIn`, not a rewrite of the window.
//!
//! Two variants:
//! - `TopKOperator` emits bare rows and supports a runtime `move_window`
//!   hook through `WindowHandle`, re-windowing without rebuilding state.
//! - `FractionalTopKOperator` tags every visible row with a fractional
//!   position key (see `fractional`). Rows that stay in the window keep
//!   their keys; only inserted rows mint new ones. Consumers can sort by
//!   key alone.
//!
//! Comparator ties break by the row's total order, which keeps windows
//! deterministic.

use crate::fractional::key_between;
use crate::graph::{Operator, OperatorId};
use crate::multiset::{Diff, MultiSet};
use crate::stream::{StreamReader, StreamWriter};
use parking_lot::Mutex;
use rillet_core::Result;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::hash::Hash;
use std::sync::Arc;

/// Shared window spec, adjustable at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowSpec {
    offset: usize,
    limit: usize,
    dirty: bool,
}

/// Handle for adjusting a `TopKOperator`'s window while it runs
#[derive(Clone)]
pub struct WindowHandle {
    spec: Arc<Mutex<WindowSpec>>,
}

impl WindowHandle {
    fn new(offset: usize, limit: usize) -> Self {
        WindowHandle {
            spec: Arc::new(Mutex::new(WindowSpec {
                offset,
                limit,
                dirty: false,
            })),
        }
    }

    /// Change the visible window. The operator re-emits diffs on its next
    /// scheduling opportunity without rebuilding sorted state.
    pub fn move_window(&self, offset: usize, limit: usize) {
        let mut spec = self.spec.lock();
        if spec.offset != offset || spec.limit != limit {
            spec.offset = offset;
            spec.limit = limit;
            spec.dirty = true;
        }
    }

    fn take(&self) -> (usize, usize, bool) {
        let mut spec = self.spec.lock();
        let dirty = spec.dirty;
        spec.dirty = false;
        (spec.offset, spec.limit, dirty)
    }

    fn is_dirty(&self) -> bool {
        self.spec.lock().dirty
    }
}

/// Sorted rows of one group. Entries hold positive multiplicities; a row
/// with multiplicity 2 occupies two window positions.
struct GroupRows<V> {
    rows: Vec<(V, Diff)>,
}

impl<V: Clone + Ord> GroupRows<V> {
    fn new() -> Self {
        GroupRows { rows: Vec::new() }
    }

    fn apply<C: Fn(&V, &V) -> Ordering>(&mut self, value: V, diff: Diff, cmp: &C) {
        let position = self
            .rows
            .binary_search_by(|(row, _)| full_order(cmp, row, &value))
            .unwrap_or_else(|i| i);
        let matched = matches!(
            self.rows.get(position),
            Some((row, _)) if full_order(cmp, row, &value) == Ordering::Equal
        );
        if matched {
            let m = &mut self.rows[position].1;
            *m += diff;
            if *m <= 0 {
                self.rows.remove(position);
            }
        } else if diff > 0 {
            self.rows.insert(position, (value, diff));
        }
        // a retraction of an absent row is a no-op; upstream consolidation
        // makes that unreachable in practice
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows visible in `[offset, offset + limit)`, multiplicities expanded
    fn window(&self, offset: usize, limit: usize) -> Vec<V> {
        let mut out = Vec::with_capacity(limit.min(64));
        if limit == 0 {
            return out;
        }
        let mut position = 0usize;
        for (row, m) in &self.rows {
            let copies = *m as usize;
            let start = position;
            let end = position + copies;
            position = end;
            if end <= offset {
                continue;
            }
            let visible_from = start.max(offset);
            let visible_to = end.min(offset + limit);
            for _ in visible_from..visible_to {
                out.push(row.clone());
            }
            if position >= offset + limit {
                break;
            }
        }
        out
    }
}

fn full_order<V: Ord, C: Fn(&V, &V) -> Ordering>(cmp: &C, a: &V, b: &V) -> Ordering {
    cmp(a, b).then_with(|| a.cmp(b))
}

/// Top-k without position keys
pub struct TopKOperator<K, V, C> {
    id: OperatorId,
    input: StreamReader<(K, V)>,
    output: StreamWriter<(K, V)>,
    cmp: C,
    window: WindowHandle,
    groups: FxHashMap<K, GroupRows<V>>,
    visible: FxHashMap<K, Vec<V>>,
}

impl<K, V, C> TopKOperator<K, V, C>
where
    K: Clone + Ord + Hash + Send,
    V: Clone + Ord + Send,
    C: Fn(&V, &V) -> Ordering + Send,
{
    /// Wire a top-k operator with the given comparator and window
    pub fn new(
        input: StreamReader<(K, V)>,
        output: StreamWriter<(K, V)>,
        cmp: C,
        offset: usize,
        limit: usize,
    ) -> Self {
        TopKOperator {
            id: OperatorId(0),
            input,
            output,
            cmp,
            window: WindowHandle::new(offset, limit),
            groups: FxHashMap::default(),
            visible: FxHashMap::default(),
        }
    }

    /// Handle for runtime window moves
    pub fn window_handle(&self) -> WindowHandle {
        self.window.clone()
    }

    fn emit_group_diff(&mut self, key: &K, offset: usize, limit: usize, out: &mut MultiSet<(K, V)>) {
        let new_window = match self.groups.get(key) {
            Some(group) => group.window(offset, limit),
            None => Vec::new(),
        };
        let old_window = self.visible.remove(key).unwrap_or_default();

        let mut diff = MultiSet::new();
        for row in old_window {
            diff.push((key.clone(), row), -1);
        }
        for row in &new_window {
            diff.push((key.clone(), row.clone()), 1);
        }
        diff.consolidate();
        out.extend(diff);

        if !new_window.is_empty() {
            self.visible.insert(key.clone(), new_window);
        }
    }
}

impl<K, V, C> Operator for TopKOperator<K, V, C>
where
    K: Clone + Ord + Hash + Send,
    V: Clone + Ord + Send,
    C: Fn(&V, &V) -> Ordering + Send,
{
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "topk"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending() || self.window.is_dirty()
    }

    fn step(&mut self) -> Result<bool> {
        let (offset, limit, window_moved) = self.window.take();
        let mut out = MultiSet::new();

        if let Some(message) = self.input.recv() {
            let mut touched: SmallVec<[K; 8]> = SmallVec::new();
            for ((key, value), diff) in message.into_iter() {
                let group = self.groups.entry(key.clone()).or_insert_with(GroupRows::new);
                group.apply(value, diff, &self.cmp);
                if group.is_empty() {
                    self.groups.remove(&key);
                }
                if !touched.contains(&key) {
                    touched.push(key);
                }
            }
            for key in touched {
                self.emit_group_diff(&key, offset, limit, &mut out);
            }
        }

        if window_moved {
            // re-window every group that has (or had) visible rows
            let keys: Vec<K> = self
                .groups
                .keys()
                .chain(self.visible.keys())
                .cloned()
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            for key in keys {
                self.emit_group_diff(&key, offset, limit, &mut out);
            }
        }

        let produced = !out.is_empty();
        self.output.send(out);
        Ok(produced)
    }
}

/// Top-k emitting `(row, fractional key)` pairs
pub struct FractionalTopKOperator<K, V, C> {
    id: OperatorId,
    input: StreamReader<(K, V)>,
    output: StreamWriter<(K, (V, String))>,
    cmp: C,
    offset: usize,
    limit: usize,
    groups: FxHashMap<K, GroupRows<V>>,
    visible: FxHashMap<K, Vec<(V, String)>>,
}

impl<K, V, C> FractionalTopKOperator<K, V, C>
where
    K: Clone + Ord + Hash + Send,
    V: Clone + Ord + Send,
    C: Fn(&V, &V) -> Ordering + Send,
{
    /// Wire a fractional top-k operator
    pub fn new(
        input: StreamReader<(K, V)>,
        output: StreamWriter<(K, (V, String))>,
        cmp: C,
        offset: usize,
        limit: usize,
    ) -> Self {
        FractionalTopKOperator {
            id: OperatorId(0),
            input,
            output,
            cmp,
            offset,
            limit,
            groups: FxHashMap::default(),
            visible: FxHashMap::default(),
        }
    }

    fn emit_group_diff(&mut self, key: &K, out: &mut MultiSet<(K, (V, String))>) {
        let new_window = match self.groups.get(key) {
            Some(group) => group.window(self.offset, self.limit),
            None => Vec::new(),
        };
        let old_visible = self.visible.remove(key).unwrap_or_default();

        // Merge old and new in comparator order: rows present in both keep
        // their keys, rows only in the old window retract, rows only in the
        // new window get fresh keys between their neighbors.
        let mut merged: Vec<(V, Option<String>)> = Vec::with_capacity(new_window.len());
        let mut removed: Vec<(V, String)> = Vec::new();
        let mut i = 0; // old_visible
        let mut j = 0; // new_window
        while i < old_visible.len() || j < new_window.len() {
            if i >= old_visible.len() {
                merged.push((new_window[j].clone(), None));
                j += 1;
            } else if j >= new_window.len() {
                removed.push(old_visible[i].clone());
                i += 1;
            } else {
                match full_order(&self.cmp, &old_visible[i].0, &new_window[j]) {
                    Ordering::Equal => {
                        merged.push((new_window[j].clone(), Some(old_visible[i].1.clone())));
                        i += 1;
                        j += 1;
                    }
                    Ordering::Less => {
                        removed.push(old_visible[i].clone());
                        i += 1;
                    }
                    Ordering::Greater => {
                        merged.push((new_window[j].clone(), None));
                        j += 1;
                    }
                }
            }
        }

        // Assign keys to inserted rows, walking left to right so each new
        // key can use the previous assignment as its lower bound.
        let mut assigned: Vec<(V, String)> = Vec::with_capacity(merged.len());
        for index in 0..merged.len() {
            let (row, existing) = &merged[index];
            let key_string = match existing {
                Some(k) => k.clone(),
                None => {
                    let lower = assigned.last().map(|(_, k)| k.clone());
                    let upper = merged[index + 1..]
                        .iter()
                        .find_map(|(_, k)| k.as_ref().cloned());
                    let minted = key_between(lower.as_deref(), upper.as_deref());
                    out.push((key.clone(), (row.clone(), minted.clone())), 1);
                    minted
                }
            };
            assigned.push((row.clone(), key_string));
        }

        for (row, key_string) in removed {
            out.push((key.clone(), (row, key_string)), -1);
        }

        if !assigned.is_empty() {
            self.visible.insert(key.clone(), assigned);
        }
    }
}

impl<K, V, C> Operator for FractionalTopKOperator<K, V, C>
where
    K: Clone + Ord + Hash + Send,
    V: Clone + Ord + Send,
    C: Fn(&V, &V) -> Ordering + Send,
{
    fn id(&self) -> OperatorId {
        self.id
    }

    fn set_id(&mut self, id: OperatorId) {
        self.id = id;
    }

    fn name(&self) -> &'static str {
        "topk-fractional"
    }

    fn has_pending(&self) -> bool {
        self.input.has_pending()
    }

    fn step(&mut self) -> Result<bool> {
        let message = match self.input.recv() {
            Some(m) => m,
            None => return Ok(false),
        };
        let mut touched: SmallVec<[K; 8]> = SmallVec::new();
        for ((key, value), diff) in message.into_iter() {
            let group = self.groups.entry(key.clone()).or_insert_with(GroupRows::new);
            group.apply(value, diff, &self.cmp);
            if group.is_empty() {
                self.groups.remove(&key);
            }
            if !touched.contains(&key) {
                touched.push(key);
            }
        }
        let mut out = MultiSet::new();
        for key in touched {
            self.emit_group_diff(&key, &mut out);
        }
        let produced = !out.is_empty();
        self.output.send(out);
        Ok(produced)
    }
}
