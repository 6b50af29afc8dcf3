//! Mark-and-sweep garbage collector
//!
//! The GC works in three phases:
//! 1. Mark: Traverse all reachable objects starting from the roots (the
//!    value stack and the globals table)
//! 2. Finalize: Call the `__gc` metamethod of every unreachable table that
//!    has one and was not finalized before, then mark again so a finalizer
//!    that stored its table somewhere keeps it alive
//! 3. Sweep: Release every slot that is still unmarked
//!
//! Objects never move; `TableRef` and `FunctionRef` stay valid for as long
//! as the object is reachable.

use tracing::{debug, warn};

use crate::runtime::GC_FIELD;
use crate::value::{FunctionRef, TableRef, Value};
use crate::vm::State;

/// Statistics about a GC run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Number of `__gc` finalizers invoked
    pub finalized: usize,
    /// Tables released
    pub tables_freed: usize,
    /// Closures released
    pub functions_freed: usize,
}

/// Run a full collection cycle
pub(crate) fn collect(state: &mut State) -> GcStats {
    if state.in_gc {
        return GcStats::default();
    }
    state.in_gc = true;

    mark_roots(state);

    let pending = unreachable_finalizable(state);
    for &(table, _) in &pending {
        set_finalized(state, table);
    }
    run_finalizers(state, &pending);
    if !pending.is_empty() {
        // Finalizers may have resurrected their table
        mark_roots(state);
    }

    let mut stats = sweep(state);
    stats.finalized = pending.len();
    state.in_gc = false;

    debug!(
        finalized = stats.finalized,
        tables = stats.tables_freed,
        functions = stats.functions_freed,
        "collection finished"
    );
    stats
}

/// Finalize every table that has a `__gc` metamethod, reachable or not
///
/// Used when a state is closed. Repeats until finalizers stop producing new
/// finalizable tables.
pub(crate) fn finalize_all(state: &mut State) -> usize {
    state.in_gc = true;
    let mut total = 0;
    loop {
        let pending: Vec<(TableRef, FunctionRef)> = (0..state.heap.tables.slots.len())
            .filter_map(|idx| finalizer_of(state, TableRef(idx as u32)).map(|f| (TableRef(idx as u32), f)))
            .collect();
        if pending.is_empty() {
            break;
        }
        for &(table, _) in &pending {
            set_finalized(state, table);
        }
        run_finalizers(state, &pending);
        total += pending.len();
    }
    state.in_gc = false;
    total
}

fn mark_roots(state: &mut State) {
    state.heap.tables.clear_marks();
    state.heap.functions.clear_marks();

    let mut gray: Vec<Value> = state.stack.values().to_vec();
    gray.push(Value::Table(state.globals()));

    while let Some(value) = gray.pop() {
        match value {
            Value::Table(t) => {
                let Some(slot) = state.heap.tables.slots.get_mut(t.index()) else {
                    continue;
                };
                if slot.marked {
                    continue;
                }
                let Some(table) = slot.object.as_ref() else {
                    continue;
                };
                slot.marked = true;
                gray.extend(table.values().cloned());
                if let Some(mt) = table.metatable() {
                    gray.push(Value::Table(mt));
                }
            }
            Value::Function(f) => {
                let Some(slot) = state.heap.functions.slots.get_mut(f.index()) else {
                    continue;
                };
                if slot.marked {
                    continue;
                }
                let Some(closure) = slot.object.as_ref() else {
                    continue;
                };
                slot.marked = true;
                gray.extend(closure.upvalues.iter().cloned());
            }
            // Leaf values - nothing to trace
            Value::Nil
            | Value::Boolean(_)
            | Value::Number(_)
            | Value::String(_)
            | Value::LightPtr(_) => {}
        }
    }
}

/// The `__gc` function of a live, not yet finalized table
fn finalizer_of(state: &State, table: TableRef) -> Option<FunctionRef> {
    let t = state.heap.table(table)?;
    if t.finalized {
        return None;
    }
    let mt = state.heap.table(t.metatable()?)?;
    mt.get(GC_FIELD)?.as_function()
}

fn unreachable_finalizable(state: &State) -> Vec<(TableRef, FunctionRef)> {
    state
        .heap
        .tables
        .slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| !slot.marked && slot.object.is_some())
        .filter_map(|(idx, _)| {
            let table = TableRef(idx as u32);
            finalizer_of(state, table).map(|f| (table, f))
        })
        .collect()
}

fn set_finalized(state: &mut State, table: TableRef) {
    if let Some(t) = state.heap.table_mut(table) {
        t.finalized = true;
    }
}

fn run_finalizers(state: &mut State, pending: &[(TableRef, FunctionRef)]) {
    for &(table, func) in pending {
        if let Err(err) = state.call_finalizer(func, table) {
            warn!(table = table.0, error = %err, "finalizer failed");
        }
    }
}

fn sweep(state: &mut State) -> GcStats {
    let mut stats = GcStats::default();

    for idx in 0..state.heap.tables.slots.len() {
        let slot = &state.heap.tables.slots[idx];
        if !slot.marked && slot.object.is_some() {
            state.heap.tables.free(idx);
            stats.tables_freed += 1;
        }
    }
    for idx in 0..state.heap.functions.slots.len() {
        let slot = &state.heap.functions.slots[idx];
        if !slot.marked && slot.object.is_some() {
            state.heap.functions.free(idx);
            stats.functions_freed += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::runtime::{Closure, Table};

    fn count_finalized(state: &mut State) -> Result<usize> {
        let n = state.get_global("finalized").as_number().unwrap_or(0.0);
        state.set_global("finalized", Value::Number(n + 1.0));
        Ok(0)
    }

    /// Push a table whose metatable finalizes it
    fn push_finalizable(state: &mut State) -> TableRef {
        let f = state.heap.alloc_function(Closure::new(count_finalized));
        let mut meta = Table::new();
        meta.set(GC_FIELD, Value::Function(f));
        let meta = state.heap.alloc_table(meta);
        let mut table = Table::new();
        table.set_metatable(Some(meta));
        let t = state.heap.alloc_table(table);
        state.push(Value::Table(t));
        t
    }

    fn finalized(state: &State) -> f64 {
        state.get_global("finalized").as_number().unwrap_or(0.0)
    }

    #[test]
    fn test_collect_empty_heap() {
        let mut state = State::new();
        let stats = collect(&mut state);
        assert_eq!(stats.finalized, 0);
        assert_eq!(stats.tables_freed, 0);
    }

    #[test]
    fn test_reachable_objects_survive() {
        let mut state = State::new();
        push_finalizable(&mut state);
        let before = state.heap.stats();

        let stats = collect(&mut state);
        assert_eq!(stats.finalized, 0);
        assert_eq!(state.heap.stats(), before);
    }

    #[test]
    fn test_unreachable_table_is_finalized_once() {
        let mut state = State::new();
        let t = push_finalizable(&mut state);
        state.pop_n(1);

        let stats = collect(&mut state);
        assert_eq!(stats.finalized, 1);
        assert_eq!(finalized(&state), 1.0);
        assert!(state.heap.table(t).is_none());

        let stats = collect(&mut state);
        assert_eq!(stats.finalized, 0);
        assert_eq!(finalized(&state), 1.0);
    }

    #[test]
    fn test_globals_are_roots() {
        let mut state = State::new();
        let t = push_finalizable(&mut state);
        state.set_global("keep", Value::Table(t));
        state.pop_n(1);

        collect(&mut state);
        assert!(state.heap.table(t).is_some());
        assert_eq!(finalized(&state), 0.0);
    }

    #[test]
    fn test_finalize_all_runs_every_finalizer() {
        let mut state = State::new();
        push_finalizable(&mut state);
        push_finalizable(&mut state);
        state.pop_n(1);

        assert_eq!(finalize_all(&mut state), 2);
        assert_eq!(finalized(&state), 2.0);
        assert_eq!(finalize_all(&mut state), 0);
    }
}
