//! Slot arenas for heap objects
//!
//! Tables and closures live in two arenas indexed by `TableRef` and
//! `FunctionRef`. Freed slots are recycled through a free list; a slot is
//! only freed by the collector once nothing reachable refers to it.

use crate::runtime::{Closure, Table};
use crate::value::{FunctionRef, TableRef};

/// One arena slot with its mark bit
#[derive(Debug)]
pub(crate) struct Slot<T> {
    pub(crate) object: Option<T>,
    pub(crate) marked: bool,
}

/// Arena of one object type
#[derive(Debug)]
pub(crate) struct Arena<T> {
    pub(crate) slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, object: T) -> u32 {
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.object = Some(object);
            slot.marked = false;
            idx
        } else {
            self.slots.push(Slot {
                object: Some(object),
                marked: false,
            });
            (self.slots.len() - 1) as u32
        }
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(|s| s.object.as_ref())
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx).and_then(|s| s.object.as_mut())
    }

    pub(crate) fn free(&mut self, idx: usize) -> Option<T> {
        let object = self.slots.get_mut(idx)?.object.take()?;
        self.free.push(idx as u32);
        Some(object)
    }

    pub(crate) fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
    }
}

/// The engine heap
#[derive(Debug)]
pub struct Heap {
    pub(crate) tables: Arena<Table>,
    pub(crate) functions: Arena<Closure>,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Heap {
            tables: Arena::new(),
            functions: Arena::new(),
        }
    }

    /// Allocate a table
    pub fn alloc_table(&mut self, table: Table) -> TableRef {
        TableRef(self.tables.alloc(table))
    }

    /// Allocate a closure
    pub fn alloc_function(&mut self, closure: Closure) -> FunctionRef {
        FunctionRef(self.functions.alloc(closure))
    }

    pub fn table(&self, r: TableRef) -> Option<&Table> {
        self.tables.get(r.index())
    }

    pub fn table_mut(&mut self, r: TableRef) -> Option<&mut Table> {
        self.tables.get_mut(r.index())
    }

    pub fn function(&self, r: FunctionRef) -> Option<&Closure> {
        self.functions.get(r.index())
    }

    /// Current heap occupancy
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            tables: self.tables.live(),
            functions: self.functions.live(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Heap occupancy statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live tables
    pub tables: usize,
    /// Live closures
    pub functions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::value::Value;
    use crate::vm::State;

    fn noop(_: &mut State) -> Result<usize> {
        Ok(0)
    }

    #[test]
    fn test_alloc_and_lookup() {
        let mut heap = Heap::new();
        let t = heap.alloc_table(Table::new());
        let f = heap.alloc_function(Closure::new(noop));

        heap.table_mut(t).unwrap().set("k", Value::from(1.0));
        assert_eq!(heap.table(t).unwrap().get("k"), Some(&Value::from(1.0)));
        assert!(heap.function(f).is_some());
        assert_eq!(heap.stats(), HeapStats { tables: 1, functions: 1 });
    }

    #[test]
    fn test_free_slot_is_reused() {
        let mut heap = Heap::new();
        let a = heap.alloc_table(Table::new());
        let _b = heap.alloc_table(Table::new());

        assert!(heap.tables.free(a.index()).is_some());
        assert!(heap.table(a).is_none());
        assert_eq!(heap.stats().tables, 1);

        let c = heap.alloc_table(Table::new());
        assert_eq!(c, a);
        assert_eq!(heap.stats().tables, 2);
    }

    #[test]
    fn test_double_free_is_ignored() {
        let mut heap = Heap::new();
        let a = heap.alloc_table(Table::new());
        assert!(heap.tables.free(a.index()).is_some());
        assert!(heap.tables.free(a.index()).is_none());
        assert_eq!(heap.stats().tables, 0);
    }
}
