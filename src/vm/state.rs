//! Engine state
//!
//! One `State` is one script VM instance: a value stack, a heap of tables
//! and closures, a globals table and a collector. The API is deliberately
//! raw: index arguments are trusted to be meaningful and invalid ones are
//! reported with `None` rather than a descriptive error. Descriptive,
//! bounds-checked access is the job of `Context`.

use std::any::Any;
use std::ffi::c_void;

use tracing::{debug, warn};

use crate::config::VmConfig;
use crate::error::{Error, Result};
use crate::gc::{self, GcStats, Heap, HeapStats};
use crate::runtime::{Closure, INDEX_FIELD, MAX_UPVALUES, NativeFn, Table};
use crate::value::{FunctionRef, TableRef, Value, ValueType};
use crate::vm::stack::{Stack, from_top};

/// Longest `__index` chain followed by a field lookup
pub const MAX_INDEX_CHAIN: usize = 100;

/// A script VM instance
pub struct State {
    pub(crate) stack: Stack,
    pub(crate) heap: Heap,
    globals: TableRef,
    config: VmConfig,
    /// Set while a collection cycle is running
    pub(crate) in_gc: bool,
    /// Error of the most recent failed call
    last_error: Option<Error>,
    closed: bool,
    /// Host values kept alive until the state is dropped
    adopted: Vec<Box<dyn Any>>,
}

impl State {
    /// Create a state with default limits
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Create a state with custom limits
    pub fn with_config(config: VmConfig) -> Self {
        let mut heap = Heap::new();
        let globals = heap.alloc_table(Table::new());
        State {
            stack: Stack::new(config.stack_capacity),
            heap,
            globals,
            config,
            in_gc: false,
            last_error: None,
            closed: false,
            adopted: Vec::new(),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// The globals table
    pub fn globals(&self) -> TableRef {
        self.globals
    }

    // ==================== Stack ====================

    /// Number of slots in the current frame
    #[inline]
    pub fn top(&self) -> usize {
        self.stack.depth()
    }

    /// Whether `n` more slots fit under the configured limit
    #[inline]
    pub fn has_room(&self, n: usize) -> bool {
        self.stack.len() + n <= self.config.max_stack
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    /// Drop up to `n` slots of the current frame
    pub fn pop_n(&mut self, n: usize) {
        self.stack.drop_n(n);
    }

    /// Value at a frame-relative index
    pub fn value(&self, index: i32) -> Option<&Value> {
        self.stack.get(index)
    }

    /// Runtime type of the value at a frame-relative index
    pub fn value_type(&self, index: i32) -> Option<ValueType> {
        self.stack.get(index).map(Value::value_type)
    }

    /// Remove a slot, shifting the slots above it down
    pub fn remove(&mut self, index: i32) -> Option<Value> {
        self.stack.remove(index)
    }

    /// Shrink the frame to `depth` slots or pad it with nils
    pub fn set_top(&mut self, depth: usize) {
        let current = self.stack.depth();
        if depth < current {
            self.stack.drop_n(current - depth);
        } else {
            for _ in current..depth {
                self.stack.push(Value::Nil);
            }
        }
    }

    /// Push a copy of the value at a frame-relative index
    pub fn push_copy(&mut self, index: i32) -> Option<()> {
        let value = self.stack.get(index)?.clone();
        self.stack.push(value);
        Some(())
    }

    pub fn push_light_ptr(&mut self, ptr: *mut c_void) {
        self.stack.push(Value::LightPtr(ptr));
    }

    // ==================== Tables ====================

    /// Allocate an empty table and push it
    pub fn new_table(&mut self) -> TableRef {
        let t = self.heap.alloc_table(Table::new());
        self.stack.push(Value::Table(t));
        t
    }

    /// Field read without metatable lookup
    pub fn raw_get(&self, table: TableRef, key: &str) -> Value {
        self.heap
            .table(table)
            .and_then(|t| t.get(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Field write without metatable lookup
    pub fn raw_set(&mut self, table: TableRef, key: &str, value: Value) {
        if let Some(t) = self.heap.table_mut(table) {
            t.set(key, value);
        }
    }

    /// Field read following `__index` tables
    pub fn lookup(&self, table: TableRef, key: &str) -> Value {
        let mut current = table;
        for _ in 0..MAX_INDEX_CHAIN {
            let Some(t) = self.heap.table(current) else {
                return Value::Nil;
            };
            if let Some(value) = t.get(key) {
                return value.clone();
            }
            let next = t
                .metatable()
                .map(|mt| self.raw_get(mt, INDEX_FIELD))
                .and_then(|v| v.as_table());
            match next {
                Some(next) => current = next,
                None => return Value::Nil,
            }
        }
        warn!(key, "`__index` chain too long");
        Value::Nil
    }

    /// Push `t[key]` where `t` is the table at `index`
    pub fn get_field(&mut self, index: i32, key: &str) -> Option<()> {
        let table = self.stack.get(index)?.as_table()?;
        let value = self.lookup(table, key);
        self.stack.push(value);
        Some(())
    }

    /// Pop a value and store it as `t[key]` where `t` is the table at `index`
    ///
    /// The index is resolved before the value is popped.
    pub fn set_field(&mut self, index: i32, key: &str) -> Option<()> {
        let table = self.stack.get(index)?.as_table()?;
        let value = self.stack.pop()?;
        self.raw_set(table, key, value);
        Some(())
    }

    /// Read a global
    pub fn get_global(&self, key: &str) -> Value {
        self.raw_get(self.globals, key)
    }

    /// Write a global
    pub fn set_global(&mut self, key: &str, value: Value) {
        self.raw_set(self.globals, key, value);
    }

    /// Metatable of a table
    pub fn metatable(&self, table: TableRef) -> Option<TableRef> {
        self.heap.table(table)?.metatable()
    }

    /// Pop a table (or nil) and make it the metatable of the table at `index`
    pub fn set_metatable(&mut self, index: i32) -> Option<()> {
        let table = self.stack.get(index)?.as_table()?;
        let meta = match self.stack.get(-1)? {
            Value::Table(mt) => Some(*mt),
            Value::Nil => None,
            _ => return None,
        };
        self.stack.pop();
        self.heap.table_mut(table)?.set_metatable(meta);
        Some(())
    }

    // ==================== Functions ====================

    /// Pop `n` upvalues and push a closure over them
    pub fn push_closure(&mut self, func: NativeFn, n: usize) -> Option<FunctionRef> {
        if n > self.stack.depth() || n > MAX_UPVALUES {
            return None;
        }
        let at = self.stack.len() - n;
        let upvalues = self.stack.split_off(at);
        let f = self.heap.alloc_function(Closure::with_upvalues(func, upvalues));
        self.stack.push(Value::Function(f));
        Some(f)
    }

    /// Upvalue `n` (1-based) of the running closure
    pub fn upvalue(&self, n: usize) -> Option<&Value> {
        let frame = self.stack.frame()?;
        self.heap.function(frame.func)?.upvalue(n)
    }

    /// Call the function sitting below the top `nargs` slots
    ///
    /// On return the function and its arguments are replaced by its
    /// results, adjusted to `nresults` when given. On error the function
    /// and its arguments are removed, the error is recorded and returned.
    pub fn call(&mut self, nargs: usize, nresults: Option<usize>) -> Result<()> {
        let depth = self.stack.depth();
        if nargs >= depth {
            return Err(Error::ProtocolViolation {
                op: "call",
                index: from_top(nargs.saturating_add(1)),
                depth,
            });
        }
        let func_slot = self.stack.len() - nargs - 1;
        let result = self.invoke(func_slot);

        match result {
            Ok(n) => {
                let mut results = self.stack.split_off(self.stack.len() - n);
                self.stack.truncate(func_slot);
                if let Some(want) = nresults {
                    results.resize(want, Value::Nil);
                }
                for value in results {
                    self.stack.push(value);
                }
                Ok(())
            }
            Err(err) => {
                self.stack.truncate(func_slot);
                debug!(error = %err, "call failed");
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Run the callee at `func_slot`; returns the number of results
    fn invoke(&mut self, func_slot: usize) -> Result<usize> {
        let callee = &self.stack.values()[func_slot];
        let Some(func) = callee.as_function() else {
            return Err(Error::NotCallable(callee.value_type().name()));
        };
        if self.stack.frame_count() >= self.config.max_call_depth {
            return Err(Error::CallDepth(self.config.max_call_depth));
        }
        let native = self
            .heap
            .function(func)
            .map(|c| c.func)
            .ok_or_else(|| Error::runtime("call of a collected function"))?;

        self.stack.push_frame(func_slot + 1, func);
        let result = native(self);
        self.stack.pop_frame();

        let n = result?;
        let available = self.stack.len() - (func_slot + 1);
        if n > available {
            return Err(Error::runtime(format!(
                "native function returned {} results but pushed {}",
                n, available
            )));
        }
        Ok(n)
    }

    /// Call a function value with the given arguments and collect all results
    pub fn call_function(&mut self, func: Value, args: &[Value]) -> Result<Vec<Value>> {
        let base = self.stack.len();
        self.stack.push(func);
        for arg in args {
            self.stack.push(arg.clone());
        }
        self.call(args.len(), None)?;
        Ok(self.stack.split_off(base))
    }

    pub(crate) fn call_finalizer(&mut self, func: FunctionRef, table: TableRef) -> Result<()> {
        self.stack.push(Value::Function(func));
        self.stack.push(Value::Table(table));
        self.call(1, Some(0))
    }

    // ==================== Errors ====================

    /// Error of the most recent failed call
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Take and clear the recorded error
    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    // ==================== Memory ====================

    /// Run a full garbage collection cycle
    pub fn collect(&mut self) -> GcStats {
        gc::collect(self)
    }

    /// Heap occupancy
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Keep a host value alive until the state is dropped
    pub fn adopt(&mut self, value: Box<dyn Any>) {
        self.adopted.push(value);
    }

    /// Run every pending `__gc` finalizer
    ///
    /// Called automatically on drop. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stack.truncate(0);
        let finalized = gc::finalize_all(self);
        self.closed = true;
        debug!(finalized, "state closed");
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(state: &mut State) -> Result<usize> {
        let a = state.value(1).and_then(Value::as_number).unwrap_or(0.0);
        let b = state.value(2).and_then(Value::as_number).unwrap_or(0.0);
        state.push(Value::Number(a + b));
        Ok(1)
    }

    fn fail(_: &mut State) -> Result<usize> {
        Err(Error::runtime("boom"))
    }

    fn first_upvalue(state: &mut State) -> Result<usize> {
        let v = state.upvalue(1).cloned().unwrap_or_default();
        state.push(v);
        Ok(1)
    }

    fn recurse(state: &mut State) -> Result<usize> {
        let f = state.get_global("recurse");
        state.call_function(f, &[])?;
        Ok(0)
    }

    fn over_report(_: &mut State) -> Result<usize> {
        Ok(3)
    }

    #[test]
    fn test_call_native() {
        let mut state = State::new();
        state.push_closure(add, 0).unwrap();
        state.push(Value::from(3.0));
        state.push(Value::from(4.0));
        state.call(2, Some(1)).unwrap();

        assert_eq!(state.top(), 1);
        assert_eq!(state.value(-1), Some(&Value::from(7.0)));
    }

    #[test]
    fn test_call_adjusts_results() {
        let mut state = State::new();
        state.push_closure(add, 0).unwrap();
        state.call(0, Some(3)).unwrap();
        assert_eq!(state.top(), 3);
        assert_eq!(state.value(1), Some(&Value::from(0.0)));
        assert!(state.value(3).unwrap().is_nil());
    }

    #[test]
    fn test_call_error_restores_stack() {
        let mut state = State::new();
        state.push(Value::from("keep"));
        state.push_closure(fail, 0).unwrap();
        state.push(Value::from(1.0));

        let err = state.call(1, None).unwrap_err();
        assert_eq!(err, Error::runtime("boom"));
        assert_eq!(state.top(), 1);
        assert_eq!(state.value(1), Some(&Value::from("keep")));
        assert_eq!(state.take_error(), Some(Error::runtime("boom")));
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_call_non_function() {
        let mut state = State::new();
        state.push(Value::from(1.0));
        assert_eq!(state.call(0, None), Err(Error::NotCallable("number")));
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_call_checks_argument_count() {
        let mut state = State::new();
        state.push(Value::from(1.0));
        assert!(matches!(
            state.call(1, None),
            Err(Error::ProtocolViolation { op: "call", .. })
        ));
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_over_reported_results() {
        let mut state = State::new();
        state.push_closure(over_report, 0).unwrap();
        assert!(matches!(state.call(0, None), Err(Error::Runtime(_))));
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_closure_upvalues() {
        let mut state = State::new();
        state.push(Value::from("captured"));
        state.push_closure(first_upvalue, 1).unwrap();
        assert_eq!(state.top(), 1);

        state.call(0, Some(1)).unwrap();
        assert_eq!(state.value(-1), Some(&Value::from("captured")));
    }

    #[test]
    fn test_call_depth_limit() {
        let mut state = State::with_config(VmConfig::default().max_call_depth(8));
        state.push_closure(recurse, 0).unwrap();
        let f = state.pop().unwrap();
        state.set_global("recurse", f.clone());

        let err = state.call_function(f, &[]).unwrap_err();
        assert_eq!(err, Error::CallDepth(8));
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_fields_and_index_chain() {
        let mut state = State::new();
        let base = state.new_table();
        state.push(Value::from(1.0));
        state.set_field(-2, "inherited").unwrap();

        let meta = state.new_table();
        state.push(Value::Table(base));
        state.set_field(-2, INDEX_FIELD).unwrap();

        let derived = state.new_table();
        state.push(Value::Table(meta));
        state.set_metatable(-2).unwrap();
        assert_eq!(state.metatable(derived), Some(meta));

        state.get_field(-1, "inherited").unwrap();
        assert_eq!(state.value(-1), Some(&Value::from(1.0)));
        assert!(state.raw_get(derived, "inherited").is_nil());

        state.pop_n(1);
        state.get_field(-1, "missing").unwrap();
        assert!(state.value(-1).unwrap().is_nil());
    }

    #[test]
    fn test_field_access_requires_table() {
        let mut state = State::new();
        state.push(Value::from(1.0));
        assert!(state.get_field(-1, "x").is_none());
        assert!(state.set_field(-2, "x").is_none());
        assert!(state.get_field(5, "x").is_none());
    }

    #[test]
    fn test_globals() {
        let mut state = State::new();
        state.set_global("answer", Value::from(42.0));
        assert_eq!(state.get_global("answer"), Value::from(42.0));
        assert!(state.get_global("missing").is_nil());
    }

    #[test]
    fn test_set_top() {
        let mut state = State::new();
        state.set_top(3);
        assert_eq!(state.top(), 3);
        state.set_top(1);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_remove_and_copy() {
        let mut state = State::new();
        state.push(Value::from(1.0));
        state.push(Value::from(2.0));
        state.push_copy(1).unwrap();
        assert_eq!(state.value(-1), Some(&Value::from(1.0)));
        assert_eq!(state.remove(1), Some(Value::from(1.0)));
        assert_eq!(state.top(), 2);
        assert!(state.push_copy(9).is_none());
    }
}
