//! Bounds-checked stack operations
//!
//! Every operation validates its index against the current frame before
//! touching the state: `index` must be non-zero and `|index|` at most the
//! frame depth. Violations fail with `Error::ProtocolViolation` and leave
//! the stack untouched. Typed reads never coerce; a slot of the wrong type
//! fails with `Error::TypeMismatch`.

use std::ffi::c_void;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::runtime::NativeFn;
use crate::value::{Value, ValueType};
use crate::vm::stack::{from_base, from_top};

/// Where `load` and `save` look a name up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// A table at a stack index
    Table(i32),
    /// The global namespace
    Global,
}

impl Scope {
    /// The same scope after `pushed` more slots went on the stack
    pub(crate) fn shifted(self, pushed: i32) -> Scope {
        match self {
            Scope::Table(index) if index < 0 => Scope::Table(index - pushed),
            other => other,
        }
    }
}

impl Context<'_> {
    /// Number of slots in the current frame
    #[inline]
    pub fn depth(&self) -> usize {
        self.state().top()
    }

    /// Fail unless `index` names a slot of the current frame
    pub(crate) fn check(&self, op: &'static str, index: i32) -> Result<()> {
        let depth = self.depth();
        if index == 0 || index.unsigned_abs() as usize > depth {
            return Err(Error::ProtocolViolation { op, index, depth });
        }
        Ok(())
    }

    /// Fail unless `n` more slots fit under the stack limit
    pub(crate) fn require_room(&self, n: usize) -> Result<()> {
        if self.state().has_room(n) {
            Ok(())
        } else {
            Err(Error::StackOverflow(self.state().config().max_stack))
        }
    }

    fn slot(&self, op: &'static str, index: i32) -> Result<&Value> {
        self.check(op, index)?;
        self.state()
            .value(index)
            .ok_or(Error::ProtocolViolation {
                op,
                index,
                depth: self.depth(),
            })
    }

    fn mismatch(op: &'static str, expected: &'static str, found: &Value) -> Error {
        Error::TypeMismatch {
            op,
            expected,
            found: found.value_type().name().to_string(),
        }
    }

    // ==================== Push ====================

    /// Push an arbitrary value
    pub fn push_value(&mut self, value: Value) -> Result<()> {
        self.require_room(1)?;
        self.state_mut().push(value);
        Ok(())
    }

    pub fn push_number(&mut self, n: f64) -> Result<()> {
        self.push_value(Value::Number(n))
    }

    pub fn push_string(&mut self, s: &str) -> Result<()> {
        self.push_value(Value::string(s))
    }

    pub fn push_boolean(&mut self, b: bool) -> Result<()> {
        self.push_value(Value::Boolean(b))
    }

    pub fn push_nil(&mut self) -> Result<()> {
        self.push_value(Value::Nil)
    }

    /// Push an opaque host pointer
    pub fn push_pointer(&mut self, ptr: *mut c_void) -> Result<()> {
        self.push_value(Value::LightPtr(ptr))
    }

    /// Push a new empty table
    pub fn new_table(&mut self) -> Result<()> {
        self.require_room(1)?;
        self.state_mut().new_table();
        Ok(())
    }

    /// Push a copy of the slot at `index`
    pub fn copy(&mut self, index: i32) -> Result<()> {
        let value = self.slot("copy", index)?.clone();
        self.push_value(value)
    }

    /// Pop `n` upvalues and push a closure of `func` over them
    pub fn push_closure(&mut self, func: NativeFn, n: usize) -> Result<()> {
        let depth = self.depth();
        if n > depth {
            return Err(Error::ProtocolViolation {
                op: "push_closure",
                index: from_top(n),
                depth,
            });
        }
        if n == 0 {
            self.require_room(1)?;
        }
        self.state_mut()
            .push_closure(func, n)
            .map(|_| ())
            .ok_or(Error::ProtocolViolation {
                op: "push_closure",
                index: from_top(n),
                depth,
            })
    }

    // ==================== Pop / reshape ====================

    /// Pop `n` slots
    pub fn pop(&mut self, n: usize) -> Result<()> {
        let depth = self.depth();
        if n > depth {
            return Err(Error::ProtocolViolation {
                op: "pop",
                index: from_base(n),
                depth,
            });
        }
        self.state_mut().pop_n(n);
        Ok(())
    }

    /// Remove the slot at `index`, shifting the slots above it down
    pub fn remove(&mut self, index: i32) -> Result<()> {
        self.check("remove", index)?;
        self.state_mut().remove(index);
        Ok(())
    }

    /// Shrink the frame to `depth` slots or pad it with nils
    pub fn set_top(&mut self, depth: usize) -> Result<()> {
        let current = self.depth();
        if depth > current {
            self.require_room(depth - current)?;
        }
        self.state_mut().set_top(depth);
        Ok(())
    }

    // ==================== Typed reads ====================

    /// Clone of the value at `index`
    pub fn value(&self, index: i32) -> Result<Value> {
        self.slot("value", index).cloned()
    }

    pub fn to_number(&self, index: i32) -> Result<f64> {
        let value = self.slot("to_number", index)?;
        value
            .as_number()
            .ok_or_else(|| Self::mismatch("to_number", "number", value))
    }

    pub fn to_string(&self, index: i32) -> Result<String> {
        let value = self.slot("to_string", index)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Self::mismatch("to_string", "string", value))
    }

    pub fn to_boolean(&self, index: i32) -> Result<bool> {
        let value = self.slot("to_boolean", index)?;
        value
            .as_bool()
            .ok_or_else(|| Self::mismatch("to_boolean", "boolean", value))
    }

    pub fn to_pointer(&self, index: i32) -> Result<*mut c_void> {
        let value = self.slot("to_pointer", index)?;
        value
            .as_light_ptr()
            .ok_or_else(|| Self::mismatch("to_pointer", "userdata", value))
    }

    pub fn is_nil(&self, index: i32) -> Result<bool> {
        Ok(self.slot("is_nil", index)?.is_nil())
    }

    pub fn is_table(&self, index: i32) -> Result<bool> {
        Ok(self.slot("is_table", index)?.as_table().is_some())
    }

    pub fn type_of(&self, index: i32) -> Result<ValueType> {
        Ok(self.slot("type_of", index)?.value_type())
    }

    // ==================== Fields ====================

    fn scope_table(&self, op: &'static str, index: i32) -> Result<()> {
        let value = self.slot(op, index)?;
        if value.as_table().is_none() {
            return Err(Self::mismatch(op, "table", value));
        }
        Ok(())
    }

    /// Push the field `name` of the given scope
    ///
    /// Table lookups follow `__index` chains.
    pub fn load(&mut self, name: &str, scope: Scope) -> Result<()> {
        self.require_room(1)?;
        match scope {
            Scope::Global => {
                let value = self.state().get_global(name);
                self.state_mut().push(value);
            }
            Scope::Table(index) => {
                self.scope_table("load", index)?;
                self.state_mut().get_field(index, name);
            }
        }
        Ok(())
    }

    /// Pop the top slot and store it as the field `name` of the given scope
    ///
    /// A table index is resolved before the value is popped.
    pub fn save(&mut self, name: &str, scope: Scope) -> Result<()> {
        self.check("save", -1)?;
        match scope {
            Scope::Global => {
                let value = self.state_mut().pop().unwrap_or_default();
                self.state_mut().set_global(name, value);
            }
            Scope::Table(index) => {
                self.scope_table("save", index)?;
                self.state_mut().set_field(index, name);
            }
        }
        Ok(())
    }

    /// Pop a table (or nil) and make it the metatable of the table at `index`
    pub fn set_metatable(&mut self, index: i32) -> Result<()> {
        self.scope_table("set_metatable", index)?;
        let top = self.slot("set_metatable", -1)?;
        if !matches!(top, Value::Table(_) | Value::Nil) {
            return Err(Self::mismatch("set_metatable", "table", top));
        }
        self.state_mut().set_metatable(index);
        Ok(())
    }
}
