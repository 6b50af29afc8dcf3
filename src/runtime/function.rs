//! Native function types
//!
//! The engine only knows one kind of callable: a native function pointer
//! closed over a fixed list of upvalues.

use crate::error::Result;
use crate::value::Value;
use crate::vm::State;

/// Native function signature
///
/// Arguments are at frame indices `1..=n`. The function pushes its results
/// and returns how many of the topmost slots are results.
pub type NativeFn = fn(&mut State) -> Result<usize>;

/// Maximum number of upvalues a closure can capture
pub const MAX_UPVALUES: usize = 255;

/// A native closure
#[derive(Debug, Clone)]
pub struct Closure {
    /// The function invoked on call
    pub func: NativeFn,
    /// Captured values, addressed 1-based by the callee
    pub upvalues: Vec<Value>,
}

impl Closure {
    /// Create a closure without upvalues
    pub fn new(func: NativeFn) -> Self {
        Closure {
            func,
            upvalues: Vec::new(),
        }
    }

    /// Create a closure capturing the given values
    pub fn with_upvalues(func: NativeFn, upvalues: Vec<Value>) -> Self {
        Closure { func, upvalues }
    }

    /// Get a captured value (1-based)
    pub fn upvalue(&self, n: usize) -> Option<&Value> {
        n.checked_sub(1).and_then(|i| self.upvalues.get(i))
    }
}
