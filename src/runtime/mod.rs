//! Runtime support
//!
//! Heap object types of the engine:
//! - Tables (string-keyed fields and a metatable)
//! - Native closures (function pointer plus upvalues)

pub mod function;
pub mod object;

pub use function::{Closure, MAX_UPVALUES, NativeFn};
pub use object::{GC_FIELD, INDEX_FIELD, Table};
