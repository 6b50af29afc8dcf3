//! Engine module
//!
//! A small stack-based VM: a value stack with call frames, tables with
//! metatables, native closures with upvalues and a collector that runs
//! `__gc` finalizers. Hosts drive it through `State` directly or through
//! the bounds-checked `Context`.

mod script;
pub mod stack;
pub mod state;

pub use stack::{Frame, Stack};
pub use state::{MAX_INDEX_CHAIN, State};
