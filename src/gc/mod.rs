//! Garbage collector module
//!
//! A non-moving mark-and-sweep collector over two slot arenas. Tables
//! whose metatable carries a `__gc` function are finalized once before
//! their slot is released.

mod allocator;
mod collector;

pub use allocator::{Heap, HeapStats};
pub use collector::GcStats;

pub(crate) use collector::{collect, finalize_all};
