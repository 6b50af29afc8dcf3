//! stackbind - native bindings for an embedded stack-based scripting VM
//!
//! stackbind lets a host expose Rust functions and types to scripts running
//! on a small stack-based VM, with conversions, arity and lifetimes checked
//! at the binding boundary instead of trusted.
//!
//! # Features
//! - Bounds-checked stack protocol with descriptive errors
//! - Typed marshalling of numbers, strings, booleans, pointers and objects
//! - Export of free functions, static functions and methods with their
//!   natural Rust signatures (up to eight arguments)
//! - Class hierarchies with method inheritance and overriding
//! - Shared or borrowed native object lifetimes, released by the collector
//! - A bundled reference engine with a mark-and-sweep collector and a
//!   line-oriented call script runner
//!
//! # Example
//! ```ignore
//! use stackbind::{Context, Value};
//!
//! let mut cx = Context::new();
//! cx.export_function("add", |a: f64, b: f64| a + b)?;
//! assert_eq!(cx.run_source("add(3, 4)")?, Value::from(7.0));
//! ```

// Core modules
pub mod config;
pub mod context;
pub mod error;
pub mod value;

// Garbage collector
pub mod gc;

// Engine
pub mod runtime;
pub mod vm;

// Bindings
pub mod bind;

// Re-export main types
pub use bind::{ExportClass, Lifetime, Object, RootObject, Scope};
pub use config::VmConfig;
pub use context::Context;
pub use error::{Error, Result};
pub use value::{Value, ValueType};
pub use vm::State;
