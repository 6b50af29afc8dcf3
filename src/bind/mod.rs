//! Native bindings
//!
//! Everything a host needs to expose Rust functions and types to scripts,
//! layered bottom-up:
//!
//! - `stack`: bounds-checked stack operations on a [`Context`]
//! - `marshal`: [`ToStack`] / [`FromStack`] conversions tagged with a [`Kind`]
//! - `args`: typed argument tuples and the [`Function`] / [`Method`] / [`MethodRef`] adapters
//! - `registry`: closure entries and the `export_*` family
//! - `object`: [`Object`] handles and their collection hook
//! - `class`: [`ExportClass`] and class export
//!
//! [`Context`]: crate::Context

mod args;
mod class;
mod marshal;
mod object;
mod registry;
mod stack;

pub use args::{FromArgs, Function, Method, MethodRef};
pub use class::{ClassDescriptor, ExportClass, Lifetime, Registration, RootObject};
pub use marshal::{FromStack, Kind, RawPtr, Returns, Signature, ToStack};
pub use object::{MTAB_FIELD, Object, SELF_FIELD};
pub use registry::{ClosureEntry, RESERVED_NAMES};
pub use stack::Scope;
