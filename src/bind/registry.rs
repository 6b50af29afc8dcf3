//! Native callables
//!
//! Every export is a [`ClosureEntry`] owned by the context that registered
//! it. The engine only ever sees one native function, [`trampoline`],
//! closed over a light pointer to the entry; at call time the trampoline
//! follows the pointer and runs the entry against a borrowed context.

use std::ptr::NonNull;

use tracing::debug;
#[cfg(feature = "trace-dispatch")]
use tracing::trace;

use crate::bind::args::{FromArgs, Function, Method, MethodRef};
use crate::bind::class::ExportClass;
use crate::bind::marshal::{Returns, Signature};
use crate::bind::object::{MTAB_FIELD, SELF_FIELD};
use crate::bind::stack::Scope;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::runtime::{GC_FIELD, INDEX_FIELD};
use crate::value::Value;
use crate::vm::State;

/// Field names exports may not use
pub const RESERVED_NAMES: [&str; 4] = [SELF_FIELD, MTAB_FIELD, INDEX_FIELD, GC_FIELD];

type Invoke = Box<dyn Fn(&mut Context<'_>) -> Result<usize>>;

/// A registered native callable
pub struct ClosureEntry {
    name: String,
    signature: Signature,
    invoke: Invoke,
}

impl ClosureEntry {
    pub fn new<F>(name: impl Into<String>, signature: Signature, invoke: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<usize> + 'static,
    {
        ClosureEntry {
            name: name.into(),
            signature,
            invoke: Box::new(invoke),
        }
    }

    /// An entry working directly on the stack
    pub fn raw<F>(name: impl Into<String>, invoke: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<usize> + 'static,
    {
        Self::new(name, Signature::raw(), invoke)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl std::fmt::Debug for ClosureEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClosureEntry({}{})", self.name, self.signature)
    }
}

/// The native function behind every export
fn trampoline(state: &mut State) -> Result<usize> {
    let ptr = state
        .upvalue(1)
        .and_then(Value::as_light_ptr)
        .ok_or_else(|| Error::runtime("native closure has no entry"))?;
    // SAFETY: the upvalue is written once, by `register`, with a pointer to
    // a boxed entry that is freed only after the state's final collection.
    let entry = unsafe { &*(ptr as *const ClosureEntry) };
    #[cfg(feature = "trace-dispatch")]
    trace!(name = %entry.name, nargs = state.top(), "dispatch");

    let mut cx = Context::borrowed(state);
    (entry.invoke)(&mut cx)
}

impl Context<'_> {
    /// Take ownership of `entry` and bind it as `name` in `scope`
    pub fn register(&mut self, entry: ClosureEntry, scope: Scope) -> Result<()> {
        if RESERVED_NAMES.contains(&entry.name.as_str()) {
            return Err(Error::ReservedName(entry.name));
        }
        let name = entry.name.clone();
        self.register_unchecked(entry, scope)?;

        if matches!(scope, Scope::Table(_)) {
            if let Some(class) = self.exporting.last().copied() {
                if let Some(descriptor) = self.classes.get_mut(class) {
                    descriptor.members.push(name);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn register_unchecked(&mut self, entry: ClosureEntry, scope: Scope) -> Result<()> {
        if let Scope::Table(index) = scope {
            if !self.is_table(index)? {
                return Err(Error::TypeMismatch {
                    op: "register",
                    expected: "table",
                    found: self.type_of(index)?.name().to_string(),
                });
            }
        }
        self.require_room(1)?;
        debug!(name = %entry.name, signature = %entry.signature, "registering native function");

        let name = entry.name.clone();
        let ptr = NonNull::from(Box::leak(Box::new(entry)));
        self.closures.push(ptr);

        self.push_pointer(ptr.as_ptr().cast())?;
        self.push_closure(trampoline, 1)?;
        self.save(&name, scope.shifted(1))
    }

    fn function_entry<F, Args, R>(name: &str, f: F) -> ClosureEntry
    where
        F: Function<Args, R> + 'static,
        Args: FromArgs + 'static,
        R: Returns + 'static,
    {
        ClosureEntry::new(name, Signature::of::<Args, R>(), move |cx| {
            let args = Args::from_args(cx, 1)?;
            Function::call(&f, args).push_returns(cx)
        })
    }

    /// Export `f` as a global function
    ///
    /// Script arguments are read from index 1; extra ones are ignored.
    pub fn export_function<F, Args, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Function<Args, R> + 'static,
        Args: FromArgs + 'static,
        R: Returns + 'static,
    {
        self.register(Self::function_entry(name, f), Scope::Global)
    }

    /// Export `f` into the table on top of the stack
    pub fn export_static<F, Args, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Function<Args, R> + 'static,
        Args: FromArgs + 'static,
        R: Returns + 'static,
    {
        self.register(Self::function_entry(name, f), Scope::Table(-1))
    }

    /// Export `m` as a method into the table on top of the stack
    ///
    /// The receiver is the handle at index 1 and must be a `T` or a
    /// descendant; arguments follow from index 2.
    pub fn export_method<T, M, Args, R>(&mut self, name: &str, m: M) -> Result<()>
    where
        T: ExportClass,
        M: Method<T, Args, R> + 'static,
        Args: FromArgs + 'static,
        R: Returns + 'static,
    {
        let entry = ClosureEntry::new(name, Signature::method::<Args, R>(), move |cx| {
            let this = cx.object::<T>(1)?;
            let args = Args::from_args(cx, 2)?;
            let result = {
                let mut guard = this.borrow_mut()?;
                Method::call(&m, &mut *guard, args)
            };
            result.push_returns(cx)
        });
        self.register(entry, Scope::Table(-1))
    }

    /// Export a read-only method into the table on top of the stack
    ///
    /// Like [`Context::export_method`], but the receiver is only borrowed
    /// shared, so the method may run while the object is already in use
    /// by another read-only method further up the call chain.
    pub fn export_method_ref<T, M, Args, R>(&mut self, name: &str, m: M) -> Result<()>
    where
        T: ExportClass,
        M: MethodRef<T, Args, R> + 'static,
        Args: FromArgs + 'static,
        R: Returns + 'static,
    {
        let entry = ClosureEntry::new(name, Signature::method::<Args, R>(), move |cx| {
            let this = cx.object::<T>(1)?;
            let args = Args::from_args(cx, 2)?;
            let result = {
                let guard = this.borrow()?;
                MethodRef::call(&m, &*guard, args)
            };
            result.push_returns(cx)
        });
        self.register(entry, Scope::Table(-1))
    }

    /// Export a function working directly on the stack into the table on top
    ///
    /// `f` returns how many of the topmost slots are results.
    pub fn export_raw<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&mut Context<'_>) -> Result<usize> + 'static,
    {
        self.register(ClosureEntry::raw(name, f), Scope::Table(-1))
    }
}
