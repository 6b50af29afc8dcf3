//! Binding context
//!
//! The Context is the main entry point for exporting native code. It owns
//! or borrows exactly one engine `State` and owns every native closure it
//! registers. Stack, marshalling, export and object operations are all
//! methods on `Context`, implemented in the `bind` modules.

use std::ptr::NonNull;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::bind::{ClassDescriptor, ClosureEntry};
use crate::config::VmConfig;
use crate::error::{Error, Result};
use crate::gc::{GcStats, HeapStats};
use crate::value::Value;
use crate::vm::State;
use crate::vm::stack::from_top;

/// How a context holds its state
enum StateRef<'vm> {
    Owned(Box<State>),
    Borrowed(&'vm mut State),
}

/// A handle onto one engine state
///
/// An owning context (`Context::new`) closes the state when dropped. A
/// borrowed context (`Context::borrowed`) is a view used inside native
/// calls; it cannot outlive the state it views.
pub struct Context<'vm> {
    state: StateRef<'vm>,

    /// Closure entries registered through this context
    pub(crate) closures: Vec<NonNull<ClosureEntry>>,

    /// Classes exported through this context, by name
    pub(crate) classes: FxHashMap<&'static str, ClassDescriptor>,

    /// Classes whose members are being exported, innermost last
    pub(crate) exporting: Vec<&'static str>,
}

impl Context<'static> {
    /// Create a context owning a fresh state
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Create a context owning a fresh state with custom limits
    pub fn with_config(config: VmConfig) -> Self {
        Context::from_ref(StateRef::Owned(Box::new(State::with_config(config))))
    }
}

impl Default for Context<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'vm> Context<'vm> {
    /// View a state owned elsewhere
    ///
    /// Closures registered through the view are handed to the state when
    /// the view is dropped and live as long as the state does.
    pub fn borrowed(state: &'vm mut State) -> Self {
        Context::from_ref(StateRef::Borrowed(state))
    }

    fn from_ref(state: StateRef<'vm>) -> Self {
        Context {
            state,
            closures: Vec::new(),
            classes: FxHashMap::default(),
            exporting: Vec::new(),
        }
    }

    /// Whether this context owns its state
    pub fn is_owner(&self) -> bool {
        matches!(self.state, StateRef::Owned(_))
    }

    /// The underlying engine state
    #[inline]
    pub fn state(&self) -> &State {
        match &self.state {
            StateRef::Owned(state) => state,
            StateRef::Borrowed(state) => state,
        }
    }

    /// The underlying engine state, mutably
    #[inline]
    pub fn state_mut(&mut self) -> &mut State {
        match &mut self.state {
            StateRef::Owned(state) => state,
            StateRef::Borrowed(state) => state,
        }
    }

    /// Call the function below the top `nargs` slots
    ///
    /// See `State::call`. The argument count is validated against the
    /// current frame first.
    pub fn call(&mut self, nargs: usize, nresults: Option<usize>) -> Result<()> {
        let depth = self.depth();
        if nargs >= depth {
            return Err(Error::ProtocolViolation {
                op: "call",
                index: from_top(nargs.saturating_add(1)),
                depth,
            });
        }
        if let Some(n) = nresults {
            self.require_room(n.saturating_sub(nargs + 1))?;
        }
        self.state_mut().call(nargs, nresults)
    }

    /// Read a global
    pub fn global(&self, name: &str) -> Value {
        self.state().get_global(name)
    }

    /// Run a call script
    pub fn run_source(&mut self, source: &str) -> Result<Value> {
        self.state_mut().run_source(source)
    }

    /// Read and run a call script file
    pub fn run_file(&mut self, path: impl AsRef<std::path::Path>) -> Result<Value> {
        self.state_mut().run_file(path)
    }

    /// Take the error recorded by the most recent failed call
    pub fn take_error(&mut self) -> Option<Error> {
        self.state_mut().take_error()
    }

    /// Run a full collection cycle
    pub fn collect(&mut self) -> GcStats {
        self.state_mut().collect()
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.state().heap_stats()
    }

    /// Descriptor of a class exported through this context
    pub fn class(&self, name: &str) -> Option<&ClassDescriptor> {
        self.classes.get(name)
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        let closures = std::mem::take(&mut self.closures);
        match &mut self.state {
            StateRef::Owned(state) => {
                // Finalizers may still call into the closures
                state.close();
                debug!(closures = closures.len(), "releasing native closures");
                for entry in closures {
                    // SAFETY: every pointer came from `Box::into_raw` in
                    // `register` and is released exactly once, here.
                    drop(unsafe { Box::from_raw(entry.as_ptr()) });
                }
            }
            StateRef::Borrowed(state) => {
                if !closures.is_empty() {
                    warn!(
                        closures = closures.len(),
                        "closures registered through a borrowed context are kept by the state"
                    );
                }
                for entry in closures {
                    // SAFETY: as above; ownership moves to the state.
                    state.adopt(unsafe { Box::from_raw(entry.as_ptr()) });
                }
            }
        }
    }
}
