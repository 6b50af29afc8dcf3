//! Class export
//!
//! Exporting class `T` builds, once per context, a global *class table*
//! holding `T`'s members and an `mtab` used as the metatable of every
//! handle of `T`:
//!
//! ```text
//! handle --metatable--> T.mtab { __index = T, __gc = release }
//! T      --metatable--> Parent.mtab { __index = Parent, ... }
//! ```
//!
//! so member lookups on a handle walk `T`, then `Parent`, up to the root
//! class `object`. Parents are always exported before their children.

use std::any::{Any, TypeId};

use tracing::debug;

use crate::bind::object::{MTAB_FIELD, release_handle};
use crate::bind::registry::ClosureEntry;
use crate::bind::stack::Scope;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::runtime::{GC_FIELD, INDEX_FIELD};

/// Who keeps a native object alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// Every handle holds a strong reference; the object lives until the
    /// last handle is collected and the last `Object` is dropped
    #[default]
    Shared,
    /// Handles only observe the object; methods on a handle whose object
    /// was dropped fail with `Error::ObjectReleased`
    Borrowed,
}

/// A native type exported as a script class
///
/// Class names must be unique per state. A class whose `Parent` is itself
/// is a root; every hierarchy should end at [`RootObject`].
///
/// Every class exposes its parent part through `upcast` / `upcast_mut`,
/// so methods exported by an ancestor always run on a descendant's
/// objects. Direct children of the root return [`RootObject::part`].
///
/// ```ignore
/// struct Counter { count: i64 }
///
/// impl ExportClass for Counter {
///     type Parent = RootObject;
///     const CLASS_NAME: &'static str = "Counter";
///
///     fn export_members(cx: &mut Context<'_>) -> Result<()> {
///         cx.export_static("new", |start: i64| Object::new(Counter { count: start }))?;
///         cx.export_method_ref("value", |c: &Counter| c.count)
///     }
///
///     fn upcast(&self) -> &RootObject {
///         RootObject::part()
///     }
///
///     fn upcast_mut(&mut self) -> &mut RootObject {
///         RootObject::part_mut()
///     }
/// }
/// ```
///
/// A class that does not expose its parent part does not compile:
///
/// ```compile_fail
/// use stackbind::{Context, ExportClass, Result, RootObject};
///
/// struct Orphan;
///
/// impl ExportClass for Orphan {
///     type Parent = RootObject;
///     const CLASS_NAME: &'static str = "Orphan";
///
///     fn export_members(_: &mut Context<'_>) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait ExportClass: Any + Sized {
    type Parent: ExportClass;

    const CLASS_NAME: &'static str;

    const LIFETIME: Lifetime = Lifetime::Shared;

    /// Export the class members; the class table is on top of the stack
    /// and must be left there
    fn export_members(cx: &mut Context<'_>) -> Result<()>;

    /// The parent part of this value; a root returns itself
    fn upcast(&self) -> &Self::Parent;

    fn upcast_mut(&mut self) -> &mut Self::Parent;
}

/// Root of every class hierarchy
#[derive(Debug, Clone, Copy, Default)]
pub struct RootObject;

impl RootObject {
    /// The (stateless) root part shared by every object
    pub fn part() -> &'static RootObject {
        &RootObject
    }

    pub fn part_mut() -> &'static mut RootObject {
        // Zero-sized: leaking does not allocate
        Box::leak(Box::new(RootObject))
    }
}

/// `upcast` / `upcast_mut` for a direct child of [`RootObject`]
#[macro_export]
macro_rules! root_part {
    () => {
        fn upcast(&self) -> &$crate::RootObject {
            $crate::RootObject::part()
        }

        fn upcast_mut(&mut self) -> &mut $crate::RootObject {
            $crate::RootObject::part_mut()
        }
    };
}

impl ExportClass for RootObject {
    type Parent = RootObject;
    const CLASS_NAME: &'static str = "object";

    fn upcast(&self) -> &RootObject {
        self
    }

    fn upcast_mut(&mut self) -> &mut RootObject {
        self
    }

    fn export_members(cx: &mut Context<'_>) -> Result<()> {
        cx.export_raw("class_name", |cx| {
            let name = cx.class_of(1)?;
            cx.push_string(name)?;
            Ok(1)
        })
    }
}

/// Export progress of one class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registering,
    Registered,
}

/// Bookkeeping for one exported class
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub name: &'static str,
    pub parent: &'static str,
    pub registration: Registration,
    pub lifetime: Lifetime,
    /// Members exported into the class table, in export order
    pub members: Vec<String>,
}

impl ClassDescriptor {
    fn of<T: ExportClass>(registration: Registration) -> Self {
        ClassDescriptor {
            name: T::CLASS_NAME,
            parent: <T::Parent as ExportClass>::CLASS_NAME,
            registration,
            lifetime: T::LIFETIME,
            members: Vec::new(),
        }
    }
}

impl Context<'_> {
    /// Export class `T` and its ancestors
    ///
    /// Exporting an already exported class is a no-op, including classes
    /// exported through another context on the same state.
    pub fn export_class<T: ExportClass>(&mut self) -> Result<()> {
        let name = T::CLASS_NAME;
        match self.classes.get(name).map(|d| d.registration) {
            Some(Registration::Registered) => return Ok(()),
            Some(Registration::Registering) => return Err(Error::CyclicClass(name.to_string())),
            None => {}
        }
        if self.class_exists(name) {
            self.classes
                .insert(name, ClassDescriptor::of::<T>(Registration::Registered));
            return Ok(());
        }

        self.classes
            .insert(name, ClassDescriptor::of::<T>(Registration::Registering));
        let depth = self.depth();
        match self.build_class::<T>() {
            Ok(()) => {
                let descriptor = self.classes.get_mut(name);
                if let Some(descriptor) = descriptor {
                    descriptor.registration = Registration::Registered;
                    debug!(
                        class = name,
                        parent = descriptor.parent,
                        members = descriptor.members.len(),
                        "exported class"
                    );
                }
                Ok(())
            }
            Err(err) => {
                self.state_mut().set_top(depth);
                self.classes.remove(name);
                Err(err)
            }
        }
    }

    /// Whether a class table named `name` is already a global
    fn class_exists(&self, name: &str) -> bool {
        self.global(name)
            .as_table()
            .is_some_and(|t| self.state().raw_get(t, MTAB_FIELD).as_table().is_some())
    }

    fn build_class<T: ExportClass>(&mut self) -> Result<()> {
        let name = T::CLASS_NAME;
        let is_root = TypeId::of::<T::Parent>() == TypeId::of::<T>();
        if !is_root {
            self.export_class::<T::Parent>()?;
        }

        self.require_room(3)?;
        self.new_table()?; // class
        self.new_table()?; // mtab
        self.copy(-2)?;
        self.save(INDEX_FIELD, Scope::Table(-2))?;
        self.register_unchecked(ClosureEntry::raw(GC_FIELD, release_handle), Scope::Table(-1))?;
        self.save(MTAB_FIELD, Scope::Table(-2))?;

        if !is_root {
            let parent = <T::Parent as ExportClass>::CLASS_NAME;
            self.load(parent, Scope::Global)?;
            if !self.is_table(-1)? {
                return Err(Error::UnresolvedClass(parent.to_string()));
            }
            self.load(MTAB_FIELD, Scope::Table(-1))?;
            self.remove(-2)?;
            self.set_metatable(-2)?;
        }

        let depth = self.depth();
        self.exporting.push(name);
        let exported = T::export_members(self);
        self.exporting.pop();
        exported?;
        if self.depth() != depth || !self.is_table(-1)? {
            return Err(Error::runtime(format!(
                "members of `{}` left the stack unbalanced",
                name
            )));
        }

        self.save(name, Scope::Global)
    }
}
