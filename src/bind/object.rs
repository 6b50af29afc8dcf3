//! Native objects and their script handles
//!
//! An `Object<T>` is a reference-counted native value of an exported class.
//! Pushing it creates a *handle*: a table whose metatable is the class's
//! `mtab` and whose hidden `__self__` field holds a light pointer to an
//! [`Anchor`]. The anchor keeps the native value alive (shared classes) or
//! merely observes it (borrowed classes), and remembers the concrete class
//! so handles can be checked against any ancestor.
//!
//! The `__gc` hook installed in every `mtab` releases the anchor exactly
//! once: it clears `__self__` before freeing, so a second call finds
//! nothing to do.

use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::bind::class::{ExportClass, Lifetime};
use crate::bind::stack::Scope;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::value::Value;

/// Hidden handle field holding the anchor pointer
pub const SELF_FIELD: &str = "__self__";

/// Class table field holding the handle metatable
pub const MTAB_FIELD: &str = "mtab";

type ObjectCell = Rc<RefCell<dyn Any>>;

/// Per-class functions resolving ancestry on a type-erased value
#[derive(Clone, Copy)]
pub(crate) struct ClassVtable {
    pub(crate) name: &'static str,
    pub(crate) lifetime: Lifetime,
    is_a: fn(TypeId) -> bool,
    upcast: fn(&dyn Any, TypeId) -> Option<&dyn Any>,
    upcast_mut: fn(&mut dyn Any, TypeId) -> Option<&mut dyn Any>,
}

impl ClassVtable {
    pub(crate) fn of<C: ExportClass>() -> Self {
        ClassVtable {
            name: C::CLASS_NAME,
            lifetime: C::LIFETIME,
            is_a: is_a::<C>,
            upcast: |any, target| walk::<C>(any.downcast_ref::<C>()?, target),
            upcast_mut: |any, target| walk_mut::<C>(any.downcast_mut::<C>()?, target),
        }
    }

    pub(crate) fn is_a<T: ExportClass>(&self) -> bool {
        (self.is_a)(TypeId::of::<T>())
    }
}

#[inline]
fn is_root<C: ExportClass>() -> bool {
    TypeId::of::<C::Parent>() == TypeId::of::<C>()
}

fn is_a<C: ExportClass>(target: TypeId) -> bool {
    TypeId::of::<C>() == target || (!is_root::<C>() && is_a::<C::Parent>(target))
}

fn walk<C: ExportClass>(value: &C, target: TypeId) -> Option<&dyn Any> {
    if TypeId::of::<C>() == target {
        return Some(value);
    }
    if is_root::<C>() {
        return None;
    }
    walk::<C::Parent>(value.upcast(), target)
}

fn walk_mut<C: ExportClass>(value: &mut C, target: TypeId) -> Option<&mut dyn Any> {
    if TypeId::of::<C>() == target {
        return Some(value);
    }
    if is_root::<C>() {
        return None;
    }
    walk_mut::<C::Parent>(value.upcast_mut(), target)
}

/// A native value of class `T` or one of its descendants
pub struct Object<T: ExportClass> {
    cell: ObjectCell,
    vtable: ClassVtable,
    _marker: PhantomData<T>,
}

impl<T: ExportClass> Object<T> {
    /// Move a value into a new object
    pub fn new(value: T) -> Self {
        let cell: ObjectCell = Rc::new(RefCell::new(value));
        Object {
            cell,
            vtable: ClassVtable::of::<T>(),
            _marker: PhantomData,
        }
    }

    fn from_parts(cell: ObjectCell, vtable: ClassVtable) -> Self {
        Object {
            cell,
            vtable,
            _marker: PhantomData,
        }
    }

    /// Name of the concrete class
    pub fn class_name(&self) -> &'static str {
        self.vtable.name
    }

    /// Strong references held by objects and shared handles
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.cell)
    }

    /// Whether both refer to the same native value
    pub fn ptr_eq<U: ExportClass>(&self, other: &Object<U>) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.cell), Rc::as_ptr(&other.cell))
    }

    /// View this object as one of its ancestors
    pub fn upcast<P: ExportClass>(&self) -> Option<Object<P>> {
        self.vtable
            .is_a::<P>()
            .then(|| Object::from_parts(self.cell.clone(), self.vtable))
    }

    fn not_a(&self) -> Error {
        Error::TypeMismatch {
            op: "borrow",
            expected: T::CLASS_NAME,
            found: self.vtable.name.to_string(),
        }
    }

    /// Borrow the `T` part of the value
    pub fn borrow(&self) -> Result<Ref<'_, T>> {
        let guard = self.cell.try_borrow().map_err(|_| Error::ObjectBusy {
            class: self.vtable.name,
        })?;
        let upcast = self.vtable.upcast;
        Ref::filter_map(guard, |any| {
            upcast(any, TypeId::of::<T>()).and_then(|part| part.downcast_ref::<T>())
        })
        .map_err(|_| self.not_a())
    }

    /// Mutably borrow the `T` part of the value
    ///
    /// Fails with `Error::ObjectBusy` while another borrow is alive, e.g.
    /// when a method re-enters itself through a script.
    pub fn borrow_mut(&self) -> Result<RefMut<'_, T>> {
        let guard = self.cell.try_borrow_mut().map_err(|_| Error::ObjectBusy {
            class: self.vtable.name,
        })?;
        let upcast_mut = self.vtable.upcast_mut;
        RefMut::filter_map(guard, |any| {
            upcast_mut(any, TypeId::of::<T>()).and_then(|part| part.downcast_mut::<T>())
        })
        .map_err(|_| self.not_a())
    }
}

impl<T: ExportClass> Clone for Object<T> {
    fn clone(&self) -> Self {
        Object::from_parts(self.cell.clone(), self.vtable)
    }
}

impl<T: ExportClass> std::fmt::Debug for Object<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.vtable.name)
            .field("strong", &self.strong_count())
            .finish()
    }
}

enum Target {
    Shared(ObjectCell),
    Borrowed(Weak<RefCell<dyn Any>>),
}

/// What a handle's `__self__` points to
pub(crate) struct Anchor {
    target: Target,
    pub(crate) vtable: ClassVtable,
}

impl Anchor {
    fn new<T: ExportClass>(object: &Object<T>) -> Self {
        let target = match object.vtable.lifetime {
            Lifetime::Shared => Target::Shared(object.cell.clone()),
            Lifetime::Borrowed => Target::Borrowed(Rc::downgrade(&object.cell)),
        };
        Anchor {
            target,
            vtable: object.vtable,
        }
    }

    fn resolve(&self) -> Result<ObjectCell> {
        match &self.target {
            Target::Shared(cell) => Ok(cell.clone()),
            Target::Borrowed(weak) => weak.upgrade().ok_or(Error::ObjectReleased {
                class: self.vtable.name,
            }),
        }
    }
}

impl Context<'_> {
    /// Push a new handle for `object`
    ///
    /// The object's concrete class must have been exported.
    pub fn wrap<T: ExportClass>(&mut self, object: &Object<T>) -> Result<()> {
        let class = object.vtable.name;
        self.require_room(3)?;

        self.load(class, Scope::Global)?;
        if !self.is_table(-1)? {
            self.pop(1)?;
            return Err(Error::UnresolvedClass(class.to_string()));
        }
        self.new_table()?;
        self.load(MTAB_FIELD, Scope::Table(-2))?;
        if !self.is_table(-1)? {
            self.pop(3)?;
            return Err(Error::UnresolvedClass(class.to_string()));
        }
        self.set_metatable(-2)?;
        self.remove(-2)?;

        let anchor = Box::into_raw(Box::new(Anchor::new(object)));
        if let Err(err) = self.push_pointer(anchor.cast()) {
            // SAFETY: the pointer was never published
            drop(unsafe { Box::from_raw(anchor) });
            self.pop(1)?;
            return Err(err);
        }
        self.save(SELF_FIELD, Scope::Table(-2))?;
        trace!(class, "wrapped native object");
        Ok(())
    }

    /// The anchor of the handle at `index`
    pub(crate) fn unwrap_handle(&self, index: i32) -> Result<&Anchor> {
        let value = self.value(index)?;
        let Some(table) = value.as_table() else {
            return Err(Error::TypeMismatch {
                op: "unwrap",
                expected: "table",
                found: value.value_type().name().to_string(),
            });
        };
        let field = self.state().raw_get(table, SELF_FIELD);
        let Some(ptr) = field.as_light_ptr() else {
            return Err(Error::TypeMismatch {
                op: "unwrap",
                expected: "native object",
                found: if field.is_nil() {
                    "plain table".to_string()
                } else {
                    field.value_type().name().to_string()
                },
            });
        };
        // SAFETY: `__self__` is only ever written by `wrap`, with a pointer
        // from `Box::into_raw`, and cleared before the box is freed.
        Ok(unsafe { &*(ptr as *const Anchor) })
    }

    /// Concrete class name of the handle at `index`
    pub fn class_of(&self, index: i32) -> Result<&'static str> {
        Ok(self.unwrap_handle(index)?.vtable.name)
    }

    /// The native object behind the handle at `index`
    ///
    /// The handle's class must be `T` or a descendant of `T`. For borrowed
    /// classes the object must still be alive.
    pub fn object<T: ExportClass>(&self, index: i32) -> Result<Object<T>> {
        let anchor = self.unwrap_handle(index)?;
        if !anchor.vtable.is_a::<T>() {
            return Err(Error::TypeMismatch {
                op: "object",
                expected: T::CLASS_NAME,
                found: anchor.vtable.name.to_string(),
            });
        }
        let cell = anchor.resolve()?;
        Ok(Object::from_parts(cell, anchor.vtable))
    }
}

/// `__gc` of every class `mtab`
pub(crate) fn release_handle(cx: &mut Context<'_>) -> Result<usize> {
    let Some(table) = cx.value(1)?.as_table() else {
        return Ok(0);
    };
    let state = cx.state_mut();
    if let Some(ptr) = state.raw_get(table, SELF_FIELD).as_light_ptr() {
        state.raw_set(table, SELF_FIELD, Value::Nil);
        // SAFETY: see `unwrap_handle`; the field is cleared first so the
        // box is freed at most once.
        let anchor = unsafe { Box::from_raw(ptr as *mut Anchor) };
        trace!(class = anchor.vtable.name, "released native object");
    }
    Ok(0)
}
