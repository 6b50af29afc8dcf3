//! Script value representation
//!
//! A `Value` is what lives in a stack slot, a table field or a closure
//! upvalue. Tables and functions are heap objects and are referenced by
//! index into the engine heap; everything else is stored inline.

use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

/// Reference to a table in the engine heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableRef(pub(crate) u32);

/// Reference to a native closure in the engine heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionRef(pub(crate) u32);

impl TableRef {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl FunctionRef {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Runtime type of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Nil,
    Boolean,
    Number,
    String,
    LightPtr,
    Table,
    Function,
}

impl ValueType {
    /// Name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::LightPtr => "userdata",
            ValueType::Table => "table",
            ValueType::Function => "function",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A script value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    /// Opaque host pointer; the engine never dereferences it
    LightPtr(*mut c_void),
    Table(TableRef),
    Function(FunctionRef),
}

impl Value {
    /// Create a string value
    pub fn string(s: &str) -> Self {
        Value::String(Rc::from(s))
    }

    /// Runtime type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::LightPtr(_) => ValueType::LightPtr,
            Value::Table(_) => ValueType::Table,
            Value::Function(_) => ValueType::Function,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table(&self) -> Option<TableRef> {
        match self {
            Value::Table(t) => Some(*t),
            _ => None,
        }
    }

    #[inline]
    pub fn as_function(&self) -> Option<FunctionRef> {
        match self {
            Value::Function(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_light_ptr(&self) -> Option<*mut c_void> {
        match self {
            Value::LightPtr(p) => Some(*p),
            _ => None,
        }
    }

    /// Everything except nil and false is truthy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::LightPtr(a), Value::LightPtr(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::LightPtr(p) => write!(f, "LightPtr({:?})", p),
            Value::Table(t) => write!(f, "Table({})", t.0),
            Value::Function(func) => write!(f, "Function({})", func.0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::LightPtr(p) => write!(f, "userdata: {:?}", p),
            Value::Table(t) => write!(f, "table: #{}", t.0),
            Value::Function(func) => write!(f, "function: #{}", func.0),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert_eq!(Value::Nil.value_type(), ValueType::Nil);
        assert_eq!(Value::from(true).value_type(), ValueType::Boolean);
        assert_eq!(Value::from(1.5).value_type(), ValueType::Number);
        assert_eq!(Value::from("x").value_type(), ValueType::String);
        assert_eq!(Value::Table(TableRef(0)).value_type(), ValueType::Table);
        assert_eq!(ValueType::LightPtr.name(), "userdata");
    }

    #[test]
    fn test_accessors_do_not_coerce() {
        assert_eq!(Value::from(3.0).as_number(), Some(3.0));
        assert_eq!(Value::from("3").as_number(), None);
        assert_eq!(Value::from(1.0).as_bool(), None);
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::from(false).is_truthy());
        assert!(Value::from(0.0).is_truthy());
        assert!(Value::from("").is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from(7.0).to_string(), "7");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::from("abc").to_string(), "abc");
    }
}
