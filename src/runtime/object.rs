//! Table representation
//!
//! Tables map string keys to values and may carry a metatable. Only the
//! two metatable fields the engine itself consults are named here.

use rustc_hash::FxHashMap;
use std::rc::Rc;

use crate::value::{TableRef, Value};

/// Metatable field consulted when a key is missing
pub const INDEX_FIELD: &str = "__index";

/// Metatable field invoked when a table is collected
pub const GC_FIELD: &str = "__gc";

/// A script table
#[derive(Debug, Default, Clone)]
pub struct Table {
    fields: FxHashMap<Rc<str>, Value>,
    metatable: Option<TableRef>,
    /// Set once the `__gc` finalizer has run
    pub(crate) finalized: bool,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw field read (no metatable lookup)
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Raw field write; storing nil removes the field
    pub fn set(&mut self, key: &str, value: Value) {
        if value.is_nil() {
            self.fields.remove(key);
        } else if let Some(slot) = self.fields.get_mut(key) {
            *slot = value;
        } else {
            self.fields.insert(Rc::from(key), value);
        }
    }

    /// Number of non-nil fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable
    }

    pub fn set_metatable(&mut self, metatable: Option<TableRef>) {
        self.metatable = metatable;
    }

    /// Iterate over field values
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.values()
    }

    /// Iterate over field names
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| &**k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let mut table = Table::new();
        table.set("x", Value::from(1.0));
        table.set("name", Value::from("point"));

        assert_eq!(table.get("x"), Some(&Value::from(1.0)));
        assert_eq!(table.get("name"), Some(&Value::from("point")));
        assert!(table.get("y").is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_nil_removes_field() {
        let mut table = Table::new();
        table.set("x", Value::from(1.0));
        table.set("x", Value::Nil);
        assert!(table.get("x").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_overwrite() {
        let mut table = Table::new();
        table.set("x", Value::from(1.0));
        table.set("x", Value::from(2.0));
        assert_eq!(table.get("x"), Some(&Value::from(2.0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_metatable() {
        let mut table = Table::new();
        assert!(table.metatable().is_none());
        table.set_metatable(Some(TableRef(3)));
        assert_eq!(table.metatable(), Some(TableRef(3)));
    }
}
