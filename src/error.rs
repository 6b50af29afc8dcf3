//! Error type shared by the engine and the binding layer
//!
//! Errors raised by a native callable travel back through the engine's
//! `call` unchanged, so a script author sees the same condition the binding
//! layer raised.

use thiserror::Error;

/// Errors raised by stack operations, marshalling, exports and calls
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A stack index or count is outside the current frame
    #[error("invalid {op} operation (out of stack): index {index}, depth {depth}")]
    ProtocolViolation {
        op: &'static str,
        index: i32,
        depth: usize,
    },

    /// A slot holds a different type than the one requested
    #[error("invalid {op} operation ({expected} expected, got {found})")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        found: String,
    },

    /// An object was wrapped before its class was exported
    #[error("class `{0}` has not been exported")]
    UnresolvedClass(String),

    /// A class appears in its own parent chain
    #[error("class `{0}` is already being exported (cyclic inheritance)")]
    CyclicClass(String),

    /// An export tried to use a field name reserved for handles
    #[error("`{0}` is a reserved field name")]
    ReservedName(String),

    /// A borrowed native object was destroyed by its owner
    #[error("native `{class}` object has been released")]
    ObjectReleased { class: &'static str },

    /// A native object is already mutably borrowed further up the call stack
    #[error("native `{class}` object is already in use")]
    ObjectBusy { class: &'static str },

    /// The value stack reached its configured limit
    #[error("stack overflow ({0} slots)")]
    StackOverflow(usize),

    /// Nested calls reached the configured limit
    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),

    /// Attempt to call a value that is not a function
    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),

    /// Error raised by script-facing code
    #[error("{0}")]
    Runtime(String),

    /// Malformed call script
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// Runtime error while executing a call script
    #[error("line {line}: {source}")]
    Script { line: usize, source: Box<Error> },

    /// A script file could not be read
    #[error("cannot read `{path}`: {message}")]
    Io { path: String, message: String },
}

impl Error {
    /// Shorthand for a script-visible runtime error
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    /// The innermost error, looking through script line wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Script { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_message() {
        let err = Error::ProtocolViolation {
            op: "pop",
            index: 3,
            depth: 1,
        };
        assert_eq!(
            err.to_string(),
            "invalid pop operation (out of stack): index 3, depth 1"
        );
    }

    #[test]
    fn test_root_unwraps_script_errors() {
        let inner = Error::UnresolvedClass("Point".into());
        let err = Error::Script {
            line: 4,
            source: Box::new(inner.clone()),
        };
        assert_eq!(err.root(), &inner);
        assert_eq!(err.to_string(), "line 4: class `Point` has not been exported");
    }
}
