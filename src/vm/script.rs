//! Call scripts
//!
//! A minimal line-oriented language for driving exported functions from a
//! file or a REPL. Each non-empty line is one statement:
//!
//! ```text
//! # comment
//! counter = Counter.new(10)
//! counter:increment()
//! n = counter:value()
//! total = add(n, 2.5)
//! greeting = "hello"
//! print(greeting, total, true, nil)
//! ```
//!
//! Names on the left of `=` and bare names in arguments refer to globals.
//! `name:method(...)` passes `name` as the first argument.

use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::value::{TableRef, Value};
use crate::vm::State;

/// `[target =] callee(args)` where callee is `name`, `name.field` or `name:method`
static CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:([A-Za-z_]\w*)\s*=\s*)?([A-Za-z_]\w*)(?:\s*([.:])\s*([A-Za-z_]\w*))?\s*\((.*)\)$",
    )
    .unwrap()
});

/// `target = expr`
static ASSIGN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*=\s*(.+)$").unwrap());

/// One argument followed by a separator or the end of the list
static ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*("(?:[^"\\]|\\.)*"|[^,"\s]+)\s*(,|$)"#).unwrap());

static IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_]\w*$").unwrap());

/// How a call statement names its function
enum Callee<'a> {
    Global(&'a str),
    Field(&'a str, &'a str),
    Method(&'a str, &'a str),
}

impl State {
    /// Run a call script
    ///
    /// Returns the first result of the last statement (nil for blank
    /// scripts and assignments of nil).
    pub fn run_source(&mut self, source: &str) -> Result<Value> {
        let mut last = Value::Nil;
        for (n, raw) in source.lines().enumerate() {
            let line = n + 1;
            let text = strip_comment(raw).trim();
            if text.is_empty() {
                continue;
            }
            last = self.run_statement(line, text).map_err(|err| match err {
                err @ Error::Syntax { .. } => err,
                other => Error::Script {
                    line,
                    source: Box::new(other),
                },
            })?;
        }
        Ok(last)
    }

    /// Read and run a call script file
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.run_source(&source)
    }

    fn run_statement(&mut self, line: usize, text: &str) -> Result<Value> {
        if let Some(caps) = CALL.captures(text) {
            let target = caps.get(1).map(|m| m.as_str());
            let name = &caps[2];
            let callee = match (caps.get(3).map(|m| m.as_str()), caps.get(4)) {
                (Some("."), Some(field)) => Callee::Field(name, field.as_str()),
                (Some(_), Some(method)) => Callee::Method(name, method.as_str()),
                _ => Callee::Global(name),
            };
            let args = parse_args(line, &caps[5])?;
            let value = self.run_call(callee, args)?;
            if let Some(target) = target {
                self.set_global(target, value.clone());
            }
            return Ok(value);
        }

        if let Some(caps) = ASSIGN.captures(text) {
            let expr = parse_expr(line, caps[2].trim())?;
            let value = self.eval(expr);
            self.set_global(&caps[1], value.clone());
            return Ok(value);
        }

        Err(Error::Syntax {
            line,
            message: format!("expected a call or an assignment, found `{}`", text),
        })
    }

    fn run_call(&mut self, callee: Callee<'_>, args: Vec<Expr>) -> Result<Value> {
        let mut values: Vec<Value> = Vec::with_capacity(args.len() + 1);
        let func = match callee {
            Callee::Global(name) => self.get_global(name),
            Callee::Field(name, field) => {
                let table = self.indexable(name)?;
                self.lookup(table, field)
            }
            Callee::Method(name, method) => {
                let table = self.indexable(name)?;
                values.push(Value::Table(table));
                self.lookup(table, method)
            }
        };
        values.extend(args.into_iter().map(|arg| self.eval(arg)));

        let results = self.call_function(func, &values)?;
        Ok(results.into_iter().next().unwrap_or_default())
    }

    fn indexable(&self, name: &str) -> Result<TableRef> {
        let value = self.get_global(name);
        value.as_table().ok_or_else(|| {
            Error::runtime(format!(
                "attempt to index a {} value (global `{}`)",
                value.value_type(),
                name
            ))
        })
    }

    fn eval(&self, expr: Expr) -> Value {
        match expr {
            Expr::Literal(value) => value,
            Expr::Global(name) => self.get_global(&name),
        }
    }
}

/// A parsed argument or right-hand side
#[derive(Debug, PartialEq)]
enum Expr {
    Literal(Value),
    Global(String),
}

fn parse_args(line: usize, list: &str) -> Result<Vec<Expr>> {
    let mut args = Vec::new();
    let mut rest = list.trim();
    while !rest.is_empty() {
        let caps = ARG.captures(rest).ok_or_else(|| Error::Syntax {
            line,
            message: format!("malformed argument list `{}`", list),
        })?;
        args.push(parse_expr(line, &caps[1])?);
        let consumed = caps.get(0).map_or(rest.len(), |m| m.end());
        rest = &rest[consumed..];
        if caps[2].is_empty() {
            break;
        }
        if rest.trim().is_empty() {
            return Err(Error::Syntax {
                line,
                message: "trailing comma in argument list".into(),
            });
        }
    }
    Ok(args)
}

fn parse_expr(line: usize, token: &str) -> Result<Expr> {
    let value = match token {
        "nil" => Value::Nil,
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') => {
            Value::string(&unescape(&token[1..token.len() - 1]))
        }
        _ if IDENT.is_match(token) => return Ok(Expr::Global(token.to_string())),
        _ => match token.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => {
                return Err(Error::Syntax {
                    line,
                    message: format!("unexpected token `{}`", token),
                });
            }
        },
    };
    Ok(Expr::Literal(value))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Cut a line at the first `#` outside a string literal
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(state: &mut State) -> Result<usize> {
        let a = state.value(1).and_then(Value::as_number).unwrap_or(0.0);
        let b = state.value(2).and_then(Value::as_number).unwrap_or(0.0);
        state.push(Value::Number(a + b));
        Ok(1)
    }

    fn arg_count(state: &mut State) -> Result<usize> {
        let n = state.top() as f64;
        state.push(Value::Number(n));
        Ok(1)
    }

    fn fail(_: &mut State) -> Result<usize> {
        Err(Error::runtime("boom"))
    }

    fn define(state: &mut State, name: &str, func: crate::runtime::NativeFn) {
        state.push_closure(func, 0).unwrap();
        let f = state.pop().unwrap();
        state.set_global(name, f);
    }

    #[test]
    fn test_call_and_assign() {
        let mut state = State::new();
        define(&mut state, "add", add);

        let result = state
            .run_source("x = 3\nsum = add(x, 4)\n# done\n")
            .unwrap();
        assert_eq!(result, Value::from(7.0));
        assert_eq!(state.get_global("sum"), Value::from(7.0));
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_literals() {
        let mut state = State::new();
        state
            .run_source(r#"s = "a, \"b\" # not a comment""#)
            .unwrap();
        assert_eq!(state.get_global("s"), Value::from(r#"a, "b" # not a comment"#));

        state.run_source("t = true  # trailing comment").unwrap();
        assert_eq!(state.get_global("t"), Value::from(true));
        state.run_source("n = -2.5e1").unwrap();
        assert_eq!(state.get_global("n"), Value::from(-25.0));
    }

    #[test]
    fn test_field_and_method_calls() {
        let mut state = State::new();
        let t = state.new_table();
        state.pop_n(1);
        state.set_global("obj", Value::Table(t));
        state.push_closure(arg_count, 0).unwrap();
        let f = state.pop().unwrap();
        state.raw_set(t, "count", f);

        assert_eq!(state.run_source("obj.count(1, 2)").unwrap(), Value::from(2.0));
        assert_eq!(state.run_source("obj:count(1, 2)").unwrap(), Value::from(3.0));
        assert_eq!(state.run_source("obj:count()").unwrap(), Value::from(1.0));
    }

    #[test]
    fn test_syntax_errors() {
        let mut state = State::new();
        let err = state.run_source("\nadd(1,").unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 2, .. }));

        let err = state.run_source("f(1,)").unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 1, .. }));

        let err = state.run_source("just words").unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_runtime_errors_carry_line() {
        let mut state = State::new();
        define(&mut state, "fail", fail);

        let err = state.run_source("x = 1\nfail()").unwrap_err();
        assert_eq!(
            err,
            Error::Script {
                line: 2,
                source: Box::new(Error::runtime("boom")),
            }
        );

        let err = state.run_source("missing(1)").unwrap_err();
        assert_eq!(err.root(), &Error::NotCallable("nil"));

        let err = state.run_source("x.y()").unwrap_err();
        assert!(matches!(err.root(), Error::Runtime(_)));
    }

    #[test]
    fn test_run_file_missing() {
        let mut state = State::new();
        let err = state.run_file("/nonexistent/script.calls").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
