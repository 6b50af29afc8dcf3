//! stackbind shell
//!
//! Runs a call script against a small demo surface, or starts an
//! interactive prompt when no script is given.

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use stackbind::bind::{ClosureEntry, ExportClass, Object, RootObject, Scope};
use stackbind::vm::stack::from_base;
use stackbind::{Context, Result, Value};
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "> ";

/// Counts up by one
struct Counter {
    count: i64,
}

impl ExportClass for Counter {
    type Parent = RootObject;
    const CLASS_NAME: &'static str = "Counter";

    fn export_members(cx: &mut Context<'_>) -> Result<()> {
        cx.export_static("new", |start: i64| Object::new(Counter { count: start }))?;
        cx.export_method("increment", |c: &mut Counter| c.count += 1)?;
        cx.export_method_ref("value", |c: &Counter| c.count)?;
        cx.export_method("reset", |c: &mut Counter| c.count = 0)
    }

    stackbind::root_part!();
}

/// Counts up by a fixed step
struct StepCounter {
    counter: Counter,
    step: i64,
}

impl ExportClass for StepCounter {
    type Parent = Counter;
    const CLASS_NAME: &'static str = "StepCounter";

    fn export_members(cx: &mut Context<'_>) -> Result<()> {
        cx.export_static("new", |start: i64, step: i64| {
            Object::new(StepCounter {
                counter: Counter { count: start },
                step,
            })
        })?;
        cx.export_method("increment", |c: &mut StepCounter| c.counter.count += c.step)?;
        cx.export_method_ref("step", |c: &StepCounter| c.step)
    }

    fn upcast(&self) -> &Counter {
        &self.counter
    }

    fn upcast_mut(&mut self) -> &mut Counter {
        &mut self.counter
    }
}

/// Print every argument, tab separated
fn print(cx: &mut Context<'_>) -> Result<usize> {
    let mut parts = Vec::with_capacity(cx.depth());
    for index in 1..=from_base(cx.depth()) {
        let part = match cx.class_of(index) {
            Ok(class) => format!("{} object", class),
            Err(_) => cx.value(index)?.to_string(),
        };
        parts.push(part);
    }
    println!("{}", parts.join("\t"));
    Ok(0)
}

fn setup(cx: &mut Context<'_>) -> Result<()> {
    cx.register(ClosureEntry::raw("print", print), Scope::Global)?;
    cx.export_function("add", |a: f64, b: f64| a + b)?;
    cx.export_class::<StepCounter>()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut cx = Context::new();
    if let Err(e) = setup(&mut cx) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        run_file(&mut cx, &args[1]);
    } else {
        run_repl(&mut cx);
    }
}

fn run_file(cx: &mut Context<'_>, filename: &str) {
    if let Err(e) = cx.run_file(filename) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_repl(cx: &mut Context<'_>) {
    println!("stackbind shell");
    println!("Type call statements such as `add(1, 2)`, Ctrl+D to exit.\n");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Error starting line editor: {}", e);
            std::process::exit(1);
        }
    };

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                match cx.run_source(line) {
                    Ok(Value::Nil) => {}
                    Ok(result) => println!("{}", result),
                    Err(e) => println!("Error: {}", e.root()),
                }
                cx.collect();
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }
    }
}
