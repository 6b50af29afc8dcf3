use criterion::{Criterion, black_box, criterion_group, criterion_main};
use stackbind::bind::{ExportClass, Object, RootObject, Scope};
use stackbind::{Context, Result};

struct Accumulator {
    total: f64,
}

impl ExportClass for Accumulator {
    type Parent = RootObject;
    const CLASS_NAME: &'static str = "Accumulator";

    fn export_members(cx: &mut Context<'_>) -> Result<()> {
        cx.export_static("new", || Object::new(Accumulator { total: 0.0 }))?;
        cx.export_method("add", |a: &mut Accumulator, n: f64| {
            a.total += n;
            a.total
        })
    }

    stackbind::root_part!();
}

fn bench_function_call(c: &mut Criterion) {
    let mut cx = Context::new();
    cx.export_function("add", |a: f64, b: f64| a + b).unwrap();

    c.bench_function("native add", |b| {
        b.iter(|| {
            cx.load("add", Scope::Global).unwrap();
            cx.push_number(black_box(3.0)).unwrap();
            cx.push_number(black_box(4.0)).unwrap();
            cx.call(2, Some(1)).unwrap();
            let sum = cx.to_number(-1).unwrap();
            cx.pop(1).unwrap();
            black_box(sum)
        })
    });
}

fn bench_method_call(c: &mut Criterion) {
    let mut cx = Context::new();
    cx.export_class::<Accumulator>().unwrap();
    cx.run_source("acc = Accumulator.new()").unwrap();

    c.bench_function("method call 1k", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                cx.load("acc", Scope::Global).unwrap();
                cx.load("add", Scope::Table(-1)).unwrap();
                cx.copy(-2).unwrap();
                cx.push_number(black_box(1.0)).unwrap();
                cx.call(2, Some(1)).unwrap();
                cx.pop(2).unwrap();
            }
        })
    });
}

fn bench_wrap_and_collect(c: &mut Criterion) {
    c.bench_function("wrap 1k + collect", |b| {
        b.iter(|| {
            let mut cx = Context::new();
            cx.export_class::<Accumulator>().unwrap();
            for _ in 0..1000 {
                cx.wrap(&Object::new(Accumulator { total: 0.0 })).unwrap();
                cx.pop(1).unwrap();
            }
            black_box(cx.collect())
        })
    });
}

fn bench_call_script(c: &mut Criterion) {
    let script = "x = add(1, 2)\ny = add(x, 3)\nz = add(y, x)\n".repeat(100);

    c.bench_function("call script 300 lines", |b| {
        b.iter(|| {
            let mut cx = Context::new();
            cx.export_function("add", |a: f64, b: f64| a + b).unwrap();
            black_box(cx.run_source(&script).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_function_call,
    bench_method_call,
    bench_wrap_and_collect,
    bench_call_script
);
criterion_main!(benches);
