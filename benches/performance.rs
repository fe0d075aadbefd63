use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use flowline_core::types::EventBatch;
use flowline_operators::builtins::{Discard, FromEvents, Head, Limit, Pass, Slice, Tail, Where};
use flowline_operators::local::{run_local, LocalControl};
use flowline_operators::{sequence_batches, Operator};
use flowline_planner::{optimize_to_fixpoint, Pipeline};

fn make_pipeline() -> Pipeline {
    Pipeline::new(vec![
        Box::new(FromEvents::sequence(10_000).with_batch_size(256)),
        Box::new(Pass),
        Box::new(Where::parse("id > 100").unwrap()),
        Box::new(Head::new(5_000)),
        Box::new(Pass),
        Box::new(Where::parse("id < 4000").unwrap()),
        Box::new(Tail::new(50)),
        Box::new(Discard),
    ])
    .unwrap()
}

fn bench_optimizer(c: &mut Criterion) {
    let pipeline = make_pipeline();
    c.bench_function("optimize_to_fixpoint", |b| {
        b.iter(|| optimize_to_fixpoint(&pipeline, 16))
    });
}

fn run_events(op: &dyn Operator, input: Vec<EventBatch>) -> Vec<EventBatch> {
    run_local(op, Arc::new(LocalControl::default()), input).unwrap()
}

fn bench_slicing(c: &mut Criterion) {
    let input = sequence_batches(100_000, 512);
    let cases: Vec<(&str, Box<dyn Operator>)> = vec![
        ("slice_middle", Box::new(Slice::new(Some(1_000), Some(-1_000)))),
        ("slice_negative_begin", Box::new(Slice::new(Some(-5_000), None))),
        ("limit", Box::new(Limit::new(90_000))),
    ];
    for (name, op) in &cases {
        c.bench_function(name, |b| {
            b.iter_batched(
                || input.clone(),
                |batches| run_events(op.as_ref(), batches),
                BatchSize::LargeInput,
            )
        });
    }
}

criterion_group!(performance, bench_optimizer, bench_slicing);
criterion_main!(performance);
