//! Criterion micro-benchmarks for synthetic trace generation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sdbtrace_bench::{reference_generator, reference_model};
use sdbtrace_stochastic::EventRegistry;

/// Benchmark: generate 10K operations from the reference model.
fn bench_generate_10k(c: &mut Criterion) {
    c.bench_function("generate_10k", |b| {
        b.iter(|| {
            let generator = reference_generator(42, 10_000).unwrap();
            for op in generator {
                black_box(op.unwrap());
            }
        });
    });
}

/// Benchmark: estimate a model from 10K generated operations.
fn bench_estimate_10k(c: &mut Criterion) {
    let ops: Vec<_> = reference_generator(42, 10_000)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    c.bench_function("estimate_10k", |b| {
        b.iter(|| {
            let mut registry = EventRegistry::new();
            ops.iter().for_each(|op| registry.observe(op));
            black_box(registry.estimate().unwrap());
        });
    });
}

/// Benchmark: build the reference model.
fn bench_reference_model(c: &mut Criterion) {
    c.bench_function("uniform_model", |b| {
        b.iter(|| black_box(reference_model().unwrap()));
    });
}

criterion_group!(
    benches,
    bench_generate_10k,
    bench_estimate_10k,
    bench_reference_model
);
criterion_main!(benches);
