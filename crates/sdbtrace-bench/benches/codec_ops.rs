//! Criterion micro-benchmarks for the operation codec and replay execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sdbtrace_bench::reference_operations;
use sdbtrace_replay::Operation;
use sdbtrace_test_utils::InMemoryStateDb;

const OPERATIONS: u64 = 10_000;

fn encode_all(ops: &[Operation]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ops.len() * 8);
    for op in ops {
        op.write_tagged(&mut buf).unwrap();
    }
    buf
}

/// Benchmark: encode 10K generated operations.
fn bench_encode_operations(c: &mut Criterion) {
    let (ops, _) = reference_operations(1, OPERATIONS).unwrap();

    c.bench_function("codec_encode_10k", |b| {
        b.iter(|| black_box(encode_all(&ops)));
    });
}

/// Benchmark: decode the same operations.
fn bench_decode_operations(c: &mut Criterion) {
    let (ops, _) = reference_operations(1, OPERATIONS).unwrap();
    let encoded = encode_all(&ops);

    c.bench_function("codec_decode_10k", |b| {
        b.iter(|| {
            let mut cursor = encoded.as_slice();
            let mut n = 0;
            while let Some(op) = Operation::read_tagged(&mut cursor).unwrap() {
                black_box(&op);
                n += 1;
            }
            assert_eq!(n, ops.len());
        });
    });
}

/// Benchmark: execute 10K operations against the in-memory backend.
fn bench_execute_operations(c: &mut Criterion) {
    let (ops, ctx) = reference_operations(1, OPERATIONS).unwrap();

    c.bench_function("execute_10k_in_memory", |b| {
        b.iter(|| {
            let mut ctx = ctx.clone();
            let mut db = InMemoryStateDb::new();
            for op in &ops {
                black_box(op.execute(&mut db, &mut ctx).unwrap());
            }
        });
    });
}

criterion_group!(
    benches,
    bench_encode_operations,
    bench_decode_operations,
    bench_execute_operations
);
criterion_main!(benches);
