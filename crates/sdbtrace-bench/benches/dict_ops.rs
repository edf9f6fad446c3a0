//! Criterion micro-benchmarks for dictionary encoding and the storage index cache.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sdbtrace_core::{address_from_index, hash_from_index};
use sdbtrace_dict::{DictionaryContext, IndexCache};

/// Benchmark: encode 10K distinct addresses, then encode them all again.
fn bench_encode_contracts(c: &mut Criterion) {
    let addrs: Vec<_> = (0..10_000).map(address_from_index).collect();

    c.bench_function("dict_encode_contract_10k", |b| {
        b.iter(|| {
            let mut ctx = DictionaryContext::new();
            for addr in addrs.iter().chain(&addrs) {
                black_box(ctx.encode_contract(*addr).unwrap());
            }
        });
    });
}

/// Benchmark: storage encoding with a working set that fits the cache.
fn bench_encode_storage_hot(c: &mut Criterion) {
    let keys: Vec<_> = (0..64).map(hash_from_index).collect();

    c.bench_function("dict_encode_storage_hot", |b| {
        b.iter(|| {
            let mut ctx = DictionaryContext::new();
            for _ in 0..100 {
                for key in &keys {
                    black_box(ctx.encode_storage(*key).unwrap());
                }
            }
        });
    });
}

/// Benchmark: place 10K indices into a full cache.
fn bench_index_cache_place(c: &mut Criterion) {
    c.bench_function("index_cache_place_10k", |b| {
        b.iter(|| {
            let mut cache = IndexCache::new();
            for i in 0..10_000u32 {
                black_box(cache.place(i % 300));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_encode_contracts,
    bench_encode_storage_hot,
    bench_index_cache_place
);
criterion_main!(benches);
