//! Throughput Benchmark for ringkv
//!
//! Measures the keyspace dictionary, the RESP parser and serializer, and
//! consistent-hash lookups.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ringkv::cluster::NodeMap;
use ringkv::protocol::{cmd_line, parse_bytes, ParseMode, Reply};
use ringkv::storage::{Dict, Entity};
use std::sync::Arc;
use std::time::Duration;

fn value(s: impl Into<Bytes>) -> Entity {
    Entity::String(s.into())
}

/// Benchmark PUT operations
fn bench_put(c: &mut Criterion) {
    let dict = Dict::new();

    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            dict.put(key, value("small_value"));
            i += 1;
        });
    });

    group.bench_function("put_large", |b| {
        let mut i = 0u64;
        let large = Bytes::from("x".repeat(64 * 1024)); // 64KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            dict.put(key, Entity::String(large.clone()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let dict = Dict::new();
    for i in 0..100_000 {
        dict.put(
            Bytes::from(format!("key:{}", i)),
            value(format!("value:{}", i)),
        );
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(dict.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(dict.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let dict = Arc::new(Dict::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let dict = Arc::clone(&dict);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{}:{}", t, i));
                            dict.put(key.clone(), value("value"));
                            dict.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(dict.len());
        });
    });

    group.finish();
}

/// Benchmark KEYS pattern matching
fn bench_keys(c: &mut Criterion) {
    let dict = Dict::new();
    for i in 0..1_000 {
        dict.put(Bytes::from(format!("user:{}", i)), value("user_data"));
        dict.put(Bytes::from(format!("session:{}", i)), value("session_data"));
    }

    let mut group = c.benchmark_group("keys");

    group.bench_function("keys_pattern", |b| {
        b.iter(|| black_box(dict.keys(b"user:*")));
    });

    group.bench_function("keys_all", |b| {
        b.iter(|| black_box(dict.keys(b"*")));
    });

    group.finish();
}

/// Benchmark RESP parsing and serialization
fn bench_protocol(c: &mut Criterion) {
    let set = Reply::multi_bulk(cmd_line(["SET", "user:1000", "some moderately sized value"]))
        .serialize();
    let pipeline: Vec<u8> = set.iter().copied().cycle().take(set.len() * 100).collect();

    let mut group = c.benchmark_group("protocol");

    group.throughput(Throughput::Elements(1));
    group.bench_function("parse_set", |b| {
        b.iter(|| black_box(parse_bytes(&set, ParseMode::Command)));
    });

    group.throughput(Throughput::Elements(100));
    group.bench_function("parse_pipeline_100", |b| {
        b.iter(|| black_box(parse_bytes(&pipeline, ParseMode::Command)));
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("serialize_bulk", |b| {
        let reply = Reply::bulk("x".repeat(1024));
        b.iter(|| black_box(reply.serialize()));
    });

    group.finish();
}

/// Benchmark ring lookups
fn bench_ring(c: &mut Criterion) {
    let mut ring = NodeMap::new();
    ring.add_node((0..16).map(|i| format!("10.0.0.{}:6379", i)));

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(1));

    group.bench_function("pick_node", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i);
            black_box(ring.pick_node(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_get,
    bench_concurrent,
    bench_keys,
    bench_protocol,
    bench_ring,
);

criterion_main!(benches);
