//! Throughput benchmarks for Agora.
//!
//! These benchmarks measure the raw envelope throughput of various components.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use agora_bench::{hub_with_subscribers, message_of_size};
use agora_core::{ChannelKey, OverflowPolicy, RoutingConfig, RoutingTable, SendQueue};
use agora_protocol::{validate, ValidateLimits};

/// Benchmark envelope encoding.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    // Small message
    let small = message_of_size(64);
    group.throughput(Throughput::Bytes(64));
    group.bench_function("64B", |b| b.iter(|| black_box(&small).to_bytes()));

    // Medium message
    let medium = message_of_size(1024);
    group.throughput(Throughput::Bytes(1024));
    group.bench_function("1KB", |b| b.iter(|| black_box(&medium).to_bytes()));

    // Large message
    let large = message_of_size(65536);
    group.throughput(Throughput::Bytes(65536));
    group.bench_function("64KB", |b| b.iter(|| black_box(&large).to_bytes()));

    group.finish();
}

/// Benchmark inbound frame validation.
fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    let limits = ValidateLimits {
        max_frame_bytes: 1 << 20,
    };

    for (label, size) in [("64B", 64usize), ("1KB", 1024), ("64KB", 65536)] {
        let raw = message_of_size(size).to_bytes().unwrap();
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_function(label, |b| b.iter(|| validate(black_box(&raw), &limits)));
    }

    group.finish();
}

/// Benchmark routing table operations.
fn bench_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing");

    // Subscribe benchmark
    group.bench_function("subscribe", |b| {
        let table = RoutingTable::new(RoutingConfig {
            max_channels: usize::MAX,
            ..RoutingConfig::default()
        });
        let mut i = 0u64;
        b.iter(|| {
            let key = ChannelKey::new("bench", format!("channel-{i}"));
            let conn = format!("conn-{i}");
            i += 1;
            let _ = table.subscribe(&key, &conn);
        });
    });

    // Member resolution with 100 subscribers
    group.bench_function("resolve_100_members", |b| {
        let table = RoutingTable::new(RoutingConfig::default());
        let key = ChannelKey::new("bench", "resolve");
        for i in 0..100 {
            table.subscribe(&key, &format!("conn-{i}")).unwrap();
        }
        b.iter(|| table.resolve_for_publish(black_box(&key)).unwrap());
    });

    group.finish();
}

/// Benchmark send queue operations.
fn bench_send_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_queue");

    group.bench_function("push_pop", |b| {
        let queue = SendQueue::new(1024, OverflowPolicy::DropOldest);
        let frame = message_of_size(64).to_bytes().unwrap();
        b.iter(|| {
            queue.push(frame.clone());
            queue.try_next()
        });
    });

    group.bench_function("push_full_drop_oldest", |b| {
        let queue = SendQueue::new(64, OverflowPolicy::DropOldest);
        let frame = message_of_size(64).to_bytes().unwrap();
        for _ in 0..64 {
            queue.push(frame.clone());
        }
        b.iter(|| queue.push(frame.clone()));
    });

    group.finish();
}

/// Benchmark fan-out scenarios through the full hub path.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for size in [10usize, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (hub, handles) = hub_with_subscribers(size);
            let raw = message_of_size(64).to_bytes().unwrap();

            b.iter(|| {
                rt.block_on(hub.handle_inbound("conn-0", black_box(&raw)));
                for handle in &handles {
                    while handle.queue().try_next().is_some() {}
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_validate,
    bench_routing,
    bench_send_queue,
    bench_fanout,
);
criterion_main!(benches);
