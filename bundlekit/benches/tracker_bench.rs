//! Benchmarks for node completion tracking.

use bundlekit::tracker::NodeSetTracker;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn node_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("node-{i}")).collect()
}

fn mark_complete_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark_complete");
    for count in [16, 256, 4096] {
        let nodes = node_names(count);
        group.bench_with_input(BenchmarkId::new("sequential", count), &nodes, |b, nodes| {
            b.iter(|| {
                let tracker = NodeSetTracker::new();
                tracker.initialize(nodes.iter().cloned()).unwrap();
                for node in nodes {
                    black_box(tracker.mark_complete(node));
                }
            });
        });
    }
    group.finish();
}

fn contended_benchmark(c: &mut Criterion) {
    let nodes = node_names(1024);
    c.bench_function("mark_complete_8_threads", |b| {
        b.iter(|| {
            let tracker = Arc::new(NodeSetTracker::new());
            tracker.initialize(nodes.iter().cloned()).unwrap();
            std::thread::scope(|scope| {
                for chunk in nodes.chunks(nodes.len() / 8) {
                    let tracker = Arc::clone(&tracker);
                    scope.spawn(move || {
                        for node in chunk {
                            black_box(tracker.mark_complete(node));
                        }
                    });
                }
            });
            assert!(tracker.is_done());
        });
    });
}

criterion_group!(benches, mark_complete_benchmark, contended_benchmark);
criterion_main!(benches);
