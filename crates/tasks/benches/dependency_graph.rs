use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use fieldwork_core::TaskId;
use fieldwork_tasks::DependencyGraph;

/// Chain t0 <- t1 <- ... <- tn: every task waits for the previous one.
fn chain(len: usize) -> (DependencyGraph, Vec<TaskId>) {
    let ids: Vec<TaskId> = (0..len).map(|_| TaskId::new()).collect();
    let graph = DependencyGraph::from_edges(ids.windows(2).map(|w| (w[1], w[0]))).unwrap();
    (graph, ids)
}

/// Layered graph where every task of a layer waits for every task of the previous one.
fn layered(layers: usize, width: usize) -> (DependencyGraph, Vec<Vec<TaskId>>) {
    let tiers: Vec<Vec<TaskId>> = (0..layers)
        .map(|_| (0..width).map(|_| TaskId::new()).collect())
        .collect();
    let mut pairs = Vec::new();
    for w in tiers.windows(2) {
        for &task in &w[1] {
            for &dep in &w[0] {
                pairs.push((task, dep));
            }
        }
    }
    (DependencyGraph::from_edges(pairs).unwrap(), tiers)
}

fn bench_cycle_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle_check");

    for len in [100usize, 1_000, 10_000] {
        let (graph, ids) = chain(len);
        let (first, last) = (ids[0], ids[len - 1]);
        group.throughput(Throughput::Elements(len as u64));

        // Worst case: closing the chain walks every edge before rejecting.
        group.bench_with_input(BenchmarkId::new("chain_reject", len), &len, |b, _| {
            b.iter(|| graph.check_new_edge(black_box(first), black_box(last)).is_err());
        });

        group.bench_with_input(BenchmarkId::new("chain_accept", len), &len, |b, _| {
            let outsider = TaskId::new();
            b.iter(|| graph.check_new_edge(black_box(outsider), black_box(last)).is_ok());
        });
    }

    group.finish();
}

fn bench_find_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_cycle");

    for (layers, width) in [(10usize, 10usize), (20, 25), (50, 20)] {
        let (graph, _) = layered(layers, width);
        group.throughput(Throughput::Elements(graph.edge_count() as u64));
        group.bench_function(BenchmarkId::new("layered", format!("{layers}x{width}")), |b| {
            b.iter(|| black_box(&graph).find_cycle());
        });
    }

    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_edge");
    group.bench_function("layered_20x25_new_sink", |b| {
        let (graph, tiers) = layered(20, 25);
        b.iter(|| {
            let mut g = graph.clone();
            let sink = TaskId::new();
            for &dep in &tiers[tiers.len() - 1] {
                g.insert(sink, black_box(dep)).unwrap();
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_cycle_check, bench_find_cycle, bench_insert);
criterion_main!(benches);
