//! Single-threaded tick throughput over characteristic graph shapes.
//!
//! Chains exercise the steal-one path (no pool traffic at all); fan-outs
//! exercise pool push/pop churn.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dspflow::{BackoffStrategy, DspGraph, DspInterpreter, SuccessorList};
use std::hint::black_box;

fn chain_graph(len: usize) -> Box<DspGraph> {
    let mut graph = DspGraph::new(len, false);
    let mut next = graph.allocate_node(
        |_: usize| {
            black_box(0u32);
        },
        SuccessorList::empty(),
        1,
    );
    for i in 1..len {
        let limit = if i == len - 1 { 0 } else { 1 };
        next = graph.allocate_node(
            |_: usize| {
                black_box(0u32);
            },
            SuccessorList::new(&[next]),
            limit,
        );
    }
    graph.add_initially_runnable(next);
    Box::new(graph)
}

fn fanout_graph(width: usize) -> Box<DspGraph> {
    let mut graph = DspGraph::new(width + 1, false);
    let children: Vec<_> = (0..width)
        .map(|_| {
            graph.allocate_node(
                |_: usize| {
                    black_box(0u32);
                },
                SuccessorList::empty(),
                1,
            )
        })
        .collect();
    let source = graph.allocate_node(
        |_: usize| {
            black_box(0u32);
        },
        SuccessorList::new(&children),
        0,
    );
    graph.add_initially_runnable(source);
    Box::new(graph)
}

fn bench_single_thread_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_single_thread");

    for &size in &[64usize, 1024] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(BenchmarkId::new("chain", size), |b| {
            let interpreter = DspInterpreter::new(1, BackoffStrategy::Pause);
            interpreter.reset_queue(Some(chain_graph(size)));
            b.iter(|| {
                if interpreter.init_tick() {
                    interpreter.tick_main();
                }
            });
        });

        group.bench_function(BenchmarkId::new("fanout", size), |b| {
            let interpreter = DspInterpreter::new(1, BackoffStrategy::Pause);
            interpreter.reset_queue(Some(fanout_graph(size)));
            b.iter(|| {
                if interpreter.init_tick() {
                    interpreter.tick_main();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread_tick);
criterion_main!(benches);
