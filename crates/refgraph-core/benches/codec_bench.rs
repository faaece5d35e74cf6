//! # Codec Benchmarks
//!
//! Performance benchmarks for refgraph-core encoding, decoding and replay.
//!
//! Run with: `cargo bench -p refgraph-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use refgraph_core::{
    CodecOptions, Event, EventBatch, Graph, GraphStore, ObjectKind, Value, deserialize, serialize,
};
use serde_json::json;
use std::hint::black_box;

/// A hub sequence of N records; each record points back at the hub and at
/// its predecessor, so every record after the first is also a reference.
fn create_hub_graph(size: usize) -> (Graph, Value) {
    let mut graph = Graph::new();
    let hub = graph.new_sequence();
    let mut prev = None;

    for i in 0..size {
        let record = graph.new_record();
        graph.set_field(record, "id", i as u64).expect("set");
        graph.set_field(record, "hub", hub).expect("set");
        if let Some(prev) = prev {
            graph.set_field(record, "prev", prev).expect("set");
        }
        graph.push(hub, record).expect("push");
        prev = Some(record);
    }

    (graph, Value::Node(hub))
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    let options = CodecOptions::default();

    for size in [100, 1000, 10000].iter() {
        let (graph, root) = create_hub_graph(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(serialize(&graph, &root, &options)));
        });
    }

    group.finish();
}

fn bench_deserialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("deserialize");
    let options = CodecOptions::default();

    for size in [100, 1000, 10000].iter() {
        let (graph, root) = create_hub_graph(*size);
        let text = serialize(&graph, &root, &options).expect("serialize");

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut decoded = Graph::new();
                let value = deserialize(&text, &mut decoded, &options);
                black_box((decoded, value))
            });
        });
    }

    group.finish();
}

fn bench_apply_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_batch");

    for size in [100, 1000].iter() {
        let mut events = vec![
            Event::NewObject {
                object: 0,
                kind: ObjectKind::Plain,
            },
            Event::NewProperty {
                name: "items".to_string(),
                index: 0,
            },
        ];
        for i in 1..=*size as u64 {
            events.push(Event::NewObject {
                object: i,
                kind: ObjectKind::Plain,
            });
            events.push(Event::PropertyChanged {
                object: i,
                property: 0,
                value: json!({"~$£€>": 0}),
            });
        }
        let batch = EventBatch::new(1, events);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut store = GraphStore::new();
                black_box(store.apply(&batch)).expect("apply");
                black_box(store)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_serialize, bench_deserialize, bench_apply_batch);
criterion_main!(benches);
