use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pubsync_core::value::{changes, deep_clone_record, deep_merge, record_from_json, Record};
use pubsync_core::{Model, SetOptions};
use serde_json::json;

/// Document with `width` top-level keys, each a record three levels deep
fn nested_document(width: usize) -> Record {
    let mut document = serde_json::Map::new();
    for i in 0..width {
        document.insert(
            format!("field_{i}"),
            json!({ "a": { "b": { "c": i, "d": [i, i + 1] } }, "label": format!("value {i}") }),
        );
    }
    record_from_json(serde_json::Value::Object(document)).unwrap()
}

/// Benchmark diffing identical documents (worst case: full traversal)
fn bench_changes_identical(c: &mut Criterion) {
    let mut group = c.benchmark_group("changes_identical");

    for width in [10, 100, 1000].iter() {
        let old = nested_document(*width);
        let new = deep_clone_record(&old);
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            b.iter(|| black_box(changes(&old, &new)));
        });
    }

    group.finish();
}

/// Benchmark merging a single nested leaf into a large document
fn bench_deep_merge(c: &mut Criterion) {
    let patch = record_from_json(json!({ "field_0": { "a": { "b": { "c": -1 } } } })).unwrap();

    c.bench_function("deep_merge_single_leaf_1000", |b| {
        b.iter_batched(
            || nested_document(1000),
            |mut document| {
                black_box(deep_merge(&mut document, &patch).len());
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark a set that changes one nested leaf
fn bench_model_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_set_one_leaf");

    for width in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, &width| {
            let mut model = Model::new(nested_document(width));
            let mut n = 0i64;
            b.iter(|| {
                n += 1;
                let patch = json!({ "field_0": { "a": { "b": { "c": n } } } });
                black_box(model.set(patch, SetOptions::default()).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark a redundant set (nothing changes, nothing is notified)
fn bench_model_set_noop(c: &mut Criterion) {
    let mut model = Model::new(nested_document(100));
    let exported = model.to_json();

    c.bench_function("model_set_noop_100", |b| {
        b.iter(|| {
            let delta = model.set(exported.clone(), SetOptions::default()).unwrap();
            assert!(delta.is_empty());
        });
    });
}

criterion_group!(
    benches,
    bench_changes_identical,
    bench_deep_merge,
    bench_model_set,
    bench_model_set_noop,
);

criterion_main!(benches);
