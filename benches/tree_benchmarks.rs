//! Tree view benchmarks
//!
//! Benchmarks for typed tree storage:
//! - Nested object writes (schema checks included)
//! - Subtree reads on memory and disk containers
//! - Union reads across run chunks

use aimstore::container::MemoryContainer;
use aimstore::object::{path, AimObject, AimObjectKey};
use aimstore::repo::{Repo, RepoConfig};
use aimstore::tree::TreeView;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tempfile::TempDir;

/// Create an hparams-like object with `width` numeric members
#[allow(clippy::cast_precision_loss)]
fn create_test_object(width: usize) -> AimObject {
    AimObject::object((0..width).map(|i| {
        (
            format!("param_{i}"),
            AimObject::object([
                ("value", AimObject::Float(i as f64 * 0.5)),
                ("steps", AimObject::Array((0..8).map(AimObject::Int).collect())),
            ]),
        )
    }))
}

/// Benchmark nested writes into a memory container
fn bench_tree_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_set");

    for width in [10, 100, 1_000].iter() {
        let value = create_test_object(*width);
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            let tree = TreeView::new(Arc::new(MemoryContainer::new()));
            b.iter(|| {
                tree.set(&path(["hparams"]), black_box(&value)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark subtree reads from memory and disk containers
fn bench_tree_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_get");

    for width in [10, 100, 1_000].iter() {
        let value = create_test_object(*width);

        let memory = TreeView::new(Arc::new(MemoryContainer::new()));
        memory.set(&path(["hparams"]), &value).unwrap();
        group.bench_with_input(BenchmarkId::new("memory", width), width, |b, _| {
            b.iter(|| black_box(memory.get(&path(["hparams"])).unwrap()));
        });

        let dir = TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), RepoConfig::default()).unwrap();
        let disk = repo.request_tree("meta", Some("bench"), false, false).unwrap();
        disk.set(&path(["hparams"]), &value).unwrap();
        group.bench_with_input(BenchmarkId::new("disk", width), width, |b, _| {
            b.iter(|| black_box(disk.get(&path(["hparams"])).unwrap()));
        });
        repo.close().unwrap();
    }

    group.finish();
}

/// Benchmark reading one metric through the union of many run chunks
fn bench_union_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("union_get");
    group.sample_size(20);

    for runs in [4, 16, 64].iter() {
        let dir = TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), RepoConfig::default()).unwrap();
        let mut last = String::new();
        for i in 0..*runs {
            last = format!("run{i:04}");
            let props = repo.request_props(&last, false).unwrap();
            props.set_name(&format!("bench-{i}")).unwrap();
        }
        repo.close().unwrap();

        let name_path = vec![
            AimObjectKey::from("chunks"),
            AimObjectKey::from(last.as_str()),
            AimObjectKey::from("props"),
            AimObjectKey::from("name"),
        ];
        group.bench_with_input(BenchmarkId::from_parameter(runs), runs, |b, _| {
            b.iter(|| {
                let union = repo.request_tree("meta", None, true, true).unwrap();
                black_box(union.get(&name_path).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tree_set, bench_tree_get, bench_union_get);
criterion_main!(benches);
