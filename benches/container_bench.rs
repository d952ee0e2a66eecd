use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use trackwire::core::record::{Header, PlatformHeader};
use trackwire::storage::HeaderContainer;

fn header(id: u64) -> Header {
    PlatformHeader::new(id, format!("P{id}")).into()
}

#[allow(clippy::unwrap_used)]
fn bench_container(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("header_container");

    group.bench_function("insert_1k", |b| {
        b.iter_batched(
            || HeaderContainer::create(dir.path().join("insert.dat"), false).unwrap(),
            |mut container| {
                for id in 0..1000 {
                    container.insert(&header(id)).unwrap();
                }
                container
            },
            BatchSize::PerIteration,
        )
    });

    let mut container = HeaderContainer::create(dir.path().join("lookup.dat"), false).unwrap();
    for id in 0..1000 {
        container.insert(&header(id)).unwrap();
    }
    group.bench_function("retrieve", |b| {
        let mut id = 0;
        b.iter(|| {
            id = (id + 7) % 1000;
            assert!(container.retrieve(id).unwrap().is_some());
        })
    });
    group.bench_function("snapshot_1k", |b| b.iter(|| container.snapshot().unwrap()));

    group.bench_function("compact_half_of_1k", |b| {
        b.iter_batched(
            || {
                let mut c = HeaderContainer::create(dir.path().join("compact.dat"), false).unwrap();
                for id in 0..1000 {
                    c.insert(&header(id)).unwrap();
                }
                for id in (0..1000).step_by(2) {
                    c.remove(id).unwrap();
                }
                c
            },
            |mut c| {
                c.compact().unwrap();
                c
            },
            BatchSize::PerIteration,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_container);
criterion_main!(benches);
