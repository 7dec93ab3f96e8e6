//! Store benchmarks for nibbledb
//!
//! Run with: cargo bench --bench store_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

use nibbledb::data::{Key, NibblePath};
use nibbledb::store::{CommitOptions, PageType, PagedDb, StateStore};

/// Generate a random 32-byte path.
fn random_path(rng: &mut StdRng) -> [u8; 32] {
    let mut path = [0u8; 32];
    rng.fill(&mut path);
    path
}

fn bench_paged_db_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("PagedDb_Creation");

    for pages in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("in_memory", pages), pages, |b, &pages| {
            b.iter(|| PagedDb::in_memory(black_box(pages)).unwrap())
        });
    }

    group.finish();
}

fn bench_page_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("PagedDb_Allocation");

    group.bench_function("single_page", |b| {
        let mut db = PagedDb::in_memory(10000).unwrap();
        b.iter(|| {
            let mut batch = db.begin_batch();
            let result = batch.allocate_page(PageType::Data, 0);
            batch.abort();
            result
        })
    });

    group.finish();
}

fn bench_state_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("StateStore_Writes");

    for count in [100usize, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("set_accounts", count),
            count,
            |b, &count| {
                let mut rng = StdRng::seed_from_u64(42);
                let keys: Vec<Key> = (0..count)
                    .map(|_| Key::account(NibblePath::from_bytes(&random_path(&mut rng))))
                    .collect();

                b.iter(|| {
                    let mut store = StateStore::in_memory(8000).unwrap();
                    let mut batch = store.begin().unwrap();
                    for key in &keys {
                        batch.set(key, &[0xAB; 40]).unwrap();
                    }
                    batch.commit(CommitOptions::DangerNoFlush).unwrap();
                })
            },
        );
    }

    group.finish();
}

fn bench_state_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("StateStore_Reads");

    let mut rng = StdRng::seed_from_u64(7);
    let keys: Vec<Key> = (0..1000)
        .map(|_| Key::account(NibblePath::from_bytes(&random_path(&mut rng))))
        .collect();

    let mut store = StateStore::in_memory(8000).unwrap();
    let mut batch = store.begin().unwrap();
    for key in &keys {
        batch.set(key, &[0xCD; 40]).unwrap();
    }
    batch.commit(CommitOptions::DangerNoFlush).unwrap();

    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("get_hot_keys", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(store.get(key));
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_paged_db_creation,
    bench_page_allocation,
    bench_state_writes,
    bench_state_reads
);
criterion_main!(benches);
