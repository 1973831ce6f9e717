// Check-and-count performance benchmarks for bloomcount

use bloomcount::counter::MemoryCounterStore;
use bloomcount::{BloomCounter, Options};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir, flush_on_insert: bool) -> BloomCounter {
    let options = Options::default()
        .filter_dir(dir.path())
        .capacity(100_000)
        .flush_on_insert(flush_on_insert);
    BloomCounter::open(options, Arc::new(MemoryCounterStore::new())).unwrap()
}

fn benchmark_new_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("new_keys");

    for size in [100, 1000, 10000].iter() {
        for flush in [true, false] {
            group.throughput(Throughput::Elements(*size as u64));
            let id = BenchmarkId::new(if flush { "flush" } else { "no_flush" }, size);
            group.bench_with_input(id, size, |b, &size| {
                b.iter(|| {
                    let temp_dir = TempDir::new().unwrap();
                    let counter = open(&temp_dir, flush);

                    for i in 0..size {
                        let key = format!("key{:08}", i);
                        black_box(counter.check_and_count(b"bench", key.as_bytes()).unwrap());
                    }
                });
            });
        }
    }

    group.finish();
}

fn benchmark_seen_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("seen_keys");

    let temp_dir = TempDir::new().unwrap();
    let counter = open(&temp_dir, true);
    for i in 0..10000 {
        let key = format!("key{:08}", i);
        counter.check_and_count(b"bench", key.as_bytes()).unwrap();
    }

    group.throughput(Throughput::Elements(1000));
    group.bench_function("increment", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let key = format!("key{:08}", i * 7);
                black_box(counter.check_and_count(b"bench", key.as_bytes()).unwrap());
            }
        });
    });

    group.finish();
}

fn benchmark_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("growth");
    group.sample_size(20);

    for capacity in [1000u64, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), capacity, |b, &capacity| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let options = Options::default()
                    .filter_dir(temp_dir.path())
                    .capacity(capacity)
                    .flush_on_insert(false);
                let counter =
                    BloomCounter::open(options, Arc::new(MemoryCounterStore::new())).unwrap();

                // Four pages' worth of keys
                for i in 0..capacity * 4 {
                    let key = format!("key{:08}", i);
                    counter.check_and_count(b"grow", key.as_bytes()).unwrap();
                }

                black_box(counter.registry().stats());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_new_keys, benchmark_seen_keys, benchmark_growth);
criterion_main!(benches);
