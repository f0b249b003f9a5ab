//! Dataset transaction benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_bench::generate_statements;
use tessera_core::{Config, Dataset, Node, TxnType};

/// Benchmark write transactions of different sizes.
fn bench_batch_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_write");

    for batch_size in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let dataset = Dataset::open_in_memory(Config::default().sync_on_commit(false)).unwrap();
                let statements = generate_statements(batch_size, 10);

                b.iter(|| {
                    dataset
                        .write(|txn| {
                            for st in &statements {
                                txn.add_statement(black_box(st))?;
                            }
                            Ok(())
                        })
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark pattern lookups by subject.
fn bench_find_by_subject(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_by_subject");

    for count in [1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let dataset = Dataset::open_in_memory(Config::default()).unwrap();
            for batch in generate_statements(count, 100).chunks(500) {
                dataset
                    .write(|txn| {
                        for st in batch {
                            txn.add_statement(st)?;
                        }
                        Ok(())
                    })
                    .unwrap();
            }
            let subject = Node::uri("http://example.org/s7");

            b.iter(|| {
                let found = dataset
                    .read(|txn| Ok(txn.find(Some(&subject), None, None)?.count()))
                    .unwrap();
                black_box(found);
            });
        });
    }
    group.finish();
}

/// Benchmark begin and commit of read transactions while commits queue.
fn bench_read_txn(c: &mut Criterion) {
    c.bench_function("read_txn_begin_commit", |b| {
        let dataset = Dataset::open_in_memory(Config::default()).unwrap();
        b.iter(|| {
            let txn = dataset.begin(TxnType::Read).unwrap();
            txn.commit().unwrap();
        });
    });
}

criterion_group!(benches, bench_batch_write, bench_find_by_subject, bench_read_txn);
criterion_main!(benches);
