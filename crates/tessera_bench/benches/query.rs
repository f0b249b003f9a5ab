//! Query iterator pipeline benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_bench::generate_rows;
use tessera_query::{
    collect_rows, Aggregate, Distinct, ExecConfig, Filter, Group, Plain, Sort, SortCondition, TopN, Var,
};

/// Benchmark full sorts, in memory and spilling.
fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort");
    group.sample_size(20);
    let rows = generate_rows(20_000, 1_000);
    group.throughput(Throughput::Elements(rows.len() as u64));

    for threshold in [100_000, 2_000].iter() {
        group.bench_with_input(BenchmarkId::new("spill_threshold", threshold), threshold, |b, &threshold| {
            let config = ExecConfig::default().sort_spill_threshold(threshold);
            b.iter(|| {
                let sorted = Sort::new(Plain::new(rows.clone()).boxed(), vec![SortCondition::asc("v")], config.clone());
                black_box(collect_rows(sorted).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark top-N against the rows it replaces.
fn bench_top_n(c: &mut Criterion) {
    let mut group = c.benchmark_group("top_n");
    let rows = generate_rows(20_000, 1_000);
    group.throughput(Throughput::Elements(rows.len() as u64));

    for limit in [10, 1_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(limit), limit, |b, &limit| {
            b.iter(|| {
                let top = TopN::new(Plain::new(rows.clone()).boxed(), vec![SortCondition::desc("v")], limit);
                black_box(collect_rows(top).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark a filter, distinct and group pipeline.
fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_distinct_group");
    let rows = generate_rows(20_000, 500);
    group.throughput(Throughput::Elements(rows.len() as u64));

    group.bench_function("pipeline", |b| {
        let v = Var::new("v");
        b.iter(|| {
            let source = Plain::new(rows.clone()).boxed();
            let v = v.clone();
            let filtered = Filter::new(source, move |row| {
                Ok(row.get(&v).and_then(|n| n.as_i64()).is_some_and(|x| x % 2 == 0))
            });
            let distinct = Distinct::new(filtered.boxed(), ExecConfig::default());
            let grouped = Group::new(
                distinct.boxed(),
                vec![Var::new("k")],
                vec![(Var::new("n"), Aggregate::Count), (Var::new("hi"), Aggregate::Max(Var::new("v")))],
            );
            black_box(collect_rows(grouped).unwrap());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_sort, bench_top_n, bench_pipeline);
criterion_main!(benches);
