//! # Scheduler Throughput Benchmark
//!
//! Measures submit + wait_all round-trips for independent tasks and for a
//! fully serialized write chain.
//!
//! Run with: `cargo bench --package tessera_core --bench scheduler_benchmark`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tessera_core::{AccessSet, Scheduler, SchedulerConfig, TypeId};

const TASKS: [usize; 3] = [64, 512, 4096];

/// Benchmark: tasks touching disjoint types (no edges).
fn bench_independent_tasks(c: &mut Criterion) {
    let scheduler = Scheduler::new(&SchedulerConfig::default()).unwrap();
    let mut group = c.benchmark_group("independent_tasks");

    for count in TASKS {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                for i in 0..count {
                    let access = AccessSet::new().write(TypeId::from_index(i as u32));
                    scheduler
                        .submit(access, move || {
                            black_box(i);
                            Ok(())
                        })
                        .unwrap();
                }
                scheduler.wait_all().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark: every task writes the same type (one long chain).
fn bench_write_chain(c: &mut Criterion) {
    let scheduler = Scheduler::new(&SchedulerConfig::default()).unwrap();
    let shared = AccessSet::new().write(TypeId::from_index(0));
    let mut group = c.benchmark_group("write_chain");

    for count in TASKS {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                for i in 0..count {
                    scheduler
                        .submit(shared.clone(), move || {
                            black_box(i);
                            Ok(())
                        })
                        .unwrap();
                }
                scheduler.wait_all().unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_independent_tasks, bench_write_chain);

criterion_main!(benches);
