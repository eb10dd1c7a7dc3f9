// Performance benchmarks for the component lifecycle
//
// Run with: cargo bench --bench lifecycle_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sonority_core::domain::audio::Result;
use sonority_core::domain::component::{AudioComponent, ComponentContainer};
use sonority_core::domain::scheduler::Scheduler;
use std::hint::black_box;

struct Ticker {
    ticks: u64,
    disposed: bool,
}

impl AudioComponent for Ticker {
    fn update(&mut self) -> Result<()> {
        self.ticks += 1;
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }
}

fn ticker() -> Ticker {
    Ticker {
        ticks: 0,
        disposed: false,
    }
}

fn bench_container_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("container_update");

    for count in [16, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let mut container = ComponentContainer::new();
            for _ in 0..count {
                container.add_item(ticker()).unwrap();
            }
            b.iter(|| {
                container.update();
                black_box(container.len());
            });
        });
    }

    group.finish();
}

fn bench_queued_additions(c: &mut Criterion) {
    c.bench_function("container_drain_64_queued", |b| {
        let mut container = ComponentContainer::new();
        let handle = container.handle();
        b.iter(|| {
            for _ in 0..64 {
                handle.add_item(ticker()).unwrap();
            }
            container.update();
            container.drain();
        });
    });
}

fn bench_scheduler(c: &mut Criterion) {
    c.bench_function("scheduler_run_128_tasks", |b| {
        let mut scheduler: Scheduler<u64> = Scheduler::new();
        let handle = scheduler.handle();
        let mut state = 0u64;
        b.iter(|| {
            for _ in 0..128 {
                handle.add(|n: &mut u64| *n += 1);
            }
            black_box(scheduler.update(&mut state));
        });
    });
}

criterion_group!(
    benches,
    bench_container_update,
    bench_queued_additions,
    bench_scheduler
);
criterion_main!(benches);
