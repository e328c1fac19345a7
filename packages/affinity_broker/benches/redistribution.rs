//! Benchmarking redistribution passes on simulated hosts of different sizes.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::num::NonZero;

use affinity_broker::fake::{FakeHost, HardwareBuilder};
use affinity_broker::{ResourceDemand, Scheduler, SchedulerConfig};
use criterion::{Criterion, criterion_group, criterion_main};
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("redistribution");

    for (name, fast_cores, slow_cores, workers) in [
        ("small", nz!(4), nz!(4), 4),
        ("large", nz!(32), nz!(64), 48),
    ] {
        let (fake, scheduler, pids) = setup(fast_cores, slow_cores, workers);

        group.bench_function(format!("rebalance_{name}"), |b| {
            let mut busy = false;

            b.iter(|| {
                // Alternate between busy and idle so every pass has something to do.
                busy = !busy;

                for pid in &pids {
                    fake.set_load(*pid, if busy { 95.0 } else { 5.0 });
                }

                black_box(scheduler.rebalance());
            });
        });

        group.bench_function(format!("reclaim_{name}"), |b| {
            b.iter(|| black_box(scheduler.reclaim()));
        });

        group.bench_function(format!("occupancy_{name}"), |b| {
            b.iter(|| black_box(scheduler.occupancy()));
        });
    }

    group.finish();
}

fn setup(
    fast_cores: NonZero<usize>,
    slow_cores: NonZero<usize>,
    workers: u32,
) -> (FakeHost, Scheduler, Vec<u32>) {
    let fake = FakeHost::new(
        HardwareBuilder::new()
            .tier(1, fast_cores, nz!(2))
            .tier(0, slow_cores, nz!(1)),
    );

    let scheduler =
        Scheduler::start(fake.host(), SchedulerConfig::new().background_watcher(false)).unwrap();

    let pids = (0..workers)
        .map(|index| {
            let pid = fake.spawn();

            scheduler
                .register(
                    pid,
                    ResourceDemand::new()
                        .min_cores(1)
                        .max_cores(4)
                        .quality(index % 3),
                )
                .unwrap();

            pid
        })
        .collect::<Vec<_>>();

    (fake, scheduler, pids)
}
