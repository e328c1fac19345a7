//! We collect the processor topology of the current host, register the current process as a
//! worker and print who holds which processor.
//!
//! Set `RUST_LOG=debug` to see every affinity change the scheduler makes.

use std::process;

use affinity_broker::{Host, ResourceDemand, Scheduler, SchedulerConfig};
use tracing_subscriber::EnvFilter;

fn main() -> affinity_broker::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let scheduler = Scheduler::start(
        Host::native(),
        SchedulerConfig::new().background_watcher(false),
    )?;

    let topology = scheduler.topology();

    for tier in topology.tiers() {
        println!("tier {tier}:");

        for (core, processors) in topology.cores(tier) {
            println!("  core {core}: {processors:?}");
        }
    }

    let handle = scheduler.register(
        process::id(),
        ResourceDemand::new().min_cores(1).max_cores(2).label("self"),
    )?;

    println!();
    print!("{}", scheduler.occupancy());

    scheduler.deregister(&handle);

    Ok(())
}
