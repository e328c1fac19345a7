#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Distributes the processors of a host between worker processes.
//!
//! A supervisor that runs several worker processes on one machine (database engines, compute
//! nodes, anything that benefits from owning its processors) registers each worker with a
//! [`Scheduler`] together with a [`ResourceDemand`]: the minimum number of logical processors
//! the worker needs, the maximum it can make use of and a quality level that says how
//! important it is relative to the other workers.
//!
//! The scheduler then restricts every worker to a set of logical processors, taking the
//! hardware into account:
//!
//! * Logical processors that share a physical core (hyperthreads) are handed out together, so
//!   that workers do not compete for the execution units of the same core.
//! * On heterogeneous hosts (e.g. with performance and efficiency cores), important workers
//!   are kept on the fast cores and may displace less important workers from them, whereas
//!   workers of quality 0 prefer the slow cores.
//! * Busy workers grow into idle processors and, if they stay busy, take processors from idle
//!   workers. No worker is ever taken below its minimum to feed another.
//!
//! # Example
//!
//! ```
//! use affinity_broker::fake::{FakeHost, HardwareBuilder};
//! use affinity_broker::{ResourceDemand, Scheduler, SchedulerConfig};
//! use new_zealand::nz;
//!
//! // 4 fast cores with hyperthreading, 8 slow cores without.
//! let fake = FakeHost::new(
//!     HardwareBuilder::new()
//!         .tier(1, nz!(4), nz!(2))
//!         .tier(0, nz!(8), nz!(1)),
//! );
//!
//! let scheduler = Scheduler::start(
//!     fake.host(),
//!     SchedulerConfig::new().background_watcher(false),
//! )
//! .unwrap();
//!
//! let database = fake.spawn();
//! let batch = fake.spawn();
//!
//! let database = scheduler
//!     .register(database, ResourceDemand::new().min_cores(2).quality(2).label("db"))
//!     .unwrap();
//! let batch = scheduler
//!     .register(batch, ResourceDemand::new().min_cores(2).quality(0).label("batch"))
//!     .unwrap();
//!
//! // The database gets both hyperthreads of a fast core, the batch job two slow cores.
//! assert_eq!(scheduler.current_assignment(&database), Some(vec![0, 1]));
//! assert_eq!(scheduler.current_assignment(&batch), Some(vec![8, 9]));
//!
//! println!("{}", scheduler.occupancy());
//! ```
//!
//! In production, use [`Host::native()`] instead of a fake host. The scheduler then applies
//! affinity through the operating system and samples the processor time of each worker to
//! decide who is busy.
//!
//! # Redistribution
//!
//! Assignments are recalculated in passes. A reclaim pass runs whenever a worker registers,
//! deregisters or exits and only guarantees minimums. A rebalance pass runs every few seconds
//! on a background thread and additionally consolidates fragmented workers, grows busy workers
//! and lets workers that stay busy take processors from idle ones. See [`SchedulerConfig`] for
//! the intervals and load thresholds involved.
//!
//! Workers can also be pinned to a fixed set of processors via
//! [`Scheduler::register_fixed()`]. The scheduler applies that affinity once and never touches
//! it again.
//!
//! # Operating system support
//!
//! * Linux: topology from sysfs, load from procfs, affinity via `sched_setaffinity` applied to
//!   every thread of the worker.
//! * Windows: topology, load and affinity via the Win32 API, limited to processor group 0.
//! * Elsewhere: every processor is treated as its own core in a single tier and affinity
//!   changes are accepted without effect.
//!
//! # Logging
//!
//! The crate logs via [`tracing`]. Registrations, exits and shortfalls are logged at `info` and
//! `warn`, every individual affinity change and eviction at `debug`.

mod applier;
mod diagnostics;
mod engine;
mod error;
mod host;
mod load;
mod pal;
mod primitive_types;
mod registry;
mod resource_demand;
mod scheduler;
mod scheduler_config;
mod topology;
mod watcher;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use diagnostics::{
    CoreOccupancy, Occupancy, ProcessorOccupancy, ProcessorState, TierOccupancy,
};
pub use error::{Error, Result};
pub use host::Host;
pub use pal::{Platform, ProcessorRecord};
pub use primitive_types::*;
pub use registry::{WorkerHandle, WorkerId, WorkerKind, WorkerSnapshot};
pub use resource_demand::ResourceDemand;
pub use scheduler::{PassSummary, Scheduler};
pub use scheduler_config::SchedulerConfig;
pub use topology::Topology;
