//! Fake hosts for testing.
//!
//! This module simulates hardware topologies and worker processes so that scheduling behavior
//! can be verified without real hardware and without launching real processes.
//!
//! Only available when the `test-util` feature is enabled.
//!
//! # Basic usage
//!
//! ```
//! use affinity_broker::fake::{FakeHost, HardwareBuilder};
//! use affinity_broker::{ResourceDemand, Scheduler, SchedulerConfig};
//! use new_zealand::nz;
//!
//! // 4 physical cores with 2 hyperthreads each.
//! let fake = FakeHost::new(HardwareBuilder::from_counts(nz!(4), nz!(2)));
//!
//! let scheduler = Scheduler::start(
//!     fake.host(),
//!     SchedulerConfig::new().background_watcher(false),
//! )
//! .unwrap();
//!
//! let worker = fake.spawn();
//! let handle = scheduler
//!     .register(worker, ResourceDemand::new().min_cores(2))
//!     .unwrap();
//!
//! // Both hyperthreads of one physical core.
//! assert_eq!(fake.affinity(worker), Some(vec![0, 1]));
//! assert_eq!(scheduler.current_assignment(&handle), Some(vec![0, 1]));
//! ```
//!
//! # Heterogeneous hosts
//!
//! ```
//! use affinity_broker::fake::{FakeHost, HardwareBuilder};
//! use new_zealand::nz;
//!
//! // 2 fast cores with hyperthreading and 4 slow cores without.
//! let fake = FakeHost::new(
//!     HardwareBuilder::new()
//!         .tier(1, nz!(2), nz!(2))
//!         .tier(0, nz!(4), nz!(1)),
//! );
//! # drop(fake);
//! ```
//!
//! # Isolation
//!
//! Each fake host is independent, ensuring that multiple fake instances can coexist in parallel
//! tests without interference.

mod builder;
mod platform;

pub use builder::HardwareBuilder;
pub use platform::FakeHost;
pub(crate) use platform::FakePlatform;
