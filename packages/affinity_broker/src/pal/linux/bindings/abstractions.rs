#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;

use libc::{cpu_set_t, pid_t};

/// The libc calls the Linux backend makes. Routing them through a trait lets the backend tests
/// mock the kernel.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    // sched_setaffinity() for a single thread (task) of any process
    fn sched_setaffinity(&self, pid: pid_t, cpuset: &cpu_set_t) -> Result<(), io::Error>;

    // sysconf(_SC_CLK_TCK), the unit of the processor time counters in /proc/<pid>/stat
    fn clock_ticks_per_second(&self) -> Result<u64, io::Error>;
}
