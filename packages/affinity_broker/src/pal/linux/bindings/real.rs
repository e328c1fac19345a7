use std::fmt::Debug;
use std::io;

use libc::{cpu_set_t, pid_t};

use crate::pal::linux::Bindings;

/// libc calls against the running kernel.
///
/// Only the Linux backend unit tests swap these out, for cases where the kernel would have to
/// fail on request.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

// Exercised by the Linux integration tests; the error paths need kernel failures.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Bindings for BuildTargetBindings {
    fn sched_setaffinity(&self, pid: pid_t, cpuset: &cpu_set_t) -> Result<(), io::Error> {
        // SAFETY: No safety requirements beyond passing valid arguments.
        let result = unsafe { libc::sched_setaffinity(pid, size_of::<cpu_set_t>(), cpuset) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn clock_ticks_per_second(&self) -> Result<u64, io::Error> {
        // SAFETY: No safety requirements.
        let result = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };

        u64::try_from(result)
            .ok()
            .filter(|ticks| *ticks > 0)
            .ok_or_else(io::Error::last_os_error)
    }
}
