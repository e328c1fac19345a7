#![cfg_attr(coverage_nightly, coverage(off))]

use std::fmt::Debug;
use std::io;
#[cfg(test)]
use std::sync::Arc;

use libc::{cpu_set_t, pid_t};

#[cfg(test)]
use crate::pal::linux::MockBindings;
use crate::pal::linux::{Bindings, BuildTargetBindings};

/// Either the real libc bindings or, in unit tests, a mock.
#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Target(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetBindings)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockBindings) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Bindings for BindingsFacade {
    fn sched_setaffinity(&self, pid: pid_t, cpuset: &cpu_set_t) -> Result<(), io::Error> {
        match self {
            Self::Target(bindings) => bindings.sched_setaffinity(pid, cpuset),
            #[cfg(test)]
            Self::Mock(mock) => mock.sched_setaffinity(pid, cpuset),
        }
    }

    fn clock_ticks_per_second(&self) -> Result<u64, io::Error> {
        match self {
            Self::Target(bindings) => bindings.clock_ticks_per_second(),
            #[cfg(test)]
            Self::Mock(mock) => mock.clock_ticks_per_second(),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
