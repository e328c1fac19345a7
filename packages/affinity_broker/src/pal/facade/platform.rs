use std::fmt::Debug;
use std::io;
use std::sync::Arc;

#[cfg(any(test, feature = "test-util"))]
use crate::fake::FakePlatform;
use crate::pal::{BuildTargetPlatform, Platform, ProcessorRecord};
use crate::{ProcessId, ProcessorId};

/// Enum to hide the different platform implementations behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum PlatformFacade {
    Target(Arc<BuildTargetPlatform>),

    #[cfg(any(test, feature = "test-util"))]
    Fake(Arc<FakePlatform>),

    Custom(Arc<dyn Platform>),
}

impl PlatformFacade {
    pub(crate) fn target() -> Self {
        Self::Target(Arc::new(BuildTargetPlatform::new()))
    }

    pub(crate) fn custom(platform: impl Platform) -> Self {
        Self::Custom(Arc::new(platform))
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn fake(platform: Arc<FakePlatform>) -> Self {
        Self::Fake(platform)
    }
}

impl Platform for PlatformFacade {
    fn processors(&self) -> io::Result<Vec<ProcessorRecord>> {
        match self {
            Self::Target(p) => p.processors(),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(p) => p.processors(),
            Self::Custom(p) => p.processors(),
        }
    }

    fn processor_load(&self, pid: ProcessId) -> io::Result<f64> {
        match self {
            Self::Target(p) => p.processor_load(pid),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(p) => p.processor_load(pid),
            Self::Custom(p) => p.processor_load(pid),
        }
    }

    fn set_affinity(&self, pid: ProcessId, processors: &[ProcessorId]) -> io::Result<()> {
        match self {
            Self::Target(p) => p.set_affinity(pid, processors),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(p) => p.set_affinity(pid, processors),
            Self::Custom(p) => p.set_affinity(pid, processors),
        }
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        match self {
            Self::Target(p) => p.is_alive(pid),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(p) => p.is_alive(pid),
            Self::Custom(p) => p.is_alive(pid),
        }
    }

    fn forget(&self, pid: ProcessId) {
        match self {
            Self::Target(p) => p.forget(pid),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(p) => p.forget(pid),
            Self::Custom(p) => p.forget(pid),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl Debug for PlatformFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(inner) => inner.fmt(f),
            Self::Custom(inner) => inner.fmt(f),
        }
    }
}
