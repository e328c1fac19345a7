//! Public handle selecting the platform the scheduler talks to.
//!
//! There is no process-wide platform singleton. Every [`Scheduler`][crate::Scheduler] is given
//! a `Host` explicitly, which allows real and fake hosts to coexist in the same process (e.g. in
//! parallel tests).

#[cfg(any(test, feature = "test-util"))]
use std::sync::Arc;

#[cfg(any(test, feature = "test-util"))]
use crate::fake::FakePlatform;
use crate::pal::{Platform, PlatformFacade};

/// Handle to the operating system services the scheduler depends on: topology discovery, load
/// sampling, affinity application and liveness checks.
///
/// # Example
///
/// ```
/// use affinity_broker::Host;
///
/// let host = Host::native();
/// # drop(host);
/// ```
#[derive(Clone, Debug)]
pub struct Host {
    platform: PlatformFacade,
}

impl Host {
    /// The host the process is running on.
    ///
    /// On operating systems without native support, topology is approximated from the number
    /// of available processors and affinity changes have no effect.
    #[must_use]
    pub fn native() -> Self {
        Self {
            platform: PlatformFacade::target(),
        }
    }

    /// A host backed by a caller-provided platform implementation.
    #[must_use]
    pub fn from_platform(platform: impl Platform) -> Self {
        Self {
            platform: PlatformFacade::custom(platform),
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn fake(platform: Arc<FakePlatform>) -> Self {
        Self {
            platform: PlatformFacade::fake(platform),
        }
    }

    pub(crate) fn platform(&self) -> &PlatformFacade {
        &self.platform
    }
}
