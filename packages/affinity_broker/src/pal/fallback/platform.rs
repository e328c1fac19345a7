use std::io;
use std::num::NonZero;
use std::thread;

use itertools::Itertools;

use crate::pal::{Platform, ProcessorRecord};
use crate::{ProcessId, ProcessorId};

/// Fallback platform implementation for operating systems without native support.
///
/// This implementation provides graceful degradation on unsupported platforms by:
/// - Using `std::thread::available_parallelism()` to determine processor count
/// - Treating every processor as its own physical core in a single tier
/// - Pretending to apply affinity without actual OS-level changes
/// - Reporting load as unsupported (the scheduler treats it as zero)
/// - Reporting every process as alive, so workers are only removed when deregistered
///
/// This allows code to compile and run on any platform, though without any real effect on
/// where the workers execute.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

impl BuildTargetPlatform {
    pub(crate) const fn new() -> Self {
        Self
    }
}

impl Platform for BuildTargetPlatform {
    fn processors(&self) -> io::Result<Vec<ProcessorRecord>> {
        let processor_count = thread::available_parallelism().map_or(1, NonZero::get);

        #[expect(
            clippy::cast_possible_truncation,
            reason = "unrealistic to have more than u32::MAX processors"
        )]
        let processor_count = processor_count as ProcessorId;

        Ok((0..processor_count)
            .map(|id| ProcessorRecord::new(id, id, 0))
            .collect_vec())
    }

    fn processor_load(&self, _pid: ProcessId) -> io::Result<f64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process load sampling is not supported on this platform",
        ))
    }

    #[cfg_attr(test, mutants::skip)] // Nothing observable happens on this platform.
    fn set_affinity(&self, _pid: ProcessId, _processors: &[ProcessorId]) -> io::Result<()> {
        Ok(())
    }

    fn is_alive(&self, _pid: ProcessId) -> bool {
        true
    }

    fn forget(&self, _pid: ProcessId) {}
}
