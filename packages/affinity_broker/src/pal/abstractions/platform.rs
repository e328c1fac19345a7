use std::fmt::Debug;
use std::io;

use crate::{CoreId, ProcessId, ProcessorId, TierId};

/// Everything the scheduler needs from the operating system.
///
/// The crate ships a backend for the build target (selected via
/// [`Host::native()`][crate::Host::native]) but callers may implement this trait themselves to
/// drive the scheduler from a different topology source or a process supervisor of their own,
/// passing it to [`Host::from_platform()`][crate::Host::from_platform].
///
/// All operations are synchronous and are expected to be fast. They are called while the
/// scheduler holds its state lock.
#[cfg_attr(test, mockall::automock)]
pub trait Platform: Debug + Send + Sync + 'static {
    /// Describes every logical processor of the host.
    ///
    /// Processors that must never be handed out (e.g. because the current process is not allowed
    /// to use them) should be reported with [`ProcessorRecord::reserved_hint()`] set.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology cannot be determined.
    fn processors(&self) -> io::Result<Vec<ProcessorRecord>>;

    /// Returns the load of a process, in percent of one processor, accumulated since the
    /// previous call for the same process. The first call for a process returns 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the process does not exist or its processor time cannot be read.
    fn processor_load(&self, pid: ProcessId) -> io::Result<f64>;

    /// Restricts a process to run only on the given processors.
    ///
    /// # Errors
    ///
    /// Returns an error if the process does not exist or the operating system refuses the
    /// new affinity.
    fn set_affinity(&self, pid: ProcessId, processors: &[ProcessorId]) -> io::Result<()>;

    /// Whether the process is still running. A process that has exited but not yet been reaped
    /// by its parent counts as not running.
    fn is_alive(&self, pid: ProcessId) -> bool;

    /// Discards any per-process state kept by the platform, such as the load baseline.
    fn forget(&self, pid: ProcessId);
}

/// One logical processor as reported by a [`Platform`].
///
/// # Example
///
/// ```
/// use affinity_broker::ProcessorRecord;
///
/// // Processor 5 is the hyperthread sibling of processor 4, in the fast tier.
/// let record = ProcessorRecord::new(5, 4, 1);
///
/// assert_eq!(record.core_id(), 4);
/// assert!(!record.is_reserved_hint());
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ProcessorRecord {
    pub(crate) processor_id: ProcessorId,
    pub(crate) core_id: CoreId,
    pub(crate) tier_id: TierId,
    pub(crate) is_reserved_hint: bool,
}

impl ProcessorRecord {
    /// Describes a processor that belongs to the given physical core and performance tier.
    #[must_use]
    pub fn new(processor_id: ProcessorId, core_id: CoreId, tier_id: TierId) -> Self {
        Self {
            processor_id,
            core_id,
            tier_id,
            is_reserved_hint: false,
        }
    }

    /// Marks the processor as not available for assignment to workers.
    #[must_use]
    pub fn reserved_hint(mut self, reserved: bool) -> Self {
        self.is_reserved_hint = reserved;
        self
    }

    /// The logical processor ID.
    #[must_use]
    pub fn processor_id(&self) -> ProcessorId {
        self.processor_id
    }

    /// The physical core the processor belongs to.
    #[must_use]
    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    /// The performance tier of the physical core. Higher is faster.
    #[must_use]
    pub fn tier_id(&self) -> TierId {
        self.tier_id
    }

    /// Whether the platform asked for this processor to be kept away from workers.
    #[must_use]
    pub fn is_reserved_hint(&self) -> bool {
        self.is_reserved_hint
    }
}
