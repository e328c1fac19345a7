#![cfg_attr(test, expect(
    clippy::struct_field_names,
    reason = "false positive from automock generated code"
))]

use std::fmt::Debug;
use std::io;

use crate::{ProcessId, ProcessorId};

/// Linux has this funny notion of exposing various OS APIs as a virtual filesystem. This trait
/// abstracts this virtual filesystem to allow it to be mocked.
///
/// The scope of this trait is limited to only the virtual filesystem exposed by the OS. We do not
/// expect to do "real" file I/O in this layer. All I/O is synchronous and blocking because we
/// expect it to hit a fast path in the OS, given the data is never on a real storage device.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Filesystem: Debug + Send + Sync + 'static {
    /// Gets the contents of the /sys/devices/system/cpu/online file.
    ///
    /// This is a cpulist format file ("0,1,2-4,5-10:2" style list).
    fn get_cpu_online_contents(&self) -> io::Result<String>;

    /// Gets the contents of the /sys/devices/system/cpu/cpu{}/topology/thread_siblings_list file.
    ///
    /// This is a cpulist format file listing every logical processor on the same physical core.
    /// May be absent on some virtualized hosts, in which case each processor is its own core.
    fn get_cpu_thread_siblings_contents(&self, processor_id: ProcessorId) -> Option<String>;

    /// Gets the contents of the /sys/devices/system/cpu/cpu{}/cpu_capacity file.
    ///
    /// Present on ARM big.LITTLE and similar hosts. A single integer, normalized so that the
    /// fastest processor reads 1024.
    fn get_cpu_capacity_contents(&self, processor_id: ProcessorId) -> Option<String>;

    /// Gets the contents of the /sys/devices/system/cpu/cpu{}/acpi_cppc/highest_perf file.
    ///
    /// Present on hosts with ACPI CPPC, which includes Intel hybrid processors. A single integer.
    fn get_cpu_highest_perf_contents(&self, processor_id: ProcessorId) -> Option<String>;

    /// Gets the contents of the /sys/devices/system/cpu/cpu{}/cpufreq/cpuinfo_max_freq file.
    ///
    /// A single integer in kHz.
    fn get_cpu_max_freq_contents(&self, processor_id: ProcessorId) -> Option<String>;

    /// Gets the contents of the /proc/self/status file for the current process.
    ///
    /// This is a plaintext file with "key:     value" pairs.
    fn get_proc_self_status_contents(&self) -> Option<String>;

    /// Gets the contents of the /proc/{pid}/stat file.
    ///
    /// A single line of space-separated fields, see `man 5 proc`.
    fn get_proc_stat_contents(&self, pid: ProcessId) -> io::Result<String>;

    /// Lists the thread IDs in the /proc/{pid}/task directory.
    fn get_proc_task_ids(&self, pid: ProcessId) -> io::Result<Vec<ProcessId>>;
}
