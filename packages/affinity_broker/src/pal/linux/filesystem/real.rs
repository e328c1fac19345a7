use std::fmt::Debug;
use std::{fs, io};

use crate::pal::linux::Filesystem;
use crate::{ProcessId, ProcessorId};

/// The virtual filesystem for the real operating system that the build is targeting.
///
/// You would only use different filesystems in PAL unit tests that need to use a mock filesystem.
/// Even then, whenever possible, unit tests should use the real filesystem for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetFilesystem;

// Real filesystem bindings are excluded from coverage measurement because:
// 1. They are tested via integration tests running on actual Linux.
// 2. Some paths (like cpu_capacity) are not available on all test systems.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Filesystem for BuildTargetFilesystem {
    fn get_cpu_online_contents(&self) -> io::Result<String> {
        fs::read_to_string("/sys/devices/system/cpu/online")
    }

    fn get_cpu_thread_siblings_contents(&self, processor_id: ProcessorId) -> Option<String> {
        fs::read_to_string(format!(
            "/sys/devices/system/cpu/cpu{processor_id}/topology/thread_siblings_list"
        ))
        .ok()
    }

    fn get_cpu_capacity_contents(&self, processor_id: ProcessorId) -> Option<String> {
        fs::read_to_string(format!(
            "/sys/devices/system/cpu/cpu{processor_id}/cpu_capacity"
        ))
        .ok()
    }

    fn get_cpu_highest_perf_contents(&self, processor_id: ProcessorId) -> Option<String> {
        fs::read_to_string(format!(
            "/sys/devices/system/cpu/cpu{processor_id}/acpi_cppc/highest_perf"
        ))
        .ok()
    }

    fn get_cpu_max_freq_contents(&self, processor_id: ProcessorId) -> Option<String> {
        fs::read_to_string(format!(
            "/sys/devices/system/cpu/cpu{processor_id}/cpufreq/cpuinfo_max_freq"
        ))
        .ok()
    }

    fn get_proc_self_status_contents(&self) -> Option<String> {
        fs::read_to_string("/proc/self/status").ok()
    }

    fn get_proc_stat_contents(&self, pid: ProcessId) -> io::Result<String> {
        fs::read_to_string(format!("/proc/{pid}/stat"))
    }

    fn get_proc_task_ids(&self, pid: ProcessId) -> io::Result<Vec<ProcessId>> {
        let mut task_ids = Vec::new();

        for entry in fs::read_dir(format!("/proc/{pid}/task"))? {
            let entry = entry?;

            // Anything that is not a number is not a thread.
            if let Some(tid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<ProcessId>().ok())
            {
                task_ids.push(tid);
            }
        }

        Ok(task_ids)
    }
}
