use std::io;
use std::mem::size_of;
use std::time::{Duration, Instant};

use itertools::Itertools;
use windows::Win32::Foundation::{
    CloseHandle, ERROR_INSUFFICIENT_BUFFER, FILETIME, HANDLE, WAIT_TIMEOUT,
};
use windows::Win32::System::SystemInformation::{
    GetLogicalProcessorInformationEx, RelationProcessorCore,
    SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
};
use windows::Win32::System::Threading::{
    GetMaximumProcessorCount, GetMaximumProcessorGroupCount, GetProcessTimes, OpenProcess,
    PROCESS_ACCESS_RIGHTS, PROCESS_QUERY_INFORMATION, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_SET_INFORMATION, PROCESS_SYNCHRONIZE, SetProcessAffinityMask, WaitForSingleObject,
};
use windows::core::HRESULT;

use crate::load::LoadTracker;
use crate::pal::{Platform, ProcessorRecord};
use crate::{CoreId, ProcessId, ProcessorId, TierId};

/// The platform that matches the crate's build target.
///
/// Process affinity on Windows is limited to a single processor group. Processors outside the
/// first group are reported with the reserved hint, so they are never handed out to workers.
#[derive(Debug)]
pub(crate) struct BuildTargetPlatform {
    loads: LoadTracker,
}

impl Platform for BuildTargetPlatform {
    fn processors(&self) -> io::Result<Vec<ProcessorRecord>> {
        let group_sizes = get_group_sizes();
        let buffer = get_core_relationships()?;

        let mut records = Vec::new();

        // The structures returned by the OS are dynamically sized so we only have various
        // disgusting options for parsing/processing them. Pointer wrangling is the most readable.
        let raw_range = buffer.as_ptr_range();
        let mut next: *const SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX = raw_range.start.cast();
        let end: *const SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX = raw_range.end.cast();
        let mut core_index: CoreId = 0;

        while next < end {
            // SAFETY: We just process the data in the form the OS promises to give it to us.
            let info = unsafe { &*next };

            // SAFETY: We just process the data in the form the OS promises to give it to us.
            next = unsafe { next.byte_add(info.Size as usize) };

            if info.Relationship != RelationProcessorCore {
                continue;
            }

            // SAFETY: The relationship tells us which union member is valid.
            let details = unsafe { &info.Anonymous.Processor };

            // Windows reports higher efficiency classes for faster cores, which is exactly
            // our notion of a tier.
            let tier_id = TierId::from(details.EfficiencyClass);

            // API docs: If the PROCESSOR_RELATIONSHIP structure represents a processor core,
            // the GroupCount member is always 1.
            let affinity = &details.GroupMask[0];
            let group = usize::from(affinity.Group);

            let group_start: ProcessorId = group_sizes.iter().take(group).sum();
            let group_size = group_sizes.get(group).copied().unwrap_or_default();

            for index_in_group in 0..group_size.min(usize::BITS) {
                if affinity.Mask & (1_usize << index_in_group) == 0 {
                    continue;
                }

                records.push(
                    ProcessorRecord::new(
                        group_start.saturating_add(index_in_group),
                        core_index,
                        tier_id,
                    )
                    .reserved_hint(group != 0),
                );
            }

            core_index = core_index.saturating_add(1);
        }

        records.sort_by_key(ProcessorRecord::processor_id);

        Ok(records)
    }

    fn processor_load(&self, pid: ProcessId) -> io::Result<f64> {
        let process = ProcessHandle::open(pid, PROCESS_QUERY_LIMITED_INFORMATION)?;

        let mut creation_time = FILETIME::default();
        let mut exit_time = FILETIME::default();
        let mut kernel_time = FILETIME::default();
        let mut user_time = FILETIME::default();

        // SAFETY: No safety requirements beyond passing valid input.
        unsafe {
            GetProcessTimes(
                process.0,
                &raw mut creation_time,
                &raw mut exit_time,
                &raw mut kernel_time,
                &raw mut user_time,
            )
        }
        .map_err(io::Error::other)?;

        let processor_time =
            filetime_to_duration(kernel_time).saturating_add(filetime_to_duration(user_time));

        Ok(self.loads.record(pid, processor_time, Instant::now()))
    }

    fn set_affinity(&self, pid: ProcessId, processors: &[ProcessorId]) -> io::Result<()> {
        let mut mask: usize = 0;

        for &processor in processors {
            if processor >= usize::BITS {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("processor {processor} is outside the first processor group"),
                ));
            }

            mask |= 1_usize << processor;
        }

        if mask == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot restrict a process to zero processors",
            ));
        }

        let process =
            ProcessHandle::open(pid, PROCESS_SET_INFORMATION | PROCESS_QUERY_INFORMATION)?;

        // SAFETY: No safety requirements beyond passing valid input.
        unsafe { SetProcessAffinityMask(process.0, mask) }.map_err(io::Error::other)
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        let Ok(process) = ProcessHandle::open(pid, PROCESS_SYNCHRONIZE) else {
            return false;
        };

        // A process handle is signaled once the process has exited.
        // SAFETY: No safety requirements beyond passing valid input.
        unsafe { WaitForSingleObject(process.0, 0) }.0 == WAIT_TIMEOUT.0
    }

    fn forget(&self, pid: ProcessId) {
        self.loads.forget(pid);
    }
}

impl BuildTargetPlatform {
    pub(crate) fn new() -> Self {
        Self {
            loads: LoadTracker::new(),
        }
    }
}

/// Closes the process handle when dropped.
struct ProcessHandle(HANDLE);

impl ProcessHandle {
    fn open(pid: ProcessId, access: PROCESS_ACCESS_RIGHTS) -> io::Result<Self> {
        // SAFETY: No safety requirements beyond passing valid input.
        unsafe { OpenProcess(access, false, pid) }
            .map(Self)
            .map_err(io::Error::other)
    }
}

impl Drop for ProcessHandle {
    #[cfg_attr(test, mutants::skip)] // A leaked handle is not observable from tests.
    fn drop(&mut self) {
        // Nothing we can do if closing fails.
        // SAFETY: We own the handle and nobody uses it after this.
        _ = unsafe { CloseHandle(self.0) };
    }
}

fn get_group_sizes() -> Vec<ProcessorId> {
    // SAFETY: No safety requirements.
    let group_count = unsafe { GetMaximumProcessorGroupCount() };

    (0..group_count)
        // SAFETY: No safety requirements.
        .map(|group| unsafe { GetMaximumProcessorCount(group) })
        .collect_vec()
}

// Returns the raw bytes of the core relationship list. We use u64 storage to satisfy the
// alignment of SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX.
fn get_core_relationships() -> io::Result<Vec<u64>> {
    loop {
        let mut required_length: u32 = 0;

        // SAFETY: Pointers must outlive the call (true - local variable lives beyond call).
        let probe_result = unsafe {
            GetLogicalProcessorInformationEx(RelationProcessorCore, None, &raw mut required_length)
        };

        match probe_result {
            Err(e) if e.code() == HRESULT::from_win32(ERROR_INSUFFICIENT_BUFFER.0) => {}
            Err(e) => return Err(io::Error::other(e)),
            Ok(()) => return Ok(Vec::new()),
        }

        let word_count = (required_length as usize).div_ceil(size_of::<u64>());
        let mut buffer = vec![0_u64; word_count];
        let mut final_length = required_length;

        // SAFETY: The buffer is at least `required_length` bytes long and outlives the call.
        let real_result = unsafe {
            GetLogicalProcessorInformationEx(
                RelationProcessorCore,
                Some(buffer.as_mut_ptr().cast()),
                &raw mut final_length,
            )
        };

        match real_result {
            Ok(()) => {
                buffer.truncate((final_length as usize).div_ceil(size_of::<u64>()));
                return Ok(buffer);
            }
            // The set of processors can change at any time. Super unlikely but let's be safe.
            Err(e) if e.code() == HRESULT::from_win32(ERROR_INSUFFICIENT_BUFFER.0) => {}
            Err(e) => return Err(io::Error::other(e)),
        }
    }
}

// FILETIME durations are in 100-nanosecond units.
fn filetime_to_duration(time: FILETIME) -> Duration {
    let units = (u64::from(time.dwHighDateTime) << 32) | u64::from(time.dwLowDateTime);
    Duration::from_nanos(units.saturating_mul(100))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn real_topology_is_not_empty() {
        let processors = BuildTargetPlatform::new().processors().unwrap();

        assert!(!processors.is_empty());
    }

    #[test]
    fn current_process_is_alive() {
        let platform = BuildTargetPlatform::new();

        assert!(platform.is_alive(std::process::id()));

        let load = platform.processor_load(std::process::id()).unwrap();
        assert!(load.abs() < f64::EPSILON);
    }

    #[test]
    fn filetime_units_are_100ns() {
        let time = FILETIME {
            dwLowDateTime: 10_000_000,
            dwHighDateTime: 0,
        };

        assert_eq!(filetime_to_duration(time), Duration::from_secs(1));
    }
}
