use std::io;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use foldhash::{HashMap, HashMapExt};
use itertools::Itertools;
use libc::{cpu_set_t, pid_t};

use crate::load::LoadTracker;
use crate::pal::linux::{Bindings, BindingsFacade, Filesystem, FilesystemFacade};
use crate::pal::{Platform, ProcessorRecord};
use crate::{CoreId, ProcessId, ProcessorId, TierId};

/// Capacity values within this many percent of the slowest value of a tier belong to that tier.
///
/// Hybrid processors report slightly different capacities even for identical cores (e.g. the
/// "favored cores" of a performance cluster), so exact equality would split real tiers apart.
const TIER_GAP_PERCENT: u64 = 15;

/// The platform that matches the crate's build target.
///
/// You would only use a different platform in unit tests that need to mock the platform.
/// Even then, whenever possible, unit tests should use the real platform for maximum realism.
#[derive(Debug)]
pub(crate) struct BuildTargetPlatform {
    bindings: BindingsFacade,
    fs: FilesystemFacade,

    loads: LoadTracker,
    clock_ticks_per_second: OnceLock<u64>,
}

impl Platform for BuildTargetPlatform {
    fn processors(&self) -> io::Result<Vec<ProcessorRecord>> {
        // We combine multiple sources of information:
        // 1. /sys/devices/system/cpu/online gives us the set of processors available.
        // 2. cpu*/topology/thread_siblings_list gives us the physical core of each processor.
        // 3. cpu*/cpu_capacity or one of its substitutes gives us the performance tier.
        // 4. /proc/self/status gives us the set of processors allowed for the current process.
        let online = parse_cpulist(&self.fs.get_cpu_online_contents()?)?;

        if online.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "/sys/devices/system/cpu/online lists no processors",
            ));
        }

        let tiers = self.get_tiers(&online);
        let allowed = self.get_processors_allowed_for_current_process();

        Ok(online
            .iter()
            .map(|&processor_id| {
                let tier_id = tiers.get(&processor_id).copied().unwrap_or_default();

                // Processors we are not allowed to use ourselves cannot be granted to workers
                // either, as the workers are usually our child processes.
                let is_forbidden = allowed
                    .as_ref()
                    .is_some_and(|allowed| !allowed.contains(&processor_id));

                ProcessorRecord::new(processor_id, self.get_core_id(processor_id), tier_id)
                    .reserved_hint(is_forbidden)
            })
            .collect_vec())
    }

    fn processor_load(&self, pid: ProcessId) -> io::Result<f64> {
        let stat = ProcessStat::parse(&self.fs.get_proc_stat_contents(pid)?)?;
        let processor_time = self.ticks_to_duration(stat.processor_ticks())?;

        Ok(self.loads.record(pid, processor_time, Instant::now()))
    }

    fn set_affinity(&self, pid: ProcessId, processors: &[ProcessorId]) -> io::Result<()> {
        let cpu_set = cpu_set_from(processors)?;
        let main_thread = to_pid_t(pid)?;

        // Threads inherit the affinity of their creator only when they are created, so every
        // existing thread needs to be updated individually. If the main thread is gone, so is
        // the process and we report that as an error.
        self.bindings.sched_setaffinity(main_thread, &cpu_set)?;

        let Ok(threads) = self.fs.get_proc_task_ids(pid) else {
            return Ok(());
        };

        for thread in threads.into_iter().filter(|tid| *tid != pid) {
            match self.bindings.sched_setaffinity(to_pid_t(thread)?, &cpu_set) {
                Ok(()) => {}
                // The thread exited after we listed it.
                Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        self.fs
            .get_proc_stat_contents(pid)
            .ok()
            .and_then(|contents| ProcessStat::parse(&contents).ok())
            .is_some_and(|stat| !stat.is_terminated())
    }

    fn forget(&self, pid: ProcessId) {
        self.loads.forget(pid);
    }
}

impl BuildTargetPlatform {
    pub(crate) fn new() -> Self {
        Self::with_sources(BindingsFacade::target(), FilesystemFacade::target())
    }

    pub(super) fn with_sources(bindings: BindingsFacade, fs: FilesystemFacade) -> Self {
        Self {
            bindings,
            fs,
            loads: LoadTracker::new(),
            clock_ticks_per_second: OnceLock::new(),
        }
    }

    fn get_core_id(&self, processor_id: ProcessorId) -> CoreId {
        // The siblings list includes the processor itself. We name the core after its lowest
        // numbered processor, which makes core IDs unique across packages.
        self.fs
            .get_cpu_thread_siblings_contents(processor_id)
            .and_then(|contents| parse_cpulist(&contents).ok())
            .and_then(|siblings| siblings.into_iter().min())
            .unwrap_or(processor_id)
    }

    fn get_tiers(&self, processors: &[ProcessorId]) -> HashMap<ProcessorId, TierId> {
        type CapacitySource = fn(&FilesystemFacade, ProcessorId) -> Option<String>;

        // In order of preference. We only use a source if it covers every processor, as the
        // values from different sources are not comparable with each other.
        let sources: [CapacitySource; 3] = [
            |fs, id| fs.get_cpu_capacity_contents(id),
            |fs, id| fs.get_cpu_highest_perf_contents(id),
            |fs, id| fs.get_cpu_max_freq_contents(id),
        ];

        sources
            .iter()
            .find_map(|source| {
                processors
                    .iter()
                    .map(|&id| {
                        source(&self.fs, id)
                            .and_then(|contents| contents.trim().parse::<u64>().ok())
                            .map(|capacity| (id, capacity))
                    })
                    .collect::<Option<Vec<_>>>()
            })
            .map(|capacities| cluster_into_tiers(&capacities))
            .unwrap_or_default()
    }

    fn get_processors_allowed_for_current_process(&self) -> Option<Vec<ProcessorId>> {
        // On Linux, mechanisms like cgroups may limit what processors we are allowed to use.
        // The allowed list is in /proc/self/status.
        //
        // Example content:
        // Speculation_Store_Bypass:       thread vulnerable
        // Cpus_allowed:   ffffffff
        // Cpus_allowed_list:      0-31
        // Mems_allowed:   1
        let status = self.fs.get_proc_self_status_contents()?;

        status
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim() == "Cpus_allowed_list")
            .and_then(|(_, value)| parse_cpulist(value).ok())
    }

    fn ticks_to_duration(&self, ticks: u64) -> io::Result<Duration> {
        let ticks_per_second = match self.clock_ticks_per_second.get() {
            Some(value) => *value,
            None => {
                let value = self.bindings.clock_ticks_per_second()?;
                *self.clock_ticks_per_second.get_or_init(|| value)
            }
        };

        let whole_seconds = ticks.checked_div(ticks_per_second).unwrap_or_default();
        let remainder_ticks = ticks.checked_rem(ticks_per_second).unwrap_or_default();
        let remainder_nanos = remainder_ticks
            .saturating_mul(1_000_000_000)
            .checked_div(ticks_per_second)
            .unwrap_or_default();

        Ok(Duration::from_secs(whole_seconds).saturating_add(Duration::from_nanos(remainder_nanos)))
    }
}

/// Assigns tier IDs to capacity values, slowest tier 0. A new tier starts whenever a value
/// exceeds the slowest value of the current tier by more than `TIER_GAP_PERCENT`.
fn cluster_into_tiers(capacities: &[(ProcessorId, u64)]) -> HashMap<ProcessorId, TierId> {
    let mut tier_of_capacity = HashMap::new();
    let mut tier: TierId = 0;
    let mut tier_base: Option<u64> = None;

    for capacity in capacities
        .iter()
        .map(|(_, capacity)| *capacity)
        .sorted_unstable()
        .dedup()
    {
        match tier_base {
            None => tier_base = Some(capacity),
            Some(base)
                if capacity.saturating_mul(100)
                    > base.saturating_mul(TIER_GAP_PERCENT.saturating_add(100)) =>
            {
                tier = tier.saturating_add(1);
                tier_base = Some(capacity);
            }
            Some(_) => {}
        }

        tier_of_capacity.insert(capacity, tier);
    }

    capacities
        .iter()
        .map(|(id, capacity)| {
            (
                *id,
                tier_of_capacity.get(capacity).copied().unwrap_or_default(),
            )
        })
        .collect()
}

fn parse_cpulist(contents: &str) -> io::Result<Vec<ProcessorId>> {
    cpulist::parse(contents.trim()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn to_pid_t(pid: ProcessId) -> io::Result<pid_t> {
    pid_t::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn cpu_set_from(processors: &[ProcessorId]) -> io::Result<cpu_set_t> {
    if processors.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot restrict a process to zero processors",
        ));
    }

    #[expect(
        clippy::cast_sign_loss,
        reason = "CPU_SETSIZE is a small positive constant"
    )]
    let max_processors = libc::CPU_SETSIZE as usize;

    // SAFETY: Zero-initialized cpu_set_t is a valid value.
    let mut cpu_set: cpu_set_t = unsafe { std::mem::zeroed() };

    for &processor in processors {
        let index = usize::try_from(processor)
            .ok()
            .filter(|index| *index < max_processors)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("processor {processor} does not fit in a fixed-size cpu_set_t"),
                )
            })?;

        // SAFETY: We checked above that the index is within the bounds of the set.
        unsafe {
            libc::CPU_SET(index, &mut cpu_set);
        }
    }

    Ok(cpu_set)
}

/// The parts of /proc/{pid}/stat we care about.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct ProcessStat {
    state: char,
    user_ticks: u64,
    system_ticks: u64,
}

impl ProcessStat {
    // Fields after the command name, zero-based.
    const STATE_INDEX: usize = 0;
    const USER_TICKS_INDEX: usize = 11;
    const SYSTEM_TICKS_INDEX: usize = 12;

    fn parse(contents: &str) -> io::Result<Self> {
        // Example content:
        // 1234 (my (weird) worker) S 1 1234 1234 0 -1 4194560 1000 0 0 0 250 75 0 0 20 0 4 ...
        //
        // The command name may itself contain spaces and parentheses, so we skip to the last
        // closing parenthesis before splitting.
        let after_command = contents
            .rfind(')')
            .and_then(|index| contents.get(index.saturating_add(1)..))
            .ok_or_else(|| invalid_stat(contents))?;

        let fields = after_command.split_whitespace().collect_vec();

        let state = fields
            .get(Self::STATE_INDEX)
            .and_then(|field| field.chars().next())
            .ok_or_else(|| invalid_stat(contents))?;

        let parse_ticks = |index: usize| {
            fields
                .get(index)
                .and_then(|field| field.parse::<u64>().ok())
                .ok_or_else(|| invalid_stat(contents))
        };

        Ok(Self {
            state,
            user_ticks: parse_ticks(Self::USER_TICKS_INDEX)?,
            system_ticks: parse_ticks(Self::SYSTEM_TICKS_INDEX)?,
        })
    }

    fn processor_ticks(&self) -> u64 {
        self.user_ticks.saturating_add(self.system_ticks)
    }

    // Zombie or dead. A zombie has exited but its parent has not yet collected the exit code.
    fn is_terminated(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

fn invalid_stat(contents: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unrecognized /proc/<pid>/stat format: {contents}"),
    )
}

#[allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "we need not worry in tests"
)]
