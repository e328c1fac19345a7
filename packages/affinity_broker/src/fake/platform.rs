//! Fake platform implementation and the public handle used to drive it.

use std::io;
use std::sync::Arc;

use foldhash::{HashMap, HashMapExt};
use parking_lot::Mutex;

use crate::fake::HardwareBuilder;
use crate::pal::{Platform, ProcessorRecord};
use crate::{Host, ProcessId, ProcessorId};

/// The first process ID handed out by a fake host.
const FIRST_PID: ProcessId = 1000;

/// A simulated host: fake hardware plus a table of simulated worker processes.
///
/// Create one from a [`HardwareBuilder`], pass [`host()`][Self::host] to the scheduler and use
/// the remaining methods to spawn processes, change their load, make them exit and inspect the
/// affinity the scheduler applied to them.
///
/// Cloning the handle gives another view of the same simulated host.
#[derive(Clone, Debug)]
pub struct FakeHost {
    platform: Arc<FakePlatform>,
}

impl FakeHost {
    /// Creates a simulated host with the given hardware and no processes.
    #[must_use]
    pub fn new(hardware: HardwareBuilder) -> Self {
        Self {
            platform: Arc::new(FakePlatform::new(hardware.build())),
        }
    }

    /// The host handle to pass to [`Scheduler::start()`][crate::Scheduler::start].
    #[must_use]
    pub fn host(&self) -> Host {
        Host::fake(Arc::clone(&self.platform))
    }

    /// Starts a simulated process with 0% load and returns its process ID.
    #[must_use]
    pub fn spawn(&self) -> ProcessId {
        let mut state = self.platform.state.lock();

        let pid = state.next_pid;
        state.next_pid = pid.checked_add(1).expect("fake process IDs exhausted");
        state.processes.insert(pid, FakeProcess::default());

        pid
    }

    /// Sets the load the process reports, in percent of one processor.
    ///
    /// # Panics
    ///
    /// Panics if the process was never spawned by this host.
    pub fn set_load(&self, pid: ProcessId, percent: f64) {
        self.platform.with_process(pid, |process| process.load = percent);
    }

    /// Makes the process exit. It will be reported as no longer alive and its load and affinity
    /// can no longer be accessed through the platform.
    ///
    /// # Panics
    ///
    /// Panics if the process was never spawned by this host.
    pub fn exit(&self, pid: ProcessId) {
        self.platform.with_process(pid, |process| process.is_alive = false);
    }

    /// Makes the platform refuse (or stop refusing) affinity changes for the process.
    ///
    /// # Panics
    ///
    /// Panics if the process was never spawned by this host.
    pub fn reject_affinity(&self, pid: ProcessId, reject: bool) {
        self.platform
            .with_process(pid, |process| process.rejects_affinity = reject);
    }

    /// The affinity most recently applied to the process, or `None` if it was never set.
    ///
    /// # Panics
    ///
    /// Panics if the process was never spawned by this host.
    #[must_use]
    pub fn affinity(&self, pid: ProcessId) -> Option<Vec<ProcessorId>> {
        self.platform
            .with_process(pid, |process| process.affinity.clone())
    }

    /// How many times an affinity was successfully applied to the process.
    ///
    /// # Panics
    ///
    /// Panics if the process was never spawned by this host.
    #[must_use]
    pub fn affinity_changes(&self, pid: ProcessId) -> usize {
        self.platform
            .with_process(pid, |process| process.affinity_changes)
    }
}

/// Fake platform that simulates hardware and processes.
#[derive(Debug)]
pub(crate) struct FakePlatform {
    processors: Vec<ProcessorRecord>,
    state: Mutex<FakeState>,
}

#[derive(Debug)]
struct FakeState {
    next_pid: ProcessId,
    processes: HashMap<ProcessId, FakeProcess>,
}

#[derive(Debug)]
struct FakeProcess {
    is_alive: bool,
    load: f64,
    affinity: Option<Vec<ProcessorId>>,
    affinity_changes: usize,
    rejects_affinity: bool,
}

impl Default for FakeProcess {
    fn default() -> Self {
        Self {
            is_alive: true,
            load: 0.0,
            affinity: None,
            affinity_changes: 0,
            rejects_affinity: false,
        }
    }
}

impl FakePlatform {
    fn new(processors: Vec<ProcessorRecord>) -> Self {
        Self {
            processors,
            state: Mutex::new(FakeState {
                next_pid: FIRST_PID,
                processes: HashMap::new(),
            }),
        }
    }

    fn with_process<R>(&self, pid: ProcessId, f: impl FnOnce(&mut FakeProcess) -> R) -> R {
        let mut state = self.state.lock();

        let process = state
            .processes
            .get_mut(&pid)
            .unwrap_or_else(|| panic!("process {pid} was not spawned by this fake host"));

        f(process)
    }

    fn with_live_process<R>(
        &self,
        pid: ProcessId,
        f: impl FnOnce(&mut FakeProcess) -> io::Result<R>,
    ) -> io::Result<R> {
        let mut state = self.state.lock();

        match state.processes.get_mut(&pid) {
            Some(process) if process.is_alive => f(process),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such process: {pid}"),
            )),
        }
    }
}

impl Platform for FakePlatform {
    fn processors(&self) -> io::Result<Vec<ProcessorRecord>> {
        Ok(self.processors.clone())
    }

    // The simulated load is already a per-interval value, so there is no baseline to track.
    fn processor_load(&self, pid: ProcessId) -> io::Result<f64> {
        self.with_live_process(pid, |process| Ok(process.load))
    }

    fn set_affinity(&self, pid: ProcessId, processors: &[ProcessorId]) -> io::Result<()> {
        if processors.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot restrict a process to zero processors",
            ));
        }

        if let Some(unknown) = processors
            .iter()
            .find(|id| !self.processors.iter().any(|p| p.processor_id == **id))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("processor {unknown} does not exist"),
            ));
        }

        self.with_live_process(pid, |process| {
            if process.rejects_affinity {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "affinity change rejected",
                ));
            }

            process.affinity = Some(processors.to_vec());
            process.affinity_changes = process.affinity_changes.saturating_add(1);
            Ok(())
        })
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        self.state
            .lock()
            .processes
            .get(&pid)
            .is_some_and(|process| process.is_alive)
    }

    fn forget(&self, _pid: ProcessId) {}
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(FakeHost: Send, Sync, Clone);

    fn fake() -> FakeHost {
        FakeHost::new(HardwareBuilder::from_counts(nz!(2), nz!(2)))
    }

    #[test]
    fn spawned_processes_get_distinct_pids() {
        let fake = fake();

        let a = fake.spawn();
        let b = fake.spawn();

        assert_ne!(a, b);
        assert!(fake.platform.is_alive(a));
        assert!(fake.platform.is_alive(b));
    }

    #[test]
    fn load_is_reported_as_set() {
        let fake = fake();
        let pid = fake.spawn();

        assert!(fake.platform.processor_load(pid).unwrap().abs() < f64::EPSILON);

        fake.set_load(pid, 90.0);
        assert!((fake.platform.processor_load(pid).unwrap() - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exited_process_is_unreachable() {
        let fake = fake();
        let pid = fake.spawn();

        fake.exit(pid);

        assert!(!fake.platform.is_alive(pid));
        assert_eq!(
            fake.platform.processor_load(pid).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        assert_eq!(
            fake.platform.set_affinity(pid, &[0]).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn affinity_changes_are_counted() {
        let fake = fake();
        let pid = fake.spawn();

        assert_eq!(fake.affinity(pid), None);

        fake.platform.set_affinity(pid, &[0, 1]).unwrap();
        fake.platform.set_affinity(pid, &[2]).unwrap();

        assert_eq!(fake.affinity(pid), Some(vec![2]));
        assert_eq!(fake.affinity_changes(pid), 2);
    }

    #[test]
    fn rejected_affinity_is_not_recorded() {
        let fake = fake();
        let pid = fake.spawn();

        fake.reject_affinity(pid, true);

        fake.platform.set_affinity(pid, &[0]).unwrap_err();
        assert_eq!(fake.affinity(pid), None);
        assert_eq!(fake.affinity_changes(pid), 0);
    }

    #[test]
    fn unknown_processor_is_rejected() {
        let fake = fake();
        let pid = fake.spawn();

        let error = fake.platform.set_affinity(pid, &[99]).unwrap_err();

        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    #[should_panic]
    fn unknown_pid_panics() {
        fake().set_load(1, 50.0);
    }
}
