use std::collections::BTreeMap;

use derive_more::Display;
use foldhash::{HashMap, HashMapExt};
use itertools::Itertools;

use crate::{Error, ProcessId, ProcessorId, ResourceDemand, Result};

/// Identifies a worker registered with a [`Scheduler`][crate::Scheduler].
///
/// Worker IDs are assigned in registration order and never reused by the same scheduler, so
/// they double as the final tie-breaker when two workers are otherwise equal in priority.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("worker {_0}")]
pub struct WorkerId(u64);

impl WorkerId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// What the scheduler does with a registered worker.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum WorkerKind {
    /// The scheduler computes and applies the worker's affinity.
    Managed,

    /// The worker was pinned to a caller-chosen set of processors that the scheduler never
    /// changes.
    Fixed,

    /// Automatic affinity management is disabled, so the scheduler does not track the worker.
    Unmanaged,
}

/// Returned by the scheduler when a worker is registered. Used to refer to the worker later.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct WorkerHandle {
    id: WorkerId,
    pid: ProcessId,
    kind: WorkerKind,
}

impl WorkerHandle {
    pub(crate) fn new(id: WorkerId, pid: ProcessId, kind: WorkerKind) -> Self {
        Self { id, pid, kind }
    }

    /// The ID of the worker.
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The operating system process of the worker.
    #[must_use]
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Whether the scheduler manages the worker's affinity.
    #[must_use]
    pub fn kind(&self) -> WorkerKind {
        self.kind
    }
}

/// A point-in-time view of a managed worker.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerSnapshot {
    id: WorkerId,
    pid: ProcessId,
    demand: ResourceDemand,
    assignment: Vec<ProcessorId>,
    load: f64,
    streak: u32,
}

impl WorkerSnapshot {
    /// The ID of the worker.
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The operating system process of the worker.
    #[must_use]
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// The label of the worker, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.demand.get_label()
    }

    /// The resource demand the worker was registered with.
    #[must_use]
    pub fn demand(&self) -> &ResourceDemand {
        &self.demand
    }

    /// The processors currently assigned to the worker, in ascending order.
    #[must_use]
    pub fn assignment(&self) -> &[ProcessorId] {
        &self.assignment
    }

    /// The load observed during the most recent pass, in percent of one processor.
    #[must_use]
    pub fn load(&self) -> f64 {
        self.load
    }

    /// How many consecutive cooperative passes observed the worker above the steal threshold.
    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Whether the worker holds fewer processors than its guaranteed minimum.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.assignment.len() < self.demand.get_min_cores()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Worker {
    pub(crate) id: WorkerId,
    pub(crate) pid: ProcessId,
    pub(crate) demand: ResourceDemand,

    // Sorted. May be empty if nothing could be allocated.
    pub(crate) assignment: Vec<ProcessorId>,

    // What the platform last accepted, if anything.
    pub(crate) applied: Option<Vec<ProcessorId>>,

    pub(crate) load: f64,
    pub(crate) streak: u32,
}

impl Worker {
    pub(crate) fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            pid: self.pid,
            demand: self.demand.clone(),
            assignment: self.assignment.clone(),
            load: self.load,
            streak: self.streak,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PinnedWorker {
    pub(crate) pid: ProcessId,
    pub(crate) processors: Vec<ProcessorId>,
}

/// The table of workers known to a scheduler.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    managed: BTreeMap<WorkerId, Worker>,
    pinned: BTreeMap<WorkerId, PinnedWorker>,
    by_pid: HashMap<ProcessId, WorkerId>,
    next_raw_id: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            managed: BTreeMap::new(),
            pinned: BTreeMap::new(),
            by_pid: HashMap::new(),
            next_raw_id: 0,
        }
    }

    pub(crate) fn insert_managed(
        &mut self,
        pid: ProcessId,
        demand: ResourceDemand,
    ) -> Result<WorkerId> {
        let id = self.claim(pid)?;

        self.managed.insert(
            id,
            Worker {
                id,
                pid,
                demand,
                assignment: Vec::new(),
                applied: None,
                load: 0.0,
                streak: 0,
            },
        );

        Ok(id)
    }

    pub(crate) fn insert_pinned(
        &mut self,
        pid: ProcessId,
        processors: Vec<ProcessorId>,
    ) -> Result<WorkerId> {
        let id = self.claim(pid)?;

        self.pinned.insert(id, PinnedWorker { pid, processors });

        Ok(id)
    }

    fn claim(&mut self, pid: ProcessId) -> Result<WorkerId> {
        if self.by_pid.contains_key(&pid) {
            return Err(Error::AlreadyManaged(pid));
        }

        let id = self.next_id();
        self.by_pid.insert(pid, id);

        Ok(id)
    }

    /// Hands out a worker ID without tracking anything under it.
    pub(crate) fn next_id(&mut self) -> WorkerId {
        let id = WorkerId(self.next_raw_id);

        self.next_raw_id = self
            .next_raw_id
            .checked_add(1)
            .expect("worker ID space exhausted - registering 2^64 workers is not realistic");

        id
    }

    pub(crate) fn contains_pid(&self, pid: ProcessId) -> bool {
        self.by_pid.contains_key(&pid)
    }

    /// Removes a managed or pinned worker, returning its process ID if it was registered.
    pub(crate) fn remove(&mut self, id: WorkerId) -> Option<ProcessId> {
        let pid = self
            .managed
            .remove(&id)
            .map(|worker| worker.pid)
            .or_else(|| self.pinned.remove(&id).map(|pinned| pinned.pid))?;

        self.by_pid.remove(&pid);

        Some(pid)
    }

    pub(crate) fn get(&self, id: WorkerId) -> Option<&Worker> {
        self.managed.get(&id)
    }

    pub(crate) fn get_pinned(&self, id: WorkerId) -> Option<&PinnedWorker> {
        self.pinned.get(&id)
    }

    /// Managed workers in registration order.
    pub(crate) fn managed(&self) -> impl Iterator<Item = &Worker> {
        self.managed.values()
    }

    pub(crate) fn managed_mut(&mut self) -> impl Iterator<Item = &mut Worker> {
        self.managed.values_mut()
    }

    pub(crate) fn pinned(&self) -> impl Iterator<Item = (WorkerId, &PinnedWorker)> {
        self.pinned.iter().map(|(id, pinned)| (*id, pinned))
    }

    /// Every registered worker, managed or pinned, with its process ID.
    pub(crate) fn processes(&self) -> Vec<(WorkerId, ProcessId)> {
        self.by_pid
            .iter()
            .map(|(pid, id)| (*id, *pid))
            .sorted_unstable()
            .collect_vec()
    }

    pub(crate) fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.managed.values().map(Worker::snapshot).collect_vec()
    }
}
