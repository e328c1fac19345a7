use std::collections::BTreeSet;
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{self, Candidate, Layout, PassKind};
use crate::pal::Platform;
use crate::registry::Registry;
use crate::watcher::Watcher;
use crate::{
    Error, Host, Occupancy, ProcessId, ProcessorId, ResourceDemand, Result, SchedulerConfig,
    Topology, WorkerHandle, WorkerId, WorkerKind, WorkerSnapshot, applier,
};

/// Distributes the processors of a host between registered worker processes.
///
/// Every registered worker states how many processors it needs at minimum, how many it can use
/// at most and how important it is (its quality). The scheduler keeps every worker at or above
/// its minimum whenever the host has enough processors, keeps each worker on as few physical
/// cores as it can, lets busy workers grow into idle capacity and never takes a worker below its
/// minimum to feed a busier one.
///
/// Assignments are recalculated in redistribution passes:
///
/// * A reclaim pass runs whenever workers come or go and only guarantees minimums.
/// * A rebalance pass runs periodically on a background watcher thread and additionally
///   consolidates, grows and steals processors based on observed load.
///
/// All state sits behind a single lock and a pass holds the lock for its whole duration, so
/// every pass sees and commits one consistent snapshot. The scheduler can be shared between
/// threads by reference or wrapped in an [`Arc`]. Dropping it stops the watcher.
///
/// # Example
///
/// ```
/// use affinity_broker::fake::{FakeHost, HardwareBuilder};
/// use affinity_broker::{ResourceDemand, Scheduler, SchedulerConfig};
/// use new_zealand::nz;
///
/// let fake = FakeHost::new(HardwareBuilder::from_counts(nz!(8), nz!(1)));
/// let scheduler = Scheduler::start(
///     fake.host(),
///     SchedulerConfig::new().background_watcher(false),
/// )
/// .unwrap();
///
/// let database = fake.spawn();
/// let handle = scheduler
///     .register(database, ResourceDemand::new().min_cores(2).max_cores(4).quality(1))
///     .unwrap();
///
/// assert_eq!(scheduler.current_assignment(&handle), Some(vec![0, 1]));
/// assert_eq!(fake.affinity(database), Some(vec![0, 1]));
/// ```
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    watcher: Option<Watcher>,
}

/// State shared between the scheduler and its watcher thread.
#[derive(Debug)]
pub(crate) struct Shared {
    host: Host,
    topology: Topology,
    config: SchedulerConfig,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    registry: Registry,

    // Processors reserved at runtime, on top of those reserved when the topology was built.
    excluded: BTreeSet<ProcessorId>,
}

/// What happened during a redistribution pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PassSummary {
    affinity_updates: usize,
    displaced: Vec<WorkerId>,
    short: Vec<WorkerId>,
    exited: Vec<WorkerId>,
}

impl PassSummary {
    /// How many times the platform was asked to change the affinity of a worker.
    #[must_use]
    pub fn affinity_updates(&self) -> usize {
        self.affinity_updates
    }

    /// Workers that lost processors to higher-quality workers during the pass.
    #[must_use]
    pub fn displaced_workers(&self) -> &[WorkerId] {
        &self.displaced
    }

    /// Workers left with fewer processors than their minimum because the host ran out.
    #[must_use]
    pub fn short_workers(&self) -> &[WorkerId] {
        &self.short
    }

    /// Workers whose process had exited and that were removed before the pass.
    #[must_use]
    pub fn exited_workers(&self) -> &[WorkerId] {
        &self.exited
    }
}

impl Scheduler {
    /// Collects the topology of the host and starts the scheduler.
    ///
    /// Unless disabled in the configuration, this also starts the background watcher thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology of the host cannot be determined or if no processors
    /// remain after excluding the reserved ones.
    pub fn start(host: Host, config: SchedulerConfig) -> Result<Self> {
        let topology = Topology::collect(&host, config.reserved())?;

        if config.is_auto_affinity() {
            warn!("automatic processor affinity management is experimental");
        }

        let shared = Arc::new(Shared {
            host,
            topology,
            config,
            state: Mutex::new(State {
                registry: Registry::new(),
                excluded: BTreeSet::new(),
            }),
        });

        let watcher = (shared.config.is_auto_affinity()
            && shared.config.has_background_watcher())
        .then(|| Watcher::start(Arc::clone(&shared)));

        info!(
            processors = shared.topology.processor_count(),
            heterogeneous = shared.topology.is_heterogeneous(),
            watcher = watcher.is_some(),
            "scheduler started"
        );

        Ok(Self { shared, watcher })
    }

    /// Registers a running process as a managed worker and assigns it processors.
    ///
    /// Runs a reclaim pass before returning, so the worker holds its minimum (or as much of it
    /// as the host can provide) when this returns.
    ///
    /// If automatic affinity management is disabled, the worker is not tracked and an
    /// [unmanaged][WorkerKind::Unmanaged] handle is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the demand is invalid or the process is already registered.
    pub fn register(&self, pid: ProcessId, demand: ResourceDemand) -> Result<WorkerHandle> {
        demand.validate()?;

        let mut state = self.shared.state.lock();

        if !self.shared.config.is_auto_affinity() {
            let id = state.registry.next_id();

            debug!(
                worker = %id,
                pid,
                "automatic affinity management is disabled, worker is not managed"
            );

            return Ok(WorkerHandle::new(id, pid, WorkerKind::Unmanaged));
        }

        let id = state.registry.insert_managed(pid, demand.clone())?;

        info!(
            worker = %id,
            pid,
            label = demand.get_label(),
            demand = %demand,
            "registered worker"
        );

        self.shared.run_pass(&mut state, PassKind::Reclaim);

        Ok(WorkerHandle::new(id, pid, WorkerKind::Managed))
    }

    /// Pins a running process to a fixed set of processors.
    ///
    /// The affinity is applied immediately and never changed by the scheduler. The processors
    /// stay available to managed workers. Reserved processors are accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the set is empty, names a processor the host does not have, the
    /// process is already registered or the platform refuses the affinity.
    pub fn register_fixed(
        &self,
        pid: ProcessId,
        processors: impl IntoIterator<Item = ProcessorId>,
    ) -> Result<WorkerHandle> {
        let processors = processors
            .into_iter()
            .sorted_unstable()
            .dedup()
            .collect_vec();

        if processors.is_empty() {
            return Err(Error::EmptyAffinity);
        }

        if let Some(unknown) = processors
            .iter()
            .find(|p| self.shared.topology.placement(**p).is_none())
        {
            return Err(Error::UnknownProcessor(*unknown));
        }

        let mut state = self.shared.state.lock();

        if state.registry.contains_pid(pid) {
            return Err(Error::AlreadyManaged(pid));
        }

        self.shared
            .host
            .platform()
            .set_affinity(pid, &processors)
            .map_err(|source| Error::Affinity { pid, source })?;

        let id = state.registry.insert_pinned(pid, processors.clone())?;

        info!(
            worker = %id,
            pid,
            processors = ?processors,
            "registered worker with fixed affinity"
        );

        Ok(WorkerHandle::new(id, pid, WorkerKind::Fixed))
    }

    /// Stops tracking a worker. Its current affinity is left as it is.
    ///
    /// The processors of a managed worker are handed to workers below their minimum right away
    /// and to busy workers on the next rebalance pass.
    ///
    /// Returns whether the worker was registered.
    pub fn deregister(&self, handle: &WorkerHandle) -> bool {
        let mut state = self.shared.state.lock();

        let Some(pid) = state.registry.remove(handle.id()) else {
            return false;
        };

        self.shared.host.platform().forget(pid);

        info!(worker = %handle.id(), pid, "deregistered worker");

        if handle.kind() == WorkerKind::Managed {
            self.shared.run_pass(&mut state, PassKind::Reclaim);
        }

        true
    }

    /// The processors the worker currently holds, in ascending order.
    ///
    /// Returns `None` if the worker is not registered (anymore) or is unmanaged. The assignment
    /// of a managed worker may be empty if the host has no processors left for it.
    #[must_use]
    pub fn current_assignment(&self, handle: &WorkerHandle) -> Option<Vec<ProcessorId>> {
        let state = self.shared.state.lock();

        state
            .registry
            .get(handle.id())
            .map(|worker| worker.assignment.clone())
            .or_else(|| {
                state
                    .registry
                    .get_pinned(handle.id())
                    .map(|pinned| pinned.processors.clone())
            })
    }

    /// A snapshot of every managed worker, in registration order.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.shared.state.lock().registry.snapshot()
    }

    /// Runs a rebalance pass now, without waiting for the watcher.
    pub fn rebalance(&self) -> PassSummary {
        self.shared.rebalance()
    }

    /// Removes workers whose process has exited and runs a reclaim pass now, without waiting
    /// for the watcher.
    pub fn reclaim(&self) -> PassSummary {
        self.shared.reclaim()
    }

    /// Takes processors away from all workers, for example to hand them to the system.
    ///
    /// Workers holding them are reassigned in a reclaim pass before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if a processor is not a usable processor of the host. Nothing is
    /// reserved in that case.
    pub fn reserve(
        &self,
        processors: impl IntoIterator<Item = ProcessorId>,
    ) -> Result<PassSummary> {
        let processors = self.usable_processors(processors)?;

        let mut state = self.shared.state.lock();
        state.excluded.extend(processors.iter().copied());

        info!(processors = ?processors, "reserved processors");

        Ok(self.shared.run_pass(&mut state, PassKind::Reclaim))
    }

    /// Makes processors reserved with [`reserve()`][Self::reserve] available to workers again.
    ///
    /// Processors reserved in the configuration cannot be released.
    ///
    /// # Errors
    ///
    /// Returns an error if a processor is not a usable processor of the host.
    pub fn release(
        &self,
        processors: impl IntoIterator<Item = ProcessorId>,
    ) -> Result<PassSummary> {
        let processors = self.usable_processors(processors)?;

        let mut state = self.shared.state.lock();

        for processor in &processors {
            state.excluded.remove(processor);
        }

        info!(processors = ?processors, "released processors");

        Ok(self.shared.run_pass(&mut state, PassKind::Reclaim))
    }

    fn usable_processors(
        &self,
        processors: impl IntoIterator<Item = ProcessorId>,
    ) -> Result<Vec<ProcessorId>> {
        let processors = processors.into_iter().collect_vec();

        if let Some(unknown) = processors
            .iter()
            .find(|p| !self.shared.topology.contains(**p))
        {
            return Err(Error::UnknownProcessor(*unknown));
        }

        Ok(processors)
    }

    /// Who holds which processor right now.
    #[must_use]
    pub fn occupancy(&self) -> Occupancy {
        let state = self.shared.state.lock();

        Occupancy::capture(&self.shared.topology, &state.excluded, &state.registry)
    }

    /// The topology of the host, as collected when the scheduler started.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.shared.topology
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Waits for a pass in progress on the watcher thread to finish.
        drop(self.watcher.take());

        debug!("scheduler stopped");
    }
}

impl Shared {
    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn rebalance(&self) -> PassSummary {
        let mut state = self.state.lock();

        self.run_pass(&mut state, PassKind::Rebalance)
    }

    pub(crate) fn reclaim(&self) -> PassSummary {
        let mut state = self.state.lock();

        let exited = self.reap(&mut state);
        let mut summary = self.run_pass(&mut state, PassKind::Reclaim);
        summary.exited = exited;

        summary
    }

    /// Whether any registered worker's process has exited. Liveness is checked without
    /// holding the lock.
    pub(crate) fn has_exited_workers(&self) -> bool {
        let processes = self.state.lock().registry.processes();

        let platform = self.host.platform();

        processes.iter().any(|(_, pid)| !platform.is_alive(*pid))
    }

    fn reap(&self, state: &mut State) -> Vec<WorkerId> {
        let platform = self.host.platform();

        let exited = state
            .registry
            .processes()
            .into_iter()
            .filter(|(_, pid)| !platform.is_alive(*pid))
            .collect_vec();

        for (id, pid) in &exited {
            state.registry.remove(*id);
            platform.forget(*pid);

            info!(worker = %id, pid, "worker exited");
        }

        exited.into_iter().map(|(id, _)| id).collect_vec()
    }

    fn run_pass(&self, state: &mut State, kind: PassKind) -> PassSummary {
        let State { registry, excluded } = state;

        if registry.managed().next().is_none() {
            return PassSummary::default();
        }

        let platform = self.host.platform();

        for worker in registry.managed_mut() {
            worker.load = platform.processor_load(worker.pid).unwrap_or_else(|e| {
                debug!(
                    worker = %worker.id,
                    pid = worker.pid,
                    error = %e,
                    "failed to sample load, assuming idle"
                );
                0.0
            });
        }

        let layout = Layout::new(&self.topology, excluded);

        let candidates = registry
            .managed()
            .map(|worker| Candidate {
                id: worker.id,
                min_cores: worker.demand.get_min_cores(),
                max_cores: worker.demand.effective_max_cores(),
                quality: worker.demand.get_quality(),
                load: worker.load,
                streak: worker.streak,
                held: worker.assignment.clone(),
            })
            .collect_vec();

        let outcome = engine::redistribute(&layout, &candidates, kind, self.config.thresholds());

        let mut summary = PassSummary {
            displaced: outcome.displaced,
            ..PassSummary::default()
        };

        for ((worker, assignment), streak) in registry
            .managed_mut()
            .zip(outcome.assignments)
            .zip(outcome.streaks)
        {
            worker.assignment = assignment;
            worker.streak = streak;

            if applier::apply(platform, worker) {
                summary.affinity_updates = summary.affinity_updates.saturating_add(1);
            }

            let min_cores = worker.demand.get_min_cores();

            if worker.assignment.len() < min_cores {
                // Rebalance passes would repeat this every few seconds.
                if kind == PassKind::Reclaim {
                    warn!(
                        worker = %worker.id,
                        pid = worker.pid,
                        label = worker.demand.get_label(),
                        assigned = worker.assignment.len(),
                        min_cores,
                        "not enough processors to satisfy worker minimum"
                    );
                }

                summary.short.push(worker.id);
            }
        }

        for id in &summary.displaced {
            debug!(worker = %id, "worker was displaced by a higher-quality worker");
        }

        debug!(
            ?kind,
            workers = candidates.len(),
            affinity_updates = summary.affinity_updates,
            "completed redistribution pass"
        );

        summary
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use crate::ProcessorState;
    use crate::fake::{FakeHost, HardwareBuilder};

    use super::*;

    assert_impl_all!(Scheduler: Send, Sync);
    assert_impl_all!(PassSummary: Send, Sync, Clone);

    fn start(fake: &FakeHost) -> Scheduler {
        Scheduler::start(fake.host(), SchedulerConfig::new().background_watcher(false)).unwrap()
    }

    fn eight_cores() -> FakeHost {
        FakeHost::new(HardwareBuilder::from_counts(nz!(8), nz!(1)))
    }

    #[test]
    fn register_assigns_minimum() {
        let fake = eight_cores();
        let scheduler = start(&fake);
        let pid = fake.spawn();

        let handle = scheduler
            .register(pid, ResourceDemand::new().min_cores(3))
            .unwrap();

        assert_eq!(handle.kind(), WorkerKind::Managed);
        assert_eq!(scheduler.current_assignment(&handle), Some(vec![0, 1, 2]));
        assert_eq!(fake.affinity(pid), Some(vec![0, 1, 2]));
    }

    #[test]
    fn invalid_demand_is_rejected_before_registration() {
        let fake = eight_cores();
        let scheduler = start(&fake);
        let pid = fake.spawn();

        let result = scheduler.register(pid, ResourceDemand::new().min_cores(0));

        assert!(matches!(result, Err(Error::InvalidDemand { .. })));
        assert!(scheduler.workers().is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let fake = eight_cores();
        let scheduler = start(&fake);
        let pid = fake.spawn();

        scheduler.register(pid, ResourceDemand::new()).unwrap();

        assert!(matches!(
            scheduler.register(pid, ResourceDemand::new()),
            Err(Error::AlreadyManaged(p)) if p == pid
        ));
    }

    #[test]
    fn disabled_auto_affinity_does_not_manage() {
        let fake = eight_cores();
        let scheduler =
            Scheduler::start(fake.host(), SchedulerConfig::new().auto_affinity(false)).unwrap();
        let pid = fake.spawn();

        let handle = scheduler.register(pid, ResourceDemand::new()).unwrap();

        assert_eq!(handle.kind(), WorkerKind::Unmanaged);
        assert_eq!(scheduler.current_assignment(&handle), None);
        assert_eq!(fake.affinity(pid), None);
        assert!(scheduler.workers().is_empty());
    }

    #[test]
    fn fixed_affinity_is_applied_and_left_alone() {
        let fake = eight_cores();
        let scheduler = start(&fake);
        let pinned = fake.spawn();

        let handle = scheduler.register_fixed(pinned, [5, 4, 5]).unwrap();

        assert_eq!(handle.kind(), WorkerKind::Fixed);
        assert_eq!(fake.affinity(pinned), Some(vec![4, 5]));
        assert_eq!(scheduler.current_assignment(&handle), Some(vec![4, 5]));

        let managed = fake.spawn();
        scheduler
            .register(managed, ResourceDemand::new().min_cores(2))
            .unwrap();
        scheduler.rebalance();

        assert_eq!(fake.affinity_changes(pinned), 1);
        assert_eq!(
            scheduler.occupancy().state(4),
            Some(&ProcessorState::Pinned { worker: handle.id() })
        );
    }

    #[test]
    fn fixed_affinity_validation() {
        let fake = eight_cores();
        let scheduler = start(&fake);
        let pid = fake.spawn();

        assert!(matches!(
            scheduler.register_fixed(pid, Vec::new()),
            Err(Error::EmptyAffinity)
        ));
        assert!(matches!(
            scheduler.register_fixed(pid, [1, 99]),
            Err(Error::UnknownProcessor(99))
        ));

        fake.reject_affinity(pid, true);

        assert!(matches!(
            scheduler.register_fixed(pid, [1]),
            Err(Error::Affinity { pid: p, .. }) if p == pid
        ));

        // Nothing was registered by the failed attempts.
        fake.reject_affinity(pid, false);
        scheduler.register_fixed(pid, [1]).unwrap();
    }

    #[test]
    fn deregister_frees_processors_for_short_workers() {
        let fake = FakeHost::new(HardwareBuilder::from_counts(nz!(2), nz!(1)));
        let scheduler = start(&fake);
        let first = fake.spawn();
        let second = fake.spawn();

        let first_handle = scheduler
            .register(first, ResourceDemand::new().min_cores(2))
            .unwrap();
        let second_handle = scheduler.register(second, ResourceDemand::new()).unwrap();

        assert_eq!(scheduler.current_assignment(&second_handle), Some(vec![]));

        assert!(scheduler.deregister(&first_handle));
        assert!(!scheduler.deregister(&first_handle));

        assert_eq!(scheduler.current_assignment(&first_handle), None);
        assert_eq!(scheduler.current_assignment(&second_handle), Some(vec![0]));

        // The affinity of the deregistered worker is not touched.
        assert_eq!(fake.affinity(first), Some(vec![0, 1]));
    }

    #[test]
    fn reclaim_removes_exited_workers() {
        let fake = eight_cores();
        let scheduler = start(&fake);
        let pid = fake.spawn();

        let handle = scheduler.register(pid, ResourceDemand::new()).unwrap();
        fake.exit(pid);

        let summary = scheduler.reclaim();

        assert_eq!(summary.exited_workers(), &[handle.id()]);
        assert_eq!(scheduler.current_assignment(&handle), None);
    }

    #[test]
    fn reserve_moves_workers_off_reserved_processors() {
        let fake = FakeHost::new(HardwareBuilder::from_counts(nz!(3), nz!(1)));
        let scheduler = start(&fake);
        let pid = fake.spawn();

        let handle = scheduler.register(pid, ResourceDemand::new()).unwrap();
        assert_eq!(scheduler.current_assignment(&handle), Some(vec![0]));

        let summary = scheduler.reserve([0]).unwrap();

        assert_eq!(summary.affinity_updates(), 1);
        assert_eq!(scheduler.current_assignment(&handle), Some(vec![1]));
        assert_eq!(
            scheduler.occupancy().state(0),
            Some(&ProcessorState::Reserved)
        );

        scheduler.release([0]).unwrap();
        assert_eq!(scheduler.occupancy().state(0), Some(&ProcessorState::Free));
    }

    #[test]
    fn reserve_rejects_unknown_processor() {
        let fake = eight_cores();
        let scheduler = start(&fake);

        assert!(matches!(
            scheduler.reserve([3, 100]),
            Err(Error::UnknownProcessor(100))
        ));
        assert_eq!(scheduler.occupancy().free_count(), 8);
    }

    #[test]
    fn shortfall_is_reported() {
        let fake = FakeHost::new(HardwareBuilder::from_counts(nz!(2), nz!(1)));
        let scheduler = start(&fake);
        let pid = fake.spawn();

        let handle = scheduler
            .register(pid, ResourceDemand::new().min_cores(3))
            .unwrap();

        assert_eq!(scheduler.current_assignment(&handle), Some(vec![0, 1]));
        assert!(scheduler.workers()[0].is_short());
        assert_eq!(scheduler.rebalance().short_workers(), &[handle.id()]);
    }

    #[test]
    fn topology_is_exposed() {
        let fake = eight_cores();
        let scheduler = start(&fake);

        assert_eq!(scheduler.topology().processor_count(), 8);
    }
}
