//! Point-in-time view of which worker holds which processor, for diagnostics.

use std::collections::BTreeSet;
use std::fmt;

use foldhash::{HashMap, HashMapExt};
use itertools::Itertools;

use crate::registry::Registry;
use crate::{CoreId, ProcessorId, TierId, Topology, WorkerId};

/// Every processor of the host grouped by tier and physical core, with its current owner.
///
/// Reserved processors are included so that exporters can draw the whole host. Tiers are
/// listed fastest first, cores and processors in ascending ID order.
///
/// The [`Display`][fmt::Display] implementation renders one line per physical core.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Occupancy {
    tiers: Vec<TierOccupancy>,
}

/// The physical cores of one tier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TierOccupancy {
    tier: TierId,
    cores: Vec<CoreOccupancy>,
}

/// The logical processors of one physical core.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreOccupancy {
    core: CoreId,
    processors: Vec<ProcessorOccupancy>,
}

/// One logical processor and its state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessorOccupancy {
    processor: ProcessorId,
    state: ProcessorState,
}

/// Who, if anyone, is using a logical processor.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ProcessorState {
    /// Nobody holds the processor.
    Free,

    /// The processor is reserved for system use, either at startup or at runtime.
    Reserved,

    /// The processor is assigned to a managed worker.
    Owned {
        /// The worker holding the processor.
        worker: WorkerId,

        /// The label of the worker, if any.
        label: Option<String>,
    },

    /// A worker registered with a fixed affinity includes the processor.
    Pinned {
        /// The pinned worker.
        worker: WorkerId,
    },
}

impl Occupancy {
    pub(crate) fn capture(
        topology: &Topology,
        excluded: &BTreeSet<ProcessorId>,
        registry: &Registry,
    ) -> Self {
        let mut states: HashMap<ProcessorId, ProcessorState> = HashMap::new();

        for (id, pinned) in registry.pinned() {
            for processor in &pinned.processors {
                states.insert(*processor, ProcessorState::Pinned { worker: id });
            }
        }

        // Managed ownership wins over pins if a caller pinned onto managed processors.
        for worker in registry.managed() {
            for processor in &worker.assignment {
                states.insert(
                    *processor,
                    ProcessorState::Owned {
                        worker: worker.id,
                        label: worker.demand.get_label().map(str::to_owned),
                    },
                );
            }
        }

        let tiers = topology
            .all_processors()
            .iter()
            .rev()
            .map(|(tier, cores)| TierOccupancy {
                tier: *tier,
                cores: cores
                    .iter()
                    .map(|(core, processors)| CoreOccupancy {
                        core: *core,
                        processors: processors
                            .iter()
                            .map(|processor| ProcessorOccupancy {
                                processor: *processor,
                                state: if topology.is_reserved(*processor)
                                    || excluded.contains(processor)
                                {
                                    ProcessorState::Reserved
                                } else {
                                    states
                                        .get(processor)
                                        .cloned()
                                        .unwrap_or(ProcessorState::Free)
                                },
                            })
                            .collect_vec(),
                    })
                    .collect_vec(),
            })
            .collect_vec();

        Self { tiers }
    }

    /// The tiers of the host, fastest first.
    #[must_use]
    pub fn tiers(&self) -> &[TierOccupancy] {
        &self.tiers
    }

    /// Every processor of the host, fastest tier first.
    pub fn processors(&self) -> impl Iterator<Item = &ProcessorOccupancy> {
        self.tiers
            .iter()
            .flat_map(|tier| tier.cores.iter())
            .flat_map(|core| core.processors.iter())
    }

    /// The state of a processor, or `None` if the host has no such processor.
    #[must_use]
    pub fn state(&self, processor: ProcessorId) -> Option<&ProcessorState> {
        self.processors()
            .find(|p| p.processor == processor)
            .map(|p| &p.state)
    }

    /// The number of usable processors nobody holds.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.processors()
            .filter(|p| p.state == ProcessorState::Free)
            .count()
    }
}

impl TierOccupancy {
    /// The ID of the tier. Higher is faster.
    #[must_use]
    pub fn tier(&self) -> TierId {
        self.tier
    }

    /// The physical cores of the tier, in ascending core ID order.
    #[must_use]
    pub fn cores(&self) -> &[CoreOccupancy] {
        &self.cores
    }
}

impl CoreOccupancy {
    /// The ID of the physical core.
    #[must_use]
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// The logical processors of the core, in ascending ID order.
    #[must_use]
    pub fn processors(&self) -> &[ProcessorOccupancy] {
        &self.processors
    }
}

impl ProcessorOccupancy {
    /// The ID of the logical processor.
    #[must_use]
    pub fn processor(&self) -> ProcessorId {
        self.processor
    }

    /// Who is using the processor.
    #[must_use]
    pub fn state(&self) -> &ProcessorState {
        &self.state
    }
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Reserved => write!(f, "reserved"),
            Self::Owned {
                worker,
                label: Some(label),
            } => write!(f, "{worker} ({label})"),
            Self::Owned { worker, label: None } => write!(f, "{worker}"),
            Self::Pinned { worker } => write!(f, "{worker} (pinned)"),
        }
    }
}

impl fmt::Display for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tier in &self.tiers {
            for core in &tier.cores {
                write!(f, "tier {} core {}:", tier.tier, core.core)?;

                for processor in &core.processors {
                    write!(f, " {}={}", processor.processor, processor.state)?;
                }

                writeln!(f)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use crate::fake::{FakeHost, HardwareBuilder};
    use crate::{Error, ResourceDemand};

    use super::*;

    assert_impl_all!(Occupancy: Send, Sync, Clone, fmt::Debug, fmt::Display);

    fn topology() -> Topology {
        // Fast core {0, 1}, slow cores {2} and {3}. Processor 3 is reserved.
        let fake = FakeHost::new(
            HardwareBuilder::new()
                .tier(1, nz!(1), nz!(2))
                .tier(0, nz!(2), nz!(1)),
        );

        Topology::collect(&fake.host(), &[3]).unwrap()
    }

    fn registry() -> Result<(Registry, WorkerId, WorkerId), Error> {
        let mut registry = Registry::new();

        let managed = registry.insert_managed(10, ResourceDemand::new().label("db"))?;
        let pinned = registry.insert_pinned(11, vec![2])?;

        registry.managed_mut().next().unwrap().assignment = vec![0];

        Ok((registry, managed, pinned))
    }

    #[test]
    fn captures_owners_and_reservations() {
        let (registry, managed, pinned) = registry().unwrap();

        let occupancy = Occupancy::capture(&topology(), &BTreeSet::new(), &registry);

        assert_eq!(
            occupancy.tiers().iter().map(TierOccupancy::tier).collect_vec(),
            vec![1, 0]
        );
        assert_eq!(
            occupancy.state(0),
            Some(&ProcessorState::Owned {
                worker: managed,
                label: Some("db".to_owned())
            })
        );
        assert_eq!(occupancy.state(1), Some(&ProcessorState::Free));
        assert_eq!(
            occupancy.state(2),
            Some(&ProcessorState::Pinned { worker: pinned })
        );
        assert_eq!(occupancy.state(3), Some(&ProcessorState::Reserved));
        assert_eq!(occupancy.state(4), None);
        assert_eq!(occupancy.free_count(), 1);
    }

    #[test]
    fn runtime_exclusions_are_reserved() {
        let (registry, ..) = registry().unwrap();

        let occupancy = Occupancy::capture(&topology(), &BTreeSet::from([1]), &registry);

        assert_eq!(occupancy.state(1), Some(&ProcessorState::Reserved));
        assert_eq!(occupancy.free_count(), 0);
    }

    #[test]
    fn display_renders_one_line_per_core() {
        let (registry, ..) = registry().unwrap();

        let occupancy = Occupancy::capture(&topology(), &BTreeSet::new(), &registry);

        assert_eq!(
            occupancy.to_string(),
            "tier 1 core 0: 0=worker 0 (db) 1=free\n\
             tier 0 core 2: 2=worker 1 (pinned)\n\
             tier 0 core 3: 3=reserved\n"
        );
    }
}
