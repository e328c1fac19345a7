use std::collections::BTreeSet;

use foldhash::{HashMap, HashMapExt};
use itertools::Itertools;

use crate::{CoreId, ProcessorId, TierId, Topology};

/// A physical core as seen by one redistribution pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CoreSlot {
    pub(crate) tier: TierId,
    pub(crate) core: CoreId,

    // Ascending. Never empty.
    pub(crate) processors: Vec<ProcessorId>,
}

impl CoreSlot {
    pub(crate) fn len(&self) -> usize {
        self.processors.len()
    }
}

/// The hardware snapshot a pass works on: every physical core that still has processors
/// available after runtime exclusions, fastest tier first and ascending core ID within a tier.
///
/// Phases refer to cores by their index in this arena, so the arena itself never changes
/// during a pass.
#[derive(Clone, Debug, Default)]
pub(crate) struct Layout {
    slots: Vec<CoreSlot>,
    slot_of: HashMap<ProcessorId, usize>,

    // Tier eligibility is a property of the hardware, not of what is excluded at the moment.
    heterogeneous: bool,
    quality_floor: TierId,
    lowest_tier: TierId,
}

impl Layout {
    pub(crate) fn new(topology: &Topology, excluded: &BTreeSet<ProcessorId>) -> Self {
        let mut slots = Vec::new();
        let mut slot_of = HashMap::new();

        for tier in topology.tiers() {
            for (core, processors) in topology.cores(tier) {
                let processors = processors
                    .iter()
                    .copied()
                    .filter(|p| !excluded.contains(p))
                    .collect_vec();

                if processors.is_empty() {
                    continue;
                }

                for processor in &processors {
                    slot_of.insert(*processor, slots.len());
                }

                slots.push(CoreSlot {
                    tier,
                    core,
                    processors,
                });
            }
        }

        Self {
            slots,
            slot_of,
            heterogeneous: topology.is_heterogeneous(),
            quality_floor: topology.floor_tier(1),
            lowest_tier: topology.floor_tier(0),
        }
    }

    pub(crate) fn slots(&self) -> &[CoreSlot] {
        &self.slots
    }

    #[expect(
        clippy::indexing_slicing,
        reason = "slot indexes are only ever produced by this layout"
    )]
    pub(crate) fn slot(&self, index: usize) -> &CoreSlot {
        &self.slots[index]
    }

    pub(crate) fn slot_of(&self, processor: ProcessorId) -> Option<usize> {
        self.slot_of.get(&processor).copied()
    }

    pub(crate) fn tier_of(&self, processor: ProcessorId) -> Option<TierId> {
        self.slot_of(processor).map(|index| self.slot(index).tier)
    }

    pub(crate) fn contains(&self, processor: ProcessorId) -> bool {
        self.slot_of.contains_key(&processor)
    }

    pub(crate) fn highest_tier(&self) -> Option<TierId> {
        self.slots.first().map(|slot| slot.tier)
    }

    pub(crate) fn floor_tier(&self, quality: u32) -> TierId {
        if quality > 0 {
            self.quality_floor
        } else {
            self.lowest_tier
        }
    }

    /// Slots a worker of the given quality may use, in the order it prefers them.
    ///
    /// Quality 0 on a heterogeneous host starts from the slowest tier, leaving the fast tiers to
    /// workers that care. Everyone else starts from the fastest tier.
    pub(crate) fn preference(&self, quality: u32) -> Vec<usize> {
        let floor = self.floor_tier(quality);

        let mut indexes = (0..self.slots.len())
            .filter(|index| self.slot(*index).tier >= floor)
            .collect_vec();

        if quality == 0 && self.heterogeneous {
            // Stable, so cores stay in ascending order within each tier.
            indexes.sort_by_key(|index| self.slot(*index).tier);
        }

        indexes
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use crate::fake::{FakeHost, HardwareBuilder};

    use super::*;

    fn hybrid() -> Topology {
        // Processors 0-3: two fast cores with two threads each. Processors 4-5: slow cores.
        let fake = FakeHost::new(
            HardwareBuilder::new()
                .tier(1, nz!(2), nz!(2))
                .tier(0, nz!(2), nz!(1)),
        );

        Topology::collect(&fake.host(), &[]).unwrap()
    }

    #[test]
    fn slots_are_fastest_tier_first() {
        let layout = Layout::new(&hybrid(), &BTreeSet::new());

        let summary = layout
            .slots()
            .iter()
            .map(|slot| (slot.tier, slot.core, slot.len()))
            .collect_vec();

        assert_eq!(summary, vec![(1, 0, 2), (1, 2, 2), (0, 4, 1), (0, 5, 1)]);
        assert_eq!(layout.slot_of(3), Some(1));
        assert_eq!(layout.tier_of(5), Some(0));
        assert_eq!(layout.highest_tier(), Some(1));
    }

    #[test]
    fn excluded_processors_are_removed() {
        let layout = Layout::new(&hybrid(), &BTreeSet::from([1, 4]));

        assert_eq!(layout.slots().len(), 3);
        assert_eq!(layout.slot(0).processors, vec![0]);
        assert!(!layout.contains(1));
        assert!(!layout.contains(4));
        assert!(layout.contains(5));
    }

    #[test]
    fn fully_excluded_host_has_no_slots() {
        let layout = Layout::new(&hybrid(), &BTreeSet::from([0, 1, 2, 3, 4, 5]));

        assert!(layout.slots().is_empty());
        assert_eq!(layout.highest_tier(), None);
    }

    #[test]
    fn quality_workers_prefer_fast_tiers_above_the_floor() {
        let layout = Layout::new(&hybrid(), &BTreeSet::new());

        assert_eq!(layout.floor_tier(3), 1);
        assert_eq!(layout.preference(3), vec![0, 1]);
    }

    #[test]
    fn quality_zero_prefers_slow_tier_but_may_use_all() {
        let layout = Layout::new(&hybrid(), &BTreeSet::new());

        assert_eq!(layout.floor_tier(0), 0);
        assert_eq!(layout.preference(0), vec![2, 3, 0, 1]);
    }

    #[test]
    fn homogeneous_host_prefers_ascending_cores() {
        let fake = FakeHost::new(HardwareBuilder::from_counts(nz!(3), nz!(1)));
        let topology = Topology::collect(&fake.host(), &[]).unwrap();

        let layout = Layout::new(&topology, &BTreeSet::new());

        assert_eq!(layout.preference(0), vec![0, 1, 2]);
        assert_eq!(layout.preference(5), vec![0, 1, 2]);
    }

    #[test]
    fn floor_ignores_runtime_exclusions() {
        // Excluding the whole slow tier does not lower the floor of quality workers.
        let layout = Layout::new(&hybrid(), &BTreeSet::from([4, 5]));

        assert_eq!(layout.floor_tier(1), 1);
        assert_eq!(layout.floor_tier(0), 0);
    }
}
