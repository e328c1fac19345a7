use foldhash::{HashMap, HashMapExt};
use itertools::Itertools;

use crate::ProcessorId;
use crate::engine::Layout;

/// Which worker holds which processor at some point during a pass.
///
/// Workers are referred to by their index in the candidate list of the pass. Each processor
/// has at most one owner, which every mutation upholds.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Allocation {
    holdings: Vec<Vec<ProcessorId>>,
    owners: HashMap<ProcessorId, usize>,
}

impl Allocation {
    /// Starts from the assignments of the previous pass, dropping processors that are no
    /// longer in the layout. If two workers claim the same processor, the first one keeps it.
    pub(crate) fn new<'a>(
        layout: &Layout,
        previous: impl IntoIterator<Item = &'a [ProcessorId]>,
    ) -> Self {
        let mut allocation = Self {
            holdings: Vec::new(),
            owners: HashMap::new(),
        };

        for (worker, assignment) in previous.into_iter().enumerate() {
            allocation.holdings.push(Vec::with_capacity(assignment.len()));

            for processor in assignment {
                if layout.contains(*processor) && allocation.is_free(*processor) {
                    allocation.grant(worker, *processor);
                }
            }
        }

        allocation
    }

    pub(crate) fn held(&self, worker: usize) -> &[ProcessorId] {
        self.holdings.get(worker).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn count(&self, worker: usize) -> usize {
        self.held(worker).len()
    }

    pub(crate) fn owner(&self, processor: ProcessorId) -> Option<usize> {
        self.owners.get(&processor).copied()
    }

    pub(crate) fn is_free(&self, processor: ProcessorId) -> bool {
        !self.owners.contains_key(&processor)
    }

    #[expect(
        clippy::indexing_slicing,
        reason = "worker indexes are only ever produced from the candidate list"
    )]
    pub(crate) fn grant(&mut self, worker: usize, processor: ProcessorId) {
        debug_assert!(self.is_free(processor), "processor {processor} is already owned");

        self.owners.insert(processor, worker);
        self.holdings[worker].push(processor);
    }

    /// Frees a processor, returning its previous owner.
    pub(crate) fn revoke(&mut self, processor: ProcessorId) -> Option<usize> {
        let owner = self.owners.remove(&processor)?;

        if let Some(held) = self.holdings.get_mut(owner) {
            held.retain(|p| *p != processor);
        }

        Some(owner)
    }

    pub(crate) fn transfer(&mut self, processor: ProcessorId, to: usize) {
        self.revoke(processor);
        self.grant(to, processor);
    }

    /// How many processors of a slot the worker holds.
    pub(crate) fn owned_in_slot(&self, layout: &Layout, slot: usize, worker: usize) -> usize {
        layout
            .slot(slot)
            .processors
            .iter()
            .filter(|p| self.owner(**p) == Some(worker))
            .count()
    }

    /// How many processors of a slot are held by anyone.
    pub(crate) fn occupied_in_slot(&self, layout: &Layout, slot: usize) -> usize {
        layout
            .slot(slot)
            .processors
            .iter()
            .filter(|p| !self.is_free(**p))
            .count()
    }

    pub(crate) fn free_in_slot(&self, layout: &Layout, slot: usize) -> Vec<ProcessorId> {
        layout
            .slot(slot)
            .processors
            .iter()
            .copied()
            .filter(|p| self.is_free(*p))
            .collect_vec()
    }

    /// Gives the worker up to `limit` free processors of a slot, lowest ID first. Returns how
    /// many were given.
    pub(crate) fn take_free(
        &mut self,
        layout: &Layout,
        slot: usize,
        worker: usize,
        limit: usize,
    ) -> usize {
        let taken = self
            .free_in_slot(layout, slot)
            .into_iter()
            .take(limit)
            .collect_vec();

        for processor in &taken {
            self.grant(worker, *processor);
        }

        taken.len()
    }

    /// Slots in which the worker holds at least one processor, with the number it holds.
    pub(crate) fn slots_of(&self, layout: &Layout, worker: usize) -> Vec<(usize, usize)> {
        self.held(worker)
            .iter()
            .filter_map(|p| layout.slot_of(*p))
            .counts()
            .into_iter()
            .sorted_unstable()
            .collect_vec()
    }

    /// The final assignments, each in ascending processor order.
    pub(crate) fn into_assignments(self) -> Vec<Vec<ProcessorId>> {
        self.holdings
            .into_iter()
            .map(|held| held.into_iter().sorted_unstable().collect_vec())
            .collect_vec()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::BTreeSet;

    use new_zealand::nz;

    use crate::Topology;
    use crate::fake::{FakeHost, HardwareBuilder};

    use super::*;

    fn layout() -> Layout {
        // Two cores with two threads each: {0, 1} and {2, 3}.
        let fake = FakeHost::new(HardwareBuilder::from_counts(nz!(2), nz!(2)));
        let topology = Topology::collect(&fake.host(), &[]).unwrap();

        Layout::new(&topology, &BTreeSet::from([3]))
    }

    #[test]
    fn previous_assignments_are_sanitized() {
        let layout = layout();

        // Processor 3 is excluded, 7 does not exist, 1 is claimed twice.
        let previous: [&[ProcessorId]; 2] = [&[1, 3, 7], &[1, 2]];
        let allocation = Allocation::new(&layout, previous);

        assert_eq!(allocation.held(0), &[1]);
        assert_eq!(allocation.held(1), &[2]);
        assert_eq!(allocation.owner(1), Some(0));
        assert!(allocation.is_free(0));
    }

    #[test]
    fn grant_and_revoke_keep_owners_consistent() {
        let layout = layout();
        let mut allocation = Allocation::new(&layout, [&[][..], &[][..]]);

        allocation.grant(0, 0);
        allocation.grant(0, 2);
        assert_eq!(allocation.count(0), 2);

        assert_eq!(allocation.revoke(0), Some(0));
        assert_eq!(allocation.revoke(0), None);
        assert_eq!(allocation.held(0), &[2]);

        allocation.transfer(2, 1);
        assert_eq!(allocation.held(0), &[] as &[ProcessorId]);
        assert_eq!(allocation.owner(2), Some(1));
    }

    #[test]
    fn slot_accounting() {
        let layout = layout();
        let mut allocation = Allocation::new(&layout, [&[1][..], &[2][..]]);

        assert_eq!(allocation.owned_in_slot(&layout, 0, 0), 1);
        assert_eq!(allocation.occupied_in_slot(&layout, 0), 1);
        assert_eq!(allocation.free_in_slot(&layout, 0), vec![0]);
        assert_eq!(allocation.slots_of(&layout, 1), vec![(1, 1)]);

        assert_eq!(allocation.take_free(&layout, 0, 1, 5), 1);
        assert!(allocation.free_in_slot(&layout, 0).is_empty());
        assert_eq!(allocation.slots_of(&layout, 1), vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn assignments_are_sorted() {
        let layout = layout();
        let mut allocation = Allocation::new(&layout, [&[2][..]]);

        allocation.grant(0, 0);

        assert_eq!(allocation.into_assignments(), vec![vec![0, 2]]);
    }

    #[test]
    fn unknown_worker_holds_nothing() {
        let allocation = Allocation::default();

        assert_eq!(allocation.count(5), 0);
    }
}
