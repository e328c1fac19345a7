use std::cmp::Reverse;

use itertools::Itertools;
use tracing::debug;

use crate::ProcessorId;
use crate::engine::{Allocation, Pass};

/// Consolidates each worker onto fewer physical cores.
///
/// For every physical core a worker partly owns (most occupied first), processors the worker
/// holds in other, less or equally occupied cores of the same tier are moved into the core. A
/// moved processor lands on a free sibling or swaps places with a lower-quality worker that
/// holds nothing but that sibling.
///
/// Cores the worker owns entirely are already optimal and are neither targets nor sources.
/// Nothing moves outside the tiers between the worker's floor and the fastest tier it holds.
pub(super) fn defrag(pass: &Pass<'_>, mut allocation: Allocation) -> Allocation {
    for &worker in &pass.order {
        let Some(ceiling) = pass.ceiling(&allocation, worker) else {
            continue;
        };

        let floor = pass.floor(worker);

        let targets = allocation
            .slots_of(pass.layout, worker)
            .into_iter()
            .sorted_by_key(|(slot, count)| (Reverse(*count), *slot))
            .map(|(slot, _)| slot)
            .collect_vec();

        for target in targets {
            let slot = pass.layout.slot(target);

            if slot.tier < floor || slot.tier > ceiling {
                continue;
            }

            let owned = allocation.owned_in_slot(pass.layout, target, worker);

            if owned == 0 || owned >= slot.len() {
                continue;
            }

            let mut moved = 0_usize;

            for stray in strays(pass, &allocation, worker, target, owned) {
                if let Some(&free) = allocation.free_in_slot(pass.layout, target).first() {
                    allocation.revoke(stray);
                    allocation.grant(worker, free);
                } else if let Some((occupant, swapped)) =
                    swappable(pass, &allocation, worker, target)
                {
                    allocation.transfer(swapped, worker);
                    allocation.transfer(stray, occupant);
                } else {
                    break;
                }

                moved = moved.saturating_add(1);
            }

            if moved > 0 {
                debug!(
                    worker = %pass.candidate(worker).id,
                    tier = slot.tier,
                    core = slot.core,
                    moved,
                    "consolidated processors onto physical core"
                );
            }
        }
    }

    allocation
}

/// Processors of the worker that may be moved into the target slot, least consolidated first.
fn strays(
    pass: &Pass<'_>,
    allocation: &Allocation,
    worker: usize,
    target: usize,
    owned_in_target: usize,
) -> Vec<ProcessorId> {
    let tier = pass.layout.slot(target).tier;

    allocation
        .slots_of(pass.layout, worker)
        .into_iter()
        .filter(|(slot, owned)| {
            let candidate_slot = pass.layout.slot(*slot);

            *slot != target
                && candidate_slot.tier == tier
                && *owned < candidate_slot.len()
                && *owned <= owned_in_target
        })
        .sorted_by_key(|(slot, owned)| (*owned, *slot))
        .flat_map(|(slot, _)| {
            pass.layout
                .slot(slot)
                .processors
                .iter()
                .copied()
                .filter(|p| allocation.owner(*p) == Some(worker))
        })
        .collect_vec()
}

/// A processor of the target slot held by a lower-quality worker whose whole assignment is
/// that one processor, together with that worker.
fn swappable(
    pass: &Pass<'_>,
    allocation: &Allocation,
    worker: usize,
    target: usize,
) -> Option<(usize, ProcessorId)> {
    let quality = pass.candidate(worker).quality;

    pass.layout
        .slot(target)
        .processors
        .iter()
        .find_map(|p| {
            let occupant = allocation.owner(*p)?;

            (occupant != worker
                && pass.candidate(occupant).quality < quality
                && allocation.count(occupant) == 1)
                .then_some((occupant, *p))
        })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::num::NonZero;

    use new_zealand::nz;

    use crate::scheduler_config::LoadThresholds;
    use crate::engine::Layout;
    use crate::engine::test_support::*;
    use crate::fake::HardwareBuilder;

    use super::*;

    fn two_threaded(cores: NonZero<usize>) -> Layout {
        layout(HardwareBuilder::from_counts(cores, nz!(2)))
    }

    #[test]
    fn moves_stray_into_free_sibling() {
        // Cores {0, 1} and {2, 3}. The worker holds 0 and 2, so it can own one core outright.
        let layout = two_threaded(nz!(2));
        let candidates = vec![holding(candidate(0, 2, 2, 1), &[0, 2])];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = defrag(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.into_assignments(), vec![vec![0, 1]]);
    }

    #[test]
    fn swaps_with_single_processor_lower_quality_worker() {
        // Worker 1 (quality 0) sits next to worker 0 on core {0, 1}.
        let layout = two_threaded(nz!(2));
        let candidates = vec![
            holding(candidate(0, 2, 2, 1), &[0, 2]),
            holding(candidate(1, 1, 1, 0), &[1]),
            holding(candidate(2, 1, 1, 0), &[3]),
        ];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = defrag(&pass, allocation(&layout, &candidates));

        assert_eq!(
            allocation.into_assignments(),
            vec![vec![0, 1], vec![2], vec![3]]
        );
    }

    #[test]
    fn does_not_swap_with_equal_quality() {
        let layout = two_threaded(nz!(2));
        let candidates = vec![
            holding(candidate(0, 2, 2, 1), &[0, 2]),
            holding(candidate(1, 1, 1, 1), &[1]),
            holding(candidate(2, 1, 1, 1), &[3]),
        ];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = defrag(&pass, allocation(&layout, &candidates));

        assert_eq!(
            allocation.into_assignments(),
            vec![vec![0, 2], vec![1], vec![3]]
        );
    }

    #[test]
    fn does_not_swap_with_multi_processor_worker() {
        let layout = two_threaded(nz!(3));
        let candidates = vec![
            holding(candidate(0, 2, 2, 1), &[0, 2]),
            holding(candidate(1, 2, 2, 0), &[1, 4]),
            holding(candidate(2, 1, 1, 1), &[3]),
        ];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = defrag(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.held(0), &[0, 2]);
    }

    #[test]
    fn leaves_fully_owned_cores_alone() {
        // The worker owns {0, 1} entirely and has a stray on {2, 3}. Nothing can improve.
        let layout = two_threaded(nz!(2));
        let candidates = vec![holding(candidate(0, 3, 3, 1), &[0, 1, 2])];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = defrag(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.into_assignments(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn never_moves_across_tiers() {
        // Fast core {0, 1}, slow core {2, 3}. The strays are in different tiers.
        let layout = layout(
            HardwareBuilder::new()
                .tier(1, nz!(1), nz!(2))
                .tier(0, nz!(1), nz!(2)),
        );
        let candidates = vec![holding(candidate(0, 2, 2, 0), &[0, 2])];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = defrag(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.into_assignments(), vec![vec![0, 2]]);
    }

    #[test]
    fn most_occupied_core_attracts_strays() {
        // Cores of four threads: {0-3} and {4-7}. Three processors on the first, one on the
        // second: the lone stray joins the others.
        let layout = layout(HardwareBuilder::from_counts(nz!(2), nz!(4)));
        let candidates = vec![holding(candidate(0, 4, 4, 1), &[0, 1, 2, 4])];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = defrag(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.into_assignments(), vec![vec![0, 1, 2, 3]]);
    }
}
