use tracing::debug;

use crate::engine::{Allocation, Pass};

/// Brings every worker below its minimum up to it from free processors, in priority order.
///
/// Each worker first finishes physical cores it already partly owns, then opens physical cores
/// that are entirely free, and only then backfills with any free processor it may use. Slots
/// are visited in the worker's tier preference order at every step.
///
/// Workers that remain short after this have no free processors left to take in their tiers.
pub(super) fn fill(pass: &Pass<'_>, mut allocation: Allocation) -> Allocation {
    for &worker in &pass.order {
        let candidate = pass.candidate(worker);

        let mut needed = candidate
            .min_cores
            .saturating_sub(allocation.count(worker));

        if needed == 0 {
            continue;
        }

        let preference = pass.layout.preference(candidate.quality);
        let before = allocation.count(worker);

        // Finish what we already started.
        for &slot in &preference {
            if needed == 0 {
                break;
            }

            if allocation.owned_in_slot(pass.layout, slot, worker) > 0 {
                let taken = allocation.take_free(pass.layout, slot, worker, needed);
                needed = needed.saturating_sub(taken);
            }
        }

        // Open untouched physical cores.
        for &slot in &preference {
            if needed == 0 {
                break;
            }

            if allocation.occupied_in_slot(pass.layout, slot) == 0 {
                let taken = allocation.take_free(pass.layout, slot, worker, needed);
                needed = needed.saturating_sub(taken);
            }
        }

        // Anything that is left.
        for &slot in &preference {
            if needed == 0 {
                break;
            }

            let taken = allocation.take_free(pass.layout, slot, worker, needed);
            needed = needed.saturating_sub(taken);
        }

        debug!(
            worker = %candidate.id,
            gained = allocation.count(worker).saturating_sub(before),
            missing = needed,
            "filled minimum"
        );
    }

    allocation
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use crate::scheduler_config::LoadThresholds;
    use crate::engine::test_support::*;
    use crate::fake::HardwareBuilder;

    use super::*;

    #[test]
    fn minimums_in_priority_order() {
        let layout = single_threaded(nz!(8));
        let candidates = vec![candidate(0, 2, 4, 1), candidate(1, 1, 2, 0)];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = fill(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.held(0), &[0, 1]);
        assert_eq!(allocation.held(1), &[2]);
    }

    #[test]
    fn finishes_partly_owned_core_first() {
        // Two cores with two threads each. Worker 0 holds one thread of the second core.
        let layout = layout(HardwareBuilder::from_counts(nz!(2), nz!(2)));
        let candidates = vec![holding(candidate(0, 2, 2, 1), &[3])];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = fill(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.held(0), &[3, 2]);
    }

    #[test]
    fn prefers_free_core_over_shared_one() {
        // Worker 0 holds processor 0, so worker 1 gets the untouched second core.
        let layout = layout(HardwareBuilder::from_counts(nz!(2), nz!(2)));
        let candidates = vec![
            holding(candidate(0, 1, 1, 1), &[0]),
            candidate(1, 2, 2, 1),
        ];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = fill(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.held(1), &[2, 3]);
    }

    #[test]
    fn backfills_when_no_whole_core_is_free() {
        let layout = layout(HardwareBuilder::from_counts(nz!(2), nz!(2)));
        let candidates = vec![
            holding(candidate(0, 1, 1, 1), &[0]),
            holding(candidate(1, 1, 1, 1), &[2]),
            candidate(2, 2, 2, 1),
        ];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = fill(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.held(2), &[1, 3]);
    }

    #[test]
    fn quality_workers_stay_above_the_floor() {
        // The fast tier has a single processor, so the quality worker ends up short.
        let layout = layout(
            HardwareBuilder::new()
                .tier(1, nz!(1), nz!(1))
                .tier(0, nz!(3), nz!(1)),
        );
        let candidates = vec![candidate(0, 2, 2, 1)];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = fill(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.held(0), &[0]);
    }

    #[test]
    fn quality_zero_starts_from_slow_tier_and_backfills() {
        let layout = layout(
            HardwareBuilder::new()
                .tier(1, nz!(2), nz!(1))
                .tier(0, nz!(1), nz!(1)),
        );
        let candidates = vec![candidate(0, 2, 2, 0)];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = fill(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.held(0), &[2, 0]);
    }

    #[test]
    fn insufficient_capacity_leaves_lowest_priority_short() {
        let layout = single_threaded(nz!(3));
        let candidates = vec![candidate(0, 2, 2, 0), candidate(1, 2, 2, 1)];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = fill(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.count(1), 2);
        assert_eq!(allocation.count(0), 1);
    }
}
