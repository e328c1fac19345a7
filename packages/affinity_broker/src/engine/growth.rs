use itertools::Itertools;
use tracing::debug;

use crate::engine::{Allocation, Pass};

/// Lets busy workers take free processors until they reach their maximum.
///
/// A worker grows when its load is above the growth threshold and it already holds at least one
/// processor. It grows in the fastest tier with free processors between its floor and the
/// fastest tier it already holds, finishing a physical core it partly owns before opening a new
/// one. Workers take turns in priority order, one physical core per turn, until no worker can
/// grow any further.
pub(super) fn growth(pass: &Pass<'_>, mut allocation: Allocation) -> Allocation {
    loop {
        let mut grew = false;

        for &worker in &pass.order {
            let candidate = pass.candidate(worker);

            if candidate.load <= pass.thresholds.growth
                || allocation.count(worker) >= candidate.max_cores
            {
                continue;
            }

            let Some(ceiling) = pass.ceiling(&allocation, worker) else {
                continue;
            };

            let floor = pass.floor(worker);

            let available = (0..pass.layout.slots().len())
                .filter(|slot| {
                    let tier = pass.layout.slot(*slot).tier;

                    tier >= floor
                        && tier <= ceiling
                        && !allocation.free_in_slot(pass.layout, *slot).is_empty()
                })
                .collect_vec();

            // Slots are ordered fastest tier first.
            let Some(best_tier) = available.first().map(|slot| pass.layout.slot(*slot).tier)
            else {
                continue;
            };

            let in_best_tier = available
                .iter()
                .copied()
                .filter(|slot| pass.layout.slot(*slot).tier == best_tier);

            let Some(target) = in_best_tier
                .clone()
                .find(|slot| allocation.owned_in_slot(pass.layout, *slot, worker) > 0)
                .or_else(|| in_best_tier.clone().next())
            else {
                continue;
            };

            let room = candidate
                .max_cores
                .saturating_sub(allocation.count(worker));
            let taken = allocation.take_free(pass.layout, target, worker, room);

            if taken > 0 {
                grew = true;

                debug!(
                    worker = %candidate.id,
                    load = candidate.load,
                    taken,
                    "grew into free processors"
                );
            }
        }

        if !grew {
            return allocation;
        }
    }
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
    fn busy_worker_grows_to_maximum() {
        let layout = single_threaded(nz!(8));
        let candidates = vec![holding(loaded(candidate(0, 1, 3, 1), 90.0), &[0])];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = growth(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.into_assignments(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn idle_worker_does_not_grow() {
        let layout = single_threaded(nz!(4));
        let candidates = vec![holding(loaded(candidate(0, 1, 4, 1), 70.0), &[0])];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = growth(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.count(0), 1);
    }

    #[test]
    fn worker_without_processors_does_not_grow() {
        let layout = single_threaded(nz!(4));
        let candidates = vec![loaded(candidate(0, 1, 4, 1), 100.0)];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = growth(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.count(0), 0);
    }

    #[test]
    fn finishes_own_core_before_opening_another() {
        // Cores {0, 1}, {2, 3}, {4, 5}. The worker holds 2.
        let layout = layout(HardwareBuilder::from_counts(nz!(3), nz!(2)));
        let candidates = vec![holding(loaded(candidate(0, 1, 2, 1), 95.0), &[2])];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = growth(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.into_assignments(), vec![vec![2, 3]]);
    }

    #[test]
    fn does_not_grow_above_fastest_held_tier() {
        // A quality 0 worker on the slow tier stays there even though the fast tier is free.
        let layout = layout(
            HardwareBuilder::new()
                .tier(1, nz!(2), nz!(1))
                .tier(0, nz!(2), nz!(1)),
        );
        let candidates = vec![holding(loaded(candidate(0, 1, 4, 0), 95.0), &[2])];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = growth(&pass, allocation(&layout, &candidates));

        assert_eq!(allocation.into_assignments(), vec![vec![2, 3]]);
    }

    #[test]
    fn workers_take_turns_in_priority_order() {
        let layout = single_threaded(nz!(4));
        let candidates = vec![
            holding(loaded(candidate(0, 1, 4, 0), 80.0), &[0]),
            holding(loaded(candidate(1, 1, 4, 0), 90.0), &[1]),
        ];
        let pass = Pass::new(&layout, &candidates, LoadThresholds::default());

        let allocation = growth(&pass, allocation(&layout, &candidates));

        // The busier worker picks first in every round.
        assert_eq!(allocation.into_assignments(), vec![vec![0, 3], vec![1, 2]]);
    }
}
