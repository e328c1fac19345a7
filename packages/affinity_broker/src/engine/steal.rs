use std::cmp::Reverse;

use itertools::Itertools;
use tracing::debug;

use crate::{ProcessorId, TierId};
use crate::engine::{Allocation, Pass};

/// Lets workers that have been busy for several passes in a row take a processor from an idle
/// worker.
///
/// Every worker holding processors extends its streak when its load is above the steal
/// threshold and resets it otherwise. Once the streak reaches the configured length, a worker
/// below its maximum takes one processor per pass from the lowest-priority idle worker that
/// holds more than its own minimum, as long as that processor is in a tier between the
/// taker's floor and the fastest tier it holds.
///
/// Returns the new streak of every candidate.
pub(super) fn steal(pass: &Pass<'_>, mut allocation: Allocation) -> (Allocation, Vec<u32>) {
    let mut streaks = pass.candidates.iter().map(|c| c.streak).collect_vec();

    for &worker in &pass.order {
        let candidate = pass.candidate(worker);

        let Some(ceiling) = pass.ceiling(&allocation, worker) else {
            continue;
        };

        let streak = if candidate.load > pass.thresholds.steal {
            candidate.streak.saturating_add(1)
        } else {
            0
        };

        if let Some(entry) = streaks.get_mut(worker) {
            *entry = streak;
        }

        if streak < pass.thresholds.steal_streak
            || allocation.count(worker) >= candidate.max_cores
        {
            continue;
        }

        let floor = pass.floor(worker);

        for &victim in pass.order.iter().rev() {
            let victim_candidate = pass.candidate(victim);

            if victim == worker
                || victim_candidate.load >= pass.thresholds.idle
                || allocation.count(victim) <= victim_candidate.min_cores
            {
                continue;
            }

            let Some(processor) = loosest_processor(pass, &allocation, victim, floor, ceiling)
            else {
                continue;
            };

            allocation.transfer(processor, worker);

            debug!(
                worker = %candidate.id,
                victim = %victim_candidate.id,
                processor,
                streak,
                "took processor from idle worker"
            );

            break;
        }
    }

    (allocation, streaks)
}

/// The victim's processor within the tier range whose physical core the victim has the fewest
/// processors on, so the victim stays as consolidated as possible.
fn loosest_processor(
    pass: &Pass<'_>,
    allocation: &Allocation,
    victim: usize,
    floor: TierId,
    ceiling: TierId,
) -> Option<ProcessorId> {
    let slot_counts = allocation.slots_of(pass.layout, victim);

    allocation
        .held(victim)
        .iter()
        .copied()
        .filter_map(|p| {
            let slot = pass.layout.slot_of(p)?;
            let tier = pass.layout.slot(slot).tier;

            if tier < floor || tier > ceiling {
                return None;
            }

            let held_in_slot = slot_counts
                .iter()
                .find(|(s, _)| *s == slot)
                .map_or(0, |(_, count)| *count);

            Some((held_in_slot, p))
        })
        .min_by_key(|(held_in_slot, p)| (*held_in_slot, Reverse(*p)))
        .map(|(_, p)| p)
}
