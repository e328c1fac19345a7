use std::cmp::Reverse;

use foldhash::{HashSet, HashSetExt};
use itertools::Itertools;
use tracing::debug;

use crate::{ProcessorId, TierId};
use crate::engine::{Allocation, Pass};

/// Lets workers with quality above 0 that are below their minimum evict processors from
/// lower-quality workers.
///
/// A worker first counts the free processors of the fastest tier towards its deficit. Whatever
/// is still missing is evicted from strictly lower-quality workers, lowest priority first, in
/// tiers the displacer may use. Victims first give up their surplus above their own minimum.
/// Only if that is not enough are they taken below their minimum, and then only by as many
/// processors as are free elsewhere in their own tiers. [`fill`][super::fill] re-homes them
/// there, so a victim is moved out of the way but never left short.
///
/// Evicted processors are left free for [`fill`][super::fill] to hand out. Returns the workers
/// that lost processors.
pub(super) fn purge(pass: &Pass<'_>, mut allocation: Allocation) -> (Allocation, Vec<usize>) {
    let Some(fastest) = pass.layout.highest_tier() else {
        return (allocation, Vec::new());
    };

    // Free processors already counted towards some displacer's deficit.
    let mut claimed: HashSet<ProcessorId> = HashSet::new();
    let mut displaced = Vec::new();

    for &worker in &pass.order {
        let candidate = pass.candidate(worker);

        if candidate.quality == 0 {
            continue;
        }

        let mut deficit = candidate
            .min_cores
            .saturating_sub(allocation.count(worker));

        let free_in_fastest = pass
            .layout
            .slots()
            .iter()
            .filter(|slot| slot.tier == fastest)
            .flat_map(|slot| slot.processors.iter().copied())
            .filter(|p| allocation.is_free(*p) && !claimed.contains(p))
            .take(deficit)
            .collect_vec();

        deficit = deficit.saturating_sub(free_in_fastest.len());
        claimed.extend(free_in_fastest);

        let floor = pass.floor(worker);

        for below_minimum in [false, true] {
            for &victim in pass.order.iter().rev() {
                if deficit == 0 {
                    break;
                }

                let victim_candidate = pass.candidate(victim);

                if victim_candidate.quality >= candidate.quality {
                    continue;
                }

                // Below its minimum, a victim only gives up what it can be re-homed for.
                let room = if below_minimum {
                    free_unclaimed(pass, &allocation, &claimed, pass.floor(victim))
                } else {
                    Vec::new()
                };

                let limit = if below_minimum {
                    room.len()
                } else {
                    allocation
                        .count(victim)
                        .saturating_sub(victim_candidate.min_cores)
                };

                let evicted = evictable(pass, &allocation, victim, floor)
                    .into_iter()
                    .take(limit.min(deficit))
                    .collect_vec();

                if evicted.is_empty() {
                    continue;
                }

                for processor in &evicted {
                    allocation.revoke(*processor);
                }

                claimed.extend(room.into_iter().take(evicted.len()));
                deficit = deficit.saturating_sub(evicted.len());
                claimed.extend(evicted.iter().copied());

                debug!(
                    worker = %candidate.id,
                    victim = %victim_candidate.id,
                    processors = ?evicted,
                    below_minimum,
                    "evicted processors from lower-quality worker"
                );

                if !displaced.contains(&victim) {
                    displaced.push(victim);
                }
            }
        }
    }

    (allocation, displaced)
}

/// Free processors at or above the floor that no displacer has counted on yet.
fn free_unclaimed(
    pass: &Pass<'_>,
    allocation: &Allocation,
    claimed: &HashSet<ProcessorId>,
    floor: TierId,
) -> Vec<ProcessorId> {
    pass.layout
        .slots()
        .iter()
        .filter(|slot| slot.tier >= floor)
        .flat_map(|slot| slot.processors.iter().copied())
        .filter(|p| allocation.is_free(*p) && !claimed.contains(p))
        .collect_vec()
}

/// The victim's processors at or above the floor, in the order they are evicted: faster tiers
/// first and, within a tier, the victim's least consolidated cores first.
fn evictable(
    pass: &Pass<'_>,
    allocation: &Allocation,
    victim: usize,
    floor: TierId,
) -> Vec<ProcessorId> {
    let slot_counts = allocation.slots_of(pass.layout, victim);

    allocation
        .held(victim)
        .iter()
        .copied()
        .filter_map(|p| {
            let slot = pass.layout.slot_of(p)?;
            let tier = pass.layout.slot(slot).tier;
            let held_in_slot = slot_counts
                .iter()
                .find(|(s, _)| *s == slot)
                .map_or(0, |(_, count)| *count);

            (tier >= floor).then_some((Reverse(tier), held_in_slot, Reverse(p)))
        })
        .sorted_unstable()
        .map(|(_, _, Reverse(p))| p)
        .collect_vec()
}
