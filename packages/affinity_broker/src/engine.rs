//! Computes which processors each managed worker should hold.
//!
//! A redistribution pass runs a fixed sequence of phases over an arena of physical core slots
//! (the [`Layout`]). Each phase takes the [`Allocation`] produced by the previous phase and
//! returns a new one, so every phase can be reasoned about and tested in isolation:
//!
//! 1. [purge] lets quality workers below their minimum evict the surplus of lower-quality ones.
//! 2. [fill] brings every worker up to its minimum, whole physical cores first.
//! 3. [defrag] consolidates workers onto fewer physical cores.
//! 4. [growth] lets busy workers take free processors up to their maximum.
//! 5. [steal] lets workers that stay busy take processors from idle ones.
//!
//! The last three phases only run in a [`PassKind::Rebalance`] pass.
//!
//! The engine knows nothing about processes or the platform. It is given a snapshot of the
//! workers and returns the new assignments, which the scheduler then commits.

mod allocation;
mod defrag;
mod fill;
mod growth;
mod layout;
mod purge;
mod steal;

pub(crate) use allocation::Allocation;
pub(crate) use layout::Layout;

use itertools::Itertools;

use crate::scheduler_config::LoadThresholds;
use crate::{ProcessorId, TierId, WorkerId};

/// The two kinds of redistribution pass.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum PassKind {
    /// Only guarantees minimums: used when workers come and go.
    Reclaim,

    /// Also consolidates, grows and steals: used periodically.
    Rebalance,
}

/// What the engine needs to know about a worker.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Candidate {
    pub(crate) id: WorkerId,
    pub(crate) min_cores: usize,
    pub(crate) max_cores: usize,
    pub(crate) quality: u32,
    pub(crate) load: f64,
    pub(crate) streak: u32,

    // What the worker held after the previous pass.
    pub(crate) held: Vec<ProcessorId>,
}

/// The result of a redistribution pass, in candidate order.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Outcome {
    /// The new assignment of each candidate, in ascending processor order.
    pub(crate) assignments: Vec<Vec<ProcessorId>>,

    /// The new high-load streak of each candidate.
    pub(crate) streaks: Vec<u32>,

    /// Workers that lost processors to higher-quality workers.
    pub(crate) displaced: Vec<WorkerId>,
}

/// Shared read-only context of the phases of one pass.
#[derive(Debug)]
pub(crate) struct Pass<'a> {
    layout: &'a Layout,
    candidates: &'a [Candidate],
    thresholds: LoadThresholds,

    // Candidate indexes, highest priority first.
    order: Vec<usize>,
}

impl<'a> Pass<'a> {
    pub(crate) fn new(
        layout: &'a Layout,
        candidates: &'a [Candidate],
        thresholds: LoadThresholds,
    ) -> Self {
        Self {
            layout,
            candidates,
            thresholds,
            order: priority_order(candidates),
        }
    }

    #[expect(
        clippy::indexing_slicing,
        reason = "worker indexes are only ever produced from the candidate list"
    )]
    fn candidate(&self, worker: usize) -> &Candidate {
        &self.candidates[worker]
    }

    fn floor(&self, worker: usize) -> TierId {
        self.layout.floor_tier(self.candidate(worker).quality)
    }

    /// The fastest tier the worker currently holds a processor in.
    fn ceiling(&self, allocation: &Allocation, worker: usize) -> Option<TierId> {
        allocation
            .held(worker)
            .iter()
            .filter_map(|p| self.layout.tier_of(*p))
            .max()
    }
}

/// Sorts candidates by quality (highest first), then load (highest first), then registration
/// order.
#[expect(
    clippy::indexing_slicing,
    reason = "sorting indexes produced from the same list"
)]
fn priority_order(candidates: &[Candidate]) -> Vec<usize> {
    (0..candidates.len())
        .sorted_by(|a, b| {
            let (a, b) = (&candidates[*a], &candidates[*b]);

            b.quality
                .cmp(&a.quality)
                .then_with(|| b.load.total_cmp(&a.load))
                .then_with(|| a.id.cmp(&b.id))
        })
        .collect_vec()
}

/// Runs one redistribution pass over the given workers.
pub(crate) fn redistribute(
    layout: &Layout,
    candidates: &[Candidate],
    kind: PassKind,
    thresholds: LoadThresholds,
) -> Outcome {
    let pass = Pass::new(layout, candidates, thresholds);

    let allocation = Allocation::new(
        layout,
        candidates.iter().map(|candidate| candidate.held.as_slice()),
    );

    let (allocation, displaced) = purge::purge(&pass, allocation);
    let allocation = fill::fill(&pass, allocation);

    let (allocation, streaks) = match kind {
        PassKind::Reclaim => (
            allocation,
            candidates.iter().map(|c| c.streak).collect_vec(),
        ),
        PassKind::Rebalance => {
            let allocation = defrag::defrag(&pass, allocation);
            let allocation = growth::growth(&pass, allocation);
            steal::steal(&pass, allocation)
        }
    };

    Outcome {
        assignments: allocation.into_assignments(),
        streaks,
        displaced: displaced
            .into_iter()
            .map(|worker| pass.candidate(worker).id)
            .sorted_unstable()
            .collect_vec(),
    }
}


#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(clippy::indexing_slicing, reason = "test code, panics are acceptable")]
mod tests {
    use new_zealand::nz;

    use super::test_support::*;
    use super::*;
    use crate::fake::HardwareBuilder;

    #[test]
    fn priority_is_quality_then_load_then_registration() {
        let candidates = vec![
            loaded(candidate(0, 1, 1, 1), 10.0),
            loaded(candidate(1, 1, 1, 2), 0.0),
            loaded(candidate(2, 1, 1, 1), 50.0),
            loaded(candidate(3, 1, 1, 1), 10.0),
        ];

        assert_eq!(priority_order(&candidates), vec![1, 2, 0, 3]);
    }

    #[test]
    fn reclaim_only_fills_minimums() {
        let layout = single_threaded(nz!(8));
        let candidates = vec![
            loaded(candidate(0, 2, 4, 1), 99.0),
            candidate(1, 1, 2, 0),
        ];

        let outcome = redistribute(
            &layout,
            &candidates,
            PassKind::Reclaim,
            LoadThresholds::default(),
        );

        assert_eq!(outcome.assignments, vec![vec![0, 1], vec![2]]);
        assert_eq!(outcome.streaks, vec![0, 0]);
        assert!(outcome.displaced.is_empty());
    }

    #[test]
    fn rebalance_grows_busy_workers() {
        let layout = single_threaded(nz!(8));
        let candidates = vec![
            holding(loaded(candidate(0, 2, 4, 1), 99.0), &[0, 1]),
            holding(candidate(1, 1, 2, 0), &[2]),
        ];

        let outcome = redistribute(
            &layout,
            &candidates,
            PassKind::Rebalance,
            LoadThresholds::default(),
        );

        assert_eq!(outcome.assignments[0].len(), 4);
        assert_eq!(outcome.assignments[1], vec![2]);
        assert_eq!(outcome.streaks, vec![1, 0]);
        assert_no_double_ownership(&outcome.assignments);
    }

    #[test]
    fn rebalance_of_settled_state_changes_nothing() {
        let layout = layout(
            HardwareBuilder::new()
                .tier(1, nz!(2), nz!(2))
                .tier(0, nz!(2), nz!(1)),
        );
        let candidates = vec![
            holding(candidate(0, 2, 2, 1), &[0, 1]),
            holding(candidate(1, 1, 1, 0), &[4]),
        ];

        let outcome = redistribute(
            &layout,
            &candidates,
            PassKind::Rebalance,
            LoadThresholds::default(),
        );

        assert_eq!(outcome.assignments, vec![vec![0, 1], vec![4]]);
    }

    #[test]
    fn displaced_workers_are_reported() {
        let layout = single_threaded(nz!(4));
        let candidates = vec![
            holding(candidate(0, 1, 4, 0), &[0, 1, 2, 3]),
            candidate(1, 2, 2, 2),
        ];

        let outcome = redistribute(
            &layout,
            &candidates,
            PassKind::Reclaim,
            LoadThresholds::default(),
        );

        assert_eq!(outcome.displaced, vec![candidates[0].id]);
        assert_eq!(outcome.assignments[0].len(), 2);
        assert_eq!(outcome.assignments[1].len(), 2);
        assert_no_double_ownership(&outcome.assignments);
    }

    #[test]
    fn displaced_victim_is_rehomed_in_its_own_tiers() {
        // Fast processors {0, 1}, slow processors {2, 3}. The quality-0 worker sits at its
        // minimum on the fast tier while the slow tier is free.
        let layout = layout(
            HardwareBuilder::new()
                .tier(1, nz!(2), nz!(1))
                .tier(0, nz!(2), nz!(1)),
        );
        let candidates = vec![
            holding(candidate(0, 2, 2, 0), &[0, 1]),
            candidate(1, 2, 2, 1),
        ];

        let outcome = redistribute(
            &layout,
            &candidates,
            PassKind::Rebalance,
            LoadThresholds::default(),
        );

        assert_eq!(outcome.assignments, vec![vec![2, 3], vec![0, 1]]);
        assert_eq!(outcome.displaced, vec![candidates[0].id]);
    }

    #[test]
    fn empty_layout_assigns_nothing() {
        let layout = Layout::default();
        let candidates = vec![candidate(0, 1, 1, 1)];

        let outcome = redistribute(
            &layout,
            &candidates,
            PassKind::Rebalance,
            LoadThresholds::default(),
        );

        assert_eq!(outcome.assignments, vec![Vec::<ProcessorId>::new()]);
    }
}
