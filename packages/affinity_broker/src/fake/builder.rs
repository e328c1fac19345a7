//! Builder for configuring fake hardware.

use std::num::NonZero;

use foldhash::HashSet;

use crate::pal::ProcessorRecord;
use crate::{ProcessorId, TierId};

/// Builder for configuring fake hardware.
///
/// Hardware is described as a sequence of tiers, each with a number of physical cores and a
/// number of logical processors (hyperthreads) per core. Processor IDs are assigned sequentially
/// in the order the tiers are added, with the hyperthreads of a core numbered consecutively. The
/// ID of a physical core is the ID of its first processor.
///
/// # Example
///
/// ```
/// use affinity_broker::fake::{FakeHost, HardwareBuilder};
/// use new_zealand::nz;
///
/// // Processors 0-3 are two fast cores with two hyperthreads each,
/// // processors 4-7 are four slow single-threaded cores.
/// let hardware = HardwareBuilder::new()
///     .tier(1, nz!(2), nz!(2))
///     .tier(0, nz!(4), nz!(1));
///
/// let fake = FakeHost::new(hardware);
/// # drop(fake);
/// ```
#[derive(Clone, Debug, Default)]
pub struct HardwareBuilder {
    tiers: Vec<TierSpec>,
    reserved_hints: Vec<ProcessorId>,
}

#[derive(Clone, Copy, Debug)]
struct TierSpec {
    tier_id: TierId,
    core_count: NonZero<usize>,
    threads_per_core: NonZero<usize>,
}

impl HardwareBuilder {
    /// Creates a builder with no processors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for a homogeneous host with the given number of physical cores, each
    /// with the given number of logical processors.
    #[must_use]
    pub fn from_counts(core_count: NonZero<usize>, threads_per_core: NonZero<usize>) -> Self {
        Self::new().tier(0, core_count, threads_per_core)
    }

    /// Adds a performance tier. A higher tier ID is a faster tier.
    #[must_use]
    pub fn tier(
        mut self,
        tier_id: TierId,
        core_count: NonZero<usize>,
        threads_per_core: NonZero<usize>,
    ) -> Self {
        self.tiers.push(TierSpec {
            tier_id,
            core_count,
            threads_per_core,
        });
        self
    }

    /// Marks a processor as unavailable to workers, the way a host would report processors
    /// outside the allowed set of the current process.
    #[must_use]
    pub fn reserved_hint(mut self, processor_id: ProcessorId) -> Self {
        self.reserved_hints.push(processor_id);
        self
    }

    pub(crate) fn build(&self) -> Vec<ProcessorRecord> {
        let reserved: HashSet<ProcessorId> = self.reserved_hints.iter().copied().collect();

        let mut next_id: ProcessorId = 0;
        let mut records = Vec::new();

        for spec in &self.tiers {
            for _ in 0..spec.core_count.get() {
                let core_id = next_id;

                for _ in 0..spec.threads_per_core.get() {
                    records.push(
                        ProcessorRecord::new(next_id, core_id, spec.tier_id)
                            .reserved_hint(reserved.contains(&next_id)),
                    );
                    next_id = next_id
                        .checked_add(1)
                        .expect("fake hardware cannot have more than u32::MAX processors");
                }
            }
        }

        records
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use itertools::Itertools;
    use new_zealand::nz;

    use super::*;

    #[test]
    fn from_counts_numbers_siblings_consecutively() {
        let records = HardwareBuilder::from_counts(nz!(2), nz!(2)).build();

        assert_eq!(
            records,
            vec![
                ProcessorRecord::new(0, 0, 0),
                ProcessorRecord::new(1, 0, 0),
                ProcessorRecord::new(2, 2, 0),
                ProcessorRecord::new(3, 2, 0),
            ]
        );
    }

    #[test]
    fn tiers_are_numbered_in_insertion_order() {
        let records = HardwareBuilder::new()
            .tier(1, nz!(1), nz!(2))
            .tier(0, nz!(2), nz!(1))
            .build();

        let summary = records
            .iter()
            .map(|r| (r.processor_id(), r.core_id(), r.tier_id()))
            .collect_vec();

        assert_eq!(summary, vec![(0, 0, 1), (1, 0, 1), (2, 2, 0), (3, 3, 0)]);
    }

    #[test]
    fn reserved_hint_is_applied() {
        let records = HardwareBuilder::from_counts(nz!(2), nz!(1))
            .reserved_hint(1)
            .build();

        assert!(!records[0].is_reserved_hint());
        assert!(records[1].is_reserved_hint());
    }

    #[test]
    fn empty_builder_has_no_processors() {
        assert!(HardwareBuilder::new().build().is_empty());
    }
}
