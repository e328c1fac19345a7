use std::collections::{BTreeMap, BTreeSet};

use foldhash::{HashMap, HashMapExt};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::pal::Platform;
use crate::{CoreId, Error, Host, ProcessorId, Result, TierId};

type CoreMap = BTreeMap<CoreId, Vec<ProcessorId>>;

/// The processors of a host grouped by performance tier and physical core.
///
/// Built once when the scheduler starts. Processors reserved for system use (either by
/// configuration or because the platform hinted that they are off limits) are remembered for
/// diagnostic purposes but are not part of the usable topology.
///
/// # Example
///
/// ```
/// use affinity_broker::fake::{FakeHost, HardwareBuilder};
/// use affinity_broker::Topology;
/// use new_zealand::nz;
///
/// let fake = FakeHost::new(
///     HardwareBuilder::new()
///         .tier(1, nz!(2), nz!(2))
///         .tier(0, nz!(2), nz!(1)),
/// );
///
/// let topology = Topology::collect(&fake.host(), &[0]).unwrap();
///
/// assert!(topology.is_heterogeneous());
/// assert_eq!(topology.tiers().collect::<Vec<_>>(), vec![1, 0]);
/// assert_eq!(topology.processor_count(), 5);
/// assert!(topology.is_reserved(0));
/// ```
#[derive(Clone, Debug)]
pub struct Topology {
    // Usable processors only. Tiers and cores without usable processors are absent.
    usable: BTreeMap<TierId, CoreMap>,

    // Every processor reported by the platform, reserved or not.
    all: BTreeMap<TierId, CoreMap>,

    placements: HashMap<ProcessorId, (TierId, CoreId)>,
    reserved: BTreeSet<ProcessorId>,
}

impl Topology {
    /// Asks the host to describe its processors and builds the topology, excluding the given
    /// reserved processors and any processor the host hints is off limits.
    ///
    /// Reserved processors that the host does not report are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot describe its processors or if no usable processors
    /// remain after the exclusions.
    pub fn collect(host: &Host, reserved: &[ProcessorId]) -> Result<Self> {
        let records = host
            .platform()
            .processors()
            .map_err(Error::TopologyUnavailable)?;

        let configured_reserved: BTreeSet<ProcessorId> = reserved.iter().copied().collect();

        let mut usable: BTreeMap<TierId, CoreMap> = BTreeMap::new();
        let mut all: BTreeMap<TierId, CoreMap> = BTreeMap::new();
        let mut placements = HashMap::with_capacity(records.len());
        let mut reserved = BTreeSet::new();

        for record in records {
            if placements.contains_key(&record.processor_id) {
                debug!(
                    processor = record.processor_id,
                    "ignoring duplicate processor record"
                );
                continue;
            }

            placements.insert(record.processor_id, (record.tier_id, record.core_id));

            all.entry(record.tier_id)
                .or_default()
                .entry(record.core_id)
                .or_default()
                .push(record.processor_id);

            if record.is_reserved_hint || configured_reserved.contains(&record.processor_id) {
                reserved.insert(record.processor_id);
                continue;
            }

            usable
                .entry(record.tier_id)
                .or_default()
                .entry(record.core_id)
                .or_default()
                .push(record.processor_id);
        }

        for unknown in configured_reserved
            .iter()
            .filter(|id| !placements.contains_key(*id))
        {
            warn!(
                processor = unknown,
                "reserved processor is not present on this host"
            );
        }

        if usable.is_empty() {
            return Err(Error::NoUsableProcessors);
        }

        for cores in usable.values_mut().chain(all.values_mut()) {
            for processors in cores.values_mut() {
                processors.sort_unstable();
            }
        }

        let topology = Self {
            usable,
            all,
            placements,
            reserved,
        };

        debug!(
            tiers = topology.usable.len(),
            processors = topology.processor_count(),
            reserved = ?topology.reserved,
            "collected host topology"
        );

        Ok(topology)
    }

    /// The tiers that contain usable processors, fastest first.
    pub fn tiers(&self) -> impl Iterator<Item = TierId> + '_ {
        self.usable.keys().rev().copied()
    }

    /// The physical cores of a tier that contain usable processors, in ascending core ID order,
    /// together with their usable processors.
    pub fn cores(&self, tier: TierId) -> impl Iterator<Item = (CoreId, &[ProcessorId])> + '_ {
        self.usable
            .get(&tier)
            .into_iter()
            .flat_map(|cores| cores.iter().map(|(core, p)| (*core, p.as_slice())))
    }

    /// The tier and physical core of a processor, whether usable or reserved.
    #[must_use]
    pub fn placement(&self, processor: ProcessorId) -> Option<(TierId, CoreId)> {
        self.placements.get(&processor).copied()
    }

    /// The number of usable logical processors on a physical core.
    #[must_use]
    pub fn sibling_count(&self, tier: TierId, core: CoreId) -> usize {
        self.usable
            .get(&tier)
            .and_then(|cores| cores.get(&core))
            .map_or(0, Vec::len)
    }

    /// Whether the processor exists and is usable.
    #[must_use]
    pub fn contains(&self, processor: ProcessorId) -> bool {
        self.placements.contains_key(&processor) && !self.reserved.contains(&processor)
    }

    /// Whether the processor exists but was reserved when the topology was collected.
    #[must_use]
    pub fn is_reserved(&self, processor: ProcessorId) -> bool {
        self.reserved.contains(&processor)
    }

    /// The number of usable logical processors.
    #[must_use]
    pub fn processor_count(&self) -> usize {
        self.usable
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Usable processors in ascending ID order.
    #[must_use]
    pub fn processors(&self) -> Vec<ProcessorId> {
        self.usable
            .values()
            .flat_map(BTreeMap::values)
            .flatten()
            .copied()
            .sorted_unstable()
            .collect_vec()
    }

    /// Whether the usable processors span more than one performance tier.
    #[must_use]
    pub fn is_heterogeneous(&self) -> bool {
        self.usable.len() > 1
    }

    /// The slowest tier a worker of the given quality may use.
    ///
    /// On a heterogeneous host, workers with quality above 0 are kept off the slowest tier.
    /// Everything else may use any tier.
    #[must_use]
    pub fn floor_tier(&self, quality: u32) -> TierId {
        if quality > 0 && self.is_heterogeneous() {
            self.usable
                .keys()
                .nth(1)
                .copied()
                .unwrap_or_else(|| self.lowest_tier())
        } else {
            self.lowest_tier()
        }
    }

    pub(crate) fn lowest_tier(&self) -> TierId {
        self.usable.keys().next().copied().unwrap_or_default()
    }

    // Every reported processor, including reserved ones, for diagnostics.
    pub(crate) fn all_processors(&self) -> &BTreeMap<TierId, CoreMap> {
        &self.all
    }
}
