use std::fmt;

use crate::{Error, Result};

/// Describes how many processors a worker needs and how much it cares about where they are.
///
/// * `min_cores` is the guaranteed minimum. The scheduler will displace lower-quality workers
///   (down to their own minimum) to satisfy it.
/// * `max_cores` caps how far the worker can grow when it is busy. Unbounded by default.
/// * `quality` is the priority. Higher quality workers are served first and may only use the
///   faster performance tiers on hosts with heterogeneous cores. Quality 0 means "no tier
///   preference": such workers never displace anyone and have no protection against being
///   displaced.
/// * `label` is a human-readable name used in logs and occupancy snapshots.
///
/// The demand is validated when the worker is registered.
///
/// # Example
///
/// ```
/// use affinity_broker::ResourceDemand;
///
/// let demand = ResourceDemand::new()
///     .min_cores(2)
///     .max_cores(4)
///     .quality(3)
///     .label("render-farm");
///
/// assert_eq!(demand.get_min_cores(), 2);
/// assert_eq!(demand.get_max_cores(), Some(4));
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceDemand {
    min_cores: usize,
    max_cores: Option<usize>,
    quality: u32,
    label: Option<String>,
}

impl Default for ResourceDemand {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceDemand {
    /// Creates a demand for one processor at quality 1 with no upper bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_cores: 1,
            max_cores: None,
            quality: 1,
            label: None,
        }
    }

    /// Sets the guaranteed minimum number of logical processors.
    #[must_use]
    pub fn min_cores(mut self, count: usize) -> Self {
        self.min_cores = count;
        self
    }

    /// Sets the maximum number of logical processors the worker may grow to.
    #[must_use]
    pub fn max_cores(mut self, count: usize) -> Self {
        self.max_cores = Some(count);
        self
    }

    /// Sets the priority of the worker. Quality 0 means "no tier preference".
    #[must_use]
    pub fn quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    /// Attaches a human-readable label to the worker.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The guaranteed minimum number of logical processors.
    #[must_use]
    pub fn get_min_cores(&self) -> usize {
        self.min_cores
    }

    /// The maximum number of logical processors, if bounded.
    #[must_use]
    pub fn get_max_cores(&self) -> Option<usize> {
        self.max_cores
    }

    /// The priority of the worker.
    #[must_use]
    pub fn get_quality(&self) -> u32 {
        self.quality
    }

    /// The human-readable label of the worker, if any.
    #[must_use]
    pub fn get_label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn effective_max_cores(&self) -> usize {
        self.max_cores.unwrap_or(usize::MAX)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.min_cores == 0 {
            return Err(Error::InvalidDemand {
                problem: "min_cores must be at least 1".to_string(),
            });
        }

        match self.max_cores {
            Some(max_cores) if max_cores < self.min_cores => Err(Error::InvalidDemand {
                problem: format!(
                    "max_cores ({max_cores}) must not be less than min_cores ({})",
                    self.min_cores
                ),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ResourceDemand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_cores {
            Some(max) => write!(f, "{}..={max} cores", self.min_cores)?,
            None => write!(f, "{}.. cores", self.min_cores)?,
        }

        write!(f, " at quality {}", self.quality)
    }
}
