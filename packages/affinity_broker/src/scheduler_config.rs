use std::time::Duration;

use crate::{ProcessorId, Result};

const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration of a [`Scheduler`][crate::Scheduler].
///
/// The defaults match a typical deployment: automatic affinity management is enabled, the
/// background watcher runs a cooperative pass every 2 seconds and no processors are reserved.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use affinity_broker::SchedulerConfig;
///
/// let config = SchedulerConfig::new()
///     .reserved_cpulist("0-1")
///     .expect("valid cpulist")
///     .watch_interval(Duration::from_secs(5));
/// # drop(config);
/// ```
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    reserved: Vec<ProcessorId>,
    auto_affinity: bool,
    background_watcher: bool,
    watch_interval: Duration,
    exit_poll_interval: Duration,
    thresholds: LoadThresholds,
}

/// The load levels (in percent of one processor) that drive the cooperative phases.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct LoadThresholds {
    /// Workers above this load grow into free processors.
    pub(crate) growth: f64,

    /// Workers above this load accumulate a streak towards stealing.
    pub(crate) steal: f64,

    /// Workers below this load may have processors stolen from them.
    pub(crate) idle: f64,

    /// How many consecutive cooperative passes above `steal` are needed before stealing.
    pub(crate) steal_streak: u32,
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self {
            growth: 70.0,
            steal: 85.0,
            idle: 20.0,
            steal_streak: 3,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reserved: Vec::new(),
            auto_affinity: true,
            background_watcher: true,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            exit_poll_interval: DEFAULT_EXIT_POLL_INTERVAL,
            thresholds: LoadThresholds::default(),
        }
    }

    /// Reserves processors for system use. Reserved processors are never assigned to workers.
    ///
    /// Replaces any previously configured reserved processors.
    #[must_use]
    pub fn reserved_processors(mut self, processors: impl IntoIterator<Item = ProcessorId>) -> Self {
        self.reserved = processors.into_iter().collect();
        self
    }

    /// Reserves processors for system use, given as a Linux-style cpulist string
    /// (e.g. `0-1,8`).
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid cpulist.
    pub fn reserved_cpulist(self, cpulist: &str) -> Result<Self> {
        let processors = cpulist::parse(cpulist.trim())?;
        Ok(self.reserved_processors(processors))
    }

    /// Enables or disables automatic affinity management.
    ///
    /// When disabled, workers registered with explicit demands are accepted but never assigned
    /// any processors and no background watcher is started. Fixed affinities still apply.
    #[must_use]
    pub fn auto_affinity(mut self, enabled: bool) -> Self {
        self.auto_affinity = enabled;
        self
    }

    /// Enables or disables the background watcher thread.
    ///
    /// Without the watcher, cooperative passes and reaping of exited workers only happen when
    /// the owner calls [`Scheduler::rebalance()`][crate::Scheduler::rebalance] or
    /// [`Scheduler::reclaim()`][crate::Scheduler::reclaim].
    #[must_use]
    pub fn background_watcher(mut self, enabled: bool) -> Self {
        self.background_watcher = enabled;
        self
    }

    /// How long the watcher waits for worker exits before running a cooperative pass.
    ///
    /// # Panics
    ///
    /// Panics if the interval is zero.
    #[must_use]
    pub fn watch_interval(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "watch interval must be non-zero");
        self.watch_interval = interval;
        self
    }

    /// How often the watcher checks worker liveness while waiting.
    ///
    /// # Panics
    ///
    /// Panics if the interval is zero.
    #[must_use]
    pub fn exit_poll_interval(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "exit poll interval must be non-zero");
        self.exit_poll_interval = interval;
        self
    }

    /// Load (percent of one processor) above which a worker grows into free processors.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a finite non-negative number.
    #[must_use]
    pub fn growth_load_threshold(mut self, percent: f64) -> Self {
        assert_valid_percent(percent);
        self.thresholds.growth = percent;
        self
    }

    /// Load (percent of one processor) above which a worker builds up a streak towards
    /// stealing a processor from an idle worker.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a finite non-negative number.
    #[must_use]
    pub fn steal_load_threshold(mut self, percent: f64) -> Self {
        assert_valid_percent(percent);
        self.thresholds.steal = percent;
        self
    }

    /// Load (percent of one processor) below which a worker counts as idle and may lose
    /// processors above its minimum to busy workers.
    ///
    /// # Panics
    ///
    /// Panics if the value is not a finite non-negative number.
    #[must_use]
    pub fn idle_load_threshold(mut self, percent: f64) -> Self {
        assert_valid_percent(percent);
        self.thresholds.idle = percent;
        self
    }

    /// How many consecutive cooperative passes a worker must stay above the steal threshold
    /// before it may take a processor from an idle worker.
    ///
    /// # Panics
    ///
    /// Panics if `passes` is zero, which would let workers that are not busy steal from each
    /// other on every pass.
    #[must_use]
    pub fn steal_streak(mut self, passes: u32) -> Self {
        assert!(passes > 0, "steal streak must be at least one pass");
        self.thresholds.steal_streak = passes;
        self
    }

    pub(crate) fn reserved(&self) -> &[ProcessorId] {
        &self.reserved
    }

    pub(crate) fn is_auto_affinity(&self) -> bool {
        self.auto_affinity
    }

    pub(crate) fn has_background_watcher(&self) -> bool {
        self.background_watcher
    }

    pub(crate) fn get_watch_interval(&self) -> Duration {
        self.watch_interval
    }

    pub(crate) fn get_exit_poll_interval(&self) -> Duration {
        self.exit_poll_interval
    }

    pub(crate) fn thresholds(&self) -> LoadThresholds {
        self.thresholds
    }
}

fn assert_valid_percent(percent: f64) {
    assert!(
        percent.is_finite() && percent >= 0.0,
        "load threshold must be a finite non-negative percentage, got {percent}"
    );
}
