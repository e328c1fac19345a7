use std::time::{Duration, Instant};

use foldhash::{HashMap, HashMapExt};
use parking_lot::Mutex;

use crate::ProcessId;

/// Converts cumulative processor time readings into a load percentage.
///
/// The load is the processor time consumed since the previous reading divided by the wall clock
/// time elapsed since then, expressed as a percentage of one processor. A worker saturating two
/// processors reads as 200%. The first reading for a process has no baseline and reads as 0%.
#[derive(Debug)]
pub(crate) struct LoadTracker {
    samples: Mutex<HashMap<ProcessId, Sample>>,
}

#[derive(Clone, Copy, Debug)]
struct Sample {
    processor_time: Duration,
    taken_at: Instant,
}

impl LoadTracker {
    pub(crate) fn new() -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Records a cumulative processor time reading and returns the load since the previous one.
    pub(crate) fn record(&self, pid: ProcessId, processor_time: Duration, now: Instant) -> f64 {
        let mut samples = self.samples.lock();

        let previous = samples.insert(
            pid,
            Sample {
                processor_time,
                taken_at: now,
            },
        );

        let Some(previous) = previous else {
            return 0.0;
        };

        let wall = now.saturating_duration_since(previous.taken_at);

        if wall.is_zero() {
            return 0.0;
        }

        // A process ID may have been recycled, in which case the counter restarts.
        let busy = processor_time.saturating_sub(previous.processor_time);

        busy.as_secs_f64() / wall.as_secs_f64() * 100.0
    }

    pub(crate) fn forget(&self, pid: ProcessId) {
        self.samples.lock().remove(&pid);
    }
}
