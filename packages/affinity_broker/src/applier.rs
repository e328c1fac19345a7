use tracing::debug;

use crate::pal::{Platform, PlatformFacade};
use crate::registry::Worker;

/// Applies the committed assignment of a worker to its process if it differs from what was
/// last applied. Returns whether the platform was asked to change anything.
///
/// An empty assignment is never applied: restricting a process to zero processors is not
/// possible and the process keeps whatever affinity it had. Failures are logged and otherwise
/// ignored. The worker keeps its previous applied state, so the next pass tries again unless
/// the watcher reaps the worker first.
pub(crate) fn apply(platform: &PlatformFacade, worker: &mut Worker) -> bool {
    if worker.assignment.is_empty() || worker.applied.as_ref() == Some(&worker.assignment) {
        return false;
    }

    match platform.set_affinity(worker.pid, &worker.assignment) {
        Ok(()) => {
            debug!(
                worker = %worker.id,
                pid = worker.pid,
                label = worker.demand.get_label(),
                processors = ?worker.assignment,
                "applied processor affinity"
            );

            worker.applied = Some(worker.assignment.clone());
        }
        Err(e) => {
            debug!(
                worker = %worker.id,
                pid = worker.pid,
                error = %e,
                "failed to apply processor affinity"
            );
        }
    }

    true
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io;

    use crate::ResourceDemand;
    use crate::pal::MockPlatform;
    use crate::registry::Registry;

    use super::*;

    fn worker(assignment: Vec<u32>) -> Worker {
        let mut registry = Registry::new();
        registry.insert_managed(42, ResourceDemand::new()).unwrap();

        let mut worker = registry.managed().next().unwrap().clone();
        worker.assignment = assignment;
        worker
    }

    #[test]
    fn applies_changed_assignment() {
        let mut mock = MockPlatform::new();
        mock.expect_set_affinity()
            .withf(|pid, processors| *pid == 42 && processors == [1, 2])
            .times(1)
            .returning(|_, _| Ok(()));
        let platform = PlatformFacade::custom(mock);

        let mut worker = worker(vec![1, 2]);

        assert!(apply(&platform, &mut worker));
        assert_eq!(worker.applied, Some(vec![1, 2]));

        // Second time around there is nothing to do.
        assert!(!apply(&platform, &mut worker));
    }

    #[test]
    fn empty_assignment_is_not_applied() {
        let platform = PlatformFacade::custom(MockPlatform::new());

        let mut worker = worker(Vec::new());

        assert!(!apply(&platform, &mut worker));
        assert_eq!(worker.applied, None);
    }

    #[test]
    fn failure_is_retried_next_time() {
        let mut mock = MockPlatform::new();
        mock.expect_set_affinity()
            .times(2)
            .returning(|_, _| Err(io::Error::from(io::ErrorKind::NotFound)));
        let platform = PlatformFacade::custom(mock);

        let mut worker = worker(vec![3]);

        assert!(apply(&platform, &mut worker));
        assert_eq!(worker.applied, None);
        assert!(apply(&platform, &mut worker));
    }
}
