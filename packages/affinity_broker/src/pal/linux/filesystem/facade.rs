use std::fmt::Debug;
use std::io;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::linux::MockFilesystem;
use crate::pal::linux::{BuildTargetFilesystem, Filesystem};
use crate::{ProcessId, ProcessorId};

/// Either the real `/proc` and `/sys` readers or, in unit tests, a mock.
#[derive(Clone)]
pub(crate) enum FilesystemFacade {
    Target(&'static BuildTargetFilesystem),

    #[cfg(test)]
    Mock(Arc<MockFilesystem>),
}

impl FilesystemFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetFilesystem)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockFilesystem) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Filesystem for FilesystemFacade {
    fn get_cpu_online_contents(&self) -> io::Result<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpu_online_contents(),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_cpu_online_contents(),
        }
    }

    fn get_cpu_thread_siblings_contents(&self, processor_id: ProcessorId) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpu_thread_siblings_contents(processor_id),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_cpu_thread_siblings_contents(processor_id),
        }
    }

    fn get_cpu_capacity_contents(&self, processor_id: ProcessorId) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpu_capacity_contents(processor_id),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_cpu_capacity_contents(processor_id),
        }
    }

    fn get_cpu_highest_perf_contents(&self, processor_id: ProcessorId) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpu_highest_perf_contents(processor_id),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_cpu_highest_perf_contents(processor_id),
        }
    }

    fn get_cpu_max_freq_contents(&self, processor_id: ProcessorId) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpu_max_freq_contents(processor_id),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_cpu_max_freq_contents(processor_id),
        }
    }

    fn get_proc_self_status_contents(&self) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_proc_self_status_contents(),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_proc_self_status_contents(),
        }
    }

    fn get_proc_stat_contents(&self, pid: ProcessId) -> io::Result<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_proc_stat_contents(pid),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_proc_stat_contents(pid),
        }
    }

    fn get_proc_task_ids(&self, pid: ProcessId) -> io::Result<Vec<ProcessId>> {
        match self {
            Self::Target(filesystem) => filesystem.get_proc_task_ids(pid),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_proc_task_ids(pid),
        }
    }
}

impl Debug for FilesystemFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
