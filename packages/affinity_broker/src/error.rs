use std::io;

use thiserror::Error;

use crate::{ProcessId, ProcessorId};

/// Errors that can occur when starting the scheduler or registering workers with it.
///
/// Insufficient capacity is deliberately not an error: a pass always allocates what it can and
/// callers detect the shortfall by comparing a worker's assignment against its minimum.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The platform could not describe the processors of the host.
    #[error("host processor topology is unavailable: {0}")]
    TopologyUnavailable(#[source] io::Error),

    /// Every processor reported by the platform was reserved or otherwise unusable.
    #[error("no usable processors remain after excluding reserved processors")]
    NoUsableProcessors,

    /// The caller asked for a resource demand that can never be satisfied.
    #[error("invalid resource demand: {problem}")]
    InvalidDemand {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// A fixed affinity was requested with no processors in it.
    #[error("a fixed affinity must contain at least one processor")]
    EmptyAffinity,

    /// The caller referenced a processor that the host topology does not contain.
    #[error("processor {0} is not part of the host topology")]
    UnknownProcessor(ProcessorId),

    /// The process is already under scheduler control.
    #[error("process {0} is already registered with the scheduler")]
    AlreadyManaged(ProcessId),

    /// The operating system refused to apply a fixed affinity to a process.
    #[error("failed to apply processor affinity to process {pid}: {source}")]
    Affinity {
        /// The process whose affinity could not be changed.
        pid: ProcessId,

        /// The underlying operating system error.
        #[source]
        source: io::Error,
    },

    /// A reserved processor list in cpulist format could not be parsed.
    #[error("invalid reserved processor list: {0}")]
    InvalidProcessorList(#[from] cpulist::Error),
}

/// A specialized `Result` type for scheduler operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
