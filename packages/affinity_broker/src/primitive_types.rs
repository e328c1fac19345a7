/// Identifies a specific logical processor.
///
/// This will match the numeric identifier used by standard tooling of the operating system.
///
/// The values are not guaranteed to be sequential/contiguous or to start from zero (aspects
/// that are also not guaranteed by operating system tooling).
pub type ProcessorId = u32;

/// Identifies a physical core, i.e. a group of logical processors that share execution
/// resources (hyperthread siblings).
///
/// Core identifiers are only meaningful within the topology that reported them. The Linux
/// backend uses the lowest processor ID among the siblings, so cores in different packages never
/// collide.
pub type CoreId = u32;

/// Identifies a performance tier ("scheduling class") of physical cores.
///
/// Tiers are relative: a higher tier ID is a faster tier. On hosts without heterogeneous cores,
/// every processor reports the same tier.
pub type TierId = u32;

/// Identifies an operating system process.
pub type ProcessId = u32;
