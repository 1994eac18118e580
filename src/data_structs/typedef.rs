use smallvec::SmallVec;

/// Reference coordinate (0-based, as written by nanopolish).
pub type PosType = u64;
/// Event, read and site counters.
pub type CountType = u64;
/// Current levels, standard deviations and dwell times.
pub type SignalType = f64;

/// Keys produced by one record. Most records yield exactly one.
pub type KeySet<K> = SmallVec<[K; 2]>;
