//! Record and summary types of the two collapsing transforms.
//!
//! - [`event`]: nanopolish eventalign rows ([`EventRecord`]), their kmer
//!   key and the dwell-weighted per-kmer collapse ([`KmerAccumulator`],
//!   [`CollapsedKmerRecord`]).
//! - [`methylation`]: per-read methylation calls
//!   ([`MethylationCallRecord`]) and per-site frequencies
//!   ([`SiteAccumulator`], [`SiteFrequencyRecord`]).
//! - Small enumerations shared by both ([`Strand`], [`MethCall`], and the
//!   run policies) and the [`typedef`] aliases.

mod enums;
pub mod event;
pub mod methylation;
pub mod typedef;


pub use enums::{
    AmbiguousPolicy,
    MalformedPolicy,
    MethCall,
    SortMode,
    Strand,
};
pub use event::{
    CollapsedColumns,
    CollapsedKmerRecord,
    EventRecord,
    KmerAccumulator,
    KmerKey,
    MergedKmerAccumulator,
    ReadIndexStats,
    ReadPartition,
    SampleStats,
    SAMPLES_COLUMN,
};
pub use methylation::{
    ContigIndexStats,
    MethFrequency,
    MethylationCallRecord,
    SiteAccumulator,
    SiteFrequencyRecord,
    SiteKey,
    SiteRules,
};
pub use typedef::KeySet;
