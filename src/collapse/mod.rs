//! Streaming group-by/aggregate engine.
//!
//! A [`Collapse`] describes one transform: how records map to group keys,
//! when an open group can no longer grow, and how a group folds into a
//! summary ([`Aggregator`]). The [`Collapser`] drives that description
//! over a record stream while keeping only the open groups in memory.

mod collapser;
pub mod parallel;
pub mod pipeline;
pub mod sort;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;

pub use collapser::{
    CollapseState,
    Collapser,
};
pub use pipeline::{
    run,
    PipelineConfig,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::data_structs::KeySet;
use crate::error::Result;
use crate::io::{
    PartitionStats,
    SummaryRecord,
    TableRecord,
};

/// Running reduction of the records of one group.
///
/// Implementations keep sufficient statistics only, so that the result
/// does not depend on the order records are fed in, and two partial
/// accumulators of the same group can be merged.
pub trait Aggregator {
    type Record;
    type Summary;

    fn accumulate(
        &mut self,
        record: &Self::Record,
    );

    /// Folds another accumulator of the same group into this one.
    fn merge(
        &mut self,
        other: Self,
    ) where
        Self: Sized;

    /// Number of records folded so far.
    fn count(&self) -> u64;

    /// Produces the summary. Fails with `EmptyGroup` if nothing was folded.
    fn close(self) -> Result<Self::Summary>;
}

/// One concrete group-by transform.
///
/// The sort key must start with the partition, so that sorting by it keeps
/// every partition contiguous.
pub trait Collapse: Sync {
    type Record: TableRecord + Serialize + DeserializeOwned + Send;
    type Key: Ord + Hash + Clone + Debug + Send;
    type Partition: Eq + Hash + Clone + Debug + Send;
    type SortKey: Ord + Send;
    type Summary: SummaryRecord + Send;
    type Acc: Aggregator<Record = Self::Record, Summary = Self::Summary>;
    type Stats: PartitionStats<Self::Summary>;

    /// Groups of one partition close in key order, so a watermark is
    /// enough to detect a reappearing key.
    const ORDERED_CLOSE: bool;

    /// Keys a record contributes to (more than one for fan-out).
    fn keys(
        &self,
        record: &Self::Record,
    ) -> KeySet<Self::Key>;

    fn partition(
        &self,
        record: &Self::Record,
    ) -> Self::Partition;

    fn in_partition(
        &self,
        record: &Self::Record,
        partition: &Self::Partition,
    ) -> bool;

    fn sort_key(
        &self,
        record: &Self::Record,
    ) -> Self::SortKey;

    /// Whether the open group `key` can receive nothing more once `next`
    /// (a record of the same partition) has been seen.
    fn is_closed_by(
        &self,
        key: &Self::Key,
        next: &Self::Record,
    ) -> bool;

    /// A fresh accumulator for `key`.
    fn open(
        &self,
        key: &Self::Key,
    ) -> Self::Acc;

    /// Summaries for which this is false are dropped instead of emitted.
    fn retain(
        &self,
        _summary: &Self::Summary,
    ) -> bool {
        true
    }

    /// Output header row.
    fn header(&self) -> Vec<&'static str> {
        Self::Summary::header().to_vec()
    }
}

/// Cooperative cancellation flag shared between the caller and workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollapseStats {
    /// Records folded into groups
    pub records:    u64,
    /// Summaries emitted
    pub groups:     u64,
    /// Summaries dropped by [`Collapse::retain`]
    pub filtered:   u64,
    pub partitions: u64,
    /// Rows skipped as malformed
    pub skipped:    u64,
}

impl CollapseStats {
    pub fn merge(
        &mut self,
        other: &CollapseStats,
    ) {
        self.records += other.records;
        self.groups += other.groups;
        self.filtered += other.filtered;
        self.partitions += other.partitions;
        self.skipped += other.skipped;
    }
}
