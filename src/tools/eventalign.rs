use std::path::PathBuf;

use log::info;
use serde::Serialize;
use smallvec::smallvec;

use super::{
    run_to_file,
    validate_paths,
    OutputOptions,
};
use crate::collapse::{
    Collapse,
    CollapseStats,
    PipelineConfig,
};
use crate::data_structs::{
    CollapsedKmerRecord,
    EventRecord,
    KeySet,
    KmerAccumulator,
    KmerKey,
    MergedKmerAccumulator,
    ReadIndexStats,
    ReadPartition,
    SAMPLES_COLUMN,
};
use crate::error::Result;
use crate::io::{
    Compression,
    SummaryRecord,
};
use crate::with_field_fn;

/// Collapses consecutive events of one kmer of one read.
///
/// A group is every event sharing (read, contig, position, kmer, strand);
/// it is closed by the first event with a different key. Reads (per contig)
/// are the partitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventalignCollapse {
    /// Append the raw samples of every kmer as a trailing column
    pub write_samples: bool,
}

impl Collapse for EventalignCollapse {
    type Acc = KmerAccumulator;
    type Key = KmerKey;
    type Partition = ReadPartition;
    type Record = EventRecord;
    type SortKey = KmerKey;
    type Stats = ReadIndexStats;
    type Summary = CollapsedKmerRecord;

    const ORDERED_CLOSE: bool = false;

    fn keys(
        &self,
        record: &EventRecord,
    ) -> KeySet<KmerKey> {
        smallvec![record.key()]
    }

    fn partition(
        &self,
        record: &EventRecord,
    ) -> ReadPartition {
        ReadPartition {
            read_id: record.read_id.clone(),
            contig:  record.contig.clone(),
        }
    }

    fn in_partition(
        &self,
        record: &EventRecord,
        partition: &ReadPartition,
    ) -> bool {
        record.read_id == partition.read_id && record.contig == partition.contig
    }

    fn sort_key(
        &self,
        record: &EventRecord,
    ) -> KmerKey {
        record.key()
    }

    fn is_closed_by(
        &self,
        key: &KmerKey,
        next: &EventRecord,
    ) -> bool {
        !key.matches(next)
    }

    fn open(
        &self,
        key: &KmerKey,
    ) -> KmerAccumulator {
        let acc = KmerAccumulator::new(key.clone());
        match self.write_samples {
            true => acc.keep_raw_samples(),
            false => acc,
        }
    }

    fn header(&self) -> Vec<&'static str> {
        collapsed_header(self.write_samples)
    }
}

/// Merges collapsed output back into one row per kmer.
///
/// Rows are grouped like eventalign events. A kmer split across several
/// rows (runs collapsed separately, then concatenated) is pooled again;
/// a kmer in a single row is written unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollapsedKmerMerge {
    /// Write the `samples` column
    pub write_samples: bool,
}

impl Collapse for CollapsedKmerMerge {
    type Acc = MergedKmerAccumulator;
    type Key = KmerKey;
    type Partition = ReadPartition;
    type Record = CollapsedKmerRecord;
    type SortKey = KmerKey;
    type Stats = ReadIndexStats;
    type Summary = CollapsedKmerRecord;

    const ORDERED_CLOSE: bool = false;

    fn keys(
        &self,
        record: &CollapsedKmerRecord,
    ) -> KeySet<KmerKey> {
        smallvec![record.key()]
    }

    fn partition(
        &self,
        record: &CollapsedKmerRecord,
    ) -> ReadPartition {
        ReadPartition {
            read_id: record.read_id.clone(),
            contig:  record.contig.clone(),
        }
    }

    fn in_partition(
        &self,
        record: &CollapsedKmerRecord,
        partition: &ReadPartition,
    ) -> bool {
        record.read_id == partition.read_id && record.contig == partition.contig
    }

    fn sort_key(
        &self,
        record: &CollapsedKmerRecord,
    ) -> KmerKey {
        record.key()
    }

    fn is_closed_by(
        &self,
        key: &KmerKey,
        next: &CollapsedKmerRecord,
    ) -> bool {
        *key != next.key()
    }

    fn open(
        &self,
        key: &KmerKey,
    ) -> MergedKmerAccumulator {
        MergedKmerAccumulator::new(key.clone(), self.write_samples)
    }

    fn header(&self) -> Vec<&'static str> {
        collapsed_header(self.write_samples)
    }
}

fn collapsed_header(write_samples: bool) -> Vec<&'static str> {
    let mut header = CollapsedKmerRecord::header().to_vec();
    if write_samples {
        header.push(SAMPLES_COLUMN);
    }
    header
}

#[derive(Debug, Clone, Serialize)]
pub struct EventalignCollapseConfig {
    pub input:    PathBuf,
    pub output:   PathBuf,
    pub pipeline: PipelineConfig,
    pub output_options: OutputOptions,
    /// Append a `samples` column with the raw samples of every kmer
    pub write_samples: bool,
    /// Input is collapsed output to merge, not eventalign
    pub merge_collapsed: bool,
}

impl EventalignCollapseConfig {
    pub fn new(
        input: PathBuf,
        output: PathBuf,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            input,
            output,
            pipeline,
            output_options: OutputOptions::default(),
            write_samples: false,
            merge_collapsed: false,
        }
    }

    with_field_fn!(pipeline, PipelineConfig);

    with_field_fn!(output_options, OutputOptions);

    with_field_fn!(write_samples, bool);

    with_field_fn!(merge_collapsed, bool);

    pub fn with_compression(
        mut self,
        compression: Compression,
        level: Option<u32>,
    ) -> Self {
        self.output_options.compression = compression;
        self.output_options.compression_level = level;
        self
    }

    pub fn with_index(
        mut self,
        index: bool,
    ) -> Self {
        self.output_options.index = index;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_paths(&self.input, &self.output)?;
        self.pipeline.validate()?;
        self.output_options.validate()
    }

    pub fn run(&self) -> Result<CollapseStats> {
        self.validate()?;
        info!(
            "Eventalign collapse configuration: {}",
            serde_json::to_string(self).unwrap_or_default()
        );
        let write_samples = self.write_samples;
        match self.merge_collapsed {
            true => self.run_with(&CollapsedKmerMerge { write_samples }),
            false => self.run_with(&EventalignCollapse { write_samples }),
        }
    }

    fn run_with<C: Collapse>(
        &self,
        collapse: &C,
    ) -> Result<CollapseStats> {
        run_to_file(
            collapse,
            &self.input,
            &self.output,
            &self.pipeline,
            &self.output_options,
        )
    }
}
