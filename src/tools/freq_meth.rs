use std::path::PathBuf;

use log::info;
use serde::Serialize;

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
use crate::data_structs::typedef::{
    CountType,
    PosType,
};
use crate::data_structs::{
    AmbiguousPolicy,
    ContigIndexStats,
    KeySet,
    MethylationCallRecord,
    SiteAccumulator,
    SiteFrequencyRecord,
    SiteKey,
    SiteRules,
    Strand,
};
use crate::error::{
    CollapseError,
    Result,
};
use crate::io::Compression;
use crate::with_field_fn;

/// Per-site methylation frequency from per-read calls.
///
/// Calls are expected in (contig, start) order. A site is complete once a
/// call starting past it arrives, so sites close in position order and the
/// contig is the partition.
#[derive(Debug, Clone, Copy)]
pub struct FreqMethCollapse {
    pub rules:           SiteRules,
    /// Keep the two strands of a site apart
    pub strand_specific: bool,
    /// Sites covered by fewer reads are dropped
    pub min_depth:       CountType,
}

impl FreqMethCollapse {
    pub fn new(rules: SiteRules) -> Self {
        Self {
            rules,
            strand_specific: false,
            min_depth: 0,
        }
    }
}

impl Collapse for FreqMethCollapse {
    type Acc = SiteAccumulator;
    type Key = SiteKey;
    type Partition = String;
    type Record = MethylationCallRecord;
    type SortKey = (String, PosType);
    type Stats = ContigIndexStats;
    type Summary = SiteFrequencyRecord;

    const ORDERED_CLOSE: bool = true;

    fn keys(
        &self,
        record: &MethylationCallRecord,
    ) -> KeySet<SiteKey> {
        let strand = if self.strand_specific {
            record.strand
        }
        else {
            Strand::None
        };
        record
            .site_positions(self.rules.split_groups)
            .into_iter()
            .map(|position| {
                SiteKey {
                    contig: record.contig.clone(),
                    position,
                    strand,
                }
            })
            .collect()
    }

    fn partition(
        &self,
        record: &MethylationCallRecord,
    ) -> String {
        record.contig.clone()
    }

    fn in_partition(
        &self,
        record: &MethylationCallRecord,
        partition: &String,
    ) -> bool {
        &record.contig == partition
    }

    fn sort_key(
        &self,
        record: &MethylationCallRecord,
    ) -> (String, PosType) {
        (record.contig.clone(), record.start)
    }

    fn is_closed_by(
        &self,
        key: &SiteKey,
        next: &MethylationCallRecord,
    ) -> bool {
        key.contig != next.contig || key.position < next.start
    }

    fn open(
        &self,
        key: &SiteKey,
    ) -> SiteAccumulator {
        SiteAccumulator::new(key.clone(), self.rules)
    }

    fn retain(
        &self,
        summary: &SiteFrequencyRecord,
    ) -> bool {
        summary.covered_reads >= self.min_depth
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FreqMethConfig {
    pub input:           PathBuf,
    pub output:          PathBuf,
    pub pipeline:        PipelineConfig,
    /// Calls with |log likelihood ratio| below this are ambiguous
    pub llr_threshold:   f64,
    pub ambiguous:       AmbiguousPolicy,
    /// Split multi-CpG calls into one site per CpG
    pub split_groups:    bool,
    pub strand_specific: bool,
    pub min_depth:       CountType,
    pub output_options:  OutputOptions,
}

impl FreqMethConfig {
    pub const DEFAULT_LLR_THRESHOLD: f64 = 2.0;

    pub fn new(
        input: PathBuf,
        output: PathBuf,
        pipeline: PipelineConfig,
        ambiguous: AmbiguousPolicy,
    ) -> Self {
        Self {
            input,
            output,
            pipeline,
            llr_threshold: Self::DEFAULT_LLR_THRESHOLD,
            ambiguous,
            split_groups: true,
            strand_specific: false,
            min_depth: 0,
            output_options: OutputOptions::default(),
        }
    }

    with_field_fn!(pipeline, PipelineConfig);

    with_field_fn!(llr_threshold, f64);

    with_field_fn!(split_groups, bool);

    with_field_fn!(strand_specific, bool);

    with_field_fn!(min_depth, CountType);

    with_field_fn!(output_options, OutputOptions);

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

    pub fn rules(&self) -> SiteRules {
        SiteRules {
            llr_threshold: self.llr_threshold,
            ambiguous:     self.ambiguous,
            split_groups:  self.split_groups,
        }
    }

    pub fn collapse(&self) -> FreqMethCollapse {
        FreqMethCollapse {
            rules:           self.rules(),
            strand_specific: self.strand_specific,
            min_depth:       self.min_depth,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.llr_threshold.is_finite() || self.llr_threshold < 0.0 {
            return Err(CollapseError::invalid_config(
                "llr_threshold",
                format!("must be a finite non-negative number, got {}", self.llr_threshold),
            ));
        }
        validate_paths(&self.input, &self.output)?;
        self.pipeline.validate()?;
        self.output_options.validate()
    }

    pub fn run(&self) -> Result<CollapseStats> {
        self.validate()?;
        info!(
            "Methylation frequency configuration: {}",
            serde_json::to_string(self).unwrap_or_default()
        );
        run_to_file(
            &self.collapse(),
            &self.input,
            &self.output,
            &self.pipeline,
            &self.output_options,
        )
    }
}
