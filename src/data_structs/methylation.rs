//! Per-read methylation calls and per-site frequencies.

use std::fmt::Display;
use std::str::FromStr;

use csv::StringRecord;
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use smallvec::{
    smallvec,
    SmallVec,
};

use super::enums::{
    AmbiguousPolicy,
    MethCall,
    Strand,
};
use super::typedef::{
    CountType,
    PosType,
};
use super::KeySet;
use crate::collapse::Aggregator;
use crate::error::{
    CollapseError,
    Result,
};
use crate::io::table::{
    field,
    find_column,
    parse_field,
    parse_finite,
    parse_optional,
    require_column,
};
use crate::io::{
    IndexColumns,
    PartitionStats,
    SummaryRecord,
    TableRecord,
};

/// Bases of sequence context kept on each side of a split CpG.
pub const CONTEXT_FLANK: usize = 5;

const CPG: &str = "CG";

/// One row of nanopolish call-methylation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethylationCallRecord {
    pub contig:        String,
    pub strand:        Strand,
    pub start:         PosType,
    pub end:           PosType,
    pub read_id:       String,
    pub log_lik_ratio: f64,
    /// Motifs covered by the call group
    pub num_motifs:    CountType,
    pub sequence:      Option<String>,
}

#[derive(Debug, Clone)]
pub struct MethylationColumns {
    pub contig:        usize,
    pub strand:        usize,
    pub start:         usize,
    pub end:           usize,
    pub read_id:       usize,
    pub log_lik_ratio: usize,
    pub num_motifs:    Option<usize>,
    pub sequence:      Option<usize>,
}

impl TableRecord for MethylationCallRecord {
    type Columns = MethylationColumns;

    fn resolve_columns(header: &StringRecord) -> Result<MethylationColumns> {
        Ok(MethylationColumns {
            contig:        require_column(header, &["chromosome", "contig"])?,
            strand:        require_column(header, &["strand"])?,
            start:         require_column(header, &["start"])?,
            end:           require_column(header, &["end"])?,
            read_id:       require_column(header, &["read_name"])?,
            log_lik_ratio: require_column(header, &["log_lik_ratio"])?,
            num_motifs:    find_column(header, &["num_motifs", "num_cpgs"]),
            sequence:      find_column(header, &["sequence"]),
        })
    }

    fn default_columns(_width: usize) -> MethylationColumns {
        MethylationColumns {
            contig:        0,
            strand:        1,
            start:         2,
            end:           3,
            read_id:       4,
            log_lik_ratio: 5,
            num_motifs:    Some(9),
            sequence:      Some(10),
        }
    }

    fn parse(
        row: &StringRecord,
        columns: &MethylationColumns,
        line: u64,
    ) -> Result<Self> {
        let start: PosType = parse_field(row, columns.start, "start", line)?;
        let end: PosType = parse_field(row, columns.end, "end", line)?;
        if end < start {
            return Err(CollapseError::malformed(
                line,
                "end",
                format!("end {end} is before start {start}"),
            ));
        }
        let num_motifs = parse_optional(row, columns.num_motifs, "num_motifs", line)?.unwrap_or(1);
        let sequence = columns
            .sequence
            .and_then(|idx| row.get(idx))
            .filter(|value| !value.is_empty())
            .map(str::to_ascii_uppercase);

        Ok(MethylationCallRecord {
            contig: field(row, columns.contig, "chromosome", line)?.to_string(),
            strand: parse_field(row, columns.strand, "strand", line)?,
            start,
            end,
            read_id: field(row, columns.read_id, "read_name", line)?.to_string(),
            log_lik_ratio: parse_finite(row, columns.log_lik_ratio, "log_lik_ratio", line)?,
            num_motifs,
            sequence,
        })
    }
}

impl MethylationCallRecord {
    /// Offsets of every CpG in the call sequence.
    pub fn cpg_offsets(&self) -> SmallVec<[usize; 4]> {
        match &self.sequence {
            Some(seq) => seq.match_indices(CPG).map(|(idx, _)| idx).collect(),
            None => SmallVec::new(),
        }
    }

    /// Whether the call is split into one site per CpG.
    pub fn fans_out(
        &self,
        split: bool,
    ) -> bool {
        split
            && self.num_motifs > 1
            && self
                .sequence
                .as_deref()
                .is_some_and(|seq| seq.contains(CPG))
    }

    /// Reference positions of the sites this call contributes to.
    ///
    /// With `split` set, a call over several motifs contributes to each CpG
    /// of its sequence, placed relative to the first one. Otherwise the
    /// whole call is one site at `start`.
    pub fn site_positions(
        &self,
        split: bool,
    ) -> KeySet<PosType> {
        if !self.fans_out(split) {
            return smallvec![self.start];
        }
        let offsets = self.cpg_offsets();
        let first = offsets.first().copied().unwrap_or_default();
        offsets
            .iter()
            .map(|cg| self.start + (cg - first) as PosType)
            .collect()
    }

    /// Sequence context of the site at `position`.
    fn context_at(
        &self,
        position: PosType,
        split: bool,
    ) -> Option<String> {
        let seq = self.sequence.as_ref()?;
        if !self.fans_out(split) {
            return Some(seq.clone());
        }
        let first = seq.find(CPG)?;
        let cg = first + (position - self.start) as usize;
        let from = cg.saturating_sub(CONTEXT_FLANK);
        let to = (cg + CPG.len() + CONTEXT_FLANK).min(seq.len());
        seq.get(from..to).map(str::to_string)
    }
}

/// Group key of one methylation site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteKey {
    pub contig:   String,
    pub position: PosType,
    /// `Strand::None` unless sites are strand-specific
    pub strand:   Strand,
}

/// Methylated fraction of the called reads; `NA` when nothing was called.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MethFrequency(pub Option<f64>);

impl MethFrequency {
    pub const SENTINEL: &'static str = "NA";

    pub fn from_counts(
        methylated: CountType,
        unmethylated: CountType,
    ) -> Self {
        let called = methylated + unmethylated;
        MethFrequency((called > 0).then(|| methylated as f64 / called as f64))
    }

    pub fn value(&self) -> Option<f64> {
        self.0
    }
}

impl Display for MethFrequency {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "{}", Self::SENTINEL),
        }
    }
}

impl Serialize for MethFrequency {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer, {
        match self.0 {
            Some(value) => serializer.serialize_f64(value),
            None => serializer.serialize_str(Self::SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for MethFrequency {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>, {
        let s = String::deserialize(deserializer)?;
        if s == Self::SENTINEL {
            return Ok(MethFrequency(None));
        }
        f64::from_str(&s)
            .map(|v| MethFrequency(Some(v)))
            .map_err(serde::de::Error::custom)
    }
}

/// One methylation site, as written to the output table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteFrequencyRecord {
    pub contig:             String,
    pub position:           PosType,
    pub end:                PosType,
    pub strand:             Strand,
    pub covered_reads:      CountType,
    pub methylated_reads:   CountType,
    pub unmethylated_reads: CountType,
    pub ambiguous_reads:    CountType,
    pub num_motifs:         CountType,
    pub frequency:          MethFrequency,
    pub context:            Option<String>,
}

impl SummaryRecord for SiteFrequencyRecord {
    fn header() -> &'static [&'static str] {
        &[
            "contig",
            "position",
            "end",
            "strand",
            "covered_reads",
            "methylated_reads",
            "unmethylated_reads",
            "ambiguous_reads",
            "num_motifs",
            "frequency",
            "context",
        ]
    }
}

/// Settings every site accumulator of a run shares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SiteRules {
    pub llr_threshold: f64,
    pub ambiguous:     AmbiguousPolicy,
    pub split_groups:  bool,
}

/// Call tallies of one site.
#[derive(Debug, Clone)]
pub struct SiteAccumulator {
    key:          SiteKey,
    rules:        SiteRules,
    methylated:   CountType,
    unmethylated: CountType,
    ambiguous:    CountType,
    num_motifs:   CountType,
    end:          PosType,
    /// Smallest context seen, so the result does not depend on call order
    context:      Option<String>,
}

impl SiteAccumulator {
    pub fn new(
        key: SiteKey,
        rules: SiteRules,
    ) -> Self {
        let end = key.position;
        Self {
            key,
            rules,
            methylated: 0,
            unmethylated: 0,
            ambiguous: 0,
            num_motifs: 0,
            end,
            context: None,
        }
    }

    pub fn key(&self) -> &SiteKey {
        &self.key
    }

    fn keep_context(
        &mut self,
        context: Option<String>,
    ) {
        self.context = match (self.context.take(), context) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

impl Aggregator for SiteAccumulator {
    type Record = MethylationCallRecord;
    type Summary = SiteFrequencyRecord;

    fn accumulate(
        &mut self,
        record: &MethylationCallRecord,
    ) {
        match MethCall::classify(record.log_lik_ratio, self.rules.llr_threshold) {
            MethCall::Methylated => self.methylated += 1,
            MethCall::Unmethylated => self.unmethylated += 1,
            MethCall::Ambiguous => self.ambiguous += 1,
        }
        if record.fans_out(self.rules.split_groups) {
            self.num_motifs = self.num_motifs.max(1);
        }
        else {
            self.num_motifs = self.num_motifs.max(record.num_motifs);
            self.end = self.end.max(record.end);
        }
        let context = record.context_at(self.key.position, self.rules.split_groups);
        self.keep_context(context);
    }

    fn merge(
        &mut self,
        other: Self,
    ) {
        self.methylated += other.methylated;
        self.unmethylated += other.unmethylated;
        self.ambiguous += other.ambiguous;
        self.num_motifs = self.num_motifs.max(other.num_motifs);
        self.end = self.end.max(other.end);
        self.keep_context(other.context);
    }

    fn count(&self) -> u64 {
        self.methylated + self.unmethylated + self.ambiguous
    }

    fn close(self) -> Result<SiteFrequencyRecord> {
        if self.count() == 0 {
            return Err(CollapseError::EmptyGroup {
                key: format!("{:?}", self.key),
            });
        }
        let covered_reads = match self.rules.ambiguous {
            AmbiguousPolicy::Include => self.methylated + self.unmethylated + self.ambiguous,
            AmbiguousPolicy::Exclude => self.methylated + self.unmethylated,
        };
        Ok(SiteFrequencyRecord {
            contig: self.key.contig,
            position: self.key.position,
            end: self.end,
            strand: self.key.strand,
            covered_reads,
            methylated_reads: self.methylated,
            unmethylated_reads: self.unmethylated,
            ambiguous_reads: self.ambiguous,
            num_motifs: self.num_motifs,
            frequency: MethFrequency::from_counts(self.methylated, self.unmethylated),
            context: self.context,
        })
    }
}

/// Per-contig row of the frequency-output index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContigIndexStats {
    pub contig:     String,
    pub first_site: PosType,
    pub last_site:  PosType,
    pub sites:      CountType,
}

impl IndexColumns for ContigIndexStats {
    fn header() -> &'static [&'static str] {
        &["contig", "first_site", "last_site", "sites"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.contig.clone(),
            self.first_site.to_string(),
            self.last_site.to_string(),
            self.sites.to_string(),
        ]
    }
}

impl PartitionStats<SiteFrequencyRecord> for ContigIndexStats {
    fn update(
        &mut self,
        summary: &SiteFrequencyRecord,
    ) {
        if self.sites == 0 {
            self.contig = summary.contig.clone();
            self.first_site = summary.position;
            self.last_site = summary.position;
        }
        else {
            self.first_site = self.first_site.min(summary.position);
            self.last_site = self.last_site.max(summary.position);
        }
        self.sites += 1;
    }
}
