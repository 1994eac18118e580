//! Eventalign rows and their per-kmer collapse.

use std::str::FromStr;

use bio::alphabets::Alphabet;
use csv::StringRecord;
use itertools::Itertools;
use serde::ser::SerializeStruct;
use serde::{
    Deserialize,
    Serialize,
    Serializer,
};

use super::enums::Strand;
use super::typedef::{
    CountType,
    PosType,
    SignalType,
};
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

/// Model kmer written by nanopolish when no model matched.
pub const NNNNN_KMER: &str = "NNNNN";

/// Whether `kmer` is a non-empty word over {A,C,G,T}.
pub fn is_dna_kmer(kmer: &str) -> bool {
    !kmer.is_empty() && Alphabet::new(b"ACGT").is_word(kmer.as_bytes())
}

/// Count, sum and sum of squares of raw signal samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub n:      CountType,
    pub sum:    SignalType,
    pub sum_sq: SignalType,
}

impl SampleStats {
    pub fn push(
        &mut self,
        value: SignalType,
    ) {
        self.n += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn merge(
        &mut self,
        other: &SampleStats,
    ) {
        self.n += other.n;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }

    pub fn mean(&self) -> Option<SignalType> {
        (self.n > 0).then(|| self.sum / self.n as SignalType)
    }

    /// Population standard deviation.
    pub fn std(&self) -> Option<SignalType> {
        let mean = self.mean()?;
        let var = self.sum_sq / self.n as SignalType - mean * mean;
        Some(var.max(0.0).sqrt())
    }

    /// Rebuilds the sums from a count, mean and population std.
    pub fn from_moments(
        n: CountType,
        mean: SignalType,
        std: SignalType,
    ) -> Self {
        let n_f = n as SignalType;
        Self {
            n,
            sum: mean * n_f,
            sum_sq: (std * std + mean * mean) * n_f,
        }
    }
}

impl FromStr for SampleStats {
    type Err = String;

    /// Parses a comma-separated list of samples.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut stats = SampleStats::default();
        for value in s.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            let value = value
                .parse::<SignalType>()
                .map_err(|e| format!("bad sample '{value}': {e}"))?;
            if !value.is_finite() {
                return Err(format!("non-finite sample {value}"));
            }
            stats.push(value);
        }
        Ok(stats)
    }
}

/// One row of nanopolish eventalign output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub read_id:     String,
    pub contig:      String,
    pub position:    PosType,
    pub kmer:        String,
    pub strand:      Strand,
    pub event_index: u64,
    /// Event level mean (pA)
    pub mean:        SignalType,
    /// Event level standard deviation
    pub std:         SignalType,
    /// Event length in seconds
    pub dwell:       SignalType,
    pub model_kmer:  Option<String>,
    pub start_idx:   Option<u64>,
    pub end_idx:     Option<u64>,
    pub samples:     Option<SampleStats>,
    /// `samples` as written, kept for `--write-samples`
    pub raw_samples: Option<String>,
}

/// Column positions of an eventalign table.
#[derive(Debug, Clone)]
pub struct EventColumns {
    pub contig:      usize,
    pub position:    usize,
    pub kmer:        usize,
    pub read_id:     usize,
    pub strand:      usize,
    pub event_index: usize,
    pub mean:        usize,
    pub std:         usize,
    pub dwell:       usize,
    pub model_kmer:  Option<usize>,
    pub start_idx:   Option<usize>,
    pub end_idx:     Option<usize>,
    pub samples:     Option<usize>,
}

impl TableRecord for EventRecord {
    type Columns = EventColumns;

    fn resolve_columns(header: &StringRecord) -> Result<EventColumns> {
        Ok(EventColumns {
            contig:      require_column(header, &["contig"])?,
            position:    require_column(header, &["position"])?,
            kmer:        require_column(header, &["reference_kmer"])?,
            read_id:     require_column(header, &["read_name", "read_index"])?,
            strand:      require_column(header, &["strand"])?,
            event_index: require_column(header, &["event_index"])?,
            mean:        require_column(header, &["event_level_mean"])?,
            std:         require_column(header, &["event_stdv"])?,
            dwell:       require_column(header, &["event_length"])?,
            model_kmer:  find_column(header, &["model_kmer"]),
            start_idx:   find_column(header, &["start_idx"]),
            end_idx:     find_column(header, &["end_idx"]),
            samples:     find_column(header, &["samples"]),
        })
    }

    /// Column order of `nanopolish eventalign`. The optional trailing
    /// columns are told apart by the row width: 15 fields for
    /// `--signal-index`, 14 for `--samples`, 16 for both.
    fn default_columns(width: usize) -> EventColumns {
        let (start_idx, end_idx, samples) = match width {
            14 => (None, None, Some(13)),
            15 => (Some(13), Some(14), None),
            w if w >= 16 => (Some(13), Some(14), Some(15)),
            _ => (None, None, None),
        };
        EventColumns {
            contig: 0,
            position: 1,
            kmer: 2,
            read_id: 3,
            strand: 4,
            event_index: 5,
            mean: 6,
            std: 7,
            dwell: 8,
            model_kmer: Some(9),
            start_idx,
            end_idx,
            samples,
        }
    }

    fn parse(
        row: &StringRecord,
        columns: &EventColumns,
        line: u64,
    ) -> Result<Self> {
        let kmer = field(row, columns.kmer, "reference_kmer", line)?;
        if !is_dna_kmer(kmer) {
            return Err(CollapseError::malformed(
                line,
                "reference_kmer",
                format!("'{kmer}' is not a word over ACGT"),
            ));
        }
        let std = parse_finite(row, columns.std, "event_stdv", line)?;
        if std < 0.0 {
            return Err(CollapseError::malformed(line, "event_stdv", "negative value"));
        }
        let dwell = parse_finite(row, columns.dwell, "event_length", line)?;
        if dwell < 0.0 {
            return Err(CollapseError::malformed(line, "event_length", "negative value"));
        }
        let model_kmer = columns
            .model_kmer
            .and_then(|idx| row.get(idx))
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let samples = parse_optional(row, columns.samples, "samples", line)?;
        let raw_samples = samples.and_then(|_| {
            columns
                .samples
                .and_then(|idx| row.get(idx))
                .map(str::to_string)
        });

        Ok(EventRecord {
            read_id: field(row, columns.read_id, "read_name", line)?.to_string(),
            contig: field(row, columns.contig, "contig", line)?.to_string(),
            position: parse_field(row, columns.position, "position", line)?,
            kmer: kmer.to_string(),
            strand: parse_field(row, columns.strand, "strand", line)?,
            event_index: parse_field(row, columns.event_index, "event_index", line)?,
            mean: parse_finite(row, columns.mean, "event_level_mean", line)?,
            std,
            dwell,
            model_kmer,
            start_idx: parse_optional(row, columns.start_idx, "start_idx", line)?,
            end_idx: parse_optional(row, columns.end_idx, "end_idx", line)?,
            samples,
            raw_samples,
        })
    }
}

impl EventRecord {
    pub fn key(&self) -> KmerKey {
        KmerKey {
            read_id:  self.read_id.clone(),
            contig:   self.contig.clone(),
            position: self.position,
            kmer:     self.kmer.clone(),
            strand:   self.strand,
        }
    }
}

/// Group key of one collapsed kmer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KmerKey {
    pub read_id:  String,
    pub contig:   String,
    pub position: PosType,
    pub kmer:     String,
    pub strand:   Strand,
}

impl KmerKey {
    pub fn matches(
        &self,
        record: &EventRecord,
    ) -> bool {
        self.position == record.position
            && self.strand == record.strand
            && self.kmer == record.kmer
            && self.read_id == record.read_id
            && self.contig == record.contig
    }
}

/// All kmers of one read on one contig.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadPartition {
    pub read_id: String,
    pub contig:  String,
}

/// One collapsed kmer, as written to the output table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CollapsedKmerRecord {
    pub read_id:            String,
    pub contig:             String,
    pub position:           PosType,
    pub kmer:               String,
    pub strand:             Strand,
    pub n_events:           CountType,
    pub dwell_time:         SignalType,
    /// Dwell-weighted mean of the event means
    pub mean:               SignalType,
    /// Pooled standard deviation
    pub std:                SignalType,
    pub start_event_idx:    u64,
    pub end_event_idx:      u64,
    pub nnnnn_events:       CountType,
    pub mismatching_events: CountType,
    pub start_idx:          Option<u64>,
    pub end_idx:            Option<u64>,
    pub n_signals:          Option<CountType>,
    pub signal_mean:        Option<SignalType>,
    pub signal_std:         Option<SignalType>,
    /// Raw samples of every event joined in event order, when collected
    #[serde(default)]
    pub samples:            Option<String>,
}

/// Optional trailing column of a collapsed table.
pub const SAMPLES_COLUMN: &str = "samples";

impl Serialize for CollapsedKmerRecord {
    /// Text output leaves the `samples` column out unless samples were
    /// collected; binary output always carries it.
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let with_samples = self.samples.is_some() || !serializer.is_human_readable();
        let mut row =
            serializer.serialize_struct("CollapsedKmerRecord", 18 + usize::from(with_samples))?;
        row.serialize_field("read_id", &self.read_id)?;
        row.serialize_field("contig", &self.contig)?;
        row.serialize_field("position", &self.position)?;
        row.serialize_field("kmer", &self.kmer)?;
        row.serialize_field("strand", &self.strand)?;
        row.serialize_field("n_events", &self.n_events)?;
        row.serialize_field("dwell_time", &self.dwell_time)?;
        row.serialize_field("mean", &self.mean)?;
        row.serialize_field("std", &self.std)?;
        row.serialize_field("start_event_idx", &self.start_event_idx)?;
        row.serialize_field("end_event_idx", &self.end_event_idx)?;
        row.serialize_field("nnnnn_events", &self.nnnnn_events)?;
        row.serialize_field("mismatching_events", &self.mismatching_events)?;
        row.serialize_field("start_idx", &self.start_idx)?;
        row.serialize_field("end_idx", &self.end_idx)?;
        row.serialize_field("n_signals", &self.n_signals)?;
        row.serialize_field("signal_mean", &self.signal_mean)?;
        row.serialize_field("signal_std", &self.signal_std)?;
        if with_samples {
            row.serialize_field(SAMPLES_COLUMN, &self.samples)?;
        }
        else {
            row.skip_field(SAMPLES_COLUMN)?;
        }
        row.end()
    }
}

impl SummaryRecord for CollapsedKmerRecord {
    fn header() -> &'static [&'static str] {
        &[
            "read_id",
            "contig",
            "position",
            "kmer",
            "strand",
            "n_events",
            "dwell_time",
            "mean",
            "std",
            "start_event_idx",
            "end_event_idx",
            "nnnnn_events",
            "mismatching_events",
            "start_idx",
            "end_idx",
            "n_signals",
            "signal_mean",
            "signal_std",
        ]
    }
}

impl CollapsedKmerRecord {
    pub fn key(&self) -> KmerKey {
        KmerKey {
            read_id:  self.read_id.clone(),
            contig:   self.contig.clone(),
            position: self.position,
            kmer:     self.kmer.clone(),
            strand:   self.strand,
        }
    }
}

/// Column positions of a collapsed table, in output column order.
#[derive(Debug, Clone)]
pub struct CollapsedColumns {
    fixed:   Vec<usize>,
    samples: Option<usize>,
}

impl CollapsedColumns {
    fn at(
        &self,
        name: &str,
    ) -> usize {
        let header = <CollapsedKmerRecord as SummaryRecord>::header();
        header
            .iter()
            .position(|h| *h == name)
            .map_or(usize::MAX, |i| self.fixed[i])
    }
}

/// Collapsed output read back in, so that several collapsed tables can be
/// merged into one.
impl TableRecord for CollapsedKmerRecord {
    type Columns = CollapsedColumns;

    fn resolve_columns(header: &StringRecord) -> Result<CollapsedColumns> {
        let fixed = <Self as SummaryRecord>::header()
            .iter()
            .map(|name| require_column(header, &[*name]))
            .collect::<Result<Vec<_>>>()?;
        Ok(CollapsedColumns {
            fixed,
            samples: find_column(header, &[SAMPLES_COLUMN]),
        })
    }

    fn default_columns(width: usize) -> CollapsedColumns {
        let n = <Self as SummaryRecord>::header().len();
        CollapsedColumns {
            fixed:   (0..n).collect(),
            samples: (width > n).then_some(n),
        }
    }

    fn parse(
        row: &StringRecord,
        columns: &CollapsedColumns,
        line: u64,
    ) -> Result<Self> {
        let kmer = field(row, columns.at("kmer"), "kmer", line)?;
        if !is_dna_kmer(kmer) {
            return Err(CollapseError::malformed(
                line,
                "kmer",
                format!("'{kmer}' is not a word over ACGT"),
            ));
        }
        let n_events: CountType = parse_field(row, columns.at("n_events"), "n_events", line)?;
        if n_events == 0 {
            return Err(CollapseError::malformed(line, "n_events", "a kmer has at least one event"));
        }
        let float = |name: &str| parse_finite(row, columns.at(name), name, line);
        let int = |name: &str| parse_field::<u64>(row, columns.at(name), name, line);
        let optional_int = |name: &str| parse_optional::<u64>(row, Some(columns.at(name)), name, line);
        let optional_float =
            |name: &str| parse_optional::<SignalType>(row, Some(columns.at(name)), name, line);

        Ok(CollapsedKmerRecord {
            read_id: field(row, columns.at("read_id"), "read_id", line)?.to_string(),
            contig: field(row, columns.at("contig"), "contig", line)?.to_string(),
            position: parse_field(row, columns.at("position"), "position", line)?,
            kmer: kmer.to_string(),
            strand: parse_field(row, columns.at("strand"), "strand", line)?,
            n_events,
            dwell_time: float("dwell_time")?,
            mean: float("mean")?,
            std: float("std")?,
            start_event_idx: int("start_event_idx")?,
            end_event_idx: int("end_event_idx")?,
            nnnnn_events: int("nnnnn_events")?,
            mismatching_events: int("mismatching_events")?,
            start_idx: optional_int("start_idx")?,
            end_idx: optional_int("end_idx")?,
            n_signals: optional_int("n_signals")?,
            signal_mean: optional_float("signal_mean")?,
            signal_std: optional_float("signal_std")?,
            samples: columns
                .samples
                .and_then(|idx| row.get(idx))
                .map(str::to_string),
        })
    }
}

/// Running statistics of the events of one kmer.
///
/// Means are weighted by dwell time. The pooled variance is
/// `Σw(s² + m²) / Σw − M²`, where `M` is the weighted mean. When every
/// event has zero dwell the weights fall back to uniform.
#[derive(Debug, Clone)]
pub struct KmerAccumulator {
    key:             KmerKey,
    n_events:        CountType,
    dwell:           SignalType,
    /// Σ w·m
    weighted_mean:   SignalType,
    /// Σ w·(s² + m²)
    weighted_sq:     SignalType,
    /// Σ m, for the uniform fallback
    sum_mean:        SignalType,
    /// Σ (s² + m²), for the uniform fallback
    sum_sq:          SignalType,
    start_event_idx: u64,
    end_event_idx:   u64,
    nnnnn:           CountType,
    mismatching:     CountType,
    start_idx:       Option<u64>,
    end_idx:         Option<u64>,
    samples:         Option<SampleStats>,
    /// Raw sample text by event index; `None` unless samples are kept
    raw_samples:     Option<Vec<(u64, String)>>,
}

fn min_opt(
    a: Option<u64>,
    b: Option<u64>,
) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_opt(
    a: Option<u64>,
    b: Option<u64>,
) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn merge_samples(
    a: Option<SampleStats>,
    b: Option<SampleStats>,
) -> Option<SampleStats> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.merge(&b);
            Some(a)
        },
        (a, b) => a.or(b),
    }
}

impl KmerAccumulator {
    pub fn new(key: KmerKey) -> Self {
        Self {
            key,
            n_events: 0,
            dwell: 0.0,
            weighted_mean: 0.0,
            weighted_sq: 0.0,
            sum_mean: 0.0,
            sum_sq: 0.0,
            start_event_idx: u64::MAX,
            end_event_idx: 0,
            nnnnn: 0,
            mismatching: 0,
            start_idx: None,
            end_idx: None,
            samples: None,
            raw_samples: None,
        }
    }

    /// Also collects the raw samples of every event for output.
    pub fn keep_raw_samples(mut self) -> Self {
        if self.raw_samples.is_none() {
            self.raw_samples = Some(Vec::new());
        }
        self
    }

    /// Seeds an accumulator with an already collapsed row, so that
    /// collapsed output can be merged again.
    pub fn from_summary(summary: &CollapsedKmerRecord) -> Self {
        let second = summary.std * summary.std + summary.mean * summary.mean;
        let n = summary.n_events as SignalType;
        let samples = match (summary.n_signals, summary.signal_mean, summary.signal_std) {
            (Some(n), Some(mean), Some(std)) => Some(SampleStats::from_moments(n, mean, std)),
            (Some(0), ..) => Some(SampleStats::default()),
            _ => None,
        };
        Self {
            key: summary.key(),
            n_events: summary.n_events,
            dwell: summary.dwell_time,
            weighted_mean: summary.mean * summary.dwell_time,
            weighted_sq: second * summary.dwell_time,
            sum_mean: summary.mean * n,
            sum_sq: second * n,
            start_event_idx: summary.start_event_idx,
            end_event_idx: summary.end_event_idx,
            nnnnn: summary.nnnnn_events,
            mismatching: summary.mismatching_events,
            start_idx: summary.start_idx,
            end_idx: summary.end_idx,
            samples,
            raw_samples: summary.samples.as_ref().map(|text| {
                std::iter::once((summary.start_event_idx, text.clone()))
                    .filter(|(_, text)| !text.is_empty())
                    .collect()
            }),
        }
    }

    pub fn key(&self) -> &KmerKey {
        &self.key
    }

    pub fn dwell(&self) -> SignalType {
        self.dwell
    }

    /// Weighted mean and pooled standard deviation.
    fn moments(&self) -> (SignalType, SignalType) {
        let (mean, second) = if self.dwell > 0.0 {
            (self.weighted_mean / self.dwell, self.weighted_sq / self.dwell)
        }
        else {
            let n = self.n_events as SignalType;
            (self.sum_mean / n, self.sum_sq / n)
        };
        (mean, (second - mean * mean).max(0.0).sqrt())
    }
}

impl Aggregator for KmerAccumulator {
    type Record = EventRecord;
    type Summary = CollapsedKmerRecord;

    fn accumulate(
        &mut self,
        record: &EventRecord,
    ) {
        let second = record.std * record.std + record.mean * record.mean;
        self.n_events += 1;
        self.dwell += record.dwell;
        self.weighted_mean += record.dwell * record.mean;
        self.weighted_sq += record.dwell * second;
        self.sum_mean += record.mean;
        self.sum_sq += second;
        self.start_event_idx = self.start_event_idx.min(record.event_index);
        self.end_event_idx = self.end_event_idx.max(record.event_index);

        match record.model_kmer.as_deref() {
            Some(NNNNN_KMER) => self.nnnnn += 1,
            Some(model) if model != record.kmer => self.mismatching += 1,
            _ => {},
        }
        self.start_idx = min_opt(self.start_idx, record.start_idx);
        self.end_idx = max_opt(self.end_idx, record.end_idx);
        self.samples = merge_samples(self.samples, record.samples);
        if let (Some(raw), Some(text)) = (self.raw_samples.as_mut(), record.raw_samples.as_ref()) {
            raw.push((record.event_index, text.clone()));
        }
    }

    fn merge(
        &mut self,
        other: Self,
    ) {
        self.n_events += other.n_events;
        self.dwell += other.dwell;
        self.weighted_mean += other.weighted_mean;
        self.weighted_sq += other.weighted_sq;
        self.sum_mean += other.sum_mean;
        self.sum_sq += other.sum_sq;
        self.start_event_idx = self.start_event_idx.min(other.start_event_idx);
        self.end_event_idx = self.end_event_idx.max(other.end_event_idx);
        self.nnnnn += other.nnnnn;
        self.mismatching += other.mismatching;
        self.start_idx = min_opt(self.start_idx, other.start_idx);
        self.end_idx = max_opt(self.end_idx, other.end_idx);
        self.samples = merge_samples(self.samples, other.samples);
        if let (Some(raw), Some(other)) = (self.raw_samples.as_mut(), other.raw_samples) {
            raw.extend(other);
        }
    }

    fn count(&self) -> u64 {
        self.n_events
    }

    fn close(self) -> Result<CollapsedKmerRecord> {
        if self.n_events == 0 {
            return Err(CollapseError::EmptyGroup {
                key: format!("{:?}", self.key),
            });
        }
        let (mean, std) = self.moments();
        let samples = self.raw_samples.map(|mut raw| {
            raw.sort_unstable();
            raw.iter().map(|(_, text)| text.as_str()).join(",")
        });
        let KmerKey {
            read_id,
            contig,
            position,
            kmer,
            strand,
        } = self.key;

        Ok(CollapsedKmerRecord {
            read_id,
            contig,
            position,
            kmer,
            strand,
            n_events: self.n_events,
            dwell_time: self.dwell,
            mean,
            std,
            start_event_idx: self.start_event_idx,
            end_event_idx: self.end_event_idx,
            nnnnn_events: self.nnnnn,
            mismatching_events: self.mismatching,
            start_idx: self.start_idx,
            end_idx: self.end_idx,
            n_signals: self.samples.map(|s| s.n),
            signal_mean: self.samples.and_then(|s| s.mean()),
            signal_std: self.samples.and_then(|s| s.std()),
            samples,
        })
    }
}

/// Merges collapsed rows of one kmer back into a single row.
///
/// A kmer seen in one row only is passed through unchanged, so collapsed
/// output is a fixed point.
#[derive(Debug, Clone)]
pub struct MergedKmerAccumulator {
    acc:          KmerAccumulator,
    keep_samples: bool,
    single:       Option<CollapsedKmerRecord>,
    rows:         CountType,
}

impl MergedKmerAccumulator {
    pub fn new(
        key: KmerKey,
        keep_samples: bool,
    ) -> Self {
        let acc = KmerAccumulator::new(key);
        Self {
            acc: if keep_samples { acc.keep_raw_samples() } else { acc },
            keep_samples,
            single: None,
            rows: 0,
        }
    }

    fn fold_single(&mut self) {
        if let Some(row) = self.single.take() {
            self.acc.merge(KmerAccumulator::from_summary(&row));
        }
    }
}

impl Aggregator for MergedKmerAccumulator {
    type Record = CollapsedKmerRecord;
    type Summary = CollapsedKmerRecord;

    fn accumulate(
        &mut self,
        record: &CollapsedKmerRecord,
    ) {
        if self.rows == 0 {
            self.single = Some(record.clone());
        }
        else {
            self.fold_single();
            self.acc.merge(KmerAccumulator::from_summary(record));
        }
        self.rows += 1;
    }

    fn merge(
        &mut self,
        mut other: Self,
    ) {
        self.fold_single();
        other.fold_single();
        self.acc.merge(other.acc);
        self.rows += other.rows;
    }

    fn count(&self) -> u64 {
        self.rows
    }

    fn close(self) -> Result<CollapsedKmerRecord> {
        match self.single {
            Some(mut row) => {
                row.samples = match self.keep_samples {
                    true => Some(row.samples.unwrap_or_default()),
                    false => None,
                };
                Ok(row)
            },
            None => self.acc.close(),
        }
    }
}

/// Per-read row of the collapsed-output index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadIndexStats {
    pub ref_id:            String,
    pub ref_start:         PosType,
    /// One past the last covered position
    pub ref_end:           PosType,
    pub read_id:           String,
    pub kmers:             CountType,
    pub nnnnn_kmers:       CountType,
    pub mismatching_kmers: CountType,
    /// Reference positions skipped between consecutive kmers
    pub missing_kmers:     CountType,
    last_position:         Option<PosType>,
}

impl IndexColumns for ReadIndexStats {
    fn header() -> &'static [&'static str] {
        &[
            "ref_id",
            "ref_start",
            "ref_end",
            "read_id",
            "kmers",
            "NNNNN_kmers",
            "mismatching_kmers",
            "missing_kmers",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.ref_id.clone(),
            self.ref_start.to_string(),
            self.ref_end.to_string(),
            self.read_id.clone(),
            self.kmers.to_string(),
            self.nnnnn_kmers.to_string(),
            self.mismatching_kmers.to_string(),
            self.missing_kmers.to_string(),
        ]
    }
}

impl PartitionStats<CollapsedKmerRecord> for ReadIndexStats {
    fn update(
        &mut self,
        summary: &CollapsedKmerRecord,
    ) {
        match self.last_position {
            None => {
                self.ref_id = summary.contig.clone();
                self.read_id = summary.read_id.clone();
                self.ref_start = summary.position;
                self.ref_end = summary.position + 1;
            },
            Some(last) => {
                self.ref_start = self.ref_start.min(summary.position);
                self.ref_end = self.ref_end.max(summary.position + 1);
                let gap = last.abs_diff(summary.position);
                if gap > 1 {
                    self.missing_kmers += gap - 1;
                }
            },
        }
        self.last_position = Some(summary.position);
        self.kmers += 1;
        if summary.nnnnn_events > 0 {
            self.nnnnn_kmers += 1;
        }
        if summary.mismatching_events > 0 {
            self.mismatching_kmers += 1;
        }
    }
}
