#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{
    Read,
    Write,
};
use std::path::Path;

use npcomp::prelude::*;
use rand::seq::SliceRandom;
use rand::{
    Rng,
    SeedableRng,
};
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;

pub const EVENTALIGN_HEADER: &str = "contig\tposition\treference_kmer\tread_index\tstrand\tevent_index\tevent_level_mean\tevent_stdv\tevent_length\tmodel_kmer\tmodel_mean\tmodel_stdv\tstandardized_level\tstart_idx\tend_idx";

pub const EVENTALIGN_SAMPLES_HEADER: &str = "contig\tposition\treference_kmer\tread_index\tstrand\tevent_index\tevent_level_mean\tevent_stdv\tevent_length\tmodel_kmer\tmodel_mean\tmodel_stdv\tstandardized_level\tstart_idx\tend_idx\tsamples";

pub const METHYLATION_HEADER: &str =
    "chromosome\tstrand\tstart\tend\tread_name\tlog_lik_ratio\tlog_lik_methylated\tlog_lik_unmethylated\tnum_calling_strands\tnum_motifs\tsequence";

/// One generated event, as written and as expected back.
#[derive(Debug, Clone)]
pub struct GeneratedEvent {
    pub event_index: u64,
    pub mean:        f64,
    pub std:         f64,
    pub dwell:       f64,
    pub nnnnn:       bool,
    pub start_idx:   u64,
    pub end_idx:     u64,
    /// Raw samples column
    pub samples:     String,
}

/// All events of one kmer of one read.
#[derive(Debug, Clone)]
pub struct GeneratedKmer {
    pub read_id:  String,
    pub contig:   String,
    pub position: PosType,
    pub kmer:     String,
    pub events:   Vec<GeneratedEvent>,
}

impl GeneratedKmer {
    pub fn dwell(&self) -> f64 {
        self.events.iter().map(|e| e.dwell).sum()
    }

    pub fn weighted_mean(&self) -> f64 {
        self.events.iter().map(|e| e.dwell * e.mean).sum::<f64>() / self.dwell()
    }

    pub fn pooled_std(&self) -> f64 {
        let mean = self.weighted_mean();
        let second = self
            .events
            .iter()
            .map(|e| e.dwell * (e.std * e.std + e.mean * e.mean))
            .sum::<f64>()
            / self.dwell();
        (second - mean * mean).max(0.0).sqrt()
    }
}

pub struct EventalignData {
    pub kmers:        Vec<GeneratedKmer>,
    /// Rows in read order, without the header
    pub rows:         Vec<String>,
    /// `rows` with a trailing samples column
    pub sample_rows:  Vec<String>,
}

impl EventalignData {
    pub fn n_reads(&self) -> usize {
        let mut reads = self.kmers.iter().map(|k| &k.read_id).collect::<Vec<_>>();
        reads.dedup();
        reads.len()
    }

    pub fn n_events(&self) -> usize {
        self.rows.len()
    }
}

fn random_kmer(rng: &mut ChaCha8Rng) -> String {
    (0..5)
        .map(|_| *[b'A', b'C', b'G', b'T'].choose(rng).unwrap() as char)
        .collect()
}

/// Eventalign output of `n_reads` reads, each on one contig, with kmers
/// in increasing reference position.
pub fn generate_eventalign(
    seed: u64,
    n_reads: usize,
) -> EventalignData {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut kmers = Vec::new();
    let mut rows = Vec::new();
    let mut sample_rows = Vec::new();

    for read in 0..n_reads {
        let read_id = format!("read{read:04}");
        let contig = ["chr1", "chr2", "chrM"].choose(&mut rng).unwrap().to_string();
        let mut position: PosType = rng.gen_range(0..10_000);
        let mut event_index = rng.gen_range(0..100u64);
        let mut sample_idx = rng.gen_range(0..1000u64);

        for _ in 0..rng.gen_range(5..30) {
            let kmer = random_kmer(&mut rng);
            let mut events = Vec::new();
            for _ in 0..rng.gen_range(1..5) {
                let length = rng.gen_range(4..60u64);
                let event = GeneratedEvent {
                    event_index,
                    mean: rng.gen_range(60.0..130.0),
                    std: rng.gen_range(0.5..8.0),
                    dwell: length as f64 / 4000.0,
                    nnnnn: rng.gen_bool(0.1),
                    start_idx: sample_idx,
                    end_idx: sample_idx + length,
                    samples: format!("{}.5,{}.25", 70 + event_index % 50, 71 + event_index % 50),
                };
                let row = format!(
                    "{contig}\t{position}\t{kmer}\t{read_id}\tt\t{}\t{:.5}\t{:.5}\t{:.5}\t{}\t90.0\t2.0\t0.5\t{}\t{}",
                    event.event_index,
                    event.mean,
                    event.std,
                    event.dwell,
                    if event.nnnnn { "NNNNN" } else { kmer.as_str() },
                    event.start_idx,
                    event.end_idx,
                );
                sample_rows.push(format!("{row}\t{}", event.samples));
                rows.push(row);
                event_index += 1;
                sample_idx += length;
                events.push(event);
            }
            kmers.push(GeneratedKmer {
                read_id: read_id.clone(),
                contig: contig.clone(),
                position,
                kmer,
                events,
            });
            position += rng.gen_range(1..3);
        }
    }

    // Written values are rounded; expectations use the parsed values.
    for kmer in kmers.iter_mut() {
        for event in kmer.events.iter_mut() {
            event.mean = format!("{:.5}", event.mean).parse().unwrap();
            event.std = format!("{:.5}", event.std).parse().unwrap();
            event.dwell = format!("{:.5}", event.dwell).parse().unwrap();
        }
    }
    EventalignData {
        kmers,
        rows,
        sample_rows,
    }
}

/// Site position to (methylated, unmethylated, ambiguous) counts.
pub type SiteCounts = BTreeMap<(String, PosType), (u64, u64, u64)>;

pub struct MethylationData {
    /// Rows sorted by (contig, start), without the header
    pub rows:     Vec<String>,
    pub expected: SiteCounts,
}

/// Per-read calls over two contigs. About a quarter of the calls span
/// two CpGs four bases apart.
pub fn generate_methylation(
    seed: u64,
    n_calls: usize,
    llr_threshold: f64,
) -> MethylationData {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut calls = Vec::new();
    for _ in 0..n_calls {
        let contig = if rng.gen_bool(0.5) { "chr1" } else { "chr2" };
        let start: PosType = rng.gen_range(0..400);
        let multi = rng.gen_bool(0.25);
        let llr: f64 = rng.gen_range(-8.0..8.0);
        let read = rng.gen_range(0..50);
        let strand = if rng.gen_bool(0.5) { "+" } else { "-" };
        calls.push((contig, start, multi, format!("{llr:.2}"), read, strand));
    }
    calls.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut rows = Vec::new();
    let mut expected = SiteCounts::new();
    for (contig, start, multi, llr, read, strand) in calls {
        let (end, num_motifs, sequence, sites) = if multi {
            (start + 4, 2, "TTCGAACGTT", vec![start, start + 4])
        }
        else {
            (start, 1, "TTACGTA", vec![start])
        };
        rows.push(format!(
            "{contig}\t{strand}\t{start}\t{end}\tread{read}\t{llr}\t-10.0\t-12.0\t1\t{num_motifs}\t{sequence}"
        ));

        let llr: f64 = llr.parse().unwrap();
        for site in sites {
            let counts = expected.entry((contig.to_string(), site)).or_default();
            if llr >= llr_threshold {
                counts.0 += 1;
            }
            else if llr <= -llr_threshold {
                counts.1 += 1;
            }
            else {
                counts.2 += 1;
            }
        }
    }
    MethylationData { rows, expected }
}

pub fn write_table(
    path: &Path,
    header: &str,
    rows: &[String],
) {
    let mut file = File::create(path).unwrap();
    writeln!(file, "{header}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
}

pub fn shuffled(
    rows: &[String],
    seed: u64,
) -> Vec<String> {
    let mut rows = rows.to_vec();
    rows.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    rows
}

/// Reads a summary table back into typed rows.
pub fn read_output<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let mut text = String::new();
    npcomp::io::open_input(path)
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(text.as_bytes())
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .unwrap()
}
