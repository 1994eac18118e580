mod common;

use std::collections::BTreeMap;
use std::path::{
    Path,
    PathBuf,
};

use common::*;
use npcomp::prelude::*;
use rstest::rstest;
use tempfile::TempDir;

const THRESHOLD: f64 = 2.0;

fn config(
    input: &Path,
    output: &Path,
    pipeline: PipelineConfig,
    ambiguous: AmbiguousPolicy,
) -> FreqMethConfig {
    FreqMethConfig::new(
        input.to_path_buf(),
        output.to_path_buf(),
        pipeline,
        ambiguous,
    )
    .with_llr_threshold(THRESHOLD)
}

fn setup(
    seed: u64,
    n_calls: usize,
) -> (TempDir, PathBuf, MethylationData) {
    let dir = tempfile::tempdir().unwrap();
    let data = generate_methylation(seed, n_calls, THRESHOLD);
    let input = dir.path().join("calls.tsv");
    write_table(&input, METHYLATION_HEADER, &data.rows);
    (dir, input, data)
}

#[rstest]
#[case::include(AmbiguousPolicy::Include, 1)]
#[case::exclude(AmbiguousPolicy::Exclude, 1)]
#[case::include_parallel(AmbiguousPolicy::Include, 4)]
fn test_site_counts_match_expected(
    #[case] ambiguous: AmbiguousPolicy,
    #[case] threads: usize,
) {
    let (dir, input, data) = setup(42, 600);
    let output = dir.path().join("freq.tsv");
    let stats = config(
        &input,
        &output,
        PipelineConfig::new(SortMode::Trust).with_threads(threads),
        ambiguous,
    )
    .run()
    .unwrap();
    assert_eq!(stats.records as usize, data.rows.len());
    assert_eq!(stats.partitions, 2);

    let rows = read_output::<SiteFrequencyRecord>(&output);
    let sites = rows
        .iter()
        .map(|r| ((r.contig.clone(), r.position), r))
        .collect::<BTreeMap<_, _>>();
    assert_eq!(sites.len(), rows.len(), "every site is reported once");
    assert_eq!(
        sites.keys().collect::<Vec<_>>(),
        data.expected.keys().collect::<Vec<_>>()
    );

    for (key, (methylated, unmethylated, amb)) in data.expected.iter() {
        let row = sites[key];
        assert_eq!(row.strand, Strand::None);
        assert_eq!(row.methylated_reads, *methylated);
        assert_eq!(row.unmethylated_reads, *unmethylated);
        assert_eq!(row.ambiguous_reads, *amb);
        let covered = match ambiguous {
            AmbiguousPolicy::Include => methylated + unmethylated + amb,
            AmbiguousPolicy::Exclude => methylated + unmethylated,
        };
        assert_eq!(row.covered_reads, covered);

        match row.frequency.value() {
            Some(freq) => {
                assert!((0.0..=1.0).contains(&freq));
                let called = (methylated + unmethylated) as f64;
                assert!((freq - *methylated as f64 / called).abs() < 1e-12);
            },
            None => assert_eq!(methylated + unmethylated, 0),
        }
    }

    // Output follows (contig, position) order.
    let order = rows
        .iter()
        .map(|r| (r.contig.clone(), r.position))
        .collect::<Vec<_>>();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);
}

#[rstest]
#[case::in_memory(1_000_000, 1)]
#[case::spilled(37, 1)]
#[case::spilled_parallel(37, 3)]
fn test_sort_first_matches_sorted_input(
    #[case] sort_buffer: usize,
    #[case] threads: usize,
) {
    let (dir, input, data) = setup(5, 400);
    let sorted_output = dir.path().join("sorted.tsv");
    config(
        &input,
        &sorted_output,
        PipelineConfig::new(SortMode::Trust),
        AmbiguousPolicy::Include,
    )
    .run()
    .unwrap();

    let shuffled_input = dir.path().join("shuffled.tsv");
    write_table(&shuffled_input, METHYLATION_HEADER, &shuffled(&data.rows, 9));
    let shuffled_output = dir.path().join("shuffled.out.tsv");
    config(
        &shuffled_input,
        &shuffled_output,
        PipelineConfig::new(SortMode::SortFirst)
            .with_sort_buffer(sort_buffer)
            .with_threads(threads),
        AmbiguousPolicy::Include,
    )
    .run()
    .unwrap();

    let sorted = read_output::<SiteFrequencyRecord>(&sorted_output);
    let recovered = read_output::<SiteFrequencyRecord>(&shuffled_output);
    assert_eq!(sorted, recovered);

    let err = config(
        &shuffled_input,
        &dir.path().join("trusted.tsv"),
        PipelineConfig::new(SortMode::Trust),
        AmbiguousPolicy::Include,
    )
    .run()
    .unwrap_err();
    assert!(matches!(err, CollapseError::NonContiguousGroup { .. }));
}

#[test]
fn test_unsplit_groups_report_one_site_per_call_start() {
    let (dir, input, data) = setup(3, 200);
    let output = dir.path().join("freq.tsv");
    config(
        &input,
        &output,
        PipelineConfig::new(SortMode::Trust),
        AmbiguousPolicy::Include,
    )
    .with_split_groups(false)
    .run()
    .unwrap();

    let rows = read_output::<SiteFrequencyRecord>(&output);
    let covered = rows.iter().map(|r| r.covered_reads).sum::<u64>();
    assert_eq!(covered as usize, data.rows.len());
    assert!(rows.iter().any(|r| r.num_motifs == 2));
}

#[test]
fn test_strand_specific_and_min_depth() {
    let (dir, input, _) = setup(8, 500);
    let merged_output = dir.path().join("merged.tsv");
    config(
        &input,
        &merged_output,
        PipelineConfig::new(SortMode::Trust),
        AmbiguousPolicy::Include,
    )
    .run()
    .unwrap();
    let merged = read_output::<SiteFrequencyRecord>(&merged_output);

    let stranded_output = dir.path().join("stranded.tsv");
    config(
        &input,
        &stranded_output,
        PipelineConfig::new(SortMode::Trust),
        AmbiguousPolicy::Include,
    )
    .with_strand_specific(true)
    .run()
    .unwrap();
    let stranded = read_output::<SiteFrequencyRecord>(&stranded_output);
    assert!(stranded.len() >= merged.len());
    assert!(stranded.iter().all(|r| r.strand != Strand::None));
    assert_eq!(
        stranded.iter().map(|r| r.covered_reads).sum::<u64>(),
        merged.iter().map(|r| r.covered_reads).sum::<u64>()
    );

    let deep_output = dir.path().join("deep.tsv");
    let stats = config(
        &input,
        &deep_output,
        PipelineConfig::new(SortMode::Trust),
        AmbiguousPolicy::Include,
    )
    .with_min_depth(3)
    .run()
    .unwrap();
    let deep = read_output::<SiteFrequencyRecord>(&deep_output);
    assert!(deep.iter().all(|r| r.covered_reads >= 3));
    assert_eq!(
        deep.len() as u64 + stats.filtered,
        merged.len() as u64
    );
}

#[test]
fn test_contig_index() {
    let (dir, input, data) = setup(21, 300);
    let output = dir.path().join("freq.tsv.gz");
    config(
        &input,
        &output,
        PipelineConfig::new(SortMode::Trust),
        AmbiguousPolicy::Include,
    )
    .with_compression(Compression::Gz, Some(9))
    .run()
    .unwrap();

    let index = read_index(index_path_for(&output)).unwrap();
    let contigs = index
        .iter()
        .map(|entry| entry.get("contig").unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(contigs, vec!["chr1".to_string(), "chr2".to_string()]);

    for entry in index.iter() {
        let contig = entry.get("contig").unwrap();
        let expected = data
            .expected
            .keys()
            .filter(|(c, _)| c == contig)
            .collect::<Vec<_>>();
        assert_eq!(entry.get("sites").unwrap(), expected.len().to_string());
        assert_eq!(
            entry.get("first_site").unwrap(),
            expected.first().unwrap().1.to_string()
        );
        assert_eq!(
            entry.get("last_site").unwrap(),
            expected.last().unwrap().1.to_string()
        );
    }
    assert_eq!(index[1].offset, index[0].offset + index[0].length);
}
