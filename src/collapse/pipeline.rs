use std::path::{
    Path,
    PathBuf,
};
use std::sync::atomic::Ordering;

use log::{
    debug,
    info,
};
use serde::Serialize;

use super::parallel::run_partitioned;
use super::sort::ExternalSorter;
use super::{
    CancelToken,
    Collapse,
    CollapseStats,
    Collapser,
};
use crate::data_structs::{
    MalformedPolicy,
    SortMode,
};
use crate::error::{
    CollapseError,
    Result,
};
use crate::io::{
    RecordReader,
    SummarySink,
};
use crate::with_field_fn;

/// Settings shared by every collapsing tool.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub sort_mode:      SortMode,
    pub malformed:      MalformedPolicy,
    /// Input starts with a header row
    pub has_header:     bool,
    /// Worker threads; 1 runs the plain streaming fold
    pub threads:        usize,
    /// Records per batch handed to a worker when `threads > 1`
    pub batch_size:     usize,
    /// Records per in-memory run of the external sort
    pub sort_buffer:    usize,
    /// Where sort runs are spilled (system temp dir when unset)
    pub temp_dir:       Option<PathBuf>,
    /// Stop after this many partitions
    pub max_partitions: Option<usize>,
    #[serde(skip)]
    pub cancel:         CancelToken,
}

impl PipelineConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 10_000;
    pub const DEFAULT_SORT_BUFFER: usize = 1_000_000;

    pub fn new(sort_mode: SortMode) -> Self {
        Self {
            sort_mode,
            malformed: MalformedPolicy::Fail,
            has_header: true,
            threads: 1,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            sort_buffer: Self::DEFAULT_SORT_BUFFER,
            temp_dir: None,
            max_partitions: None,
            cancel: CancelToken::new(),
        }
    }

    with_field_fn!(malformed, MalformedPolicy);

    with_field_fn!(has_header, bool);

    with_field_fn!(threads, usize);

    with_field_fn!(batch_size, usize);

    with_field_fn!(sort_buffer, usize);

    with_field_fn!(temp_dir, Option<PathBuf>);

    with_field_fn!(max_partitions, Option<usize>);

    with_field_fn!(cancel, CancelToken);

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(CollapseError::invalid_config("threads", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(CollapseError::invalid_config(
                "batch_size",
                "must be at least 1",
            ));
        }
        if self.sort_buffer == 0 {
            return Err(CollapseError::invalid_config(
                "sort_buffer",
                "must be at least 1",
            ));
        }
        if self.max_partitions == Some(0) {
            return Err(CollapseError::invalid_config(
                "max_partitions",
                "must be at least 1 when set",
            ));
        }
        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                return Err(CollapseError::invalid_config(
                    "temp_dir",
                    format!("{} is not a directory", dir.display()),
                ));
            }
        }
        Ok(())
    }
}

/// Reads `input`, collapses it with `collapse` and feeds summaries to
/// `sink`. Skipped rows are reported in the returned stats.
pub fn run<C, S>(
    collapse: &C,
    input: &Path,
    sink: &mut S,
    config: &PipelineConfig,
) -> Result<CollapseStats>
where
    C: Collapse,
    S: SummarySink<C::Summary>, {
    config.validate()?;
    let reader = RecordReader::<C::Record>::from_path(input, config.has_header, config.malformed)?;
    let skipped = reader.skipped_counter();
    info!(
        "Collapsing {} ({} mode, {} thread(s))",
        input.display(),
        config.sort_mode,
        config.threads
    );

    let mut stats = run_records(collapse, reader, sink, config)?;
    stats.skipped = skipped.load(Ordering::Relaxed);
    Ok(stats)
}

/// Like [`run`], over records that were already parsed.
pub fn run_records<C, I, S>(
    collapse: &C,
    records: I,
    sink: &mut S,
    config: &PipelineConfig,
) -> Result<CollapseStats>
where
    C: Collapse,
    I: Iterator<Item = Result<C::Record>> + Send,
    S: SummarySink<C::Summary>, {
    config.validate()?;
    let records: Box<dyn Iterator<Item = Result<C::Record>> + Send + '_> = match config.sort_mode
    {
        SortMode::Trust => Box::new(records),
        SortMode::SortFirst => {
            let sorted = ExternalSorter::new(config.sort_buffer)
                .temp_dir(config.temp_dir.clone())
                .sort(records, |record: &C::Record| collapse.sort_key(record))?;
            Box::new(sorted)
        },
    };
    let records = PartitionLimit::new(records, collapse, config.max_partitions);

    if config.threads > 1 {
        return run_partitioned(
            collapse,
            records,
            sink,
            config.threads,
            config.batch_size,
            &config.cancel,
        );
    }

    let mut collapser = Collapser::new(collapse, config.cancel.clone());
    for record in records {
        collapser.push(record?, sink)?;
    }
    collapser.finish(sink)
}

/// Ends the stream at the first record of partition `limit + 1`.
struct PartitionLimit<'a, I, C: Collapse> {
    inner:    I,
    collapse: &'a C,
    limit:    Option<usize>,
    current:  Option<C::Partition>,
    seen:     usize,
    done:     bool,
}

impl<'a, I, C: Collapse> PartitionLimit<'a, I, C> {
    fn new(
        inner: I,
        collapse: &'a C,
        limit: Option<usize>,
    ) -> Self {
        Self {
            inner,
            collapse,
            limit,
            current: None,
            seen: 0,
            done: false,
        }
    }
}

impl<I, C> Iterator for PartitionLimit<'_, I, C>
where
    I: Iterator<Item = Result<C::Record>>,
    C: Collapse,
{
    type Item = Result<C::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let record = match self.inner.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        let Some(limit) = self.limit
        else {
            return Some(Ok(record));
        };

        let starts_partition = self
            .current
            .as_ref()
            .map_or(true, |p| !self.collapse.in_partition(&record, p));
        if starts_partition {
            if self.seen == limit {
                debug!("Reached the limit of {limit} partitions");
                self.done = true;
                return None;
            }
            self.seen += 1;
            self.current = Some(self.collapse.partition(&record));
        }
        Some(Ok(record))
    }
}
