use std::path::{
    Path,
    PathBuf,
};
use std::time::Duration;

use clap::{
    Args,
    ValueEnum,
};
use console::style;
use indicatif::{
    ProgressBar,
    ProgressStyle,
};
use npcomp::prelude::*;

#[derive(Args, Debug, Clone)]
pub(crate) struct UtilsArgs {
    #[arg(
        long,
        default_value_t = 1,
        help_heading = "UTILS",
        help = "Number of worker threads. Partitions (reads or contigs) are \
                collapsed in parallel when greater than 1."
    )]
    pub threads:  usize,
    #[arg(
        short,
        long,
        default_value_t = false,
        help_heading = "UTILS",
        help = "Verbose output."
    )]
    pub verbose:  bool,
    #[arg(
        long,
        default_value_t = false,
        help_heading = "UTILS",
        help = "Display a progress spinner."
    )]
    pub progress: bool,
}

impl UtilsArgs {
    pub fn setup(&self) -> anyhow::Result<()> {
        init_logger(self.verbose)?;
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads.max(1))
            .build_global()?;
        Ok(())
    }

    pub fn spinner(
        &self,
        message: String,
    ) -> anyhow::Result<ProgressBar> {
        if !self.progress {
            return Ok(ProgressBar::hidden());
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
        );
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(120));
        Ok(spinner)
    }
}

fn init_logger(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    }
    else {
        log::LevelFilter::Info
    };
    pretty_env_logger::formatted_builder()
        .filter_level(level)
        .parse_default_env()
        .try_init()?;
    Ok(())
}

/// Input/sorting options shared by both subcommands.
#[derive(Args, Debug, Clone)]
pub(crate) struct PipelineArgs {
    #[arg(
        long = "sort-mode",
        value_enum,
        default_value_t = CliSortMode::Trust,
        help_heading = "INPUT",
        help = "How input order is handled. 'trust' streams the input and fails \
                on the first group that reappears; 'sort-first' sorts it first."
    )]
    pub sort_mode:      CliSortMode,
    #[arg(
        long,
        value_enum,
        default_value_t = CliMalformed::Fail,
        help_heading = "INPUT",
        help = "What to do with rows that cannot be parsed."
    )]
    pub malformed:      CliMalformed,
    #[arg(
        long,
        default_value_t = false,
        help_heading = "INPUT",
        help = "Input has no header row; nanopolish column order is assumed, with the \
                optional signal-index and samples columns detected from the row width."
    )]
    pub no_header:      bool,
    #[arg(
        long,
        default_value_t = PipelineConfig::DEFAULT_SORT_BUFFER,
        help_heading = "INPUT",
        help = "Records kept in memory per sorted run before spilling to disk."
    )]
    pub sort_buffer:    usize,
    #[arg(
        long,
        default_value_t = PipelineConfig::DEFAULT_BATCH_SIZE,
        help_heading = "UTILS",
        help = "Records per batch handed to a worker when --threads is greater than 1."
    )]
    pub batch_size:     usize,
    #[arg(long, help_heading = "INPUT", help = "Directory for sort spill files.")]
    pub temp_dir:       Option<PathBuf>,
    #[arg(
        long,
        help_heading = "INPUT",
        help = "Stop after this many reads (collapse) or contigs (freq-meth)."
    )]
    pub max_partitions: Option<usize>,
}

impl PipelineArgs {
    pub fn config(
        &self,
        utils: &UtilsArgs,
    ) -> PipelineConfig {
        PipelineConfig::new(self.sort_mode.into())
            .with_malformed(self.malformed.into())
            .with_has_header(!self.no_header)
            .with_threads(utils.threads)
            .with_batch_size(self.batch_size)
            .with_sort_buffer(self.sort_buffer)
            .with_temp_dir(self.temp_dir.clone())
            .with_max_partitions(self.max_partitions)
    }
}

/// Output options shared by both subcommands.
#[derive(Args, Debug, Clone)]
pub(crate) struct OutputArgs {
    #[arg(
        short = 'C',
        long,
        value_enum,
        help_heading = "OUTPUT",
        help = "Output compression. Inferred from the output extension when not set."
    )]
    pub compression:       Option<CliCompression>,
    #[arg(long, help_heading = "OUTPUT", help = "Compression level.")]
    pub compression_level: Option<u32>,
    #[arg(
        long,
        default_value_t = false,
        help_heading = "OUTPUT",
        help = "Do not write the <output>.idx partition index."
    )]
    pub no_index:          bool,
}

impl OutputArgs {
    pub fn options(
        &self,
        output: &Path,
    ) -> OutputOptions {
        OutputOptions {
            compression:       self
                .compression
                .map(Compression::from)
                .unwrap_or_else(|| Compression::from_path(output)),
            compression_level: self.compression_level,
            index:             !self.no_index,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum CliSortMode {
    Trust,
    SortFirst,
}

impl From<CliSortMode> for SortMode {
    fn from(value: CliSortMode) -> Self {
        match value {
            CliSortMode::Trust => SortMode::Trust,
            CliSortMode::SortFirst => SortMode::SortFirst,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum CliMalformed {
    Fail,
    Skip,
}

impl From<CliMalformed> for MalformedPolicy {
    fn from(value: CliMalformed) -> Self {
        match value {
            CliMalformed::Fail => MalformedPolicy::Fail,
            CliMalformed::Skip => MalformedPolicy::SkipAndWarn,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum CliCompression {
    None,
    Gz,
    Zstd,
}

impl From<CliCompression> for Compression {
    fn from(value: CliCompression) -> Self {
        match value {
            CliCompression::None => Compression::None,
            CliCompression::Gz => Compression::Gz,
            CliCompression::Zstd => Compression::Zstd,
        }
    }
}

pub(crate) fn report(stats: &CollapseStats) {
    eprintln!(
        "{} {} records -> {} rows ({} partitions, {} filtered, {} skipped)",
        style("Done:").green().bold(),
        stats.records,
        style(stats.groups).green(),
        stats.partitions,
        stats.filtered,
        stats.skipped
    );
}
