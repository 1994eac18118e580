//! The two collapsing transforms and their run configurations.
//!
//! - [`eventalign`]: collapses nanopolish eventalign rows into one row per
//!   (read, contig, position, kmer, strand), with a per-read index. The
//!   same tool merges collapsed tables back together.
//! - [`freq_meth`]: turns per-read methylation calls into per-site
//!   methylation frequencies, with a per-contig index.

pub mod eventalign;
pub mod freq_meth;

use std::path::Path;
use std::time::Instant;

use log::{
    info,
    warn,
};

use crate::collapse::{
    run,
    Collapse,
    CollapseStats,
    PipelineConfig,
};
use crate::error::{
    CollapseError,
    Result,
};
use crate::io::{
    Compression,
    SummaryWriter,
};
use crate::utils::index_path_for;

/// Output settings shared by both tools.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct OutputOptions {
    pub compression:       Compression,
    /// Codec level; the codec default when unset
    pub compression_level: Option<u32>,
    /// Write `<output>.idx`
    pub index:             bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            compression:       Compression::None,
            compression_level: None,
            index:             true,
        }
    }
}

impl OutputOptions {
    pub fn validate(&self) -> Result<()> {
        let range = match self.compression {
            Compression::None => 0..=0,
            Compression::Gz => 0..=9,
            Compression::Zstd => 1..=22,
        };
        match self.compression_level {
            Some(level) if self.compression != Compression::None && !range.contains(&level) => {
                Err(CollapseError::invalid_config(
                    "compression_level",
                    format!(
                        "{level} is outside {}..={} for {}",
                        range.start(),
                        range.end(),
                        self.compression.name()
                    ),
                ))
            },
            _ => Ok(()),
        }
    }
}

pub(crate) fn validate_paths(
    input: &Path,
    output: &Path,
) -> Result<()> {
    if input != Path::new("-") && !input.is_file() {
        return Err(CollapseError::invalid_config(
            "input",
            format!("{} does not exist or is not a file", input.display()),
        ));
    }
    if input == output {
        return Err(CollapseError::invalid_config(
            "output",
            "output must differ from the input",
        ));
    }
    Ok(())
}

/// Collapses `input` into `output` and writes the index next to it.
///
/// A run that produces no summary fails with `EmptyOutput` once the
/// (header-only) output has been closed. Any other failure removes the
/// partially written output.
pub(crate) fn run_to_file<C: Collapse>(
    collapse: &C,
    input: &Path,
    output: &Path,
    pipeline: &PipelineConfig,
    options: &OutputOptions,
) -> Result<CollapseStats> {
    let start = Instant::now();
    let level = options
        .compression_level
        .unwrap_or_else(|| options.compression.default_level());
    let mut writer = SummaryWriter::<C::Summary, C::Stats, _>::create(
        output,
        options.compression,
        level,
        &collapse.header(),
        options.index,
    )?;

    let (stats, finished) = match run(collapse, input, &mut writer, pipeline)
        .and_then(|stats| Ok((stats, writer.finish()?)))
    {
        Ok(done) => done,
        Err(err) => {
            remove_partial_output(output);
            return Err(err);
        },
    };
    if stats.groups == 0 {
        return Err(CollapseError::EmptyOutput {
            path: output.to_path_buf(),
        });
    }
    if let Some(index) = finished.index {
        let index_path = index_path_for(output);
        index.write_path(&index_path)?;
        info!(
            "Wrote {} index entries to {}",
            index.len(),
            index_path.display()
        );
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Collapsed {} records into {} rows ({} filtered, {} skipped) in {:.2}s [{:.0} records/s]",
        stats.records,
        finished.rows,
        stats.filtered,
        stats.skipped,
        elapsed,
        stats.records as f64 / elapsed.max(f64::EPSILON)
    );
    Ok(stats)
}

fn remove_partial_output(output: &Path) {
    match std::fs::remove_file(output) {
        Ok(()) => warn!("Removed partial output {}", output.display()),
        Err(e) => warn!("Could not remove partial output {}: {e}", output.display()),
    }
}
