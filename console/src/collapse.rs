use std::path::PathBuf;

use clap::Args;
use npcomp::prelude::*;

use crate::utils::{
    report,
    OutputArgs,
    PipelineArgs,
    UtilsArgs,
};

#[derive(Args, Debug, Clone)]
pub(crate) struct CollapseArgs {
    #[arg(
        required = true,
        help = "Path to nanopolish eventalign output ('-' for stdin). \
                .gz and .zst inputs are decompressed."
    )]
    input:    PathBuf,
    #[arg(short, long, required = true, help = "Path for the collapsed table.")]
    output:   PathBuf,
    #[arg(
        long,
        default_value_t = false,
        help = "Append a 'samples' column with the raw samples of every kmer, in event \
                order. Needs eventalign run with --samples."
    )]
    write_samples:   bool,
    #[arg(
        long,
        default_value_t = false,
        help = "Input is collapsed output (possibly several tables concatenated); rows of \
                the same kmer are merged again."
    )]
    merge_collapsed: bool,
    #[clap(flatten)]
    pipeline: PipelineArgs,
    #[clap(flatten)]
    out:      OutputArgs,
}

impl CollapseArgs {
    pub fn run(
        &self,
        utils: &UtilsArgs,
    ) -> anyhow::Result<()> {
        let config = EventalignCollapseConfig::new(
            self.input.clone(),
            self.output.clone(),
            self.pipeline.config(utils),
        )
        .with_output_options(self.out.options(&self.output))
        .with_write_samples(self.write_samples)
        .with_merge_collapsed(self.merge_collapsed);

        let spinner = utils.spinner(format!("Collapsing {}", self.input.display()))?;
        let result = config.run();
        spinner.finish_and_clear();

        report(&result?);
        Ok(())
    }
}
