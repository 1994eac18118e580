use std::path::PathBuf;

use clap::{
    Args,
    ValueEnum,
};
use npcomp::prelude::*;

use crate::utils::{
    report,
    OutputArgs,
    PipelineArgs,
    UtilsArgs,
};

#[derive(Args, Debug, Clone)]
pub(crate) struct FreqArgs {
    #[arg(
        required = true,
        help = "Path to nanopolish call-methylation output ('-' for stdin)."
    )]
    input:           PathBuf,
    #[arg(short, long, required = true, help = "Path for the site frequency table.")]
    output:          PathBuf,
    #[arg(
        short = 'c',
        long = "call-threshold",
        default_value_t = FreqMethConfig::DEFAULT_LLR_THRESHOLD,
        help_heading = "CALLING",
        help = "Calls with |log_lik_ratio| below this value are ambiguous."
    )]
    llr_threshold:   f64,
    #[arg(
        long,
        value_enum,
        default_value_t = CliAmbiguous::Include,
        help_heading = "CALLING",
        help = "Whether ambiguous calls count towards covered reads."
    )]
    ambiguous:       CliAmbiguous,
    #[arg(
        short = 's',
        long = "no-split-groups",
        default_value_t = false,
        help_heading = "CALLING",
        help = "Report multi-CpG calls as one site instead of one site per CpG."
    )]
    no_split_groups: bool,
    #[arg(
        long,
        default_value_t = false,
        help_heading = "CALLING",
        help = "Keep the two strands of a site apart."
    )]
    strand_specific: bool,
    #[arg(
        long,
        default_value_t = 0,
        help_heading = "CALLING",
        help = "Drop sites covered by fewer reads."
    )]
    min_depth:       CountType,
    #[clap(flatten)]
    pipeline:        PipelineArgs,
    #[clap(flatten)]
    out:             OutputArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum CliAmbiguous {
    Include,
    Exclude,
}

impl From<CliAmbiguous> for AmbiguousPolicy {
    fn from(value: CliAmbiguous) -> Self {
        match value {
            CliAmbiguous::Include => AmbiguousPolicy::Include,
            CliAmbiguous::Exclude => AmbiguousPolicy::Exclude,
        }
    }
}

impl FreqArgs {
    pub fn run(
        &self,
        utils: &UtilsArgs,
    ) -> anyhow::Result<()> {
        let config = FreqMethConfig::new(
            self.input.clone(),
            self.output.clone(),
            self.pipeline.config(utils),
            self.ambiguous.into(),
        )
        .with_llr_threshold(self.llr_threshold)
        .with_split_groups(!self.no_split_groups)
        .with_strand_specific(self.strand_specific)
        .with_min_depth(self.min_depth)
        .with_output_options(self.out.options(&self.output));

        let spinner = utils.spinner(format!(
            "Computing methylation frequency of {}",
            self.input.display()
        ))?;
        let result = config.run();
        spinner.finish_and_clear();

        report(&result?);
        Ok(())
    }
}
