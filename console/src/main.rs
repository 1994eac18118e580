mod collapse;
mod freq;
mod utils;

use std::process::exit;

use clap::{
    Parser,
    Subcommand,
};
use collapse::CollapseArgs;
use console::style;
use freq::FreqArgs;
use npcomp::error::CollapseError;
use utils::UtilsArgs;
use wild::ArgsOs;

#[derive(Parser, Debug)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None,)]
struct Cli {
    #[command(subcommand)]
    command: MainMenu,
}

#[derive(Subcommand, Debug)]
enum MainMenu {
    /// Collapse eventalign events into one row per read kmer.
    Collapse {
        #[clap(flatten)]
        utils: UtilsArgs,
        #[clap(flatten)]
        args:  CollapseArgs,
    },

    /// Per-site methylation frequency from per-read calls.
    #[command(name = "freq-meth")]
    FreqMeth {
        #[clap(flatten)]
        utils: UtilsArgs,
        #[clap(flatten)]
        args:  FreqArgs,
    },
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        MainMenu::Collapse { utils, args } => {
            utils.setup()?;
            args.run(&utils)
        },
        MainMenu::FreqMeth { utils, args } => {
            utils.setup()?;
            args.run(&utils)
        },
    }
}

/// Library failures keep their own exit code; anything else exits with 1.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CollapseError>()
        .map(CollapseError::exit_code)
        .unwrap_or(1)
}

fn main() {
    let args: ArgsOs = wild::args_os();
    let cli = Cli::parse_from(args);

    if let Err(err) = run(cli) {
        eprintln!("{} {:#}", style("Error:").red().bold(), err);
        exit(exit_code(&err));
    }
}
