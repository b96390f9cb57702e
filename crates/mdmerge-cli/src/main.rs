#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use mdmerge_core::timing;
use output::{OutputMode, resolve_output_mode};
use std::env;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "mdm: merge multi-dimensional event workspaces",
    long_about = None
)]
struct Cli {
    /// Enable debug logging for mdmerge crates.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit a timing report of the merge phases to stderr.
    #[arg(long, global = true)]
    timing: bool,

    /// Output format: pretty, text or json.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Merge the workspaces of a scenario",
        long_about = "Generate the input workspaces of a scenario file (or of an inline recipe) and merge them into one.",
        after_help = "EXAMPLES:\n    # Merge two generated 3-D workspaces with the indexed engine\n    mdm merge --inputs 2 --dims 3 --merge-type indexed\n\n    # Merge a scenario file, JSON report\n    mdm merge --scenario runs.toml --format json"
    )]
    Merge(cmd::merge::MergeArgs),

    #[command(
        about = "Merge a scenario with both engines and compare",
        long_about = "Merge the same inputs with the default and the indexed engine. Fails when event counts, bad events, experiment infos or signal sums differ.",
        after_help = "EXAMPLES:\n    mdm compare --scenario runs.toml\n    mdm compare --inputs 4 --dims 4 --kind full --infos 2"
    )]
    Compare(cmd::compare::CompareArgs),

    #[command(
        about = "Print the Z order of a split",
        after_help = "EXAMPLES:\n    mdm zorder --dims 3\n    mdm zorder --dims 2 --split 4,2 --format json"
    )]
    Zorder(cmd::zorder::ZorderArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("MDMERGE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "mdmerge_core=debug,mdmerge_sim=debug,mdm=debug,info"
        } else {
            "mdmerge_core=info,mdm=info,warn"
        })
    });

    let format = env::var("MDMERGE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let timing_enabled = cli.timing || timing::enabled_from_env();
    timing::set_enabled(timing_enabled);
    let output = cli.output_mode();
    debug!(?output, timing = timing_enabled, "starting");

    let command_result = match &cli.command {
        Commands::Merge(args) => {
            timing::timed("cmd.merge", || cmd::merge::run_merge(args, output))
        }
        Commands::Compare(args) => {
            timing::timed("cmd.compare", || cmd::compare::run_compare(args, output))
        }
        Commands::Zorder(args) => {
            timing::timed("cmd.zorder", || cmd::zorder::run_zorder(args, output))
        }
    };

    if timing_enabled {
        let report = timing::take_report();
        eprintln!("timing report:");
        eprint!("{}", report.table());
        eprintln!("timing report (json):");
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }

    command_result
}
