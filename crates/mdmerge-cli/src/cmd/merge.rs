//! `mdm merge`: build the inputs of a scenario and merge them.

use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use mdmerge_core::merge::TracingProgress;
use mdmerge_core::{MergeOutcome, MergeReport, MergeType, merge_named};
use serde::Serialize;
use tracing::info;

use super::{ConfigArgs, InputArgs};
use crate::output::{OutputMode, merge_failure, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct MergeArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// Engine for compatible inputs (`default` or `indexed`).
    #[arg(short = 't', long)]
    pub merge_type: Option<MergeType>,

    /// Workspaces or groups to merge, in order. Defaults to every input of
    /// the scenario (the group `all`).
    #[arg(value_name = "NAME")]
    pub names: Vec<String>,

    /// Exit with an error when the output has bad events.
    #[arg(long)]
    pub strict: bool,
}

/// Result of `mdm merge`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeSummary {
    Merged(MergeReport),
    Skipped { n_dims: usize },
}

pub fn run_merge(args: &MergeArgs, output: OutputMode) -> Result<()> {
    let scenario = args.input.scenario()?;
    let config = args.config.resolve(&scenario, args.merge_type)?;
    let mut store = scenario.build_store()?;

    let names = if args.names.is_empty() {
        vec!["all".to_string()]
    } else {
        args.names.clone()
    };
    let outcome = merge_named(&mut store, &names, &config, &mut TracingProgress)
        .map_err(|err| merge_failure(output, err))?;

    let summary = match outcome {
        MergeOutcome::Merged(merged) => {
            info!(output = %merged.report().output, "merged");
            MergeSummary::Merged(merged.report().clone())
        }
        MergeOutcome::Skipped { n_dims } => MergeSummary::Skipped { n_dims },
    };
    render_mode(output, &summary, render_text, render_pretty)?;

    if let MergeSummary::Merged(report) = &summary {
        if args.strict && report.bad_events > 0 {
            anyhow::bail!("{} bad events in {}", report.bad_events, report.output);
        }
    }
    Ok(())
}

pub fn report_fields(report: &MergeReport) -> Vec<(&'static str, String)> {
    vec![
        ("output", report.output.clone()),
        ("merge_type", report.merge_type.to_string()),
        ("n_dims", report.n_dims.to_string()),
        ("kind", report.kind.to_string()),
        ("inputs", report.inputs.to_string()),
        ("spliced_seed", report.spliced_seed.to_string()),
        ("indexed_inputs", report.indexed_inputs.to_string()),
        ("inserted_inputs", report.inserted_inputs.to_string()),
        ("events", report.events_out.to_string()),
        ("bad_events", report.bad_events.to_string()),
        ("experiment_infos", report.experiment_infos.to_string()),
        ("boxes", report.boxes.to_string()),
        ("leaves", report.leaves.to_string()),
        ("max_depth", report.max_depth.to_string()),
        ("signal", format!("{:.6}", report.signal)),
        ("error_sq", format!("{:.6}", report.error_sq)),
    ]
}

fn render_text(summary: &MergeSummary, w: &mut dyn Write) -> io::Result<()> {
    match summary {
        MergeSummary::Merged(report) => {
            for (key, value) in report_fields(report) {
                writeln!(w, "{key}={value}")?;
            }
            Ok(())
        }
        MergeSummary::Skipped { n_dims } => writeln!(w, "skipped n_dims={n_dims}"),
    }
}

fn render_pretty(summary: &MergeSummary, w: &mut dyn Write) -> io::Result<()> {
    match summary {
        MergeSummary::Merged(report) => {
            pretty_section(w, &format!("Merged {}", report.output))?;
            for (key, value) in report_fields(report) {
                pretty_kv(w, key, value)?;
            }
            Ok(())
        }
        MergeSummary::Skipped { n_dims } => {
            writeln!(w, "No result: {n_dims}-dimensional inputs are skipped")
        }
    }
}
