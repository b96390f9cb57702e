//! `mdm compare`: merge one scenario through both engines and check that
//! they agree.

use std::io::{self, Write};

use anyhow::{Result, bail};
use clap::Args;
use mdmerge_core::merge::TracingProgress;
use mdmerge_core::{MergeOutcome, MergeReport, MergeType, merge_all};
use mdmerge_sim::Scenario;
use serde::Serialize;
use tracing::warn;

use super::merge::report_fields;
use super::{ConfigArgs, InputArgs};
use crate::output::{OutputMode, merge_failure, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// Allowed relative difference of the signal and error² sums.
    #[arg(long, default_value_t = 1e-6)]
    pub tolerance: f64,
}

#[derive(Debug, Serialize)]
pub struct Comparison {
    pub consistent: bool,
    pub mismatches: Vec<String>,
    pub default: MergeReport,
    pub indexed: MergeReport,
}

pub fn run_compare(args: &CompareArgs, output: OutputMode) -> Result<()> {
    let scenario = args.input.scenario()?;
    let default = merge_with(&scenario, &args.config, MergeType::Default, output)?;
    let indexed = merge_with(&scenario, &args.config, MergeType::Indexed, output)?;
    let (Some(default), Some(indexed)) = (default, indexed) else {
        bail!("inputs have more dimensions than any merge kernel handles; nothing to compare");
    };

    let mismatches = mismatches(&default, &indexed, args.tolerance);
    for mismatch in &mismatches {
        warn!(%mismatch, "merge paths disagree");
    }
    let comparison = Comparison {
        consistent: mismatches.is_empty(),
        mismatches,
        default,
        indexed,
    };
    render_mode(output, &comparison, render_text, render_pretty)?;

    if !comparison.consistent {
        bail!(
            "default and indexed merges disagree on {} field(s)",
            comparison.mismatches.len()
        );
    }
    Ok(())
}

fn merge_with(
    scenario: &Scenario,
    config: &ConfigArgs,
    merge_type: MergeType,
    output: OutputMode,
) -> Result<Option<MergeReport>> {
    let config = config.resolve(scenario, Some(merge_type))?;
    let inputs = scenario.build_workspaces()?;
    let outcome = merge_all(inputs, &config, &mut TracingProgress)
        .map_err(|failure| merge_failure(output, failure.error))?;
    Ok(match outcome {
        MergeOutcome::Merged(merged) => Some(merged.report().clone()),
        MergeOutcome::Skipped { .. } => None,
    })
}

/// Fields that must not depend on the engine.
fn mismatches(a: &MergeReport, b: &MergeReport, tolerance: f64) -> Vec<String> {
    let mut out = Vec::new();
    if a.events_out != b.events_out {
        out.push(format!("events: {} vs {}", a.events_out, b.events_out));
    }
    if a.bad_events != b.bad_events {
        out.push(format!("bad_events: {} vs {}", a.bad_events, b.bad_events));
    }
    if a.experiment_infos != b.experiment_infos {
        out.push(format!(
            "experiment_infos: {} vs {}",
            a.experiment_infos, b.experiment_infos
        ));
    }
    if !close(a.signal, b.signal, tolerance) {
        out.push(format!("signal: {} vs {}", a.signal, b.signal));
    }
    if !close(a.error_sq, b.error_sq, tolerance) {
        out.push(format!("error_sq: {} vs {}", a.error_sq, b.error_sq));
    }
    out
}

fn close(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}

fn render_text(cmp: &Comparison, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "consistent={}", cmp.consistent)?;
    for mismatch in &cmp.mismatches {
        writeln!(w, "mismatch={mismatch}")?;
    }
    for (label, report) in [("default", &cmp.default), ("indexed", &cmp.indexed)] {
        for (key, value) in report_fields(report) {
            writeln!(w, "{label}.{key}={value}")?;
        }
    }
    Ok(())
}

fn render_pretty(cmp: &Comparison, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Merge path comparison")?;
    let verdict = if cmp.consistent { "consistent" } else { "MISMATCH" };
    pretty_kv(w, "result", verdict)?;
    for mismatch in &cmp.mismatches {
        pretty_kv(w, "mismatch", mismatch)?;
    }
    writeln!(w)?;
    writeln!(w, "{:<18} {:>16} {:>16}", "field", "default", "indexed")?;
    let rows = report_fields(&cmp.default)
        .into_iter()
        .zip(report_fields(&cmp.indexed));
    for ((key, left), (_, right)) in rows {
        writeln!(w, "{key:<18} {left:>16} {right:>16}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdmerge_core::EventKind;

    fn report(events: u64, signal: f64) -> MergeReport {
        MergeReport {
            output: "merged".to_string(),
            merge_type: MergeType::Default,
            n_dims: 3,
            kind: EventKind::Lean,
            inputs: 2,
            spliced_seed: true,
            indexed_inputs: 0,
            inserted_inputs: 1,
            events_out: events,
            rejected_events: 0,
            stray_events: 0,
            bad_events: 0,
            experiment_infos: 0,
            boxes: 9,
            leaves: 8,
            max_depth: 1,
            signal,
            error_sq: signal,
        }
    }

    #[test]
    fn engine_specific_fields_are_ignored() {
        let a = report(100, 100.0);
        let mut b = report(100, 100.0 + 1e-9);
        b.merge_type = MergeType::Indexed;
        b.indexed_inputs = 1;
        b.inserted_inputs = 0;
        assert!(mismatches(&a, &b, 1e-6).is_empty());
    }

    #[test]
    fn count_and_sum_differences_are_reported() {
        let found = mismatches(&report(100, 100.0), &report(99, 99.0), 1e-6);
        assert_eq!(found.len(), 3);
        assert!(found[0].starts_with("events"));
    }
}
