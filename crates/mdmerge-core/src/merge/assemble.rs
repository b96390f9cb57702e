use serde::Serialize;
use tracing::warn;

use super::ProgressSink;
use super::indexed::IndexedStats;
use super::plan::MergePlan;
use crate::config::MergeType;
use crate::error::MergeError;
use crate::event::EventKind;
use crate::tree::{BoxTree, InsertStats};
use crate::workspace::{Dimension, EventWorkspace, ExperimentInfo};

/// Summary of one merge, suitable for JSON output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub output: String,
    pub merge_type: MergeType,
    pub n_dims: usize,
    pub kind: EventKind,
    pub inputs: usize,
    pub spliced_seed: bool,
    pub indexed_inputs: usize,
    pub inserted_inputs: usize,
    pub events_out: u64,
    pub rejected_events: u64,
    pub stray_events: u64,
    pub bad_events: u64,
    pub experiment_infos: usize,
    pub boxes: usize,
    pub leaves: usize,
    pub max_depth: u32,
    pub signal: f64,
    pub error_sq: f64,
}

/// The merged output.
#[derive(Debug, Clone)]
pub struct MergedWorkspace {
    workspace: EventWorkspace,
    bad_events: u64,
    report: MergeReport,
}

impl MergedWorkspace {
    #[must_use]
    pub const fn workspace(&self) -> &EventWorkspace {
        &self.workspace
    }

    #[must_use]
    pub fn into_workspace(self) -> EventWorkspace {
        self.workspace
    }

    #[must_use]
    pub const fn tree(&self) -> &BoxTree {
        self.workspace.tree()
    }

    #[must_use]
    pub fn experiment_infos(&self) -> &[ExperimentInfo] {
        self.workspace.experiment_infos()
    }

    /// Events rejected on insertion plus events found outside their leaf.
    #[must_use]
    pub const fn bad_events(&self) -> u64 {
        self.bad_events
    }

    #[must_use]
    pub const fn report(&self) -> &MergeReport {
        &self.report
    }
}

pub(super) struct Assembly {
    pub name: String,
    pub seed_dims: Vec<Dimension>,
    pub tree: BoxTree,
    pub experiment_infos: Vec<ExperimentInfo>,
    pub plan: MergePlan,
    pub inserted: InsertStats,
    pub indexed: IndexedStats,
}

/// Refresh the cached statistics, verify the tree and count bad events.
pub(super) fn finalize(
    parts: Assembly,
    progress: &mut dyn ProgressSink,
) -> Result<MergedWorkspace, MergeError> {
    let Assembly {
        name,
        seed_dims,
        mut tree,
        experiment_infos,
        plan,
        inserted,
        indexed,
    } = parts;

    tree.refresh_cache();
    let check = tree.verify()?;
    let rejected_events = inserted.rejected + indexed.rejected;
    let bad_events = rejected_events + check.stray_events;
    if bad_events > 0 {
        warn!(
            rejected = rejected_events,
            stray = check.stray_events,
            "merged workspace has bad events"
        );
        progress.warn(&format!("{bad_events} bad events while merging into {name}"));
    }

    // Names and units follow the first input, ranges the union of all.
    let dimensions = seed_dims
        .into_iter()
        .zip(&plan.extents)
        .map(|(dim, extent)| Dimension {
            min: extent.min,
            max: extent.max,
            ..dim
        })
        .collect();

    let root = tree.root_stats();
    let report = MergeReport {
        output: name.clone(),
        merge_type: plan.merge_type,
        n_dims: plan.n_dims,
        kind: plan.kind,
        inputs: plan.n_inputs(),
        spliced_seed: plan.splice_seed,
        indexed_inputs: plan.indexed.len(),
        inserted_inputs: plan.inserted.len(),
        events_out: check.events,
        rejected_events,
        stray_events: check.stray_events,
        bad_events,
        experiment_infos: experiment_infos.len(),
        boxes: check.boxes,
        leaves: check.leaves,
        max_depth: check.max_depth_seen,
        signal: root.signal,
        error_sq: root.error_sq,
    };
    progress.report(1.0, "merge finalized");

    let workspace = EventWorkspace::from_parts(name, dimensions, tree, experiment_infos)?;
    Ok(MergedWorkspace {
        workspace,
        bad_events,
        report,
    })
}
