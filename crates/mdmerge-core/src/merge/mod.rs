//! Merging several event workspaces into one.
//!
//! [`plan::plan_merge`] validates the inputs and assigns each one to an
//! engine. The kernel chosen by `(nd, event kind)` then moves the first
//! input's tree into the output when it can, merges structurally identical
//! trees box by box, and inserts everything else event by event.

mod assemble;
mod default;
mod dispatch;
mod indexed;
pub mod plan;

pub use assemble::{MergeReport, MergedWorkspace};
pub use plan::{MergePlan, plan_merge};

use tracing::{info, instrument, warn};

use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::timing;
use crate::workspace::{EventWorkspace, WorkspaceRepository};
use crate::{MAX_DIMS, RUN_INDEX_LIMIT};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Receives progress between whole-workspace steps.
pub trait ProgressSink {
    /// `fraction` of the inputs are merged.
    fn report(&mut self, fraction: f64, message: &str);

    fn warn(&mut self, message: &str);
}

/// Forwards progress to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&mut self, fraction: f64, message: &str) {
        tracing::debug!(progress = fraction, "{message}");
    }

    fn warn(&mut self, message: &str) {
        tracing::warn!("{message}");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _fraction: f64, _message: &str) {}

    fn warn(&mut self, _message: &str) {}
}

// ---------------------------------------------------------------------------
// Run-index offsets
// ---------------------------------------------------------------------------

/// Running total of experiment infos seen so far. The events of an input
/// are shifted by the total of all inputs before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunOffsets {
    next: usize,
}

impl RunOffsets {
    /// Offset for an input carrying `count` experiment infos.
    ///
    /// # Errors
    ///
    /// [`MergeError::TooManyExperimentInfos`] once the total no longer fits
    /// the run-index range.
    pub fn reserve(&mut self, count: usize) -> Result<u16, MergeError> {
        let total = self.next + count;
        let too_many = MergeError::TooManyExperimentInfos {
            total: total.max(self.next + 1),
            limit: RUN_INDEX_LIMIT,
        };
        if total > RUN_INDEX_LIMIT {
            return Err(too_many);
        }
        let offset = u16::try_from(self.next).map_err(|_| too_many)?;
        self.next = total;
        Ok(offset)
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.next
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum MergeOutcome {
    Merged(Box<MergedWorkspace>),
    /// The inputs have more dimensions than any kernel handles.
    Skipped { n_dims: usize },
}

impl MergeOutcome {
    #[must_use]
    pub fn into_merged(self) -> Option<MergedWorkspace> {
        match self {
            Self::Merged(merged) => Some(*merged),
            Self::Skipped { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// A failed merge. When the merge was refused before it consumed anything,
/// the inputs it was handed by value come back in their original order.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct MergeFailure {
    pub error: MergeError,
    pub returned: Vec<EventWorkspace>,
}

impl MergeFailure {
    const fn refused(error: MergeError, returned: Vec<EventWorkspace>) -> Self {
        Self { error, returned }
    }

    const fn consumed(error: MergeError) -> Self {
        Self {
            error,
            returned: Vec::new(),
        }
    }
}

impl From<MergeFailure> for MergeError {
    fn from(failure: MergeFailure) -> Self {
        failure.error
    }
}

/// Merge `seed` and `others` into one workspace.
///
/// `seed` is consumed: when its extents and controller match the output,
/// its tree becomes the output tree without copying. The other inputs are
/// only read.
///
/// # Errors
///
/// Configuration errors are returned before any tree is modified, with
/// `seed` handed back in [`MergeFailure::returned`]; see [`plan_merge`].
/// [`MergeError::CorruptTree`] and [`MergeError::ShapeMismatch`] abort a
/// merge in progress.
#[instrument(skip_all, fields(seed = seed.name(), inputs = others.len() + 1))]
pub fn merge_workspaces(
    seed: EventWorkspace,
    others: &[&EventWorkspace],
    config: &MergeConfig,
    progress: &mut dyn ProgressSink,
) -> Result<MergeOutcome, MergeFailure> {
    if seed.n_dims() > MAX_DIMS {
        return Ok(skip(seed.n_dims(), progress));
    }
    let plan = match timing::timed("plan", || plan_merge(&seed, others, config)) {
        Ok(plan) => plan,
        Err(error) => return Err(MergeFailure::refused(error, vec![seed])),
    };
    run_planned(plan, seed, others, config, progress).map_err(MergeFailure::consumed)
}

/// [`merge_workspaces`] over an owned list whose first entry is the seed.
///
/// # Errors
///
/// [`MergeError::EmptyInput`] for an empty list. A configuration error
/// hands the whole list back; see [`merge_workspaces`] for the rest.
#[instrument(skip_all, fields(inputs = inputs.len()))]
pub fn merge_all(
    inputs: Vec<EventWorkspace>,
    config: &MergeConfig,
    progress: &mut dyn ProgressSink,
) -> Result<MergeOutcome, MergeFailure> {
    if inputs.is_empty() {
        return Err(MergeFailure::refused(MergeError::EmptyInput, inputs));
    }
    if inputs[0].n_dims() > MAX_DIMS {
        return Ok(skip(inputs[0].n_dims(), progress));
    }
    let planned = {
        let others: Vec<&EventWorkspace> = inputs[1..].iter().collect();
        timing::timed("plan", || plan_merge(&inputs[0], &others, config))
    };
    let plan = match planned {
        Ok(plan) => plan,
        Err(error) => return Err(MergeFailure::refused(error, inputs)),
    };

    let mut inputs = inputs.into_iter();
    let Some(seed) = inputs.next() else {
        return Err(MergeFailure::consumed(MergeError::EmptyInput));
    };
    let rest: Vec<EventWorkspace> = inputs.collect();
    let others: Vec<&EventWorkspace> = rest.iter().collect();
    run_planned(plan, seed, &others, config, progress).map_err(MergeFailure::consumed)
}

/// Merge workspaces of `repo` by name, group names expanding to their
/// members. Every input is validated before the first one is taken out of
/// the repository; the others stay in place.
///
/// # Errors
///
/// Name resolution errors (see [`WorkspaceRepository::resolve_names`]) and
/// everything [`merge_workspaces`] reports.
pub fn merge_named<R: WorkspaceRepository + ?Sized>(
    repo: &mut R,
    names: &[String],
    config: &MergeConfig,
    progress: &mut dyn ProgressSink,
) -> Result<MergeOutcome, MergeError> {
    let names = repo.resolve_names(names)?;
    let (first, rest) = names.split_first().ok_or(MergeError::EmptyInput)?;

    let plan = {
        let seed = lookup(repo, first)?;
        if seed.n_dims() > MAX_DIMS {
            return Ok(skip(seed.n_dims(), progress));
        }
        let others = rest
            .iter()
            .map(|name| lookup(repo, name))
            .collect::<Result<Vec<_>, _>>()?;
        timing::timed("plan", || plan_merge(seed, &others, config))?
    };

    let seed = repo
        .take(first)
        .ok_or_else(|| MergeError::UnknownWorkspace(first.clone()))?;
    let others = rest
        .iter()
        .map(|name| lookup(repo, name))
        .collect::<Result<Vec<_>, _>>()?;
    run_planned(plan, seed, &others, config, progress)
}

fn run_planned(
    plan: MergePlan,
    seed: EventWorkspace,
    others: &[&EventWorkspace],
    config: &MergeConfig,
    progress: &mut dyn ProgressSink,
) -> Result<MergeOutcome, MergeError> {
    let merged = dispatch::run(plan, seed, others, config, progress)?;
    info!(
        events = merged.report().events_out,
        boxes = merged.report().boxes,
        bad_events = merged.bad_events(),
        "merge complete"
    );
    Ok(MergeOutcome::Merged(Box::new(merged)))
}

fn skip(n_dims: usize, progress: &mut dyn ProgressSink) -> MergeOutcome {
    warn!(n_dims, max = MAX_DIMS, "no result, skipping");
    progress.warn(&format!("{n_dims}-dimensional input: no result, skipping"));
    MergeOutcome::Skipped { n_dims }
}

fn lookup<'r, R: WorkspaceRepository + ?Sized>(
    repo: &'r R,
    name: &str,
) -> Result<&'r EventWorkspace, MergeError> {
    repo.get(name)
        .ok_or_else(|| MergeError::UnknownWorkspace(name.to_string()))
}
