//! Kernel selection by dimensionality and event kind.
//!
//! Kernels are monomorphized over the event flavor only; the dimensionality
//! stays a runtime value inside the trees.

use tracing::debug;

use super::assemble::{self, Assembly};
use super::indexed::IndexedStats;
use super::plan::MergePlan;
use super::{ProgressSink, default, indexed};
use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::event::{EventBuffer, EventKind};
use crate::morton::ZOrderCache;
use crate::timing;
use crate::tree::{BoxTree, InsertStats};
use crate::workspace::EventWorkspace;
use crate::{MAX_DIMS, MIN_DIMS};

/// Compile-time event representation handled by a kernel.
pub(super) trait Flavor {
    const KIND: EventKind;

    /// Shift applied to the run indices of an input with `offset`.
    fn run_offset(offset: u16) -> u16;

    /// Rebase a collected batch in place before it is inserted.
    fn prepare(events: &mut EventBuffer, offset: u16) -> Result<(), MergeError> {
        events.rebase(Self::run_offset(offset))
    }
}

pub(super) struct Lean;

pub(super) struct Full;

impl Flavor for Lean {
    const KIND: EventKind = EventKind::Lean;

    fn run_offset(_offset: u16) -> u16 {
        0
    }

    fn prepare(_events: &mut EventBuffer, _offset: u16) -> Result<(), MergeError> {
        Ok(())
    }
}

impl Flavor for Full {
    const KIND: EventKind = EventKind::Full;

    fn run_offset(offset: u16) -> u16 {
        offset
    }
}

type Kernel = fn(
    MergePlan,
    EventWorkspace,
    &[&EventWorkspace],
    &MergeConfig,
    &mut dyn ProgressSink,
) -> Result<assemble::MergedWorkspace, MergeError>;

const KINDS: [Kernel; 2] = [run_merge::<Lean>, run_merge::<Full>];

static KERNELS: [[Kernel; 2]; MAX_DIMS - MIN_DIMS + 1] = [KINDS; MAX_DIMS - MIN_DIMS + 1];

fn kernel(n_dims: usize, kind: EventKind) -> Option<Kernel> {
    let row = KERNELS.get(n_dims.checked_sub(MIN_DIMS)?)?;
    Some(match kind {
        EventKind::Lean => row[0],
        EventKind::Full => row[1],
    })
}

pub(super) fn run(
    plan: MergePlan,
    seed: EventWorkspace,
    others: &[&EventWorkspace],
    config: &MergeConfig,
    progress: &mut dyn ProgressSink,
) -> Result<assemble::MergedWorkspace, MergeError> {
    let Some(kernel) = kernel(plan.n_dims, plan.kind) else {
        return Err(if plan.n_dims < MIN_DIMS {
            MergeError::TooFewDimensions {
                n_dims: plan.n_dims,
            }
        } else {
            MergeError::ShapeMismatch {
                expected: MAX_DIMS,
                actual: plan.n_dims,
            }
        });
    };
    debug!(n_dims = plan.n_dims, kind = %plan.kind, "kernel selected");
    kernel(plan, seed, others, config, progress)
}

fn run_merge<F: Flavor>(
    plan: MergePlan,
    seed: EventWorkspace,
    others: &[&EventWorkspace],
    config: &MergeConfig,
    progress: &mut dyn ProgressSink,
) -> Result<assemble::MergedWorkspace, MergeError> {
    if plan.kind != F::KIND {
        return Err(MergeError::EventKindMismatch {
            workspace: seed.name().to_string(),
            expected: F::KIND,
            actual: plan.kind,
        });
    }

    let n_inputs = plan.n_inputs() as f64;
    let (seed_name, seed_dims, seed_tree, mut infos) = seed.into_parts();
    for ws in others {
        infos.extend_from_slice(ws.experiment_infos());
    }

    // The seed's tree either becomes the output or is read like any input.
    // A spliced seed loses its masked events, as an inserted one would.
    let (mut out, unspliced_seed) = if plan.splice_seed {
        let mut tree = seed_tree;
        let dropped = tree.drop_masked();
        if dropped > 0 {
            debug!(dropped, seed = %seed_name, "masked events of the spliced seed removed");
        }
        (tree, None)
    } else {
        let fresh = BoxTree::new(plan.controller.clone(), plan.kind, plan.extents.clone())?;
        (fresh, Some(seed_tree))
    };
    let mut done = 0usize;
    if plan.splice_seed {
        done += 1;
        progress.report(done as f64 / n_inputs, &format!("spliced {seed_name}"));
    }

    let mut indexed_stats = IndexedStats::default();
    if !plan.indexed.is_empty() {
        let mut zorder = ZOrderCache::new();
        let perm = zorder.get(plan.controller.split_into_all())?;
        for &input in &plan.indexed {
            let offset = F::run_offset(plan.run_offsets[input]);
            let stats = timing::timed("indexed", || {
                let src = source(input, unspliced_seed.as_ref(), others)?;
                indexed::merge_same_position(&mut out, src, offset, &perm)
            })?;
            indexed_stats.absorb(stats);
            done += 1;
            progress.report(
                done as f64 / n_inputs,
                &format!("merged {} box by box", input_name(input, &seed_name, others)),
            );
        }
    }

    let mut insert_stats = InsertStats::default();
    for &input in &plan.inserted {
        let stats = timing::timed("insert", || {
            default::insert_tree::<F>(
                &mut out,
                source(input, unspliced_seed.as_ref(), others)?,
                plan.run_offsets[input],
                config.parallel_collect,
            )
        })?;
        insert_stats.absorb(stats);
        done += 1;
        progress.report(
            done as f64 / n_inputs,
            &format!("inserted {}", input_name(input, &seed_name, others)),
        );
    }

    timing::timed("finalize", || {
        assemble::finalize(
            Assembly {
                name: config.output_name.clone(),
                seed_dims,
                tree: out,
                experiment_infos: infos,
                plan,
                inserted: insert_stats,
                indexed: indexed_stats,
            },
            progress,
        )
    })
}

fn source<'a>(
    input: usize,
    unspliced_seed: Option<&'a BoxTree>,
    others: &[&'a EventWorkspace],
) -> Result<&'a BoxTree, MergeError> {
    match input {
        0 => unspliced_seed
            .ok_or_else(|| MergeError::CorruptTree("seed was spliced".to_string())),
        i => others
            .get(i - 1)
            .map(|ws| ws.tree())
            .ok_or_else(|| MergeError::CorruptTree(format!("no input #{i}"))),
    }
}

fn input_name<'a>(input: usize, seed_name: &'a str, others: &[&'a EventWorkspace]) -> &'a str {
    match input {
        0 => seed_name,
        i => others.get(i - 1).map_or("?", |ws| ws.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_supported_dimensions_only() {
        assert!(kernel(1, EventKind::Lean).is_none());
        for nd in MIN_DIMS..=MAX_DIMS {
            assert!(kernel(nd, EventKind::Lean).is_some());
            assert!(kernel(nd, EventKind::Full).is_some());
        }
        assert!(kernel(MAX_DIMS + 1, EventKind::Full).is_none());
    }

    #[test]
    fn lean_flavor_never_shifts() {
        assert_eq!(Lean::run_offset(7), 0);
        assert_eq!(Full::run_offset(7), 7);
    }
}
