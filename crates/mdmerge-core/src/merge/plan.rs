//! Input validation and the choice of engine for every input.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use super::RunOffsets;
use crate::config::{MergeConfig, MergeType};
use crate::error::MergeError;
use crate::event::EventKind;
use crate::tree::{BoxController, Extent};
use crate::workspace::EventWorkspace;
use crate::MIN_DIMS;

/// What happens to each input. Inputs are numbered from 0 (the seed) in
/// the order they were given.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergePlan {
    pub n_dims: usize,
    pub kind: EventKind,
    pub merge_type: MergeType,
    /// Splitting policy of the output tree.
    pub controller: BoxController,
    /// Union of all input extents.
    pub extents: Vec<Extent>,
    /// The seed's tree becomes the output tree as is.
    pub splice_seed: bool,
    /// Inputs merged box by box into the spliced seed.
    pub indexed: Vec<usize>,
    /// Inputs inserted event by event, after the indexed ones.
    pub inserted: Vec<usize>,
    /// Run-index shift of every input.
    pub run_offsets: Vec<u16>,
    pub total_experiment_infos: usize,
}

impl MergePlan {
    #[must_use]
    pub fn n_inputs(&self) -> usize {
        self.run_offsets.len()
    }
}

/// Validate the inputs and decide how each one is merged.
///
/// # Errors
///
/// Any configuration error: too few dimensions, inputs disagreeing on
/// dimensions or event kind, repeated names, an invalid controller override
/// or more experiment infos than run indices can address.
pub fn plan_merge(
    seed: &EventWorkspace,
    others: &[&EventWorkspace],
    config: &MergeConfig,
) -> Result<MergePlan, MergeError> {
    let n_dims = seed.n_dims();
    if n_dims < MIN_DIMS {
        return Err(MergeError::TooFewDimensions { n_dims });
    }
    validate_inputs(seed, others)?;

    let controller = config.box_controller.apply(seed.controller())?;
    let extents = union_extents(seed, others);
    let splice_seed =
        extents.as_slice() == seed.tree().extents() && controller == *seed.controller();

    let mut offsets = RunOffsets::default();
    let run_offsets = std::iter::once(seed)
        .chain(others.iter().copied())
        .map(|ws| offsets.reserve(ws.experiment_infos().len()))
        .collect::<Result<Vec<_>, _>>()?;

    let run_len = match config.merge_type {
        MergeType::Indexed if splice_seed => others
            .iter()
            .take_while(|ws| ws.controller().is_compatible(&controller))
            .count(),
        MergeType::Indexed => {
            debug!(
                seed = seed.name(),
                "seed extents or controller differ from the output; indexed merge falls back to insertion"
            );
            0
        }
        MergeType::Default => 0,
    };

    let mut indexed = Vec::new();
    let mut inserted = Vec::new();
    if !splice_seed {
        inserted.push(0);
    }
    for (i, ws) in others.iter().enumerate() {
        if i < run_len && ws.tree().extents() == extents.as_slice() {
            indexed.push(i + 1);
        } else {
            if i < run_len {
                debug!(workspace = ws.name(), "extents differ from the output; inserting events");
            }
            inserted.push(i + 1);
        }
    }

    debug!(
        merge_type = %config.merge_type,
        splice_seed,
        indexed = indexed.len(),
        inserted = inserted.len(),
        "merge planned"
    );

    Ok(MergePlan {
        n_dims,
        kind: seed.kind(),
        merge_type: config.merge_type,
        controller,
        extents,
        splice_seed,
        indexed,
        inserted,
        run_offsets,
        total_experiment_infos: offsets.total(),
    })
}

fn validate_inputs(seed: &EventWorkspace, others: &[&EventWorkspace]) -> Result<(), MergeError> {
    let mut names = HashSet::with_capacity(others.len() + 1);
    names.insert(seed.name());
    for ws in others {
        if !names.insert(ws.name()) {
            return Err(MergeError::DuplicateInput(ws.name().to_string()));
        }
        if ws.n_dims() != seed.n_dims() {
            return Err(MergeError::DimensionCountMismatch {
                workspace: ws.name().to_string(),
                expected: seed.n_dims(),
                actual: ws.n_dims(),
            });
        }
        for (index, (expected, actual)) in seed.dimensions().iter().zip(ws.dimensions()).enumerate()
        {
            if expected.name != actual.name {
                return Err(MergeError::DimensionNameMismatch {
                    workspace: ws.name().to_string(),
                    index,
                    expected: expected.name.clone(),
                    actual: actual.name.clone(),
                });
            }
        }
        if ws.kind() != seed.kind() {
            return Err(MergeError::EventKindMismatch {
                workspace: ws.name().to_string(),
                expected: seed.kind(),
                actual: ws.kind(),
            });
        }
    }
    Ok(())
}

fn union_extents(seed: &EventWorkspace, others: &[&EventWorkspace]) -> Vec<Extent> {
    let mut extents = seed.tree().extents().to_vec();
    for ws in others {
        for (acc, &extent) in extents.iter_mut().zip(ws.tree().extents()) {
            *acc = acc.union(extent);
        }
    }
    extents
}
