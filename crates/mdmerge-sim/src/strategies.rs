//! `proptest` strategies producing sets of mergeable recipes.

use std::ops::RangeInclusive;

use mdmerge_core::EventKind;
use proptest::prelude::*;

use crate::workload::WorkspaceRecipe;

pub fn arb_kind() -> impl Strategy<Value = EventKind> + Clone {
    prop_oneof![Just(EventKind::Lean), Just(EventKind::Full)]
}

/// 1 to `max_inputs` recipes of one kind, dimensionality and controller,
/// with distinct names and seeds. About a third of them mask one root child.
pub fn arb_compatible_set(
    dims: RangeInclusive<usize>,
    max_inputs: usize,
) -> impl Strategy<Value = Vec<WorkspaceRecipe>> {
    (
        dims,
        arb_kind(),
        2usize..=3,
        4usize..=48,
        1u32..=4,
        prop::collection::vec(
            (
                0usize..300,
                any::<u64>(),
                0usize..4,
                prop::option::weighted(0.3, 0usize..4),
            ),
            1..=max_inputs.max(1),
        ),
    )
        .prop_map(|(dims, kind, split, split_threshold, max_depth, inputs)| {
            inputs
                .into_iter()
                .enumerate()
                .map(|(i, (events, seed, experiment_infos, masked))| WorkspaceRecipe {
                    name: format!("ws{i}"),
                    dims,
                    kind,
                    events,
                    split_into: vec![split],
                    split_threshold,
                    max_depth,
                    range: [-1.0, 1.0],
                    experiment_infos,
                    seed,
                    // every root has at least 2x2 children
                    masked: masked.into_iter().collect(),
                    ..WorkspaceRecipe::default()
                })
                .collect()
        })
}

/// Like [`arb_compatible_set`], but each recipe may get its own split
/// factor and range.
pub fn arb_mixed_set(
    dims: RangeInclusive<usize>,
    max_inputs: usize,
) -> impl Strategy<Value = Vec<WorkspaceRecipe>> {
    (
        arb_compatible_set(dims, max_inputs),
        prop::collection::vec((2usize..=4, 1u8..=3), max_inputs.max(1)),
    )
        .prop_map(|(mut recipes, variations)| {
            for (recipe, (split, scale)) in recipes.iter_mut().zip(variations).skip(1) {
                recipe.split_into = vec![split];
                let half = f32::from(scale);
                recipe.range = [-half, half];
            }
            recipes
        })
}
