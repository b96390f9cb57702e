use mdmerge_core::merge::plan_merge;
use mdmerge_core::{EventWorkspace, MergeConfig, MergeType};
use proptest::prelude::*;

use generators::*;

/// Tags of every input, shifted by the infos of the inputs before it.
fn expected_tags(inputs: &[EventWorkspace]) -> Vec<(u16, u32)> {
    let mut offset = 0u16;
    let mut tags = Vec::new();
    for ws in inputs {
        tags.extend(
            run_tags(ws)
                .into_iter()
                .map(|(run, detector)| (run + offset, detector)),
        );
        offset += ws.experiment_infos().len() as u16;
    }
    tags.sort_unstable();
    tags
}

proptest! {
    // Every case builds and merges several trees; keep the count modest.
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn both_paths_keep_every_event(recipes in arb_compatible_set(2..=4, 4)) {
        let inputs = build_all(&recipes);
        let points = live_points(&inputs);
        let (signal, error_sq) = live_sums(&inputs);

        let plain = merge_as(MergeType::Default, inputs.clone());
        let indexed = merge_as(MergeType::Indexed, inputs);

        for merged in [&plain, &indexed] {
            prop_assert_eq!(merged.report().events_out, points);
            prop_assert_eq!(merged.bad_events(), 0);
            prop_assert!(close(merged.report().signal, signal));
            prop_assert!(close(merged.report().error_sq, error_sq));
        }
        prop_assert_eq!(plain.experiment_infos(), indexed.experiment_infos());
    }

    #[test]
    fn run_indices_occupy_one_block_per_input(recipes in arb_compatible_set(2..=3, 4)) {
        let inputs = build_all(&recipes);
        let expected = expected_tags(&inputs);
        let infos: usize = inputs.iter().map(|ws| ws.experiment_infos().len()).sum();

        for merge_type in [MergeType::Default, MergeType::Indexed] {
            let merged = merge_as(merge_type, inputs.clone());
            prop_assert_eq!(merged.experiment_infos().len(), infos);
            prop_assert_eq!(run_tags(merged.workspace()), expected.clone());
        }
    }

    #[test]
    fn offsets_follow_the_running_total(recipes in arb_compatible_set(2..=3, 5)) {
        let inputs = build_all(&recipes);
        let (seed, rest) = inputs.split_first().expect("at least one input");
        let others: Vec<&EventWorkspace> = rest.iter().collect();
        let plan = plan_merge(seed, &others, &MergeConfig::default()).expect("plan");

        let mut running = 0usize;
        for (ws, &offset) in inputs.iter().zip(&plan.run_offsets) {
            prop_assert_eq!(usize::from(offset), running);
            running += ws.experiment_infos().len();
        }
        prop_assert_eq!(plan.total_experiment_infos, running);
    }

    #[test]
    fn mixed_controllers_fall_back_without_losing_events(recipes in arb_mixed_set(2..=3, 4)) {
        let inputs = build_all(&recipes);
        let points = live_points(&inputs);
        let (signal, _) = live_sums(&inputs);

        let plain = merge_as(MergeType::Default, inputs.clone());
        let indexed = merge_as(MergeType::Indexed, inputs);

        prop_assert_eq!(plain.workspace().n_points(), points);
        prop_assert_eq!(indexed.workspace().n_points(), points);
        prop_assert_eq!(indexed.bad_events(), 0);
        prop_assert!(close(plain.report().signal, signal));
        prop_assert!(close(indexed.report().signal, signal));
        // the output always spans every input
        for ws in build_all(&recipes) {
            for (out, dim) in indexed.workspace().dimensions().iter().zip(ws.dimensions()) {
                prop_assert!(out.min <= dim.min && out.max >= dim.max);
            }
        }
    }
}
