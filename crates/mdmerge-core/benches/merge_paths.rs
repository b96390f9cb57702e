use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};
use mdmerge_core::merge::NoProgress;
use mdmerge_core::morton::z_permutation;
use mdmerge_core::{EventKind, EventWorkspace, MergeConfig, MergeType, merge_all};
use mdmerge_sim::WorkspaceRecipe;

struct Tier {
    name: &'static str,
    dims: usize,
    inputs: usize,
    events: usize,
}

const TIERS: [Tier; 3] = [
    Tier {
        name: "3d_small",
        dims: 3,
        inputs: 4,
        events: 5_000,
    },
    Tier {
        name: "4d_medium",
        dims: 4,
        inputs: 4,
        events: 25_000,
    },
    Tier {
        name: "3d_wide",
        dims: 3,
        inputs: 16,
        events: 5_000,
    },
];

fn inputs_for(tier: &Tier) -> Vec<EventWorkspace> {
    (0..tier.inputs)
        .map(|i| {
            let mut recipe = WorkspaceRecipe::named(format!("{}_{i}", tier.name))
                .with_events(tier.events)
                .with_seed(0xB0C5 + i as u64);
            recipe.dims = tier.dims;
            recipe.kind = EventKind::Full;
            recipe.experiment_infos = 2;
            recipe.split_threshold = 500;
            recipe.max_depth = 6;
            recipe.build().expect("bench recipe builds")
        })
        .collect()
}

fn bench_merge_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge.paths");
    group.sample_size(20);

    for tier in &TIERS {
        let inputs = inputs_for(tier);
        group.throughput(Throughput::Elements((tier.inputs * tier.events) as u64));

        for merge_type in [MergeType::Default, MergeType::Indexed] {
            let config = MergeConfig::default().with_merge_type(merge_type);
            group.bench_with_input(
                BenchmarkId::new(merge_type.as_str(), tier.name),
                &inputs,
                |b, inputs| {
                    b.iter_batched(
                        || inputs.clone(),
                        |inputs| black_box(merge_all(inputs, &config, &mut NoProgress)),
                        BatchSize::LargeInput,
                    );
                },
            );
        }
    }

    group.finish();
}

fn bench_z_permutation(c: &mut Criterion) {
    let mut group = c.benchmark_group("morton.z_permutation");
    for (nd, split) in [(3, 2), (4, 4), (9, 2)] {
        group.bench_function(BenchmarkId::from_parameter(format!("{nd}d_x{split}")), |b| {
            b.iter(|| black_box(z_permutation(nd, split)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_merge_paths, bench_z_permutation);
criterion_main!(benches);
