pub mod compare;
pub mod merge;
pub mod zorder;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use mdmerge_core::config::load_merge_config;
use mdmerge_core::{EventKind, MergeConfig, MergeType};
use mdmerge_sim::{Scenario, WorkspaceRecipe};
use tracing::debug;

/// Where the inputs come from: a scenario file, or identical generated
/// workspaces described on the command line.
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Scenario TOML with an optional `[merge]` table and `[[workspace]]` entries.
    #[arg(short, long, value_name = "PATH")]
    pub scenario: Option<PathBuf>,

    /// Number of generated inputs (ignored with --scenario).
    #[arg(long, default_value_t = 2, conflicts_with = "scenario")]
    pub inputs: usize,

    /// Dimensions of every generated input.
    #[arg(long, default_value_t = 3, conflicts_with = "scenario")]
    pub dims: usize,

    /// Events per generated input.
    #[arg(long, default_value_t = 1_000, conflicts_with = "scenario")]
    pub events: usize,

    /// Event representation of the generated inputs (`lean` or `full`).
    #[arg(long, default_value = "lean", conflicts_with = "scenario")]
    pub kind: EventKind,

    /// Experiment infos per generated input.
    #[arg(long, default_value_t = 0, conflicts_with = "scenario")]
    pub infos: usize,

    /// Base seed; input `i` uses `seed + i`.
    #[arg(long, default_value_t = 0, conflicts_with = "scenario")]
    pub seed: u64,

    /// Split factor of the generated trees, one for all dimensions or one
    /// per dimension.
    #[arg(long, value_delimiter = ',', default_value = "2", conflicts_with = "scenario")]
    pub split: Vec<usize>,

    /// Events a leaf may hold before it splits.
    #[arg(long, default_value_t = 100, conflicts_with = "scenario")]
    pub threshold: usize,

    #[arg(long, default_value_t = 5, conflicts_with = "scenario")]
    pub max_depth: u32,
}

impl InputArgs {
    pub fn scenario(&self) -> Result<Scenario> {
        if let Some(path) = &self.scenario {
            debug!(path = %path.display(), "loading scenario");
            return Scenario::load(path);
        }
        if self.inputs == 0 {
            bail!("--inputs must be at least 1");
        }
        let workspaces = (0..self.inputs)
            .map(|i| WorkspaceRecipe {
                dims: self.dims,
                kind: self.kind,
                events: self.events,
                experiment_infos: self.infos,
                split_into: self.split.clone(),
                split_threshold: self.threshold,
                max_depth: self.max_depth,
                ..WorkspaceRecipe::named(format!("ws{i}")).with_seed(self.seed + i as u64)
            })
            .collect();
        Ok(Scenario {
            merge: MergeConfig::default(),
            workspaces,
        })
    }
}

/// Merge settings layered as: scenario `[merge]` table, then `--config`,
/// then `MDMERGE_MERGE_TYPE`, then the flags below.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Merge configuration TOML; replaces the scenario's `[merge]` table.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Traverse input trees on the rayon pool while collecting events.
    #[arg(long)]
    pub parallel: bool,

    /// Name of the merged workspace.
    #[arg(long)]
    pub output_name: Option<String>,
}

impl ConfigArgs {
    pub fn resolve(&self, scenario: &Scenario, merge_type: Option<MergeType>) -> Result<MergeConfig> {
        let base = match &self.config {
            Some(path) => {
                if !path.exists() {
                    bail!("config file not found: {}", path.display());
                }
                load_merge_config(path)?
            }
            None => scenario.merge.clone(),
        };
        let mut config = base
            .apply_env()
            .context("Failed to apply merge configuration from the environment")?;
        if let Some(merge_type) = merge_type {
            config.merge_type = merge_type;
        }
        if self.parallel {
            config.parallel_collect = true;
        }
        if let Some(name) = &self.output_name {
            config.output_name.clone_from(name);
        }
        Ok(config)
    }
}
