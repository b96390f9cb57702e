//! Recipes for synthetic event workspaces and merge scenarios.
//!
//! A [`Scenario`] is a TOML document with an optional `[merge]` table
//! (a [`MergeConfig`]) and one `[[workspace]]` table per input:
//!
//! ```toml
//! [merge]
//! merge_type = "indexed"
//!
//! [[workspace]]
//! name = "run_1"
//! dims = 3
//! events = 5000
//! experiment_infos = 2
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use mdmerge_core::tree::BoxController;
use mdmerge_core::workspace::WorkspaceRepository;
use mdmerge_core::{
    Dimension, Event, EventBuffer, EventKind, EventWorkspace, ExperimentInfo, MergeConfig,
    WorkspaceStore,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rng::DeterministicRng;

const BATCH: usize = 4_096;

const AXIS_NAMES: [&str; 4] = ["Q_x", "Q_y", "Q_z", "DeltaE"];

/// Where generated events fall inside the extents.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Distribution {
    #[default]
    Uniform,
    /// Gaussian blob; `center` and `spread` are fractions of each extent.
    Cluster { center: Vec<f32>, spread: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceRecipe {
    pub name: String,
    pub dims: usize,
    pub kind: EventKind,
    pub events: usize,
    /// One factor per dimension, or a single factor for all of them.
    pub split_into: Vec<usize>,
    pub split_threshold: usize,
    pub max_depth: u32,
    /// Range of every dimension without an entry in `extents`.
    pub range: [f32; 2],
    pub extents: Vec<[f32; 2]>,
    pub experiment_infos: usize,
    pub seed: u64,
    /// Root children to mask after filling.
    pub masked: Vec<usize>,
    pub distribution: Distribution,
    pub signal: f32,
    pub error_sq: f32,
}

impl Default for WorkspaceRecipe {
    fn default() -> Self {
        Self {
            name: "ws".to_string(),
            dims: 3,
            kind: EventKind::Lean,
            events: 1_000,
            split_into: vec![2],
            split_threshold: 100,
            max_depth: 5,
            range: [-10.0, 10.0],
            extents: Vec::new(),
            experiment_infos: 0,
            seed: 0,
            masked: Vec::new(),
            distribution: Distribution::Uniform,
            signal: 1.0,
            error_sq: 1.0,
        }
    }
}

impl WorkspaceRecipe {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: usize) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Axis names shared by every recipe of the same dimensionality.
    #[must_use]
    pub fn dimension_names(dims: usize) -> Vec<String> {
        (0..dims)
            .map(|d| {
                AXIS_NAMES
                    .get(d)
                    .map_or_else(|| format!("D{d}"), ToString::to_string)
            })
            .collect()
    }

    fn controller(&self) -> Result<BoxController> {
        let split_into = match self.split_into.as_slice() {
            [single] => vec![*single; self.dims],
            factors => factors.to_vec(),
        };
        BoxController::new(self.dims, self.max_depth, self.split_threshold, split_into)
            .with_context(|| format!("workspace {}: bad box controller", self.name))
    }

    fn dimensions(&self) -> Vec<Dimension> {
        Self::dimension_names(self.dims)
            .into_iter()
            .enumerate()
            .map(|(d, name)| {
                let [min, max] = self.extents.get(d).copied().unwrap_or(self.range);
                Dimension::new(name, "", min, max)
            })
            .collect()
    }

    /// Generate the workspace. The same recipe always yields the same
    /// events in the same order.
    ///
    /// # Errors
    ///
    /// Fails on an invalid controller or extents, or a masked child index
    /// out of range.
    pub fn build(&self) -> Result<EventWorkspace> {
        let dimensions = self.dimensions();
        let extents: Vec<(f32, f32)> = dimensions.iter().map(|d| (d.min, d.max)).collect();
        let mut ws = EventWorkspace::new(&self.name, dimensions, self.controller()?, self.kind)
            .with_context(|| format!("workspace {}", self.name))?;

        for run in 0..self.experiment_infos {
            let mut info = ExperimentInfo::new(1_000 + run as u32, "SIM");
            info.logs.insert("source".to_string(), self.name.clone());
            ws.add_experiment_info(info);
        }

        let mut rng = DeterministicRng::new(self.seed);
        let mut coords = vec![0.0f32; self.dims];
        let mut remaining = self.events;
        while remaining > 0 {
            let n = remaining.min(BATCH);
            let mut batch = EventBuffer::with_capacity(self.dims, self.kind, n);
            for _ in 0..n {
                self.sample(&mut rng, &extents, &mut coords);
                let run = rng.next_bounded(self.experiment_infos as u64) as u16;
                let detector = rng.next_bounded(10_000) as u32;
                let event = Event::full(coords.clone(), self.signal, self.error_sq, run, detector);
                batch.push(event.view())?;
            }
            ws.add_events(&batch)
                .with_context(|| format!("workspace {}: inserting events", self.name))?;
            remaining -= n;
        }

        let children = ws.tree().node(ws.tree().root()).children().to_vec();
        for &child in &self.masked {
            let Some(&id) = children.get(child) else {
                bail!(
                    "workspace {}: cannot mask root child {child} of {}",
                    self.name,
                    children.len()
                );
            };
            ws.tree_mut().mask_box(id);
        }

        debug!(workspace = %self.name, events = self.events, "workspace generated");
        Ok(ws)
    }

    fn sample(&self, rng: &mut DeterministicRng, extents: &[(f32, f32)], out: &mut [f32]) {
        for (d, (&(min, max), x)) in extents.iter().zip(out.iter_mut()).enumerate() {
            *x = match &self.distribution {
                Distribution::Uniform => rng.next_in(min, max),
                Distribution::Cluster { center, spread } => {
                    let width = max - min;
                    let mid = center.get(d).copied().unwrap_or(0.5).mul_add(width, min);
                    let v = (rng.next_gaussian() * spread).mul_add(width, mid);
                    // keep every event inside the tree
                    v.clamp(min, max)
                }
            };
        }
    }
}

/// Merge settings plus the inputs to merge, in order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default, rename = "workspace")]
    pub workspaces: Vec<WorkspaceRecipe>,
}

impl Scenario {
    /// # Errors
    ///
    /// Fails on malformed TOML.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// # Errors
    ///
    /// Fails on the first recipe that cannot be built.
    pub fn build_workspaces(&self) -> Result<Vec<EventWorkspace>> {
        if self.workspaces.is_empty() {
            bail!("scenario has no [[workspace]] entries");
        }
        self.workspaces.iter().map(WorkspaceRecipe::build).collect()
    }

    /// Every workspace in a store, plus the group `all` holding them in
    /// scenario order.
    ///
    /// # Errors
    ///
    /// See [`Scenario::build_workspaces`].
    pub fn build_store(&self) -> Result<WorkspaceStore> {
        let mut store = WorkspaceStore::new();
        for ws in self.build_workspaces()? {
            store.insert(ws);
        }
        let names = self.workspaces.iter().map(|w| w.name.clone()).collect();
        store.add_group("all", names);
        Ok(store)
    }
}
