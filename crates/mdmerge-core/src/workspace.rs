//! Event workspaces and the repository the merge reads them from.
//!
//! A workspace couples a [`BoxTree`] with the metadata a merge has to
//! reconcile: named dimensions and the experiment-info table that full events
//! point into.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::event::{EventBuffer, EventKind};
use crate::tree::{BoxController, BoxTree, Extent, InsertStats};

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// One axis of a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(default)]
    pub units: String,
    pub min: f32,
    pub max: f32,
}

impl Dimension {
    #[must_use]
    pub fn new(name: impl Into<String>, units: impl Into<String>, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            min,
            max,
        }
    }

    #[must_use]
    pub const fn extent(&self) -> Extent {
        Extent::new(self.min, self.max)
    }
}

/// Metadata of one experiment run. Full events refer to an entry by its
/// position in the owning workspace's table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExperimentInfo {
    pub run_number: u32,
    #[serde(default)]
    pub instrument: String,
    #[serde(default)]
    pub logs: BTreeMap<String, String>,
}

impl ExperimentInfo {
    #[must_use]
    pub fn new(run_number: u32, instrument: impl Into<String>) -> Self {
        Self {
            run_number,
            instrument: instrument.into(),
            logs: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EventWorkspace {
    name: String,
    dimensions: Vec<Dimension>,
    tree: BoxTree,
    experiment_infos: Vec<ExperimentInfo>,
}

impl EventWorkspace {
    /// Empty workspace whose tree spans the dimension ranges.
    ///
    /// # Errors
    ///
    /// [`MergeError::ShapeMismatch`] when the controller disagrees with the
    /// number of dimensions, [`MergeError::InvalidExtents`] for a bad range.
    pub fn new(
        name: impl Into<String>,
        dimensions: Vec<Dimension>,
        controller: BoxController,
        kind: EventKind,
    ) -> Result<Self, MergeError> {
        let extents = dimensions.iter().map(Dimension::extent).collect();
        let tree = BoxTree::new(controller, kind, extents)?;
        Ok(Self {
            name: name.into(),
            dimensions,
            tree,
            experiment_infos: Vec::new(),
        })
    }

    /// Wrap an existing tree.
    ///
    /// # Errors
    ///
    /// [`MergeError::ShapeMismatch`] when the tree has another
    /// dimensionality than `dimensions`.
    pub fn from_parts(
        name: impl Into<String>,
        dimensions: Vec<Dimension>,
        tree: BoxTree,
        experiment_infos: Vec<ExperimentInfo>,
    ) -> Result<Self, MergeError> {
        tree.check_dims(dimensions.len())?;
        Ok(Self {
            name: name.into(),
            dimensions,
            tree,
            experiment_infos,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    #[must_use]
    pub fn n_dims(&self) -> usize {
        self.dimensions.len()
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.tree.kind()
    }

    #[must_use]
    pub const fn tree(&self) -> &BoxTree {
        &self.tree
    }

    pub const fn tree_mut(&mut self) -> &mut BoxTree {
        &mut self.tree
    }

    #[must_use]
    pub const fn controller(&self) -> &BoxController {
        self.tree.controller()
    }

    #[must_use]
    pub fn experiment_infos(&self) -> &[ExperimentInfo] {
        &self.experiment_infos
    }

    pub fn add_experiment_info(&mut self, info: ExperimentInfo) -> usize {
        self.experiment_infos.push(info);
        self.experiment_infos.len() - 1
    }

    #[must_use]
    pub fn n_points(&self) -> u64 {
        self.tree.n_points()
    }

    /// Insert events as they are (no run-index shift) and split as needed.
    ///
    /// # Errors
    ///
    /// See [`BoxTree::add_events`].
    pub fn add_events(&mut self, events: &EventBuffer) -> Result<InsertStats, MergeError> {
        self.tree.add_events(events, 0)
    }

    #[must_use]
    pub fn into_parts(self) -> (String, Vec<Dimension>, BoxTree, Vec<ExperimentInfo>) {
        (self.name, self.dimensions, self.tree, self.experiment_infos)
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Named workspaces and groups, as seen by a merge.
///
/// A group name stands for its members, in order.
pub trait WorkspaceRepository {
    fn get(&self, name: &str) -> Option<&EventWorkspace>;

    /// Remove a workspace, handing ownership to the caller.
    fn take(&mut self, name: &str) -> Option<EventWorkspace>;

    /// Store `workspace` under its own name, returning any replaced entry.
    fn insert(&mut self, workspace: EventWorkspace) -> Option<EventWorkspace>;

    fn group_members(&self, name: &str) -> Option<&[String]>;

    /// Expand groups and check that every name exists exactly once.
    ///
    /// # Errors
    ///
    /// [`MergeError::EmptyInput`], [`MergeError::UnknownWorkspace`] or
    /// [`MergeError::DuplicateInput`].
    fn resolve_names(&self, names: &[String]) -> Result<Vec<String>, MergeError> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            match self.group_members(name) {
                Some(members) => resolved.extend(members.iter().cloned()),
                None => resolved.push(name.clone()),
            }
        }
        if resolved.is_empty() {
            return Err(MergeError::EmptyInput);
        }
        let mut seen = HashSet::with_capacity(resolved.len());
        for name in &resolved {
            if self.get(name).is_none() {
                return Err(MergeError::UnknownWorkspace(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(MergeError::DuplicateInput(name.clone()));
            }
        }
        Ok(resolved)
    }
}

/// In-memory [`WorkspaceRepository`].
#[derive(Debug, Default)]
pub struct WorkspaceStore {
    workspaces: HashMap<String, EventWorkspace>,
    groups: HashMap<String, Vec<String>>,
}

impl WorkspaceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, name: impl Into<String>, members: Vec<String>) {
        self.groups.insert(name.into(), members);
    }

    /// Workspace names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workspaces.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}

impl WorkspaceRepository for WorkspaceStore {
    fn get(&self, name: &str) -> Option<&EventWorkspace> {
        self.workspaces.get(name)
    }

    fn take(&mut self, name: &str) -> Option<EventWorkspace> {
        self.workspaces.remove(name)
    }

    fn insert(&mut self, workspace: EventWorkspace) -> Option<EventWorkspace> {
        self.workspaces.insert(workspace.name.clone(), workspace)
    }

    fn group_members(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(name: &str) -> EventWorkspace {
        EventWorkspace::new(
            name,
            vec![
                Dimension::new("Q_x", "1/A", -5.0, 5.0),
                Dimension::new("Q_y", "1/A", -5.0, 5.0),
            ],
            BoxController::uniform(2, 2, 2, 50).expect("controller"),
            EventKind::Full,
        )
        .expect("workspace")
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn store() -> WorkspaceStore {
        let mut store = WorkspaceStore::new();
        for name in ["run_1", "run_2", "run_3"] {
            store.insert(workspace(name));
        }
        store.add_group("batch", names(&["run_2", "run_3"]));
        store
    }

    #[test]
    fn new_workspace_spans_its_dimensions() {
        let ws = workspace("w");
        assert_eq!(ws.tree().extents()[0], Extent::new(-5.0, 5.0));
        assert_eq!(ws.n_dims(), 2);
        assert_eq!(ws.kind(), EventKind::Full);
        assert_eq!(ws.n_points(), 0);
    }

    #[test]
    fn experiment_infos_are_indexed_in_order() {
        let mut ws = workspace("w");
        assert_eq!(ws.add_experiment_info(ExperimentInfo::new(101, "TOPAZ")), 0);
        assert_eq!(ws.add_experiment_info(ExperimentInfo::new(102, "TOPAZ")), 1);
        assert_eq!(ws.experiment_infos()[1].run_number, 102);
    }

    #[test]
    fn from_parts_checks_dimensionality() {
        let (name, mut dims, tree, infos) = workspace("w").into_parts();
        dims.pop();
        let err = EventWorkspace::from_parts(name, dims, tree, infos).expect_err("1 dim, 2-d tree");
        assert!(matches!(err, MergeError::ShapeMismatch { .. }));
    }

    #[test]
    fn groups_expand_in_order() {
        let store = store();
        let resolved = store
            .resolve_names(&names(&["run_1", "batch"]))
            .expect("resolved");
        assert_eq!(resolved, names(&["run_1", "run_2", "run_3"]));
    }

    #[test]
    fn duplicates_and_unknown_names_are_rejected() {
        let store = store();
        assert_eq!(
            store.resolve_names(&names(&["run_2", "batch"])),
            Err(MergeError::DuplicateInput("run_2".to_string()))
        );
        assert_eq!(
            store.resolve_names(&names(&["run_9"])),
            Err(MergeError::UnknownWorkspace("run_9".to_string()))
        );
        assert_eq!(store.resolve_names(&[]), Err(MergeError::EmptyInput));
    }

    #[test]
    fn take_moves_the_workspace_out() {
        let mut store = store();
        let ws = store.take("run_1").expect("present");
        assert_eq!(ws.name(), "run_1");
        assert!(store.get("run_1").is_none());
        assert_eq!(store.names(), vec!["run_2", "run_3"]);
    }
}
