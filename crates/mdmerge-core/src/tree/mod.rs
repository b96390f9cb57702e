//! Arena-backed N-dimensional box trees.
//!
//! Boxes live in one `Vec` and refer to their children by [`NodeId`]. A
//! child is always pushed after its parent, so every child id is greater
//! than its parent's id and bottom-up passes can walk the arena backwards.
//! Moving a [`BoxTree`] moves the whole arena; that is how a merge takes
//! ownership of its first input.

mod controller;
mod node;
mod traverse;
mod verify;

pub use controller::BoxController;
pub use node::{BoxContent, BoxNode, BoxStats, Extent, NodeId};
pub use traverse::{BoxFilter, Boxes, ChildOrder};
pub use verify::TreeCheck;

use std::mem;

use serde::Serialize;

use crate::error::MergeError;
use crate::event::{EventBuffer, EventKind, EventRef};

/// Outcome of inserting a batch of events by coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct InsertStats {
    pub inserted: u64,
    /// Events outside the root extents, or with NaN coordinates.
    pub rejected: u64,
}

impl InsertStats {
    pub fn absorb(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.rejected += other.rejected;
    }
}

/// A spatial partition of N-dimensional events.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxTree {
    controller: BoxController,
    kind: EventKind,
    nodes: Vec<BoxNode>,
}

const ROOT: NodeId = NodeId(0);

impl BoxTree {
    /// Empty tree over `extents`. The root is split into its first grid
    /// level right away unless `max_depth` is 0.
    ///
    /// # Errors
    ///
    /// [`MergeError::ShapeMismatch`] when the number of extents differs from
    /// the controller's dimensionality and [`MergeError::InvalidExtents`] for
    /// non-finite or empty intervals.
    pub fn new(
        controller: BoxController,
        kind: EventKind,
        extents: Vec<Extent>,
    ) -> Result<Self, MergeError> {
        if extents.len() != controller.n_dims() {
            return Err(MergeError::ShapeMismatch {
                expected: controller.n_dims(),
                actual: extents.len(),
            });
        }
        for (dim, extent) in extents.iter().enumerate() {
            if !extent.min.is_finite() || !extent.max.is_finite() || extent.min >= extent.max {
                return Err(MergeError::InvalidExtents {
                    dim,
                    min: extent.min,
                    max: extent.max,
                });
            }
        }

        let nd = controller.n_dims();
        let root = BoxNode::leaf(extents, 0, false, EventBuffer::new(nd, kind));
        let mut tree = Self {
            controller,
            kind,
            nodes: vec![root],
        };
        if tree.controller.max_depth() >= 1 {
            tree.split_box(ROOT);
        }
        Ok(tree)
    }

    #[must_use]
    pub const fn controller(&self) -> &BoxController {
        &self.controller
    }

    #[must_use]
    pub const fn n_dims(&self) -> usize {
        self.controller.n_dims()
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        ROOT
    }

    #[must_use]
    pub fn extents(&self) -> &[Extent] {
        self.node(ROOT).extents()
    }

    /// # Panics
    ///
    /// Panics when `id` was not issued by this tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &BoxNode {
        &self.nodes[id.index()]
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&BoxNode> {
        self.nodes.get(id.index())
    }

    /// Number of boxes, internal and leaf.
    #[must_use]
    pub fn n_boxes(&self) -> usize {
        self.nodes.len()
    }

    /// Events stored in the tree, masked boxes included.
    #[must_use]
    pub fn n_points(&self) -> u64 {
        self.nodes.iter().map(|node| node.n_events() as u64).sum()
    }

    /// Aggregates of the root as of the last [`BoxTree::refresh_cache`].
    #[must_use]
    pub fn root_stats(&self) -> BoxStats {
        self.node(ROOT).stats()
    }

    /// Fail fast when the tree does not hold `expected`-dimensional data.
    ///
    /// # Errors
    ///
    /// [`MergeError::ShapeMismatch`].
    pub fn check_dims(&self, expected: usize) -> Result<(), MergeError> {
        if self.n_dims() == expected {
            Ok(())
        } else {
            Err(MergeError::ShapeMismatch {
                expected,
                actual: self.n_dims(),
            })
        }
    }

    /// Deep copy owned by the caller.
    #[must_use]
    pub fn clone_boxes(&self) -> Self {
        self.clone()
    }

    /// Mask `id` and every box below it.
    pub fn mask_box(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let node = &mut self.nodes[next.index()];
            node.masked = true;
            stack.extend_from_slice(node.children());
        }
    }

    /// Empty every masked box and clear its mask, keeping the box layout.
    /// Returns the number of events removed.
    pub fn drop_masked(&mut self) -> u64 {
        let (nd, kind) = (self.n_dims(), self.kind);
        let mut dropped = 0;
        for node in self.nodes.iter_mut().filter(|node| node.masked) {
            node.masked = false;
            if let BoxContent::Leaf { events } = &mut node.content {
                dropped += events.len() as u64;
                *events = EventBuffer::new(nd, kind);
            }
        }
        dropped
    }

    /// Insert one event, descending from the root.
    ///
    /// Returns the receiving leaf, or `None` when the event lies outside the
    /// tree. No box is split here; see [`BoxTree::split_boxes_if_needed`].
    pub fn add_event(&mut self, event: EventRef<'_>) -> Option<NodeId> {
        self.add_event_from(ROOT, event)
    }

    /// Insert one event, descending from `start` instead of the root.
    ///
    /// Returns `None` when the event lies outside `start`.
    pub fn add_event_from(&mut self, start: NodeId, event: EventRef<'_>) -> Option<NodeId> {
        if event.coords.len() != self.n_dims() || !self.node(start).contains(event.coords) {
            return None;
        }
        let leaf = self.descend(start, event.coords);
        if let BoxContent::Leaf { events } = &mut self.nodes[leaf.index()].content {
            events.push_row(event);
        }
        Some(leaf)
    }

    fn descend(&self, start: NodeId, coords: &[f32]) -> NodeId {
        let split_into = self.controller.split_into_all();
        let mut id = start;
        loop {
            let node = self.node(id);
            match &node.content {
                BoxContent::Internal { children } => {
                    id = children[node.child_slot(split_into, coords)];
                }
                BoxContent::Leaf { .. } => return id,
            }
        }
    }

    /// Insert a batch with run indices shifted by `run_offset`, then split
    /// whatever became overfull.
    ///
    /// # Errors
    ///
    /// [`MergeError::ShapeMismatch`] and [`MergeError::EventKindMismatch`]
    /// for a buffer of another layout; [`MergeError::TooManyExperimentInfos`]
    /// when a shifted run index overflows.
    pub fn add_events(
        &mut self,
        events: &EventBuffer,
        run_offset: u16,
    ) -> Result<InsertStats, MergeError> {
        if events.n_dims() != self.n_dims() {
            return Err(MergeError::ShapeMismatch {
                expected: self.n_dims(),
                actual: events.n_dims(),
            });
        }
        if events.kind() != self.kind {
            return Err(MergeError::EventKindMismatch {
                workspace: String::from("<batch>"),
                expected: self.kind,
                actual: events.kind(),
            });
        }

        let mut stats = InsertStats::default();
        let mut touched = Vec::new();
        for event in events.iter() {
            match self.add_event(event.rebased(run_offset)?) {
                Some(leaf) => {
                    stats.inserted += 1;
                    if touched.last() != Some(&leaf) {
                        touched.push(leaf);
                    }
                }
                None => stats.rejected += 1,
            }
        }
        touched.sort_unstable();
        touched.dedup();
        self.split_boxes_if_needed(touched);
        Ok(stats)
    }

    /// Append events straight into leaf `id`, without any coordinate search.
    ///
    /// # Errors
    ///
    /// [`MergeError::CorruptTree`] when `id` is not a leaf, plus the errors
    /// of [`EventBuffer::append_rebased`].
    pub(crate) fn append_to_leaf(
        &mut self,
        id: NodeId,
        events: &EventBuffer,
        run_offset: u16,
    ) -> Result<(), MergeError> {
        match &mut self.nodes[id.index()].content {
            BoxContent::Leaf { events: target } => target.append_rebased(events, run_offset),
            BoxContent::Internal { .. } => Err(MergeError::CorruptTree(format!(
                "box {} is not a leaf",
                id.index()
            ))),
        }
    }

    /// Split every overfull leaf, recursively. Returns the number of splits.
    pub fn split_all_if_needed(&mut self) -> usize {
        let leaves: Vec<NodeId> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].is_leaf())
            .map(|i| NodeId(i as u32))
            .collect();
        self.split_boxes_if_needed(leaves)
    }

    /// Split the overfull leaves among `candidates`, then their overfull
    /// children. Returns the number of splits.
    pub fn split_boxes_if_needed(&mut self, candidates: impl IntoIterator<Item = NodeId>) -> usize {
        let mut work: Vec<NodeId> = candidates.into_iter().collect();
        let mut splits = 0;
        while let Some(id) = work.pop() {
            let node = self.node(id);
            if !node.is_leaf() || !self.controller.should_split(node.n_events(), node.depth) {
                continue;
            }
            self.split_box(id);
            splits += 1;
            work.extend_from_slice(self.node(id).children());
        }
        splits
    }

    /// Turn leaf `id` into a grid of child leaves and hand its events down.
    fn split_box(&mut self, id: NodeId) {
        if !self.node(id).is_leaf() {
            return;
        }
        let split_into = self.controller.split_into_all().to_vec();
        let n_children = self.controller.children_per_split();
        let nd = self.n_dims();

        let node = &mut self.nodes[id.index()];
        let BoxContent::Leaf { events } = mem::replace(
            &mut node.content,
            BoxContent::Internal {
                children: Vec::new(),
            },
        ) else {
            return;
        };
        let parent = node.clone();

        let buckets = events.distribute(n_children, |coords| parent.child_slot(&split_into, coords));

        let first = self.nodes.len();
        for (cell, bucket) in buckets.into_iter().enumerate() {
            let mut rest = cell;
            let extents = parent
                .extents
                .iter()
                .zip(&split_into)
                .map(|(extent, &split)| {
                    let k = rest % split;
                    rest /= split;
                    extent.part(k, split)
                })
                .collect::<Vec<_>>();
            debug_assert_eq!(extents.len(), nd);
            self.nodes
                .push(BoxNode::leaf(extents, parent.depth + 1, parent.masked, bucket));
        }
        let children = (first..first + n_children).map(|i| NodeId(i as u32)).collect();
        self.nodes[id.index()].content = BoxContent::Internal { children };
    }

    /// Recompute cached point counts and signal/error sums, bottom-up.
    ///
    /// Masked boxes keep their point count but add no signal or error.
    pub fn refresh_cache(&mut self) {
        for index in (0..self.nodes.len()).rev() {
            let node = &self.nodes[index];
            let mut stats = match &node.content {
                BoxContent::Leaf { events } => BoxStats {
                    n_points: events.len() as u64,
                    signal: events.signal_sum(),
                    error_sq: events.error_sq_sum(),
                },
                BoxContent::Internal { children } => {
                    let mut acc = BoxStats::default();
                    for child in children {
                        acc.absorb(self.nodes[child.index()].stats);
                    }
                    acc
                }
            };
            if node.masked {
                stats.signal = 0.0;
                stats.error_sq = 0.0;
            }
            self.nodes[index].stats = stats;
        }
    }
}
