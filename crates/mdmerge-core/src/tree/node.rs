use serde::{Deserialize, Serialize};

use crate::event::EventBuffer;

/// Index of a box inside its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Closed interval covered by a box along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min: f32,
    pub max: f32,
}

impl Extent {
    #[must_use]
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn width(self) -> f32 {
        self.max - self.min
    }

    /// `min <= x <= max`; false for NaN.
    #[must_use]
    pub fn contains(self, x: f32) -> bool {
        x >= self.min && x <= self.max
    }

    /// Containment with a slack of `rel` widths on both sides, absorbing
    /// rounding at split boundaries.
    #[must_use]
    pub fn contains_within(self, x: f32, rel: f32) -> bool {
        let slack = self.width().abs() * rel;
        x >= self.min - slack && x <= self.max + slack
    }

    /// Sub-interval `k` of `parts` equal pieces.
    #[must_use]
    pub fn part(self, k: usize, parts: usize) -> Self {
        let min = f64::from(self.min);
        let width = f64::from(self.max) - min;
        let lo = min + width * k as f64 / parts as f64;
        let hi = if k + 1 == parts {
            f64::from(self.max)
        } else {
            min + width * (k + 1) as f64 / parts as f64
        };
        Self::new(lo as f32, hi as f32)
    }

    /// Which of `parts` pieces holds `x`; the upper bound belongs to the last
    /// piece.
    #[must_use]
    #[allow(clippy::cast_sign_loss)] // raw is positive on that branch
    pub fn slot(self, x: f32, parts: usize) -> usize {
        let width = f64::from(self.max) - f64::from(self.min);
        if width <= 0.0 {
            return 0;
        }
        let fraction = (f64::from(x) - f64::from(self.min)) / width;
        let raw = (fraction * parts as f64).floor();
        if raw <= 0.0 {
            0
        } else {
            (raw as usize).min(parts - 1)
        }
    }

    /// Smallest interval covering both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }
}

/// Aggregates cached on every box by [`super::BoxTree::refresh_cache`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoxStats {
    pub n_points: u64,
    pub signal: f64,
    pub error_sq: f64,
}

impl BoxStats {
    pub(crate) fn absorb(&mut self, other: Self) {
        self.n_points += other.n_points;
        self.signal += other.signal;
        self.error_sq += other.error_sq;
    }
}

/// Payload of a box: children or events, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxContent {
    Internal { children: Vec<NodeId> },
    Leaf { events: EventBuffer },
}

/// One box of the spatial partition.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxNode {
    pub(crate) extents: Vec<Extent>,
    pub(crate) depth: u32,
    pub(crate) masked: bool,
    pub(crate) content: BoxContent,
    pub(crate) stats: BoxStats,
}

impl BoxNode {
    pub(crate) fn leaf(
        extents: Vec<Extent>,
        depth: u32,
        masked: bool,
        events: EventBuffer,
    ) -> Self {
        Self {
            extents,
            depth,
            masked,
            content: BoxContent::Leaf { events },
            stats: BoxStats::default(),
        }
    }

    #[must_use]
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Masked boxes are excluded from collection and aggregation.
    #[must_use]
    pub const fn is_masked(&self) -> bool {
        self.masked
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self.content, BoxContent::Leaf { .. })
    }

    #[must_use]
    pub const fn content(&self) -> &BoxContent {
        &self.content
    }

    /// Child ids in storage order; empty for a leaf.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        match &self.content {
            BoxContent::Internal { children } => children,
            BoxContent::Leaf { .. } => &[],
        }
    }

    #[must_use]
    pub const fn events(&self) -> Option<&EventBuffer> {
        match &self.content {
            BoxContent::Leaf { events } => Some(events),
            BoxContent::Internal { .. } => None,
        }
    }

    /// Events stored directly in this box (0 for an internal box).
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.events().map_or(0, EventBuffer::len)
    }

    /// Cached aggregates; stale until the tree's cache is refreshed.
    #[must_use]
    pub const fn stats(&self) -> BoxStats {
        self.stats
    }

    #[must_use]
    pub fn contains(&self, coords: &[f32]) -> bool {
        coords.len() == self.extents.len()
            && self
                .extents
                .iter()
                .zip(coords)
                .all(|(extent, &x)| extent.contains(x))
    }

    /// Mixed-radix index of the child cell holding `coords`, dimension 0
    /// varying fastest.
    #[must_use]
    pub fn child_slot(&self, split_into: &[usize], coords: &[f32]) -> usize {
        let mut slot = 0;
        let mut stride = 1;
        for ((extent, &split), &x) in self.extents.iter().zip(split_into).zip(coords) {
            slot += extent.slot(x, split) * stride;
            stride *= split;
        }
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_tile_the_extent() {
        let extent = Extent::new(-1.0, 2.0);
        assert_eq!(extent.part(0, 3), Extent::new(-1.0, 0.0));
        assert_eq!(extent.part(2, 3), Extent::new(1.0, 2.0));
    }

    #[test]
    fn slot_clamps_upper_bound_into_last_piece() {
        let extent = Extent::new(0.0, 4.0);
        assert_eq!(extent.slot(0.0, 4), 0);
        assert_eq!(extent.slot(1.0, 4), 1);
        assert_eq!(extent.slot(3.99, 4), 3);
        assert_eq!(extent.slot(4.0, 4), 3);
    }

    #[test]
    fn contains_rejects_nan() {
        let extent = Extent::new(0.0, 1.0);
        assert!(!extent.contains(f32::NAN));
        assert!(extent.contains(1.0));
        assert!(!extent.contains(1.01));
        assert!(extent.contains_within(1.01, 0.05));
    }

    #[test]
    fn child_slot_is_mixed_radix_dim0_fastest() {
        let node = BoxNode::leaf(
            vec![Extent::new(0.0, 2.0), Extent::new(0.0, 3.0)],
            0,
            false,
            EventBuffer::new(2, crate::event::EventKind::Lean),
        );
        // x in cell 1 of 2, y in cell 2 of 3 -> 1 + 2 * 2
        assert_eq!(node.child_slot(&[2, 3], &[1.5, 2.5]), 5);
    }
}
