use rayon::prelude::*;

use super::{BoxNode, BoxTree, NodeId};

/// Which boxes a traversal yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoxFilter {
    /// Yield only leaves, plus internal boxes cut off by `max_depth`.
    pub leaves_only: bool,
    /// Do not descend below this depth.
    pub max_depth: Option<u32>,
    /// Skip masked boxes together with their subtrees.
    pub skip_masked: bool,
}

impl BoxFilter {
    pub const ALL: Self = Self {
        leaves_only: false,
        max_depth: None,
        skip_masked: false,
    };

    #[must_use]
    pub const fn leaves() -> Self {
        Self {
            leaves_only: true,
            max_depth: None,
            skip_masked: false,
        }
    }

    /// Leaves that contribute events to a merge.
    #[must_use]
    pub const fn unmasked_leaves() -> Self {
        Self {
            leaves_only: true,
            max_depth: None,
            skip_masked: true,
        }
    }

    #[must_use]
    pub const fn to_depth(self, max_depth: u32) -> Self {
        Self {
            max_depth: Some(max_depth),
            ..self
        }
    }

    fn stops_at(self, depth: u32) -> bool {
        self.max_depth.is_some_and(|limit| depth >= limit)
    }
}

/// Order in which the children of every internal box are visited.
#[derive(Debug, Clone, Copy, Default)]
pub enum ChildOrder<'a> {
    /// Storage order (mixed radix, dimension 0 fastest).
    #[default]
    Natural,
    /// Visit `children[perm[0]]`, `children[perm[1]]`, ... A permutation of
    /// the wrong length is ignored for that box.
    Permuted(&'a [usize]),
}

impl ChildOrder<'_> {
    fn arrange(self, children: &[NodeId]) -> Vec<NodeId> {
        match self {
            ChildOrder::Permuted(perm) if perm.len() == children.len() => {
                perm.iter().map(|&slot| children[slot]).collect()
            }
            _ => children.to_vec(),
        }
    }
}

/// Lazy pre-order traversal over a [`BoxTree`].
///
/// Single pass: once exhausted it stays exhausted.
#[derive(Debug)]
pub struct Boxes<'a> {
    tree: &'a BoxTree,
    filter: BoxFilter,
    order: ChildOrder<'a>,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Boxes<'a> {
    type Item = (NodeId, &'a BoxNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let node = self.tree.node(id);
            if self.filter.skip_masked && node.is_masked() {
                continue;
            }
            let cut = self.filter.stops_at(node.depth());
            if !cut {
                let children = self.order.arrange(node.children());
                self.stack.extend(children.into_iter().rev());
            }
            if !self.filter.leaves_only || node.is_leaf() || cut {
                return Some((id, node));
            }
        }
        None
    }
}

impl BoxTree {
    /// Boxes matching `filter`, children visited in `order`.
    #[must_use]
    pub fn boxes<'a>(&'a self, filter: BoxFilter, order: ChildOrder<'a>) -> Boxes<'a> {
        self.boxes_from(self.root(), filter, order)
    }

    /// Same as [`BoxTree::boxes`] for the subtree rooted at `start`.
    #[must_use]
    pub fn boxes_from<'a>(
        &'a self,
        start: NodeId,
        filter: BoxFilter,
        order: ChildOrder<'a>,
    ) -> Boxes<'a> {
        Boxes {
            tree: self,
            filter,
            order,
            stack: vec![start],
        }
    }

    /// Ids yielded by [`BoxTree::boxes`], with the subtrees under the root
    /// walked on the rayon pool and joined in visiting order.
    #[must_use]
    pub fn par_leaves(&self, filter: BoxFilter, order: ChildOrder<'_>) -> Vec<NodeId> {
        let root = self.node(self.root());
        if (filter.skip_masked && root.is_masked()) || root.is_leaf() || filter.stops_at(0) {
            return self.boxes(filter, order).map(|(id, _)| id).collect();
        }

        let subtrees: Vec<Vec<NodeId>> = order
            .arrange(root.children())
            .into_par_iter()
            .map(|child| {
                self.boxes_from(child, filter, order)
                    .map(|(id, _)| id)
                    .collect()
            })
            .collect();

        let mut ids = Vec::with_capacity(subtrees.iter().map(Vec::len).sum::<usize>() + 1);
        if !filter.leaves_only {
            ids.push(self.root());
        }
        for subtree in subtrees {
            ids.extend(subtree);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventBuffer, EventKind};
    use crate::tree::{BoxController, Extent};

    fn quad_tree(max_depth: u32) -> BoxTree {
        let controller = BoxController::uniform(2, 2, max_depth, 1).expect("controller");
        BoxTree::new(
            controller,
            EventKind::Lean,
            vec![Extent::new(0.0, 1.0), Extent::new(0.0, 1.0)],
        )
        .expect("tree")
    }

    #[test]
    fn leaves_in_natural_order() {
        let tree = quad_tree(1);
        let ids: Vec<usize> = tree
            .boxes(BoxFilter::leaves(), ChildOrder::Natural)
            .map(|(id, _)| id.index())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn permuted_order_reorders_children() {
        let tree = quad_tree(1);
        let perm = [0, 2, 1, 3];
        let ids: Vec<usize> = tree
            .boxes(BoxFilter::leaves(), ChildOrder::Permuted(&perm))
            .map(|(id, _)| id.index())
            .collect();
        assert_eq!(ids, vec![1, 3, 2, 4]);
    }

    #[test]
    fn all_filter_yields_preorder() {
        let tree = quad_tree(1);
        let depths: Vec<u32> = tree
            .boxes(BoxFilter::ALL, ChildOrder::Natural)
            .map(|(_, node)| node.depth())
            .collect();
        assert_eq!(depths, vec![0, 1, 1, 1, 1]);
    }

    #[test]
    fn masked_subtrees_are_skipped() {
        let mut tree = quad_tree(1);
        let second = tree.node(tree.root()).children()[1];
        tree.mask_box(second);
        let count = tree.boxes(BoxFilter::unmasked_leaves(), ChildOrder::Natural).count();
        assert_eq!(count, 3);
        assert_eq!(tree.boxes(BoxFilter::leaves(), ChildOrder::Natural).count(), 4);
    }

    #[test]
    fn depth_limit_yields_cut_boxes_as_leaves() {
        let mut tree = quad_tree(3);
        let mut batch = EventBuffer::new(2, EventKind::Lean);
        batch.push(Event::lean(vec![0.1, 0.1], 1.0, 1.0).view()).expect("event");
        batch.push(Event::lean(vec![0.2, 0.2], 1.0, 1.0).view()).expect("event");
        tree.add_events(&batch, 0).expect("batch");

        let shallow: Vec<u32> = tree
            .boxes(BoxFilter::leaves().to_depth(1), ChildOrder::Natural)
            .map(|(_, node)| node.depth())
            .collect();
        assert_eq!(shallow, vec![1, 1, 1, 1]);
    }

    #[test]
    fn traversal_is_single_pass() {
        let tree = quad_tree(1);
        let mut boxes = tree.boxes(BoxFilter::leaves(), ChildOrder::Natural);
        assert_eq!(boxes.by_ref().count(), 4);
        assert!(boxes.next().is_none());
    }

    #[test]
    fn parallel_traversal_matches_sequential() {
        let mut tree = quad_tree(4);
        let mut batch = EventBuffer::new(2, EventKind::Lean);
        for i in 0..64 {
            let t = i as f32 / 64.0;
            batch.push(Event::lean(vec![t, (t * 7.0).fract()], 1.0, 1.0).view()).expect("event");
        }
        tree.add_events(&batch, 0).expect("batch");
        let perm = [3, 1, 2, 0];
        for filter in [BoxFilter::ALL, BoxFilter::leaves(), BoxFilter::leaves().to_depth(2)] {
            let sequential: Vec<NodeId> = tree
                .boxes(filter, ChildOrder::Permuted(&perm))
                .map(|(id, _)| id)
                .collect();
            assert_eq!(tree.par_leaves(filter, ChildOrder::Permuted(&perm)), sequential);
        }
    }
}
