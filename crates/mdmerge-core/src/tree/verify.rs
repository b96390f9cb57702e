use serde::Serialize;

use super::{BoxContent, BoxTree, NodeId};
use crate::error::MergeError;

/// Relative slack when checking that an event sits inside its leaf.
const STRAY_TOLERANCE: f32 = 1e-4;

/// Shape summary produced by [`BoxTree::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TreeCheck {
    pub boxes: usize,
    pub leaves: usize,
    pub internal: usize,
    pub max_depth_seen: u32,
    pub events: u64,
    /// Events stored in a leaf whose extents do not contain them.
    pub stray_events: u64,
}

impl BoxTree {
    /// Walk the whole arena and check its structure.
    ///
    /// # Errors
    ///
    /// [`MergeError::CorruptTree`] when a box has the wrong number of
    /// children, a child's depth or id does not follow its parent, a box is
    /// deeper than the controller allows, or a leaf buffer has another
    /// layout than the tree.
    pub fn verify(&self) -> Result<TreeCheck, MergeError> {
        let mut check = TreeCheck::default();
        let n_children = self.controller.children_per_split();
        let max_depth = self.controller.max_depth();

        for (index, node) in self.nodes.iter().enumerate() {
            check.boxes += 1;
            check.max_depth_seen = check.max_depth_seen.max(node.depth);
            if node.depth > max_depth {
                return Err(corrupt(index, format!(
                    "depth {} exceeds max depth {max_depth}",
                    node.depth
                )));
            }
            if node.extents.len() != self.n_dims() {
                return Err(corrupt(index, format!(
                    "{} extents in a {}-dimensional tree",
                    node.extents.len(),
                    self.n_dims()
                )));
            }

            match &node.content {
                BoxContent::Internal { children } => {
                    check.internal += 1;
                    if children.len() != n_children {
                        return Err(corrupt(index, format!(
                            "{} children, expected {n_children}",
                            children.len()
                        )));
                    }
                    for &child in children {
                        self.check_child(index, child)?;
                    }
                }
                BoxContent::Leaf { events } => {
                    check.leaves += 1;
                    if events.n_dims() != self.n_dims() || events.kind() != self.kind {
                        return Err(corrupt(index, format!(
                            "leaf buffer is {}-dimensional {}, tree is {}-dimensional {}",
                            events.n_dims(),
                            events.kind(),
                            self.n_dims(),
                            self.kind
                        )));
                    }
                    check.events += events.len() as u64;
                    check.stray_events += events
                        .iter()
                        .filter(|event| {
                            !node
                                .extents
                                .iter()
                                .zip(event.coords)
                                .all(|(extent, &x)| extent.contains_within(x, STRAY_TOLERANCE))
                        })
                        .count() as u64;
                }
            }
        }
        Ok(check)
    }

    fn check_child(&self, parent: usize, child: NodeId) -> Result<(), MergeError> {
        if child.index() <= parent {
            return Err(corrupt(parent, format!(
                "child {} does not follow its parent",
                child.index()
            )));
        }
        let Some(node) = self.get(child) else {
            return Err(corrupt(parent, format!("child {} is out of range", child.index())));
        };
        let expected = self.nodes[parent].depth + 1;
        if node.depth != expected {
            return Err(corrupt(child.index(), format!(
                "depth {} under a parent at depth {}",
                node.depth,
                expected - 1
            )));
        }
        Ok(())
    }
}

fn corrupt(index: usize, detail: String) -> MergeError {
    MergeError::CorruptTree(format!("box {index}: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventBuffer, EventKind};
    use crate::tree::{BoxController, Extent};

    fn tree() -> BoxTree {
        let controller = BoxController::uniform(2, 2, 3, 2).expect("controller");
        let mut tree = BoxTree::new(
            controller,
            EventKind::Lean,
            vec![Extent::new(0.0, 1.0), Extent::new(0.0, 1.0)],
        )
        .expect("tree");
        let mut batch = EventBuffer::new(2, EventKind::Lean);
        for i in 0..20 {
            let t = i as f32 / 20.0;
            batch.push(Event::lean(vec![t, t * t], 1.0, 1.0).view()).expect("event");
        }
        tree.add_events(&batch, 0).expect("batch");
        tree
    }

    #[test]
    fn consistent_tree_passes() {
        let tree = tree();
        let check = tree.verify().expect("consistent");
        assert_eq!(check.boxes, tree.n_boxes());
        assert_eq!(check.leaves + check.internal, check.boxes);
        assert_eq!(check.events, 20);
        assert_eq!(check.stray_events, 0);
        assert!(check.max_depth_seen <= 3);
    }

    #[test]
    fn misplaced_events_are_counted_as_strays() {
        let mut tree = tree();
        let first_leaf = tree.node(tree.root()).children()[0];
        let mut far = EventBuffer::new(2, EventKind::Lean);
        far.push(Event::lean(vec![0.9, 0.9], 1.0, 1.0).view()).expect("event");
        let leaf = tree
            .boxes_from(first_leaf, crate::tree::BoxFilter::leaves(), crate::tree::ChildOrder::Natural)
            .map(|(id, _)| id)
            .next()
            .expect("a leaf");
        tree.append_to_leaf(leaf, &far, 0).expect("leaf");
        assert_eq!(tree.verify().expect("structure intact").stray_events, 1);
    }

    #[test]
    fn broken_child_link_is_corrupt() {
        let mut tree = tree();
        if let BoxContent::Internal { children } = &mut tree.nodes[0].content {
            children.pop();
        }
        assert!(matches!(tree.verify(), Err(MergeError::CorruptTree(_))));
    }

    #[test]
    fn wrong_depth_is_corrupt() {
        let mut tree = tree();
        tree.nodes[1].depth = 2;
        assert!(matches!(tree.verify(), Err(MergeError::CorruptTree(_))));
    }
}
