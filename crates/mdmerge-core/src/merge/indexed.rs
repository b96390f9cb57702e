//! Box-by-box merge of trees that share a controller and extents.
//!
//! Both trees are walked together, children in Z order, so that boxes at
//! the same grid address cover the same region. Leaf contents are
//! concatenated without re-checking coordinates; events that do not belong
//! to their leaf show up as strays when the output is verified.

use serde::Serialize;
use tracing::{debug, instrument};

use crate::collect::collect_subtree;
use crate::error::MergeError;
use crate::tree::{BoxContent, BoxTree, ChildOrder, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexedStats {
    /// Events moved into the output.
    pub appended: u64,
    /// Events the output box at the same address did not contain.
    pub rejected: u64,
    pub touched_leaves: u64,
    pub splits: u64,
}

impl IndexedStats {
    pub fn absorb(&mut self, other: Self) {
        self.appended += other.appended;
        self.rejected += other.rejected;
        self.touched_leaves += other.touched_leaves;
        self.splits += other.splits;
    }
}

/// Merge `src` into `out` at matching grid addresses, shifting run indices
/// by `run_offset`. `perm` is the Z-order permutation of one split.
///
/// # Errors
///
/// [`MergeError::CorruptTree`] when the trees do not share a controller and
/// extents, or a box pair disagrees on its number of children.
/// [`MergeError::TooManyExperimentInfos`] when a shifted run index overflows.
#[instrument(level = "debug", skip_all, fields(events = src.n_points(), run_offset = run_offset))]
pub(super) fn merge_same_position(
    out: &mut BoxTree,
    src: &BoxTree,
    run_offset: u16,
    perm: &[usize],
) -> Result<IndexedStats, MergeError> {
    if !out.controller().is_compatible(src.controller()) || out.extents() != src.extents() {
        return Err(MergeError::CorruptTree(
            "indexed merge of trees with different structure".to_string(),
        ));
    }

    let mut stats = IndexedStats::default();
    let mut touched: Vec<NodeId> = Vec::new();
    let mut stack = vec![(out.root(), src.root())];

    while let Some((out_id, src_id)) = stack.pop() {
        let src_node = src.node(src_id);
        if src_node.is_masked() {
            continue;
        }
        let out_is_leaf = out.node(out_id).is_leaf();
        match (out_is_leaf, src_node.content()) {
            (true, BoxContent::Leaf { events }) => {
                if events.is_empty() {
                    continue;
                }
                out.append_to_leaf(out_id, events, run_offset)?;
                stats.appended += events.len() as u64;
                touched.push(out_id);
            }
            (true, BoxContent::Internal { .. }) => {
                let events = collect_subtree(src, src_id, ChildOrder::Permuted(perm))?;
                if events.is_empty() {
                    continue;
                }
                out.append_to_leaf(out_id, &events, run_offset)?;
                stats.appended += events.len() as u64;
                touched.push(out_id);
            }
            (false, BoxContent::Leaf { events }) => {
                for event in events.iter() {
                    match out.add_event_from(out_id, event.rebased(run_offset)?) {
                        Some(leaf) => {
                            stats.appended += 1;
                            touched.push(leaf);
                        }
                        None => stats.rejected += 1,
                    }
                }
            }
            (false, BoxContent::Internal { children: src_children }) => {
                let out_children = out.node(out_id).children();
                if out_children.len() != src_children.len() {
                    return Err(MergeError::CorruptTree(format!(
                        "box {} has {} children, source box {} has {}",
                        out_id.index(),
                        out_children.len(),
                        src_id.index(),
                        src_children.len()
                    )));
                }
                if perm.len() == src_children.len() {
                    for &slot in perm.iter().rev() {
                        stack.push((out_children[slot], src_children[slot]));
                    }
                } else {
                    let pairs = out_children.iter().copied().zip(src_children.iter().copied());
                    stack.extend(pairs.rev());
                }
            }
        }
    }

    touched.sort_unstable();
    touched.dedup();
    stats.touched_leaves = touched.len() as u64;
    stats.splits = out.split_boxes_if_needed(touched) as u64;
    debug!(
        appended = stats.appended,
        rejected = stats.rejected,
        splits = stats.splits,
        "same-position merge done"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventBuffer, EventKind};
    use crate::morton::z_permutation;
    use crate::tree::{BoxController, BoxFilter, Extent};

    fn tree() -> BoxTree {
        BoxTree::new(
            BoxController::uniform(2, 2, 4, 4).expect("controller"),
            EventKind::Full,
            vec![Extent::new(0.0, 1.0), Extent::new(0.0, 1.0)],
        )
        .expect("tree")
    }

    fn fill(tree: &mut BoxTree, points: &[(f32, f32)], run: u16) {
        let mut batch = EventBuffer::new(2, EventKind::Full);
        for &(x, y) in points {
            batch.push(Event::full(vec![x, y], 1.0, 0.25, run, 3).view()).expect("event");
        }
        tree.add_events(&batch, 0).expect("batch");
    }

    fn corner(n: usize, base: f32) -> Vec<(f32, f32)> {
        (0..n)
            .map(|i| (base + i as f32 * 0.004, base + i as f32 * 0.003))
            .collect()
    }

    fn perm() -> Vec<usize> {
        z_permutation(2, 2).expect("perm")
    }

    #[test]
    fn leaves_at_the_same_address_are_concatenated() {
        let mut out = tree();
        let mut src = tree();
        fill(&mut out, &[(0.1, 0.1), (0.9, 0.9)], 0);
        fill(&mut src, &[(0.2, 0.2), (0.8, 0.1)], 0);

        let stats = merge_same_position(&mut out, &src, 2, &perm()).expect("merge");
        assert_eq!(stats.appended, 2);
        assert_eq!(stats.rejected, 0);
        assert_eq!(out.n_points(), 4);
        let check = out.verify().expect("consistent");
        assert_eq!(check.stray_events, 0);

        let lower_left = out.node(out.root()).children()[0];
        let runs: Vec<u16> = out
            .node(lower_left)
            .events()
            .expect("leaf")
            .run_indices()
            .collect();
        assert_eq!(runs, vec![0, 2]);
    }

    #[test]
    fn deeper_source_subtree_is_collected_into_output_leaf() {
        let mut out = tree();
        let mut src = tree();
        fill(&mut out, &[(0.1, 0.1)], 0);
        fill(&mut src, &corner(12, 0.05), 1);
        assert!(!src.node(src.node(src.root()).children()[0]).is_leaf());

        let stats = merge_same_position(&mut out, &src, 0, &perm()).expect("merge");
        assert_eq!(stats.appended, 12);
        assert_eq!(out.n_points(), 13);
        // the receiving leaf was overfull and split
        assert!(stats.splits >= 1);
        assert_eq!(out.verify().expect("consistent").stray_events, 0);
    }

    #[test]
    fn source_leaf_descends_into_deeper_output() {
        let mut out = tree();
        let mut src = tree();
        fill(&mut out, &corner(12, 0.05), 0);
        fill(&mut src, &[(0.3, 0.2), (0.01, 0.01)], 0);

        let stats = merge_same_position(&mut out, &src, 0, &perm()).expect("merge");
        assert_eq!(stats.appended, 2);
        assert_eq!(out.n_points(), 14);
        assert_eq!(out.verify().expect("consistent").stray_events, 0);
    }

    #[test]
    fn masked_source_boxes_contribute_nothing() {
        let mut out = tree();
        let mut src = tree();
        fill(&mut src, &[(0.1, 0.1), (0.9, 0.9)], 0);
        let upper_right = src.node(src.root()).children()[3];
        src.mask_box(upper_right);

        let stats = merge_same_position(&mut out, &src, 0, &perm()).expect("merge");
        assert_eq!(stats.appended, 1);
        let total: usize = out
            .boxes(BoxFilter::leaves(), ChildOrder::Natural)
            .map(|(_, node)| node.n_events())
            .sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn different_structure_is_refused() {
        let mut out = tree();
        let src = BoxTree::new(
            BoxController::uniform(2, 3, 4, 4).expect("controller"),
            EventKind::Full,
            vec![Extent::new(0.0, 1.0), Extent::new(0.0, 1.0)],
        )
        .expect("tree");
        assert!(matches!(
            merge_same_position(&mut out, &src, 0, &perm()),
            Err(MergeError::CorruptTree(_))
        ));
    }
}
