//! Gathering the events of whole trees, or of subtrees, into one buffer.
//!
//! Leaves are visited in traversal order and masked boxes contribute
//! nothing, so the output order is deterministic for a given tree.

use crate::error::MergeError;
use crate::event::{EventBuffer, EventKind};
use crate::tree::{BoxFilter, BoxTree, ChildOrder, NodeId};
use crate::workspace::EventWorkspace;

/// Concatenate the unmasked events of `sources[i]` for each `i` in
/// `indices`, in that order.
///
/// # Errors
///
/// [`MergeError::EmptyInput`] for an empty selection,
/// [`MergeError::UnknownWorkspace`] for an index out of range, and
/// [`MergeError::DimensionCountMismatch`] or [`MergeError::EventKindMismatch`]
/// when the selected sources disagree with the first one.
pub fn collect_events(
    sources: &[&EventWorkspace],
    indices: &[usize],
) -> Result<EventBuffer, MergeError> {
    collect_selected(sources, indices, false)
}

/// [`collect_events`] with each tree traversed on the rayon pool.
///
/// # Errors
///
/// See [`collect_events`].
pub fn collect_events_par(
    sources: &[&EventWorkspace],
    indices: &[usize],
) -> Result<EventBuffer, MergeError> {
    collect_selected(sources, indices, true)
}

fn collect_selected(
    sources: &[&EventWorkspace],
    indices: &[usize],
    parallel: bool,
) -> Result<EventBuffer, MergeError> {
    let selected = select(sources, indices)?;
    let Some(first) = selected.first() else {
        return Err(MergeError::EmptyInput);
    };
    let (nd, kind) = (first.n_dims(), first.kind());
    for ws in &selected[1..] {
        check_layout(ws, nd, kind)?;
    }

    let total: u64 = selected.iter().map(|ws| ws.n_points()).sum();
    let mut out = EventBuffer::with_capacity(nd, kind, usize::try_from(total).unwrap_or(0));
    for ws in selected {
        append_tree(&mut out, ws.tree(), parallel)?;
    }
    Ok(out)
}

fn select<'a>(
    sources: &[&'a EventWorkspace],
    indices: &[usize],
) -> Result<Vec<&'a EventWorkspace>, MergeError> {
    indices
        .iter()
        .map(|&i| {
            sources
                .get(i)
                .copied()
                .ok_or_else(|| MergeError::UnknownWorkspace(format!("#{i}")))
        })
        .collect()
}

fn check_layout(ws: &EventWorkspace, nd: usize, kind: EventKind) -> Result<(), MergeError> {
    if ws.n_dims() != nd {
        return Err(MergeError::DimensionCountMismatch {
            workspace: ws.name().to_string(),
            expected: nd,
            actual: ws.n_dims(),
        });
    }
    if ws.kind() != kind {
        return Err(MergeError::EventKindMismatch {
            workspace: ws.name().to_string(),
            expected: kind,
            actual: ws.kind(),
        });
    }
    Ok(())
}

/// All unmasked events of `tree`.
///
/// # Errors
///
/// Only fails on a corrupt tree whose leaf buffers disagree with it.
pub fn collect_tree(tree: &BoxTree, parallel: bool) -> Result<EventBuffer, MergeError> {
    let capacity = usize::try_from(tree.n_points()).unwrap_or(0);
    let mut out = EventBuffer::with_capacity(tree.n_dims(), tree.kind(), capacity);
    append_tree(&mut out, tree, parallel)?;
    Ok(out)
}

fn append_tree(out: &mut EventBuffer, tree: &BoxTree, parallel: bool) -> Result<(), MergeError> {
    let filter = BoxFilter::unmasked_leaves();
    if parallel {
        for id in tree.par_leaves(filter, ChildOrder::Natural) {
            append_leaf(out, tree, id)?;
        }
    } else {
        for (id, _) in tree.boxes(filter, ChildOrder::Natural) {
            append_leaf(out, tree, id)?;
        }
    }
    Ok(())
}

fn append_leaf(out: &mut EventBuffer, tree: &BoxTree, id: NodeId) -> Result<(), MergeError> {
    match tree.node(id).events() {
        Some(events) => out.append_rebased(events, 0),
        None => Ok(()),
    }
}

/// Unmasked events below `node`, leaves visited in `order`.
///
/// # Errors
///
/// Only fails on a corrupt tree whose leaf buffers disagree with it.
pub fn collect_subtree(
    tree: &BoxTree,
    node: NodeId,
    order: ChildOrder<'_>,
) -> Result<EventBuffer, MergeError> {
    let mut out = EventBuffer::new(tree.n_dims(), tree.kind());
    for (id, _) in tree.boxes_from(node, BoxFilter::unmasked_leaves(), order) {
        append_leaf(&mut out, tree, id)?;
    }
    Ok(out)
}
