//! Insertion of a whole input, event by event, into the output tree.

use tracing::{debug, instrument};

use super::dispatch::Flavor;
use crate::collect::collect_tree;
use crate::error::MergeError;
use crate::timing;
use crate::tree::{BoxTree, InsertStats};

/// Collect the unmasked events of `src`, shift their run indices by
/// `run_offset` and insert them into `out` by coordinate. Overfull output
/// leaves split under the output's own controller, so `src` may be
/// partitioned in any way.
#[instrument(level = "debug", skip_all, fields(events = src.n_points(), run_offset = run_offset))]
pub(super) fn insert_tree<F: Flavor>(
    out: &mut BoxTree,
    src: &BoxTree,
    run_offset: u16,
    parallel: bool,
) -> Result<InsertStats, MergeError> {
    let mut events = timing::timed("collect", || collect_tree(src, parallel))?;
    F::prepare(&mut events, run_offset)?;
    let stats = out.add_events(&events, 0)?;
    if stats.rejected > 0 {
        debug!(rejected = stats.rejected, "events outside the output extents");
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventBuffer, EventKind};
    use crate::merge::dispatch::{Full, Lean};
    use crate::tree::{BoxController, Extent};

    fn tree(kind: EventKind, split: usize, range: f32) -> BoxTree {
        BoxTree::new(
            BoxController::uniform(2, split, 4, 3).expect("controller"),
            kind,
            vec![Extent::new(0.0, range), Extent::new(0.0, range)],
        )
        .expect("tree")
    }

    #[test]
    fn insertion_tolerates_different_controllers() {
        let mut src = tree(EventKind::Full, 3, 1.0);
        let mut batch = EventBuffer::new(2, EventKind::Full);
        for i in 0..20 {
            let t = i as f32 / 20.0;
            let event = Event::full(vec![t, 1.0 - t], 2.0, 0.5, (i % 2) as u16, 9);
            batch.push(event.view()).expect("event");
        }
        src.add_events(&batch, 0).expect("batch");

        let mut out = tree(EventKind::Full, 2, 1.0);
        let stats = insert_tree::<Full>(&mut out, &src, 4, false).expect("insert");
        assert_eq!(stats.inserted, 20);
        assert_eq!(stats.rejected, 0);
        assert_eq!(out.n_points(), 20);

        let mut runs: Vec<u16> = out
            .boxes(crate::tree::BoxFilter::leaves(), crate::tree::ChildOrder::Natural)
            .filter_map(|(_, node)| node.events())
            .flat_map(|events| events.run_indices().collect::<Vec<_>>())
            .collect();
        runs.sort_unstable();
        runs.dedup();
        assert_eq!(runs, vec![4, 5]);
    }

    #[test]
    fn events_outside_the_output_are_rejected() {
        let mut src = tree(EventKind::Lean, 2, 2.0);
        let mut batch = EventBuffer::new(2, EventKind::Lean);
        batch.push(Event::lean(vec![0.5, 0.5], 1.0, 1.0).view()).expect("event");
        batch.push(Event::lean(vec![1.5, 1.5], 1.0, 1.0).view()).expect("event");
        src.add_events(&batch, 0).expect("batch");

        let mut out = tree(EventKind::Lean, 2, 1.0);
        let stats = insert_tree::<Lean>(&mut out, &src, 0, true).expect("insert");
        assert_eq!(stats, InsertStats { inserted: 1, rejected: 1 });
    }
}
