//! Event records and the column-wise buffers leaf boxes keep them in.
//!
//! A buffer stores coordinates with a stride of `nd`, so a leaf holding
//! `n` events owns `n * nd` coordinates plus one signal and one error² per
//! event. Full events additionally carry a [`RunTag`].

use serde::{Deserialize, Serialize};

use crate::error::MergeError;

/// Event representation carried by a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Coordinates, signal and error² only.
    Lean,
    /// Lean fields plus run index and detector id.
    Full,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lean => "lean",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lean" => Ok(Self::Lean),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown event kind '{other}' (expected lean|full)")),
        }
    }
}

/// Identity fields of a full event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RunTag {
    /// Index into the owning workspace's experiment-info table.
    pub run_index: u16,
    pub detector_id: u32,
}

/// An owned event, used to build buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub coords: Vec<f32>,
    pub signal: f32,
    pub error_sq: f32,
    pub tag: Option<RunTag>,
}

impl Event {
    #[must_use]
    pub fn lean(coords: Vec<f32>, signal: f32, error_sq: f32) -> Self {
        Self {
            coords,
            signal,
            error_sq,
            tag: None,
        }
    }

    #[must_use]
    pub fn full(
        coords: Vec<f32>,
        signal: f32,
        error_sq: f32,
        run_index: u16,
        detector_id: u32,
    ) -> Self {
        Self {
            coords,
            signal,
            error_sq,
            tag: Some(RunTag {
                run_index,
                detector_id,
            }),
        }
    }

    #[must_use]
    pub fn view(&self) -> EventRef<'_> {
        EventRef {
            coords: &self.coords,
            signal: self.signal,
            error_sq: self.error_sq,
            tag: self.tag,
        }
    }
}

/// Borrowed view of one event inside an [`EventBuffer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRef<'a> {
    pub coords: &'a [f32],
    pub signal: f32,
    pub error_sq: f32,
    pub tag: Option<RunTag>,
}

impl EventRef<'_> {
    /// This event with its run index shifted by `offset`. Lean events come
    /// back unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::TooManyExperimentInfos`] when the shifted index
    /// does not fit a `u16`.
    pub fn rebased(self, offset: u16) -> Result<Self, MergeError> {
        let Some(tag) = self.tag else {
            return Ok(self);
        };
        let run_index = shift_run_index(tag.run_index, offset)?;
        Ok(Self {
            tag: Some(RunTag { run_index, ..tag }),
            ..self
        })
    }
}

fn shift_run_index(run_index: u16, offset: u16) -> Result<u16, MergeError> {
    run_index
        .checked_add(offset)
        .ok_or(MergeError::TooManyExperimentInfos {
            total: usize::from(run_index) + usize::from(offset) + 1,
            limit: usize::from(u16::MAX) + 1,
        })
}

/// Column-wise event storage for one leaf box (or a collected batch).
#[derive(Debug, Clone, PartialEq)]
pub struct EventBuffer {
    nd: usize,
    kind: EventKind,
    coords: Vec<f32>,
    signal: Vec<f32>,
    error_sq: Vec<f32>,
    // Empty for lean buffers.
    tags: Vec<RunTag>,
}

impl EventBuffer {
    #[must_use]
    pub const fn new(nd: usize, kind: EventKind) -> Self {
        Self {
            nd,
            kind,
            coords: Vec::new(),
            signal: Vec::new(),
            error_sq: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_capacity(nd: usize, kind: EventKind, capacity: usize) -> Self {
        let mut buffer = Self::new(nd, kind);
        buffer.reserve(capacity);
        buffer
    }

    #[must_use]
    pub const fn n_dims(&self) -> usize {
        self.nd
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.coords.reserve(additional * self.nd);
        self.signal.reserve(additional);
        self.error_sq.reserve(additional);
        if self.kind == EventKind::Full {
            self.tags.reserve(additional);
        }
    }

    /// Append one event.
    ///
    /// A lean buffer drops the tag; a full buffer stores the default tag for
    /// an untagged event.
    ///
    /// # Errors
    ///
    /// [`MergeError::ShapeMismatch`] when the event does not have one
    /// coordinate per dimension; the buffer is left unchanged.
    pub fn push(&mut self, event: EventRef<'_>) -> Result<(), MergeError> {
        if event.coords.len() != self.nd {
            return Err(MergeError::ShapeMismatch {
                expected: self.nd,
                actual: event.coords.len(),
            });
        }
        self.push_row(event);
        Ok(())
    }

    /// Append an event already known to have `nd` coordinates.
    pub(crate) fn push_row(&mut self, event: EventRef<'_>) {
        self.coords.extend_from_slice(event.coords);
        self.signal.push(event.signal);
        self.error_sq.push(event.error_sq);
        if self.kind == EventKind::Full {
            self.tags.push(event.tag.unwrap_or_default());
        }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<EventRef<'_>> {
        if index >= self.len() {
            return None;
        }
        Some(self.event_at(index))
    }

    fn event_at(&self, index: usize) -> EventRef<'_> {
        let start = index * self.nd;
        EventRef {
            coords: &self.coords[start..start + self.nd],
            signal: self.signal[index],
            error_sq: self.error_sq[index],
            tag: self.tags.get(index).copied(),
        }
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = EventRef<'_>> + '_ {
        (0..self.len()).map(|index| self.event_at(index))
    }

    /// Coordinates of all events, `nd` values per event.
    #[must_use]
    pub fn coords(&self) -> &[f32] {
        &self.coords
    }

    pub fn run_indices(&self) -> impl Iterator<Item = u16> + '_ {
        self.tags.iter().map(|tag| tag.run_index)
    }

    #[must_use]
    pub fn signal_sum(&self) -> f64 {
        self.signal.iter().map(|&s| f64::from(s)).sum()
    }

    #[must_use]
    pub fn error_sq_sum(&self) -> f64 {
        self.error_sq.iter().map(|&e| f64::from(e)).sum()
    }

    /// Append every event of `other`, shifting run indices by `run_offset`.
    ///
    /// # Errors
    ///
    /// [`MergeError::ShapeMismatch`] when dimensionality differs,
    /// [`MergeError::EventKindMismatch`] when the representations differ, and
    /// [`MergeError::TooManyExperimentInfos`] when a shifted run index
    /// overflows.
    pub fn append_rebased(&mut self, other: &Self, run_offset: u16) -> Result<(), MergeError> {
        self.check_compatible(other)?;
        if self.kind == EventKind::Full {
            let mut shifted = Vec::with_capacity(other.tags.len());
            for tag in &other.tags {
                shifted.push(RunTag {
                    run_index: shift_run_index(tag.run_index, run_offset)?,
                    ..*tag
                });
            }
            self.tags.extend(shifted);
        }
        self.coords.extend_from_slice(&other.coords);
        self.signal.extend_from_slice(&other.signal);
        self.error_sq.extend_from_slice(&other.error_sq);
        Ok(())
    }

    /// Shift every run index in place.
    ///
    /// # Errors
    ///
    /// [`MergeError::TooManyExperimentInfos`] on overflow; the buffer is left
    /// unchanged in that case.
    pub fn rebase(&mut self, run_offset: u16) -> Result<(), MergeError> {
        if run_offset == 0 || self.tags.is_empty() {
            return Ok(());
        }
        if let Some(max) = self.tags.iter().map(|tag| tag.run_index).max() {
            shift_run_index(max, run_offset)?;
        }
        for tag in &mut self.tags {
            tag.run_index += run_offset;
        }
        Ok(())
    }

    /// Move the events into `buckets` buffers chosen by `slot_of(coords)`.
    ///
    /// Relative order inside each bucket is preserved.
    pub(crate) fn distribute(
        self,
        buckets: usize,
        mut slot_of: impl FnMut(&[f32]) -> usize,
    ) -> Vec<Self> {
        let mut out: Vec<Self> = (0..buckets).map(|_| Self::new(self.nd, self.kind)).collect();
        for event in self.iter() {
            let slot = slot_of(event.coords).min(buckets - 1);
            out[slot].push_row(event);
        }
        out
    }

    fn check_compatible(&self, other: &Self) -> Result<(), MergeError> {
        if self.nd != other.nd {
            return Err(MergeError::ShapeMismatch {
                expected: self.nd,
                actual: other.nd,
            });
        }
        if self.kind != other.kind {
            return Err(MergeError::EventKindMismatch {
                workspace: String::from("<buffer>"),
                expected: self.kind,
                actual: other.kind,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_buffer(runs: &[u16]) -> EventBuffer {
        let mut buffer = EventBuffer::new(2, EventKind::Full);
        for (i, &run) in runs.iter().enumerate() {
            let x = i as f32;
            buffer.push(Event::full(vec![x, x + 0.5], 1.0, 1.0, run, 7).view()).expect("event");
        }
        buffer
    }

    #[test]
    fn push_and_get_preserve_fields() {
        let mut buffer = EventBuffer::new(3, EventKind::Full);
        buffer.push(Event::full(vec![1.0, 2.0, 3.0], 4.0, 0.25, 2, 99).view()).expect("event");

        let event = buffer.get(0).expect("event 0");
        assert_eq!(event.coords, &[1.0, 2.0, 3.0]);
        assert!((event.signal - 4.0).abs() < f32::EPSILON);
        assert_eq!(
            event.tag,
            Some(RunTag {
                run_index: 2,
                detector_id: 99
            })
        );
        assert!(buffer.get(1).is_none());
    }

    #[test]
    fn push_rejects_wrong_dimensionality() {
        let mut buffer = full_buffer(&[0]);
        let err = buffer
            .push(Event::lean(vec![1.0, 2.0, 3.0], 1.0, 1.0).view())
            .expect_err("three coordinates in a 2-D buffer");
        assert_eq!(
            err,
            MergeError::ShapeMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.coords().len(), 2);
        assert_eq!(buffer.iter().count(), 1);
    }

    #[test]
    fn lean_buffer_drops_tags() {
        let mut buffer = EventBuffer::new(2, EventKind::Lean);
        buffer.push(Event::full(vec![0.0, 0.0], 1.0, 1.0, 5, 1).view()).expect("event");
        assert_eq!(buffer.get(0).expect("event").tag, None);
        assert_eq!(buffer.run_indices().count(), 0);
    }

    #[test]
    fn append_rebased_shifts_run_indices() {
        let mut target = full_buffer(&[0, 1]);
        let source = full_buffer(&[0, 2]);
        target
            .append_rebased(&source, 3)
            .expect("compatible buffers");
        assert_eq!(target.run_indices().collect::<Vec<_>>(), vec![0, 1, 3, 5]);
        assert_eq!(target.len(), 4);
    }

    #[test]
    fn append_rejects_other_kind() {
        let mut target = full_buffer(&[0]);
        let source = EventBuffer::new(2, EventKind::Lean);
        let err = target
            .append_rebased(&source, 0)
            .expect_err("kind mismatch");
        assert!(matches!(err, MergeError::EventKindMismatch { .. }));
    }

    #[test]
    fn rebase_overflow_leaves_buffer_untouched() {
        let mut buffer = full_buffer(&[1, u16::MAX - 1]);
        let err = buffer.rebase(2).expect_err("overflow");
        assert!(matches!(err, MergeError::TooManyExperimentInfos { .. }));
        assert_eq!(
            buffer.run_indices().collect::<Vec<_>>(),
            vec![1, u16::MAX - 1]
        );
    }

    #[test]
    fn distribute_keeps_relative_order() {
        let buffer = full_buffer(&[0, 1, 2, 3]);
        let parts = buffer.distribute(2, |coords| usize::from(coords[0] >= 2.0));
        assert_eq!(parts[0].run_indices().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(parts[1].run_indices().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn event_kind_parses_case_insensitively() {
        assert_eq!("FULL".parse::<EventKind>(), Ok(EventKind::Full));
        assert_eq!(" lean ".parse::<EventKind>(), Ok(EventKind::Lean));
        assert!("fat".parse::<EventKind>().is_err());
    }
}
