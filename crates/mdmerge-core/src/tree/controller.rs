use serde::{Deserialize, Serialize};

use crate::error::MergeError;

/// Splitting policy shared by every box of one tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoxController {
    nd: usize,
    max_depth: u32,
    split_threshold: usize,
    split_into: Vec<usize>,
}

impl BoxController {
    /// # Errors
    ///
    /// [`MergeError::InvalidController`] when `split_into` does not hold one
    /// factor per dimension, a factor is zero, or the grid has a single cell.
    pub fn new(
        nd: usize,
        max_depth: u32,
        split_threshold: usize,
        split_into: Vec<usize>,
    ) -> Result<Self, MergeError> {
        if split_into.len() != nd {
            return Err(MergeError::InvalidController(format!(
                "{} split factors for {nd} dimensions",
                split_into.len()
            )));
        }
        if split_into.contains(&0) {
            return Err(MergeError::InvalidController(
                "split factors must be at least 1".to_string(),
            ));
        }
        if nd > 0 && split_into.iter().product::<usize>() < 2 {
            return Err(MergeError::InvalidController(
                "splitting must produce at least 2 children".to_string(),
            ));
        }
        Ok(Self {
            nd,
            max_depth,
            split_threshold,
            split_into,
        })
    }

    /// Same split factor along every dimension.
    ///
    /// # Errors
    ///
    /// See [`BoxController::new`].
    pub fn uniform(
        nd: usize,
        split: usize,
        max_depth: u32,
        split_threshold: usize,
    ) -> Result<Self, MergeError> {
        Self::new(nd, max_depth, split_threshold, vec![split; nd])
    }

    #[must_use]
    pub const fn n_dims(&self) -> usize {
        self.nd
    }

    #[must_use]
    pub const fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[must_use]
    pub const fn split_threshold(&self) -> usize {
        self.split_threshold
    }

    /// Split factor along `dim`; 1 for a dimension out of range.
    #[must_use]
    pub fn split_into(&self, dim: usize) -> usize {
        self.split_into.get(dim).copied().unwrap_or(1)
    }

    #[must_use]
    pub fn split_into_all(&self) -> &[usize] {
        &self.split_into
    }

    /// Children created when one box splits.
    #[must_use]
    pub fn children_per_split(&self) -> usize {
        self.split_into.iter().product()
    }

    /// A leaf at `depth` holding `n_events` must split.
    #[must_use]
    pub const fn should_split(&self, n_events: usize, depth: u32) -> bool {
        n_events > self.split_threshold && depth < self.max_depth
    }

    /// Same-position boxes of two trees cover the same space when this holds
    /// and their root extents agree.
    #[must_use]
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.max_depth == other.max_depth
            && self.split_threshold == other.split_threshold
            && self.nd == other.nd
            && self.split_into == other.split_into
    }

    /// Copy with selected parameters replaced.
    ///
    /// # Errors
    ///
    /// See [`BoxController::new`].
    pub fn with_overrides(
        &self,
        split_into: Option<&[usize]>,
        split_threshold: Option<usize>,
        max_depth: Option<u32>,
    ) -> Result<Self, MergeError> {
        let split_into = match split_into {
            // A single factor applies to every dimension.
            Some([single]) => vec![*single; self.nd],
            Some(factors) => factors.to_vec(),
            None => self.split_into.clone(),
        };
        Self::new(
            self.nd,
            max_depth.unwrap_or(self.max_depth),
            split_threshold.unwrap_or(self.split_threshold),
            split_into,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BoxController {
        BoxController::uniform(3, 2, 4, 100).expect("valid controller")
    }

    #[test]
    fn accessors_report_configuration() {
        let bc = BoxController::new(2, 3, 50, vec![2, 4]).expect("valid");
        assert_eq!(bc.n_dims(), 2);
        assert_eq!(bc.max_depth(), 3);
        assert_eq!(bc.split_threshold(), 50);
        assert_eq!(bc.split_into(1), 4);
        assert_eq!(bc.split_into(7), 1);
        assert_eq!(bc.children_per_split(), 8);
    }

    #[test]
    fn rejects_wrong_factor_count() {
        let err = BoxController::new(3, 1, 10, vec![2, 2]).expect_err("2 factors for 3 dims");
        assert!(matches!(err, MergeError::InvalidController(_)));
    }

    #[test]
    fn rejects_single_cell_grid() {
        assert!(BoxController::uniform(2, 1, 4, 10).is_err());
        assert!(BoxController::new(2, 4, 10, vec![1, 3]).is_ok());
    }

    #[test]
    fn split_rule_respects_threshold_and_depth() {
        let bc = base();
        assert!(!bc.should_split(100, 0));
        assert!(bc.should_split(101, 0));
        assert!(!bc.should_split(1_000, 4));
    }

    #[test]
    fn compatibility_needs_all_parameters() {
        let bc = base();
        assert!(bc.is_compatible(&bc.clone()));
        assert!(!bc.is_compatible(&BoxController::uniform(3, 2, 5, 100).expect("valid")));
        assert!(!bc.is_compatible(&BoxController::uniform(3, 2, 4, 99).expect("valid")));
        assert!(!bc.is_compatible(&BoxController::new(3, 4, 100, vec![2, 2, 3]).expect("valid")));
    }

    #[test]
    fn overrides_replace_selected_fields() {
        let bc = base();
        let out = bc
            .with_overrides(Some(&[4]), None, Some(6))
            .expect("valid overrides");
        assert_eq!(out.split_into_all(), &[4, 4, 4]);
        assert_eq!(out.split_threshold(), 100);
        assert_eq!(out.max_depth(), 6);
    }
}
