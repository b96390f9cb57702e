//! Morton (Z-order) indexing of integer grid coordinates.
//!
//! Bit `k` of dimension `d` lands at bit `k * nd + d` of the index, so the
//! last dimension owns the most significant bit of every interleaved group.
//! Sorting cells by this index walks the grid along the Z curve.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::tree::BoxController;

/// Width of [`MortonIndex`] in bits.
pub const MORTON_BITS: u32 = u128::BITS;

/// Interleaved index of an N-dimensional grid coordinate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct MortonIndex(pub u128);

impl MortonIndex {
    #[must_use]
    pub const fn value(self) -> u128 {
        self.0
    }
}

/// Number of bits needed to address `split` cells along one dimension.
#[must_use]
pub const fn bits_for(split: usize) -> u32 {
    if split <= 1 {
        1
    } else {
        usize::BITS - (split - 1).leading_zeros()
    }
}

fn check_width(nd: usize, bits_per_dim: u32) -> Result<(), MergeError> {
    if nd == 0 {
        return Err(MergeError::TooFewDimensions { n_dims: 0 });
    }
    let needed = u32::try_from(nd)
        .ok()
        .and_then(|nd| nd.checked_mul(bits_per_dim))
        .unwrap_or(u32::MAX);
    if needed > MORTON_BITS {
        return Err(MergeError::MortonOverflow {
            needed,
            available: MORTON_BITS,
        });
    }
    Ok(())
}

/// Interleave `coords`, using the low `bits_per_dim` bits of each.
///
/// # Errors
///
/// [`MergeError::MortonOverflow`] when `coords.len() * bits_per_dim`
/// exceeds [`MORTON_BITS`] or a coordinate does not fit in `bits_per_dim`
/// bits.
pub fn interleave(coords: &[u32], bits_per_dim: u32) -> Result<MortonIndex, MergeError> {
    check_width(coords.len(), bits_per_dim)?;
    if let Some(&too_wide) = coords
        .iter()
        .find(|&&c| bits_per_dim < u32::BITS && c >> bits_per_dim != 0)
    {
        return Err(MergeError::MortonOverflow {
            needed: u32::BITS - too_wide.leading_zeros(),
            available: bits_per_dim,
        });
    }
    Ok(interleave_unchecked(coords, bits_per_dim))
}

fn interleave_unchecked(coords: &[u32], bits_per_dim: u32) -> MortonIndex {
    let nd = coords.len() as u32;
    let mut index = 0u128;
    for k in 0..bits_per_dim.min(u32::BITS) {
        for (d, &c) in coords.iter().enumerate() {
            let bit = u128::from((c >> k) & 1);
            index |= bit << (k * nd + d as u32);
        }
    }
    MortonIndex(index)
}

/// Split `index` back into `nd` coordinates of `bits_per_dim` bits.
///
/// # Errors
///
/// [`MergeError::MortonOverflow`] when the width exceeds [`MORTON_BITS`].
pub fn deinterleave(
    index: MortonIndex,
    nd: usize,
    bits_per_dim: u32,
) -> Result<Vec<u32>, MergeError> {
    check_width(nd, bits_per_dim)?;
    let stride = nd as u32;
    let mut coords = vec![0u32; nd];
    for k in 0..bits_per_dim.min(u32::BITS) {
        for (d, coord) in coords.iter_mut().enumerate() {
            let bit = (index.0 >> (k * stride + d as u32)) & 1;
            *coord |= (bit as u32) << k;
        }
    }
    Ok(coords)
}

/// Fixed-width encoder for one `(nd, bits_per_dim)` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MortonEncoder {
    nd: usize,
    bits_per_dim: u32,
}

impl MortonEncoder {
    /// # Errors
    ///
    /// [`MergeError::MortonOverflow`] when `nd * bits_per_dim` exceeds the
    /// index width.
    pub fn new(nd: usize, bits_per_dim: u32) -> Result<Self, MergeError> {
        check_width(nd, bits_per_dim)?;
        Ok(Self { nd, bits_per_dim })
    }

    /// Encoder wide enough to address every box of a fully split tree.
    ///
    /// # Errors
    ///
    /// [`MergeError::MortonOverflow`] when the tree is too deep for the index.
    pub fn for_controller(controller: &BoxController) -> Result<Self, MergeError> {
        let per_level = controller
            .split_into_all()
            .iter()
            .map(|&s| bits_for(s))
            .max()
            .unwrap_or(1);
        let bits = per_level.saturating_mul(controller.max_depth().max(1));
        Self::new(controller.n_dims(), bits)
    }

    #[must_use]
    pub const fn n_dims(&self) -> usize {
        self.nd
    }

    #[must_use]
    pub const fn bits_per_dim(&self) -> u32 {
        self.bits_per_dim
    }

    /// # Errors
    ///
    /// [`MergeError::ShapeMismatch`] for a coordinate of the wrong
    /// dimensionality, [`MergeError::MortonOverflow`] for one that does not
    /// fit.
    pub fn encode(&self, coords: &[u32]) -> Result<MortonIndex, MergeError> {
        if coords.len() != self.nd {
            return Err(MergeError::ShapeMismatch {
                expected: self.nd,
                actual: coords.len(),
            });
        }
        interleave(coords, self.bits_per_dim)
    }

    /// # Errors
    ///
    /// Never fails for an encoder built through [`MortonEncoder::new`].
    pub fn decode(&self, index: MortonIndex) -> Result<Vec<u32>, MergeError> {
        deinterleave(index, self.nd, self.bits_per_dim)
    }
}

/// Mixed-radix coordinate of `cell` in a grid of `split_into` cells per
/// dimension, dimension 0 varying fastest.
#[must_use]
pub fn cell_coords(cell: usize, split_into: &[usize]) -> Vec<u32> {
    let mut rest = cell;
    split_into
        .iter()
        .map(|&split| {
            let c = rest % split;
            rest /= split;
            c as u32
        })
        .collect()
}

/// Cell indices of a `split^nd` grid in ascending Morton order.
///
/// # Errors
///
/// See [`z_permutation_mixed`].
pub fn z_permutation(nd: usize, split: usize) -> Result<Vec<usize>, MergeError> {
    z_permutation_mixed(&vec![split; nd])
}

/// Cell indices of a grid with per-dimension split factors, in ascending
/// Morton order of each cell's coordinate.
///
/// # Errors
///
/// [`MergeError::InvalidController`] for an empty grid and
/// [`MergeError::MortonOverflow`] when the grid cannot be indexed.
pub fn z_permutation_mixed(split_into: &[usize]) -> Result<Vec<usize>, MergeError> {
    if split_into.is_empty() || split_into.contains(&0) {
        return Err(MergeError::InvalidController(format!(
            "cannot order an empty grid {split_into:?}"
        )));
    }
    let bits = split_into.iter().map(|&s| bits_for(s)).max().unwrap_or(1);
    let encoder = MortonEncoder::new(split_into.len(), bits)?;
    let cells: usize = split_into.iter().product();

    let mut keyed = Vec::with_capacity(cells);
    for cell in 0..cells {
        keyed.push((encoder.encode(&cell_coords(cell, split_into))?, cell));
    }
    keyed.sort_unstable();
    Ok(keyed.into_iter().map(|(_, cell)| cell).collect())
}

/// Z-permutations keyed by split vector, computed at most once each.
#[derive(Debug, Default)]
pub struct ZOrderCache {
    perms: HashMap<Vec<usize>, Arc<[usize]>>,
}

impl ZOrderCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Permutation for `split_into`, computing it on first use.
    ///
    /// # Errors
    ///
    /// See [`z_permutation_mixed`].
    pub fn get(&mut self, split_into: &[usize]) -> Result<Arc<[usize]>, MergeError> {
        if let Some(perm) = self.perms.get(split_into) {
            return Ok(Arc::clone(perm));
        }
        let perm: Arc<[usize]> = z_permutation_mixed(split_into)?.into();
        self.perms.insert(split_into.to_vec(), Arc::clone(&perm));
        Ok(perm)
    }

    /// Number of distinct permutations computed so far.
    #[must_use]
    pub fn computed(&self) -> usize {
        self.perms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_k_of_dim_d_lands_at_k_nd_plus_d() {
        // dim 1, bit 2 -> position 2 * 3 + 1 = 7
        let index = interleave(&[0, 0b100, 0], 3).expect("fits");
        assert_eq!(index.value(), 1 << 7);
    }

    #[test]
    fn last_dimension_has_priority_within_a_bit_group() {
        let a = interleave(&[1, 0], 1).expect("fits");
        let b = interleave(&[0, 1], 1).expect("fits");
        assert!(a < b);
    }

    #[test]
    fn interleave_order_is_not_lexicographic() {
        // Lexicographically (0, 3) < (1, 0); along the Z curve (1, 0) comes
        // first.
        let a = interleave(&[0, 3], 2).expect("fits");
        let b = interleave(&[1, 0], 2).expect("fits");
        assert_eq!(a.value(), 10);
        assert_eq!(b.value(), 1);
        assert!(b < a);
    }

    #[test]
    fn decode_inverts_encode() {
        let encoder = MortonEncoder::new(4, 5).expect("width");
        let coords = [31, 0, 17, 9];
        let index = encoder.encode(&coords).expect("fits");
        assert_eq!(encoder.decode(index).expect("decode"), coords);
    }

    #[test]
    fn oversize_coordinate_is_rejected() {
        let err = interleave(&[8, 0], 3).expect_err("8 needs 4 bits");
        assert!(matches!(err, MergeError::MortonOverflow { .. }));
    }

    #[test]
    fn width_is_bounded() {
        assert!(MortonEncoder::new(9, 14).is_ok());
        let err = MortonEncoder::new(9, 15).expect_err("135 bits");
        assert_eq!(
            err,
            MergeError::MortonOverflow {
                needed: 135,
                available: 128
            }
        );
    }

    #[test]
    fn encoder_checks_dimensionality() {
        let encoder = MortonEncoder::new(3, 2).expect("width");
        assert!(matches!(
            encoder.encode(&[1, 1]),
            Err(MergeError::ShapeMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn z_permutation_2x2_is_z_shaped() {
        // cells: 0=(0,0) 1=(1,0) 2=(0,1) 3=(1,1)
        assert_eq!(z_permutation(2, 2).expect("perm"), vec![0, 1, 2, 3]);
    }

    #[test]
    fn z_permutation_4x4_visits_quadrants_first() {
        let perm = z_permutation(2, 4).expect("perm");
        // First quadrant is x in 0..2, y in 0..2: cells 0, 1, 4, 5.
        assert_eq!(&perm[..4], &[0, 1, 4, 5]);
        assert_eq!(perm.len(), 16);
    }

    #[test]
    fn mixed_split_permutation_covers_every_cell() {
        let mut perm = z_permutation_mixed(&[3, 2, 5]).expect("perm");
        perm.sort_unstable();
        assert_eq!(perm, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn cache_computes_each_split_once() {
        let mut cache = ZOrderCache::new();
        let first = cache.get(&[2, 2, 2]).expect("perm");
        let again = cache.get(&[2, 2, 2]).expect("perm");
        assert!(Arc::ptr_eq(&first, &again));
        cache.get(&[4, 4]).expect("perm");
        assert_eq!(cache.computed(), 2);
    }

    #[test]
    fn bits_for_rounds_up() {
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(2), 1);
        assert_eq!(bits_for(3), 2);
        assert_eq!(bits_for(4), 2);
        assert_eq!(bits_for(5), 3);
    }
}
