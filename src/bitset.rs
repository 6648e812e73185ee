//! Compact bitset representation of the leaves below a tree node.
//!
//! # Overview
//! In an indexed tree every leaf owns a matrix index, and every node records
//! the set of leaf indices beneath it. Bit *i* is set iff leaf *i* is a
//! descendant of the node.
//!
//! # Example
//! For a tree with leaves labeled `0..4`:
//! - Clade {0, 2} → bitset `0b0101` (bits 0 and 2 set)
//! - Clade {1, 2, 3} → bitset `0b1110` (bits 1, 2, 3 set)

/// A compact bitset for representing which leaves lie below a node.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily large trees.
/// Each u64 word holds 64 leaf indices. Two bitsets built for the same leaf
/// universe always have the same number of words, so equality and hashing
/// compare leaf sets directly.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Parameters
    /// - `words`: Number of u64 words needed. Calculate as `(num_leaves + 63) / 64`
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylogeny::bitset::Bitset;
    /// // For a tree with 100 leaves, need 2 words (128 bits)
    /// let bs = Bitset::zeros(2);
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Creates an empty bitset large enough for `num_leaves` leaves.
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylogeny::bitset::Bitset;
    /// assert_eq!(Bitset::for_leaves(64).0.len(), 1);
    /// assert_eq!(Bitset::for_leaves(65).0.len(), 2);
    /// ```
    pub fn for_leaves(num_leaves: usize) -> Self {
        Self::zeros(num_leaves.div_ceil(64))
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylogeny::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);  // Mark leaf 0 as present
    /// bs.set(5);  // Mark leaf 5 as present
    /// assert_eq!(bs.0[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6;     // Equivalent to idx / 64
        let bit = idx & 63;      // Equivalent to idx % 64
        self.0[word] |= 1u64 << bit;
    }

    /// Returns true if leaf `idx` is in the set. Out-of-range indices are absent.
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylogeny::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(3);
    /// assert!(bs.contains(3));
    /// assert!(!bs.contains(4));
    /// assert!(!bs.contains(1000));
    /// ```
    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        self.0
            .get(idx >> 6)
            .is_some_and(|w| w & (1u64 << (idx & 63)) != 0)
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylogeny::bitset::Bitset;
    /// let mut left = Bitset::zeros(1);
    /// left.set(0);   // {0}
    ///
    /// let mut right = Bitset::zeros(1);
    /// right.set(1);  // {1}
    ///
    /// left.or_assign(&right);  // {0} ∪ {1} = {0, 1}
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// True if every leaf of `other` is also in `self`.
    #[inline]
    pub fn is_superset(&self, other: &Bitset) -> bool {
        other
            .0
            .iter()
            .enumerate()
            .all(|(i, b)| b & !self.0.get(i).copied().unwrap_or(0) == 0)
    }

    /// Counts the number of set bits (population count).
    ///
    /// # Example
    /// ```
    /// # use rust_python_phylogeny::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(2);
    /// bs.set(5);
    /// assert_eq!(bs.count_ones(), 3);
    /// ```
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Complement within a universe of `num_leaves` leaves.
    ///
    /// # Example
    /// Input:  0b0011 (4 leaves) → Output: 0b1100
    pub fn complement(&self, num_leaves: usize) -> Bitset {
        let mut complement = Bitset::zeros(self.0.len());
        for i in 0..num_leaves {
            if !self.contains(i) {
                complement.set(i);
            }
        }
        complement
    }

    /// Leaf indices in ascending order.
    pub fn ones(&self) -> Vec<usize> {
        (0..self.0.len() * 64).filter(|&i| self.contains(i)).collect()
    }
}
