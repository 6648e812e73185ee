//! Dense square matrices for distances, similarities and join costs.
//!
//! Only one triangle of a matrix is meaningful to a given algorithm:
//! neighbor-joining reads the lower triangle (`i > j`) as distances, while a
//! [`SimilarityMatrix`] stores two different counts for the same pair, the
//! similarity above the diagonal and the dissimilarity below it. The named
//! accessors keep those conventions out of the algorithms.

use std::ops::{Index, IndexMut};

use crate::error::{PhyloError, Result};

/// An `n × n` matrix of `f64` stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareMatrix {
    n: usize,
    cells: Vec<f64>,
}

impl SquareMatrix {
    /// A zero-filled `n × n` matrix.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            cells: vec![0.0; n * n],
        }
    }

    /// Build from rows; every row must have as many entries as there are rows.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(PhyloError::InvalidMatrix(format!(
                "row {} has {} entries, expected {}",
                i,
                row.len(),
                n
            )));
        }
        Ok(Self {
            n,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    /// Number of rows (and columns).
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Lower-triangle entry for the unordered pair `{i, j}`.
    #[inline]
    pub fn lower(&self, i: usize, j: usize) -> f64 {
        self[(i.max(j), i.min(j))]
    }

    /// Upper-triangle entry for the unordered pair `{i, j}`.
    #[inline]
    pub fn upper(&self, i: usize, j: usize) -> f64 {
        self[(i.min(j), i.max(j))]
    }

    /// Rows as owned vectors, e.g. for TSV export.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.cells.chunks(self.n.max(1)).map(|r| r.to_vec()).collect()
    }
}

impl Index<(usize, usize)> for SquareMatrix {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.cells[i * self.n + j]
    }
}

impl IndexMut<(usize, usize)> for SquareMatrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.cells[i * self.n + j]
    }
}

/// Pairwise similarity and dissimilarity counts in one square table.
///
/// For `i < j`, cell `(i, j)` holds the similarity count and cell `(j, i)`
/// the dissimilarity count of the same pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    counts: SquareMatrix,
}

impl SimilarityMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            counts: SquareMatrix::new(n),
        }
    }

    /// Wrap a matrix already laid out with the upper/lower convention.
    pub fn from_matrix(counts: SquareMatrix) -> Self {
        Self { counts }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn similarity(&self, i: usize, j: usize) -> f64 {
        self.counts.upper(i, j)
    }

    pub fn dissimilarity(&self, i: usize, j: usize) -> f64 {
        self.counts.lower(i, j)
    }

    pub fn set_similarity(&mut self, i: usize, j: usize, value: f64) {
        self.counts[(i.min(j), i.max(j))] = value;
    }

    pub fn set_dissimilarity(&mut self, i: usize, j: usize, value: f64) {
        self.counts[(i.max(j), i.min(j))] = value;
    }

    /// Fraction of dissimilar observations for the pair; 1.0 when nothing was observed.
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        let sim = self.similarity(i, j);
        let diss = self.dissimilarity(i, j);
        if sim + diss <= 0.0 {
            1.0
        } else {
            diss / (sim + diss)
        }
    }

    pub fn as_matrix(&self) -> &SquareMatrix {
        &self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = SquareMatrix::from_rows(vec![vec![0.0, 1.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, PhyloError::InvalidMatrix(_)));
    }

    #[test]
    fn triangles() {
        let m = SquareMatrix::from_rows(vec![
            vec![0.0, 7.0, 8.0],
            vec![1.0, 0.0, 9.0],
            vec![2.0, 3.0, 0.0],
        ])
        .unwrap();
        assert_eq!(m.lower(0, 2), 2.0);
        assert_eq!(m.lower(2, 0), 2.0);
        assert_eq!(m.upper(2, 1), 9.0);
        assert_eq!(m.to_rows()[1], vec![1.0, 0.0, 9.0]);
    }

    #[test]
    fn similarity_accessors_are_distinct() {
        let mut s = SimilarityMatrix::new(3);
        s.set_similarity(2, 0, 3.0);
        s.set_dissimilarity(0, 2, 1.0);
        assert_eq!(s.similarity(0, 2), 3.0);
        assert_eq!(s.dissimilarity(2, 0), 1.0);
        assert_eq!(s.as_matrix()[(0, 2)], 3.0);
        assert_eq!(s.as_matrix()[(2, 0)], 1.0);
        assert!((s.distance(0, 2) - 0.25).abs() < 1e-12);
        assert_eq!(s.distance(0, 1), 1.0);
        assert_eq!(s.distance(1, 1), 0.0);
    }
}
