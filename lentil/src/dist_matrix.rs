//! Symmetric distance matrices that may be partially observed.

use matrix_util::traits::IoOps;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix, SparseEntry};

/// A square distance matrix, either fully computed or restricted to a
/// set of stored pairs.
///
/// A `Sparse` matrix only knows the entries it stores; everything else is
/// "not computed", never zero. A `Dense` matrix treats NaN cells as not
/// computed.
#[derive(Debug, Clone)]
pub enum DistMatrix {
    Dense(DMatrix<f32>),
    Sparse(CscMatrix<f32>),
}

impl DistMatrix {
    /// Build a symmetric sparse matrix from `(i, j, d)` triplets. Both
    /// `(i, j)` and `(j, i)` are stored, and the diagonal is stored as 0.
    /// If a pair appears more than once, the first occurrence wins.
    pub fn from_pairs(n: usize, pairs: &[(usize, usize, f32)]) -> Self {
        let mut canonical: Vec<(usize, usize, f32)> = pairs
            .iter()
            .filter(|(i, j, _)| i != j)
            .map(|&(i, j, d)| (i.min(j), i.max(j), d))
            .collect();
        // stable sort keeps the first occurrence in front
        canonical.sort_by_key(|&(i, j, _)| (i, j));
        canonical.dedup_by_key(|&mut (i, j, _)| (i, j));

        let mut coo = CooMatrix::new(n, n);
        for i in 0..n {
            coo.push(i, i, 0.0);
        }
        for (i, j, d) in canonical {
            coo.push(i, j, d);
            coo.push(j, i, d);
        }
        DistMatrix::Sparse(CscMatrix::from(&coo))
    }

    /// Dense when every off-diagonal cell is a number, sparse otherwise
    pub fn from_dense_with_missing(mat: DMatrix<f32>) -> Self {
        if mat.iter().all(|x| !x.is_nan()) {
            return DistMatrix::Dense(mat);
        }
        let n = mat.nrows();
        let mut pairs = vec![];
        for j in 0..mat.ncols() {
            for i in 0..j.min(n) {
                let d = mat[(i, j)];
                if !d.is_nan() {
                    pairs.push((i, j, d));
                }
            }
        }
        Self::from_pairs(n, &pairs)
    }

    pub fn nrows(&self) -> usize {
        match self {
            DistMatrix::Dense(m) => m.nrows(),
            DistMatrix::Sparse(m) => m.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            DistMatrix::Dense(m) => m.ncols(),
            DistMatrix::Sparse(m) => m.ncols(),
        }
    }

    /// `None` if the entry was not computed
    pub fn get(&self, i: usize, j: usize) -> Option<f32> {
        match self {
            DistMatrix::Dense(m) => {
                let d = m[(i, j)];
                (!d.is_nan()).then_some(d)
            }
            DistMatrix::Sparse(m) => match m.get_entry(i, j) {
                Some(SparseEntry::NonZero(d)) => Some(*d),
                _ => None,
            },
        }
    }

    /// Observed entries `(j, d_ij)` of row `i`, in increasing `j`
    pub fn row_observed(&self, i: usize) -> Vec<(usize, f32)> {
        match self {
            DistMatrix::Dense(m) => m
                .row(i)
                .iter()
                .enumerate()
                .filter(|(_, d)| !d.is_nan())
                .map(|(j, d)| (j, *d))
                .collect(),
            DistMatrix::Sparse(m) => {
                // stored symmetric, so column i is row i
                let col = m.col(i);
                col.row_indices()
                    .iter()
                    .zip(col.values().iter())
                    .map(|(&j, &d)| (j, d))
                    .collect()
            }
        }
    }

    /// Number of computed cells, diagonal included
    pub fn num_observed(&self) -> usize {
        match self {
            DistMatrix::Dense(m) => m.iter().filter(|x| !x.is_nan()).count(),
            DistMatrix::Sparse(m) => m.nnz(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.num_observed() == self.nrows() * self.ncols()
    }

    /// Densify, filling not-computed cells with `fill`
    pub fn to_dense(&self, fill: f32) -> DMatrix<f32> {
        match self {
            DistMatrix::Dense(m) => m.map(|x| if x.is_nan() { fill } else { x }),
            DistMatrix::Sparse(m) => {
                let mut ret = DMatrix::<f32>::from_element(m.nrows(), m.ncols(), fill);
                for (i, j, &d) in m.triplet_iter() {
                    ret[(i, j)] = d;
                }
                ret
            }
        }
    }

    /// Restrict to `indices` (in the given order), keeping the
    /// representation
    pub fn submatrix(&self, indices: &[usize]) -> DistMatrix {
        match self {
            DistMatrix::Dense(m) => DistMatrix::Dense(m.select_rows(indices).select_columns(indices)),
            DistMatrix::Sparse(m) => {
                let mut new_index = vec![None; m.nrows()];
                for (k, &i) in indices.iter().enumerate() {
                    new_index[i] = Some(k);
                }
                let pairs: Vec<(usize, usize, f32)> = m
                    .triplet_iter()
                    .filter_map(|(i, j, &d)| match (new_index[i], new_index[j]) {
                        (Some(a), Some(b)) if a < b => Some((a, b, d)),
                        _ => None,
                    })
                    .collect();
                Self::from_pairs(indices.len(), &pairs)
            }
        }
    }

    /// Largest `|d_ij - d_ji|` over pairs observed both ways
    pub fn max_asymmetry(&self) -> f32 {
        let n = self.nrows();
        let mut ret = 0_f32;
        for i in 0..n {
            for (j, d_ij) in self.row_observed(i) {
                if j > i {
                    if let Some(d_ji) = self.get(j, i) {
                        if d_ij.is_finite() && d_ji.is_finite() {
                            ret = ret.max((d_ij - d_ji).abs());
                        }
                    }
                }
            }
        }
        ret
    }

    /// Write with row and column names; not-computed cells become `NA`
    pub fn write_named(&self, file: &str, delim: &str, names: &[Box<str>]) -> anyhow::Result<()> {
        self.to_dense(f32::NAN)
            .write_named_delim(file, delim, names, names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_distinguishes_zero_from_missing() {
        let dm = DistMatrix::from_pairs(3, &[(0, 1, 2.5), (1, 2, 0.0)]);
        assert_eq!(dm.get(0, 1), Some(2.5));
        assert_eq!(dm.get(1, 0), Some(2.5));
        assert_eq!(dm.get(2, 1), Some(0.0));
        assert_eq!(dm.get(0, 0), Some(0.0));
        assert_eq!(dm.get(0, 2), None);
        assert_eq!(dm.num_observed(), 3 + 4);
        assert!(!dm.is_complete());
        assert_eq!(dm.row_observed(1), vec![(0, 2.5), (1, 0.0), (2, 0.0)]);
    }

    #[test]
    fn test_submatrix_keeps_representation() {
        let dm = DistMatrix::from_pairs(4, &[(0, 3, 1.0), (1, 2, 2.0), (0, 1, 4.0)]);
        let sub = dm.submatrix(&[3, 0, 2]);
        assert!(matches!(sub, DistMatrix::Sparse(_)));
        assert_eq!(sub.get(0, 1), Some(1.0));
        assert_eq!(sub.get(1, 2), None);
        assert_eq!(sub.get(2, 2), Some(0.0));

        let dense = DistMatrix::Dense(dm.to_dense(9.0));
        let sub = dense.submatrix(&[1, 2]);
        assert_eq!(sub.get(0, 1), Some(2.0));
        assert!(sub.is_complete());
    }

    #[test]
    fn test_nan_cells_become_missing() {
        let mat = DMatrix::from_row_slice(2, 2, &[0.0, f32::NAN, f32::NAN, 0.0]);
        let dm = DistMatrix::from_dense_with_missing(mat);
        assert!(matches!(dm, DistMatrix::Sparse(_)));
        assert_eq!(dm.get(0, 1), None);
        assert_eq!(dm.max_asymmetry(), 0.0);
    }
}
