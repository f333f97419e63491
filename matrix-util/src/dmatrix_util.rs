use crate::traits::MatOps;
pub use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

impl<T> MatOps for DMatrix<T>
where
    T: nalgebra::RealField + Copy + Send + Sync,
{
    type Mat = DMatrix<T>;
    type Scalar = T;

    fn normalize_rows_l1_inplace(&mut self) -> Vec<usize> {
        let mut zero_rows = vec![];
        for (i, mut row) in self.row_iter_mut().enumerate() {
            let denom = row.iter().fold(T::zero(), |acc, &x| acc + x);
            if denom > T::zero() {
                row /= denom;
            } else {
                zero_rows.push(i);
            }
        }
        zero_rows
    }

    fn pairwise_row_distances(&self) -> DMatrix<T> {
        let nn = self.nrows();
        let rows: Vec<_> = self.row_iter().collect();

        // upper triangle by rows, in parallel
        let upper: Vec<Vec<T>> = (0..nn)
            .into_par_iter()
            .map(|i| {
                ((i + 1)..nn)
                    .map(|j| (&rows[i] - &rows[j]).norm())
                    .collect::<Vec<T>>()
            })
            .collect();

        let mut ret = DMatrix::<T>::zeros(nn, nn);
        for (i, row) in upper.into_iter().enumerate() {
            for (jj, d) in row.into_iter().enumerate() {
                let j = i + 1 + jj;
                ret[(i, j)] = d;
                ret[(j, i)] = d;
            }
        }
        ret
    }

    fn max_asymmetry(&self) -> T {
        let nn = self.nrows().min(self.ncols());
        let mut ret = T::zero();
        for i in 0..nn {
            for j in (i + 1)..nn {
                let gap = (self[(i, j)] - self[(j, i)]).abs();
                if gap > ret {
                    ret = gap;
                }
            }
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_pairwise_row_distances() {
        let xx = DMatrix::<f32>::from_row_slice(3, 2, &[0.0, 0.0, 3.0, 4.0, 0.0, 1.0]);
        let dd = xx.pairwise_row_distances();
        assert_abs_diff_eq!(dd[(0, 1)], 5.0);
        assert_abs_diff_eq!(dd[(1, 0)], 5.0);
        assert_abs_diff_eq!(dd[(0, 2)], 1.0);
        assert_abs_diff_eq!(dd[(2, 2)], 0.0);
        assert_eq!(dd.max_asymmetry(), 0.0);
    }

    #[test]
    fn test_normalize_rows_with_zero_row() {
        let mut xx = DMatrix::<f64>::from_row_slice(2, 3, &[1.0, 1.0, 2.0, 0.0, 0.0, 0.0]);
        let zero_rows = xx.normalize_rows_l1_inplace();
        assert_eq!(zero_rows, vec![1]);
        assert_abs_diff_eq!(xx.row(0).sum(), 1.0);
        assert_abs_diff_eq!(xx[(0, 2)], 0.5);
        assert_eq!(xx.row(1).sum(), 0.0);
    }
}
