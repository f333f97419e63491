//! K-means clustering traits for matrices
//!
//! Provides traits for clustering rows or columns of matrices using
//! `linfa-clustering`, seeded so that the membership only depends on
//! the data and the seed.

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

/// Arguments for k-means clustering
#[derive(Debug, Clone)]
pub struct KmeansArgs {
    /// Number of clusters
    pub num_clusters: usize,
    /// Maximum number of iterations
    pub max_iter: usize,
    /// Random seed for the k-means++ initialization
    pub seed: u64,
}

impl Default for KmeansArgs {
    fn default() -> Self {
        Self {
            num_clusters: 1,
            max_iter: 100,
            seed: 42,
        }
    }
}

impl KmeansArgs {
    /// Create args with specified number of clusters
    pub fn with_clusters(num_clusters: usize) -> Self {
        Self {
            num_clusters,
            ..Default::default()
        }
    }
}

/// Trait for k-means clustering on matrices
pub trait Kmeans {
    /// Cluster columns and return membership vector
    ///
    /// # Arguments
    /// * `args` - Clustering parameters
    ///
    /// # Returns
    /// Vector of cluster assignments, one per column
    fn kmeans_columns(&self, args: KmeansArgs) -> anyhow::Result<Vec<usize>>;

    /// Cluster rows and return membership vector
    ///
    /// # Arguments
    /// * `args` - Clustering parameters
    ///
    /// # Returns
    /// Vector of cluster assignments, one per row
    fn kmeans_rows(&self, args: KmeansArgs) -> anyhow::Result<Vec<usize>>;
}

impl<T> Kmeans for DMatrix<T>
where
    T: nalgebra::Scalar + Copy + Into<f64>,
{
    fn kmeans_columns(&self, args: KmeansArgs) -> anyhow::Result<Vec<usize>> {
        let points = Array2::from_shape_fn((self.ncols(), self.nrows()), |(i, j)| {
            self[(j, i)].into()
        });
        kmeans_points(points, &args)
    }

    fn kmeans_rows(&self, args: KmeansArgs) -> anyhow::Result<Vec<usize>> {
        let points = Array2::from_shape_fn((self.nrows(), self.ncols()), |(i, j)| {
            self[(i, j)].into()
        });
        kmeans_points(points, &args)
    }
}

/// k-means++ seeded Lloyd iterations on the rows of `points`
fn kmeans_points(points: Array2<f64>, args: &KmeansArgs) -> anyhow::Result<Vec<usize>> {
    let nn = points.nrows();
    let kk = args.num_clusters.min(nn);
    if kk <= 1 {
        return Ok(vec![0; nn]);
    }

    let dataset = DatasetBase::from(points);
    let rng = Xoshiro256Plus::seed_from_u64(args.seed);

    let model: KMeans<f64, L2Dist> = KMeans::params_with_rng(kk, rng)
        .max_n_iterations(args.max_iter.max(1) as u64)
        .fit(&dataset)
        .map_err(|e| anyhow::anyhow!("k-means with {} clusters: {}", kk, e))?;

    let membership: Array1<usize> = model.predict(dataset.records());
    Ok(membership.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> DMatrix<f32> {
        // 6 rows: three near (0,0), three near (10,10)
        DMatrix::from_row_slice(
            6,
            2,
            &[
                0.0, 0.1, 10.0, 10.0, 0.2, 0.0, 10.1, 9.9, 0.1, 0.1, 9.8, 10.2,
            ],
        )
    }

    #[test]
    fn test_kmeans_rows_two_blobs() -> anyhow::Result<()> {
        let xx = two_blobs();
        let memb = xx.kmeans_rows(KmeansArgs::with_clusters(2))?;
        assert_eq!(memb.len(), 6);
        assert_eq!(memb[0], memb[2]);
        assert_eq!(memb[0], memb[4]);
        assert_eq!(memb[1], memb[3]);
        assert_eq!(memb[1], memb[5]);
        assert_ne!(memb[0], memb[1]);
        Ok(())
    }

    #[test]
    fn test_kmeans_columns_match_rows_of_transpose() -> anyhow::Result<()> {
        let xx = two_blobs();
        let args = KmeansArgs::with_clusters(2);
        assert_eq!(
            xx.transpose().kmeans_columns(args.clone())?,
            xx.kmeans_rows(args)?
        );
        Ok(())
    }

    #[test]
    fn test_kmeans_is_deterministic() -> anyhow::Result<()> {
        let xx = DMatrix::<f32>::from_fn(3, 40, |i, j| ((i * 7 + j * 13) % 11) as f32);
        let args = KmeansArgs {
            num_clusters: 5,
            max_iter: 50,
            seed: 7,
        };
        let a = xx.kmeans_columns(args.clone())?;
        let b = xx.kmeans_columns(args)?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_kmeans_single_cluster() -> anyhow::Result<()> {
        let xx = two_blobs();
        assert_eq!(xx.kmeans_rows(KmeansArgs::default())?, vec![0; 6]);
        Ok(())
    }

    #[test]
    fn test_kmeans_empty_matrix() -> anyhow::Result<()> {
        let mat: DMatrix<f32> = DMatrix::zeros(0, 0);
        assert!(mat.kmeans_columns(KmeansArgs::with_clusters(2))?.is_empty());
        assert!(mat.kmeans_rows(KmeansArgs::with_clusters(2))?.is_empty());
        Ok(())
    }
}
