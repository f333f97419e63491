//! Meta-cells: cluster cells, then aggregate distances and expression.

use crate::error::{Result, Stage, TrajError};

use clap::ValueEnum;
use log::info;
use matrix_util::clustering::{Kmeans, KmeansArgs};
use matrix_util::utils::partition_by_membership;
use nalgebra::DMatrix;
use rayon::prelude::*;

/// How member cells' expression is combined into a meta-cell
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum Aggregation {
    /// total over member cells (keeps each gene's mass)
    Sum,
    /// average over member cells
    Mean,
}

#[derive(Debug, Clone)]
pub struct CoarseGrainArgs {
    pub num_meta_cells: usize,
    pub max_iter: usize,
    pub seed: u64,
    pub aggregation: Aggregation,
}

impl Default for CoarseGrainArgs {
    fn default() -> Self {
        Self {
            num_meta_cells: 100,
            max_iter: 100,
            seed: 42,
            aggregation: Aggregation::Sum,
        }
    }
}

pub struct CoarseGrained {
    /// meta-cell of each original cell
    pub membership: Vec<usize>,
    /// number of member cells per meta-cell
    pub sizes: Vec<usize>,
    /// `N x N` mean inter-cluster distances, zero diagonal
    pub dist: DMatrix<f32>,
    /// genes x meta-cells
    pub expression: DMatrix<f32>,
}

/// Cluster the rows of `embedding` (cells x dims) into meta-cells and
/// aggregate `cell_dist` (cells x cells) and `expression` (genes x cells).
pub fn coarse_grain(
    embedding: &DMatrix<f32>,
    cell_dist: &DMatrix<f32>,
    expression: &DMatrix<f32>,
    args: &CoarseGrainArgs,
) -> Result<CoarseGrained> {
    let nn = embedding.nrows();
    let kk = args.num_meta_cells;

    if kk < 1 || kk >= nn {
        return Err(TrajError::InvalidClusterCount {
            stage: Stage::CoarseGrain,
            requested: kk,
            num_points: nn,
        });
    }

    if cell_dist.nrows() != nn || cell_dist.ncols() != nn {
        return Err(TrajError::parameter(
            Stage::CoarseGrain,
            "cell_dist",
            format!("{} x {}", cell_dist.nrows(), cell_dist.ncols()),
            format!("must be {} x {} to match the embedding", nn, nn),
        ));
    }

    if expression.ncols() != nn {
        return Err(TrajError::parameter(
            Stage::CoarseGrain,
            "expression",
            format!("{} columns", expression.ncols()),
            format!("must have one column per cell ({})", nn),
        ));
    }

    let membership = canonical_labels(&embedding.kmeans_rows(KmeansArgs {
        num_clusters: kk,
        max_iter: args.max_iter,
        seed: args.seed,
    })?);

    let groups = partition_by_membership(&membership);
    let ngroups = groups.len();
    if ngroups != kk {
        return Err(TrajError::InvalidClusterCount {
            stage: Stage::CoarseGrain,
            requested: kk,
            num_points: ngroups,
        });
    }

    let members: Vec<Vec<usize>> = (0..kk)
        .map(|k| groups.get(&k).cloned().unwrap_or_default())
        .collect();
    let sizes: Vec<usize> = members.iter().map(|m| m.len()).collect();

    info!(
        "{} cells -> {} meta-cells (sizes {}..{})",
        nn,
        kk,
        sizes.iter().min().copied().unwrap_or(0),
        sizes.iter().max().copied().unwrap_or(0)
    );

    Ok(CoarseGrained {
        dist: aggregate_distance(cell_dist, &members),
        expression: aggregate_expression(expression, &members, args.aggregation),
        membership,
        sizes,
    })
}

/// Relabel clusters in order of their first member
fn canonical_labels(membership: &[usize]) -> Vec<usize> {
    let mut relabel = vec![usize::MAX; membership.iter().max().map_or(0, |m| m + 1)];
    let mut next = 0;
    membership
        .iter()
        .map(|&k| {
            if relabel[k] == usize::MAX {
                relabel[k] = next;
                next += 1;
            }
            relabel[k]
        })
        .collect()
}

/// Mean of `dist[a, b]` over `a` in group `k`, `b` in group `l`; the
/// diagonal is zero
pub fn aggregate_distance(dist: &DMatrix<f32>, members: &[Vec<usize>]) -> DMatrix<f32> {
    let kk = members.len();

    let upper: Vec<(usize, usize, f32)> = (0..kk)
        .flat_map(|k| ((k + 1)..kk).map(move |l| (k, l)))
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(k, l)| {
            let mut tot = 0_f64;
            for &a in &members[k] {
                for &b in &members[l] {
                    tot += dist[(a, b)] as f64;
                }
            }
            let npairs = (members[k].len() * members[l].len()).max(1) as f64;
            (k, l, (tot / npairs) as f32)
        })
        .collect();

    let mut ret = DMatrix::<f32>::zeros(kk, kk);
    for (k, l, d) in upper {
        ret[(k, l)] = d;
        ret[(l, k)] = d;
    }
    ret
}

/// Combine member columns of `expression` (genes x cells)
pub fn aggregate_expression(
    expression: &DMatrix<f32>,
    members: &[Vec<usize>],
    aggregation: Aggregation,
) -> DMatrix<f32> {
    let columns: Vec<_> = members
        .par_iter()
        .map(|cells| {
            let mut acc = nalgebra::DVector::<f32>::zeros(expression.nrows());
            for &c in cells {
                acc += expression.column(c);
            }
            if aggregation == Aggregation::Mean && !cells.is_empty() {
                acc /= cells.len() as f32;
            }
            acc
        })
        .collect();
    DMatrix::from_columns(&columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use matrix_util::traits::MatOps;

    fn blobs() -> (DMatrix<f32>, DMatrix<f32>, DMatrix<f32>) {
        // 3 blobs of 4 cells along a line
        let emb = DMatrix::from_fn(12, 1, |i, _| (i / 4) as f32 * 10.0 + (i % 4) as f32 * 0.1);
        let dist = emb.pairwise_row_distances();
        let expr = DMatrix::from_fn(2, 12, |g, c| if g == 0 { 1.0 } else { c as f32 });
        (emb, dist, expr)
    }

    #[test]
    fn test_every_meta_cell_has_members() -> anyhow::Result<()> {
        let (emb, dist, expr) = blobs();
        let args = CoarseGrainArgs {
            num_meta_cells: 3,
            ..Default::default()
        };
        let cg = coarse_grain(&emb, &dist, &expr, &args)?;
        assert_eq!(cg.sizes, vec![4, 4, 4]);
        assert_eq!(cg.membership, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
        assert_eq!(cg.dist.nrows(), 3);
        assert_eq!(cg.dist[(1, 1)], 0.0);
        assert_abs_diff_eq!(cg.dist[(0, 1)], 10.0, epsilon = 1e-4);
        assert_abs_diff_eq!(cg.dist[(0, 2)], 20.0, epsilon = 1e-4);
        assert_eq!(cg.dist.max_asymmetry(), 0.0);

        // sums keep the total mass
        assert_abs_diff_eq!(cg.expression.row(0).sum(), 12.0);
        assert_abs_diff_eq!(cg.expression.row(1).sum(), expr.row(1).sum());
        Ok(())
    }

    #[test]
    fn test_mean_aggregation() -> anyhow::Result<()> {
        let (emb, dist, expr) = blobs();
        let args = CoarseGrainArgs {
            num_meta_cells: 3,
            aggregation: Aggregation::Mean,
            ..Default::default()
        };
        let cg = coarse_grain(&emb, &dist, &expr, &args)?;
        assert_abs_diff_eq!(cg.expression[(0, 2)], 1.0);
        assert_abs_diff_eq!(cg.expression[(1, 0)], 1.5);
        Ok(())
    }

    #[test]
    fn test_invalid_cluster_count() {
        let (emb, dist, expr) = blobs();
        for kk in [0, 12, 20] {
            let args = CoarseGrainArgs {
                num_meta_cells: kk,
                ..Default::default()
            };
            assert!(matches!(
                coarse_grain(&emb, &dist, &expr, &args),
                Err(TrajError::InvalidClusterCount { .. })
            ));
        }
    }
}
