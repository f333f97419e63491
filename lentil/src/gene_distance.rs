//! Wasserstein distances between gene expression distributions.

use crate::cancel::CancelToken;
use crate::dist_matrix::DistMatrix;
use crate::error::{Result, Stage, TrajError};
use crate::ot_solver::{ExactEmd, Sinkhorn, TransportResult, TransportSolver};

use clap::ValueEnum;
use indicatif::ParallelProgressIterator;
use log::{info, warn};
use matrix_util::traits::MatOps;
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::collections::BTreeSet;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum TransportMethod {
    /// exact network simplex
    Exact,
    /// debiased entropic approximation
    Sinkhorn,
}

#[derive(Debug, Clone)]
pub struct TransportArgs {
    pub method: TransportMethod,
    pub max_iter: usize,
    pub tolerance: f64,
    /// entropic regularization relative to the largest cost (Sinkhorn only)
    pub epsilon: f64,
}

impl Default for TransportArgs {
    fn default() -> Self {
        let exact = ExactEmd::default();
        Self {
            method: TransportMethod::Exact,
            max_iter: exact.max_iter,
            tolerance: exact.tolerance,
            epsilon: Sinkhorn::default().epsilon,
        }
    }
}

impl TransportArgs {
    pub fn sinkhorn() -> Self {
        let sk = Sinkhorn::default();
        Self {
            method: TransportMethod::Sinkhorn,
            max_iter: sk.max_iter,
            tolerance: sk.tolerance,
            epsilon: sk.epsilon,
        }
    }

    pub fn build_solver(&self) -> Box<dyn TransportSolver> {
        match self.method {
            TransportMethod::Exact => Box::new(ExactEmd {
                max_iter: self.max_iter,
                tolerance: self.tolerance,
            }),
            TransportMethod::Sinkhorn => Box::new(Sinkhorn {
                epsilon: self.epsilon,
                max_iter: self.max_iter,
                tolerance: self.tolerance,
            }),
        }
    }
}

/// Which gene pairs to compute
#[derive(Debug, Clone)]
pub enum GenePairs {
    All,
    /// unordered pairs; `(i, j)` and `(j, i)` are the same pair
    Restricted(Vec<(usize, usize)>),
}

pub struct GeneDistances {
    /// `Dense` for all pairs, `Sparse` when restricted
    pub dist: DistMatrix,
    /// pairs `i < j` whose solver hit the iteration cap
    pub unconverged: Vec<(usize, usize)>,
    /// number of pairs computed
    pub num_pairs: usize,
}

/// Rows of `expression` (genes x cells) as probability vectors.
///
/// Fails on a row with negative or non-finite entries or zero total.
pub fn normalize_distributions(expression: &DMatrix<f32>) -> Result<Vec<Vec<f64>>> {
    for (g, row) in expression.row_iter().enumerate() {
        if let Some(x) = row.iter().find(|x| !x.is_finite() || **x < 0.0) {
            return Err(TrajError::InvalidDistribution {
                stage: Stage::Transport,
                index: g,
                reason: format!("contains {}", x),
            });
        }
    }

    let mut probs: DMatrix<f64> = expression.map(|x| x as f64);
    if let Some(&g) = probs.normalize_rows_l1_inplace().first() {
        return Err(TrajError::InvalidDistribution {
            stage: Stage::Transport,
            index: g,
            reason: "zero total expression".to_string(),
        });
    }

    Ok(probs
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect())
}

/// Wasserstein distances between the rows of `expression` (genes x
/// cells) under the ground `cost` (cells x cells).
///
/// Pairs that did not converge keep their last estimate and are listed
/// in `unconverged`. Cancellation is checked between pairs.
pub fn gene_distances(
    cost: &DMatrix<f32>,
    expression: &DMatrix<f32>,
    pairs: &GenePairs,
    args: &TransportArgs,
    cancel: &CancelToken,
) -> Result<GeneDistances> {
    let ncells = cost.nrows();
    let ngenes = expression.nrows();

    if cost.ncols() != ncells || expression.ncols() != ncells {
        return Err(TrajError::parameter(
            Stage::Transport,
            "cost",
            format!("{} x {}", cost.nrows(), cost.ncols()),
            format!(
                "must be square and match the {} expression columns",
                expression.ncols()
            ),
        ));
    }

    if let Some(x) = cost.iter().find(|x| !x.is_finite() || **x < 0.0) {
        return Err(TrajError::parameter(
            Stage::Transport,
            "cost",
            x,
            "ground costs must be finite and non-negative; cap unreachable distances first",
        ));
    }

    let pair_list: Vec<(usize, usize)> = match pairs {
        GenePairs::All => (0..ngenes)
            .flat_map(|i| ((i + 1)..ngenes).map(move |j| (i, j)))
            .collect(),
        GenePairs::Restricted(pp) => {
            let mut canonical = BTreeSet::new();
            for &(i, j) in pp {
                if i >= ngenes || j >= ngenes {
                    return Err(TrajError::parameter(
                        Stage::Transport,
                        "pairs",
                        format!("({}, {})", i, j),
                        format!("gene index out of range (genes: {})", ngenes),
                    ));
                }
                if i != j {
                    canonical.insert((i.min(j), i.max(j)));
                }
            }
            canonical.into_iter().collect()
        }
    };

    let dists = normalize_distributions(expression)?;
    let solver = args.build_solver();

    info!(
        "computing {} of {} gene pairs over {} cells",
        pair_list.len(),
        ngenes * ngenes.saturating_sub(1) / 2,
        ncells
    );

    let mut needed = vec![false; ngenes];
    for &(i, j) in &pair_list {
        needed[i] = true;
        needed[j] = true;
    }

    let bias: Vec<TransportResult> = (0..ngenes)
        .into_par_iter()
        .map(|g| {
            if needed[g] {
                solver.self_bias(cost, &dists[g])
            } else {
                TransportResult {
                    distance: 0.0,
                    converged: true,
                    iterations: 0,
                }
            }
        })
        .collect();

    let npairs = pair_list.len();
    let results = pair_list
        .par_iter()
        .progress_count(npairs as u64)
        .map(|&(i, j)| -> Result<(usize, usize, f32, bool)> {
            cancel.check(Stage::Transport)?;
            let res = solver.distance(cost, &dists[i], &dists[j], &bias[i], &bias[j]);
            Ok((i, j, res.distance, res.converged))
        })
        .collect::<Result<Vec<_>>>()?;

    let unconverged: Vec<(usize, usize)> = results
        .iter()
        .filter(|(_, _, _, converged)| !converged)
        .map(|&(i, j, _, _)| (i, j))
        .collect();

    if !unconverged.is_empty() {
        warn!(
            "{} of {} gene pairs did not converge; kept their last estimates",
            unconverged.len(),
            npairs
        );
    }

    let dist = match pairs {
        GenePairs::All => {
            let mut mat = DMatrix::<f32>::zeros(ngenes, ngenes);
            for &(i, j, d, _) in &results {
                mat[(i, j)] = d;
                mat[(j, i)] = d;
            }
            DistMatrix::Dense(mat)
        }
        GenePairs::Restricted(_) => {
            let triplets: Vec<(usize, usize, f32)> =
                results.iter().map(|&(i, j, d, _)| (i, j, d)).collect();
            DistMatrix::from_pairs(ngenes, &triplets)
        }
    };

    Ok(GeneDistances {
        dist,
        unconverged,
        num_pairs: npairs,
    })
}

/// Gene pairs `i < j` where either gene is among the other's
/// `alpha * knn` nearest neighbours in a coarse gene distance matrix
pub fn sparsified_gene_pairs(
    coarse: &DistMatrix,
    knn: usize,
    alpha: usize,
) -> Result<Vec<(usize, usize)>> {
    if knn < 1 || alpha < 1 {
        return Err(TrajError::parameter(
            Stage::Transport,
            "alpha * knn",
            format!("{} * {}", alpha, knn),
            "both factors must be at least 1",
        ));
    }

    let nn = coarse.nrows();
    let nneighbours = alpha * knn;

    let selected: BTreeSet<(usize, usize)> = (0..nn)
        .into_par_iter()
        .flat_map_iter(|i| {
            let mut row: Vec<(usize, f32)> = coarse
                .row_observed(i)
                .into_iter()
                .filter(|&(j, d)| j != i && !d.is_nan())
                .collect();
            row.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            row.truncate(nneighbours);
            row.into_iter()
                .map(move |(j, _)| (i.min(j), i.max(j)))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    info!(
        "sparsified to {} of {} gene pairs ({} neighbours per gene)",
        selected.len(),
        nn * nn.saturating_sub(1) / 2,
        nneighbours
    );

    Ok(selected.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line_cost(n: usize) -> DMatrix<f32> {
        DMatrix::from_fn(n, n, |i, j| (i as f32 - j as f32).abs())
    }

    #[test]
    fn test_identical_genes_are_at_zero() -> anyhow::Result<()> {
        let expr = DMatrix::from_row_slice(
            3,
            4,
            &[1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.0, 5.0],
        );
        for args in [TransportArgs::default(), TransportArgs::sinkhorn()] {
            let gd = gene_distances(
                &line_cost(4),
                &expr,
                &GenePairs::All,
                &args,
                &CancelToken::new(),
            )?;
            assert_eq!(gd.dist.get(0, 1), Some(0.0));
            assert!(gd.dist.get(0, 2).unwrap_or(0.0) > 0.5);
            assert_eq!(gd.dist.get(2, 0), gd.dist.get(0, 2));
            assert_eq!(gd.num_pairs, 3);
        }
        Ok(())
    }

    #[test]
    fn test_restricted_pairs_leave_others_missing() -> anyhow::Result<()> {
        let expr = DMatrix::from_fn(4, 3, |g, c| (g + c + 1) as f32);
        let gd = gene_distances(
            &line_cost(3),
            &expr,
            &GenePairs::Restricted(vec![(2, 0), (0, 2), (1, 3)]),
            &TransportArgs::default(),
            &CancelToken::new(),
        )?;
        assert_eq!(gd.num_pairs, 2);
        assert!(gd.dist.get(0, 2).is_some());
        assert!(gd.dist.get(3, 1).is_some());
        assert_eq!(gd.dist.get(0, 1), None);
        assert_eq!(gd.dist.get(2, 2), Some(0.0));
        Ok(())
    }

    #[test]
    fn test_scale_free_mass() -> anyhow::Result<()> {
        // same shape, different total: distance zero
        let expr = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 1.0, 10.0, 0.0, 10.0]);
        let gd = gene_distances(
            &line_cost(3),
            &expr,
            &GenePairs::All,
            &TransportArgs::default(),
            &CancelToken::new(),
        )?;
        assert_abs_diff_eq!(gd.dist.get(0, 1).unwrap_or(1.0), 0.0);
        Ok(())
    }

    #[test]
    fn test_zero_gene_is_invalid() {
        let expr = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        let res = gene_distances(
            &line_cost(3),
            &expr,
            &GenePairs::All,
            &TransportArgs::default(),
            &CancelToken::new(),
        );
        assert!(matches!(
            res,
            Err(TrajError::InvalidDistribution { index: 1, .. })
        ));
    }

    #[test]
    fn test_infinite_cost_is_rejected() {
        let mut cost = line_cost(3);
        cost[(0, 2)] = f32::INFINITY;
        let expr = DMatrix::from_element(2, 3, 1.0);
        let res = gene_distances(
            &cost,
            &expr,
            &GenePairs::All,
            &TransportArgs::default(),
            &CancelToken::new(),
        );
        assert!(matches!(res, Err(TrajError::Parameter { name: "cost", .. })));
    }

    #[test]
    fn test_sparsified_pairs_are_symmetrized_knn() -> anyhow::Result<()> {
        // genes on a line: 0 1 2 3 ... 9
        let coarse = DistMatrix::Dense(line_cost(10));
        let pairs = sparsified_gene_pairs(&coarse, 1, 1)?;
        // each gene's nearest is its left or right neighbour
        assert!(pairs.iter().all(|&(i, j)| i < j && j - i == 1));
        assert!(pairs.contains(&(0, 1)));
        assert!(pairs.contains(&(8, 9)));

        let pairs = sparsified_gene_pairs(&coarse, 2, 1)?;
        assert!(pairs.iter().all(|&(i, j)| j - i <= 2));
        assert!(pairs.contains(&(0, 2)));
        Ok(())
    }
}
