//! Diffusion-map embedding of a symmetric distance matrix.
//!
//! Affinities use an adaptive Gaussian kernel
//! `exp(-d_ij^2 / (s_i s_j))` where `s_i` is the distance from item `i`
//! to its `knn`-th nearest neighbour. Distances that were never computed
//! contribute zero affinity.

use crate::dist_matrix::DistMatrix;
use crate::error::{Result, Stage, TrajError};

use log::{debug, info};
use nalgebra::{DMatrix, DVector, SymmetricEigen};

#[derive(Debug, Clone)]
pub struct DiffusionArgs {
    /// neighbour rank that sets each item's kernel bandwidth
    pub knn: usize,
    /// number of non-trivial dimensions to keep
    pub n_components: usize,
    /// diffusion time; coordinates are scaled by `lambda^t`
    pub t: u32,
    /// density normalization exponent (1 = Laplace-Beltrami)
    pub alpha: f64,
    pub eig_tolerance: f64,
    pub max_eig_iter: usize,
    /// eigenvalues at or below this magnitude count as degenerate
    pub min_eigenvalue: f64,
}

impl Default for DiffusionArgs {
    fn default() -> Self {
        Self {
            knn: 10,
            n_components: 30,
            t: 1,
            alpha: 1.0,
            eig_tolerance: 1e-10,
            max_eig_iter: 10_000,
            min_eigenvalue: 1e-8,
        }
    }
}

pub struct DiffusionMap {
    /// `N x K` diffusion coordinates
    pub coords: DMatrix<f32>,
    /// `K` non-trivial eigenvalues, decreasing in magnitude
    pub eigenvalues: DVector<f32>,
}

fn validate_distance(dist: &DistMatrix, stage: Stage) -> Result<()> {
    let nn = dist.nrows();
    if dist.ncols() != nn {
        return Err(TrajError::parameter(
            stage,
            "distance",
            format!("{} x {}", nn, dist.ncols()),
            "must be square",
        ));
    }

    let mut dmax = 0_f32;
    for i in 0..nn {
        for (_, d) in dist.row_observed(i) {
            if d < 0.0 || d.is_nan() {
                return Err(TrajError::parameter(
                    stage,
                    "distance",
                    d,
                    "entries must be non-negative",
                ));
            }
            if d.is_finite() {
                dmax = dmax.max(d);
            }
        }
    }

    let asym = dist.max_asymmetry();
    if asym > 1e-4 * dmax.max(1.0) {
        return Err(TrajError::parameter(
            stage,
            "distance",
            format!("asymmetry {}", asym),
            "must be symmetric",
        ));
    }
    Ok(())
}

/// Distance to the `knn`-th nearest observed neighbour of each item,
/// excluding itself. Zero bandwidths fall back to the nearest positive
/// distance, then to one.
fn bandwidths(dist: &DistMatrix, knn: usize) -> Vec<f64> {
    (0..dist.nrows())
        .map(|i| {
            let mut row: Vec<f64> = dist
                .row_observed(i)
                .into_iter()
                .filter(|&(j, d)| j != i && d.is_finite())
                .map(|(_, d)| d as f64)
                .collect();
            row.sort_by(|a, b| a.total_cmp(b));

            let sigma = if row.is_empty() {
                0.0
            } else {
                row[(knn.max(1) - 1).min(row.len() - 1)]
            };

            if sigma > 0.0 {
                sigma
            } else {
                row.into_iter().find(|&d| d > 0.0).unwrap_or(1.0)
            }
        })
        .collect()
}

/// Adaptive Gaussian affinities over all observed pairs; unit diagonal
pub fn adaptive_kernel(dist: &DistMatrix, knn: usize) -> DMatrix<f64> {
    let nn = dist.nrows();
    let sigma = bandwidths(dist, knn);
    let mut kernel = DMatrix::<f64>::zeros(nn, nn);
    for i in 0..nn {
        for (j, d) in dist.row_observed(i) {
            if d.is_finite() {
                let d = d as f64;
                kernel[(i, j)] = (-d * d / (sigma[i] * sigma[j])).exp();
            }
        }
        kernel[(i, i)] = 1.0;
    }
    kernel
}

/// Row-stochastic random-walk operator on the `knn`-nearest-neighbour
/// graph of `dist`, symmetrized by union before normalization
pub fn random_walk_matrix(dist: &DistMatrix, knn: usize) -> Result<DMatrix<f64>> {
    validate_distance(dist, Stage::Trajectory)?;

    let nn = dist.nrows();
    if knn < 1 {
        return Err(TrajError::parameter(
            Stage::Trajectory,
            "knn",
            knn,
            "need at least one neighbour",
        ));
    }

    let sigma = bandwidths(dist, knn);
    let mut kernel = DMatrix::<f64>::zeros(nn, nn);

    for i in 0..nn {
        let mut row: Vec<(usize, f32)> = dist
            .row_observed(i)
            .into_iter()
            .filter(|&(j, d)| j != i && d.is_finite())
            .collect();
        row.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        row.truncate(knn);

        for (j, d) in row {
            let d = d as f64;
            let w = (-d * d / (sigma[i] * sigma[j])).exp();
            kernel[(i, j)] = kernel[(i, j)].max(w);
            kernel[(j, i)] = kernel[(j, i)].max(w);
        }
        kernel[(i, i)] = 1.0;
    }

    for mut row in kernel.row_iter_mut() {
        let tot = row.sum();
        row /= tot;
    }

    Ok(kernel)
}

/// Diffusion-map embedding of `dist` (N x N).
///
/// The trivial eigenvector is dropped; the remaining `n_components`
/// right eigenvectors are scaled by `lambda^t`. Each axis is oriented so
/// its largest-magnitude entry is positive.
pub fn diffusion_map(dist: &DistMatrix, args: &DiffusionArgs) -> Result<DiffusionMap> {
    let stage = Stage::Diffusion;
    validate_distance(dist, stage)?;

    let nn = dist.nrows();
    let kk = args.n_components;

    if kk < 1 || kk >= nn {
        return Err(TrajError::parameter(
            stage,
            "n_components",
            kk,
            format!("must be in 1..{} for {} items", nn, nn),
        ));
    }

    if args.knn < 1 {
        return Err(TrajError::parameter(
            stage,
            "knn",
            args.knn,
            "need at least one neighbour",
        ));
    }

    let mut kernel = adaptive_kernel(dist, args.knn);

    // density normalization
    if args.alpha > 0.0 {
        let q: Vec<f64> = kernel.row_iter().map(|r| r.sum().powf(args.alpha)).collect();
        for i in 0..nn {
            for j in 0..nn {
                kernel[(i, j)] /= q[i] * q[j];
            }
        }
    }

    // symmetric conjugate of the Markov operator
    let dsqrt: Vec<f64> = kernel.row_iter().map(|r| r.sum().sqrt()).collect();
    let sym = DMatrix::<f64>::from_fn(nn, nn, |i, j| kernel[(i, j)] / (dsqrt[i] * dsqrt[j]));

    let eig = SymmetricEigen::try_new(sym, args.eig_tolerance, args.max_eig_iter).ok_or_else(
        || {
            TrajError::Other(anyhow::anyhow!(
                "[{}] eigendecomposition did not converge in {} iterations",
                stage,
                args.max_eig_iter
            ))
        },
    )?;

    let mut order: Vec<usize> = (0..nn).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .abs()
            .total_cmp(&eig.eigenvalues[a].abs())
            .then(a.cmp(&b))
    });

    // the trivial eigenvector (eigenvalue one) is sqrt(degree) up to scale
    let dnorm = dsqrt.iter().map(|x| x * x).sum::<f64>().sqrt();

    let nontrivial: Vec<usize> = order[1..]
        .iter()
        .copied()
        .filter(|&k| eig.eigenvalues[k].abs() > args.min_eigenvalue)
        .take(kk)
        .collect();

    debug!(
        "top eigenvalues: {:?}",
        order
            .iter()
            .take(kk + 1)
            .map(|&k| eig.eigenvalues[k])
            .collect::<Vec<_>>()
    );

    if nontrivial.len() < kk {
        return Err(TrajError::DegenerateSpectrum {
            stage,
            requested: kk,
            found: nontrivial.len(),
            min_eigenvalue: args.min_eigenvalue,
        });
    }

    let mut coords = DMatrix::<f32>::zeros(nn, kk);
    let mut eigenvalues = DVector::<f32>::zeros(kk);

    for (d, &k) in nontrivial.iter().enumerate() {
        let lambda = eig.eigenvalues[k];
        let scale = lambda.powi(args.t as i32);
        let uk = eig.eigenvectors.column(k);

        // right eigenvector of the Markov operator, relative to the trivial one
        let mut psi: Vec<f64> = (0..nn).map(|i| uk[i] / dsqrt[i] * dnorm * scale).collect();

        let pivot = psi
            .iter()
            .enumerate()
            .fold((0, 0_f64), |(bi, bv), (i, &x)| {
                if x.abs() > bv {
                    (i, x.abs())
                } else {
                    (bi, bv)
                }
            })
            .0;
        if psi[pivot] < 0.0 {
            psi.iter_mut().for_each(|x| *x = -*x);
        }

        for (i, x) in psi.into_iter().enumerate() {
            coords[(i, d)] = x as f32;
        }
        eigenvalues[d] = lambda as f32;
    }

    info!(
        "diffusion map: {} items, {} components, leading eigenvalue {:.4}",
        nn,
        kk,
        eigenvalues[0]
    );

    Ok(DiffusionMap {
        coords,
        eigenvalues,
    })
}
