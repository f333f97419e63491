//! Discrete optimal transport between two distributions on a shared
//! support with a given ground cost.
//!
//! Two solvers share the [`TransportSolver`] interface:
//!
//! * [`ExactEmd`] solves the transportation linear program with the
//!   network simplex on the bipartite support graph (north-west corner
//!   start, MODI potentials, Dantzig pricing).
//!
//! * [`Sinkhorn`] solves the entropy-regularized problem with log-domain
//!   scaling iterations. Its raw cost is biased upwards; callers subtract
//!   the per-distribution self terms (see [`TransportSolver::distance`]).
//!
//! Computations run in `f64`, matrices come in as `f32`.

use nalgebra::DMatrix;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportResult {
    /// transport cost (Wasserstein-1 for a metric ground cost)
    pub distance: f32,
    /// whether the solver met its tolerance within the iteration cap
    pub converged: bool,
    pub iterations: usize,
}

pub trait TransportSolver: Sync + Send {
    /// Optimal transport cost between `a` and `b`, probability vectors
    /// over the rows/columns of `cost`
    fn solve(&self, cost: &DMatrix<f32>, a: &[f64], b: &[f64]) -> TransportResult;

    /// Cost of transporting `a` onto itself under this solver; zero for
    /// an exact solver
    fn self_bias(&self, _cost: &DMatrix<f32>, _a: &[f64]) -> TransportResult {
        TransportResult {
            distance: 0.0,
            converged: true,
            iterations: 0,
        }
    }

    /// Debiased distance given precomputed self terms, clamped at zero.
    /// Converged only if the self terms converged too.
    fn distance(
        &self,
        cost: &DMatrix<f32>,
        a: &[f64],
        b: &[f64],
        bias_a: &TransportResult,
        bias_b: &TransportResult,
    ) -> TransportResult {
        let res = self.solve(cost, a, b);
        let d = res.distance as f64 - 0.5 * (bias_a.distance as f64 + bias_b.distance as f64);
        TransportResult {
            distance: d.max(0.0) as f32,
            converged: res.converged && bias_a.converged && bias_b.converged,
            iterations: res.iterations,
        }
    }
}

/// Positive-mass support of a distribution, renormalized
fn support(p: &[f64]) -> (Vec<usize>, Vec<f64>) {
    let idx: Vec<usize> = (0..p.len()).filter(|&i| p[i] > 0.0).collect();
    let tot: f64 = idx.iter().map(|&i| p[i]).sum();
    let mass = idx.iter().map(|&i| p[i] / tot).collect();
    (idx, mass)
}

////////////////////////////////////
// exact network simplex solver   //
////////////////////////////////////

#[derive(Debug, Clone)]
pub struct ExactEmd {
    pub max_iter: usize,
    /// reduced costs above `-tolerance * max cost` count as optimal
    pub tolerance: f64,
}

impl Default for ExactEmd {
    fn default() -> Self {
        Self {
            max_iter: 100_000,
            tolerance: 1e-9,
        }
    }
}

/// A basic cell of the transportation tableau
#[derive(Debug, Clone, Copy)]
struct BasicCell {
    row: usize,
    col: usize,
    flow: f64,
}

impl TransportSolver for ExactEmd {
    fn solve(&self, cost: &DMatrix<f32>, a: &[f64], b: &[f64]) -> TransportResult {
        if a == b {
            return TransportResult {
                distance: 0.0,
                converged: true,
                iterations: 0,
            };
        }

        let (rows, supply) = support(a);
        let (cols, demand) = support(b);
        let (mm, kk) = (rows.len(), cols.len());

        if mm == 0 || kk == 0 {
            return TransportResult {
                distance: 0.0,
                converged: false,
                iterations: 0,
            };
        }

        let cc: Vec<Vec<f64>> = rows
            .iter()
            .map(|&i| cols.iter().map(|&j| cost[(i, j)] as f64).collect())
            .collect();

        let cmax = cc
            .iter()
            .flatten()
            .fold(0_f64, |acc, &c| acc.max(c.abs()));
        let tol = self.tolerance * cmax.max(1.0);

        let mut basis = north_west_corner(&supply, &demand);
        let mut is_basic = vec![vec![false; kk]; mm];
        for cell in &basis {
            is_basic[cell.row][cell.col] = true;
        }

        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iter {
            let (u, v) = potentials(&basis, &cc, mm, kk);

            // Dantzig: most negative reduced cost enters
            let mut entering = None;
            let mut best = -tol;
            for (i, cc_i) in cc.iter().enumerate() {
                for (j, &c_ij) in cc_i.iter().enumerate() {
                    if is_basic[i][j] {
                        continue;
                    }
                    let reduced = c_ij - u[i] - v[j];
                    if reduced < best {
                        best = reduced;
                        entering = Some((i, j));
                    }
                }
            }

            let Some((ei, ej)) = entering else {
                converged = true;
                break;
            };

            // basis cells on the tree path from column ej back to row ei
            let path = tree_path(&basis, mm, kk, ei, ej);

            // alternate -, +, -, ... starting next to column ej
            let mut theta = f64::INFINITY;
            let mut leaving = usize::MAX;
            for (pos, &b) in path.iter().enumerate() {
                if pos % 2 == 0 && basis[b].flow < theta {
                    theta = basis[b].flow;
                    leaving = b;
                }
            }

            if leaving == usize::MAX {
                break;
            }

            for (pos, &b) in path.iter().enumerate() {
                if pos % 2 == 0 {
                    basis[b].flow -= theta;
                } else {
                    basis[b].flow += theta;
                }
            }

            let old = basis[leaving];
            is_basic[old.row][old.col] = false;
            is_basic[ei][ej] = true;
            basis[leaving] = BasicCell {
                row: ei,
                col: ej,
                flow: theta,
            };

            iterations += 1;
        }

        let distance: f64 = basis
            .iter()
            .map(|cell| cell.flow.max(0.0) * cc[cell.row][cell.col])
            .sum();

        TransportResult {
            distance: distance as f32,
            converged,
            iterations,
        }
    }
}

/// Initial basic feasible solution with exactly `m + k - 1` cells;
/// degenerate steps add zero-flow cells so the basis stays a spanning tree
fn north_west_corner(supply: &[f64], demand: &[f64]) -> Vec<BasicCell> {
    let (mm, kk) = (supply.len(), demand.len());
    let mut supply = supply.to_vec();
    let mut demand = demand.to_vec();
    let mut basis = Vec::with_capacity(mm + kk - 1);

    let (mut i, mut j) = (0, 0);
    loop {
        let x = supply[i].min(demand[j]);
        basis.push(BasicCell {
            row: i,
            col: j,
            flow: x,
        });
        supply[i] -= x;
        demand[j] -= x;

        if i == mm - 1 && j == kk - 1 {
            break;
        }
        if i == mm - 1 {
            j += 1;
        } else if j == kk - 1 || supply[i] <= demand[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    basis
}

/// Adjacency of the basis tree; rows are nodes `0..m`, columns `m..m+k`
fn basis_adjacency(basis: &[BasicCell], mm: usize, kk: usize) -> Vec<Vec<(usize, usize)>> {
    let mut adj = vec![vec![]; mm + kk];
    for (b, cell) in basis.iter().enumerate() {
        adj[cell.row].push((mm + cell.col, b));
        adj[mm + cell.col].push((cell.row, b));
    }
    adj
}

/// Dual potentials with `u_i + v_j = c_ij` on basic cells and `u_0 = 0`
fn potentials(basis: &[BasicCell], cc: &[Vec<f64>], mm: usize, kk: usize) -> (Vec<f64>, Vec<f64>) {
    let adj = basis_adjacency(basis, mm, kk);
    let mut pot = vec![f64::NAN; mm + kk];
    let mut queue = VecDeque::new();

    for root in 0..(mm + kk) {
        if !pot[root].is_nan() {
            continue;
        }
        // the basis is a spanning tree, so this runs once
        pot[root] = 0.0;
        queue.push_back(root);
        while let Some(node) = queue.pop_front() {
            for &(next, b) in &adj[node] {
                if pot[next].is_nan() {
                    let c = cc[basis[b].row][basis[b].col];
                    pot[next] = c - pot[node];
                    queue.push_back(next);
                }
            }
        }
    }

    let v = pot.split_off(mm);
    (pot, v)
}

/// Basis indices along the tree path from column node `col` to row node
/// `row`, ordered from the column end
fn tree_path(basis: &[BasicCell], mm: usize, kk: usize, row: usize, col: usize) -> Vec<usize> {
    let adj = basis_adjacency(basis, mm, kk);
    let mut parent: Vec<Option<(usize, usize)>> = vec![None; mm + kk];
    let mut visited = vec![false; mm + kk];
    let mut queue = VecDeque::new();

    visited[row] = true;
    queue.push_back(row);
    let target = mm + col;

    while let Some(node) = queue.pop_front() {
        if node == target {
            break;
        }
        for &(next, b) in &adj[node] {
            if !visited[next] {
                visited[next] = true;
                parent[next] = Some((node, b));
                queue.push_back(next);
            }
        }
    }

    let mut path = vec![];
    let mut node = target;
    while let Some((prev, b)) = parent[node] {
        path.push(b);
        node = prev;
    }
    path
}

//////////////////////////////////////
// entropic (Sinkhorn) solver       //
//////////////////////////////////////

#[derive(Debug, Clone)]
pub struct Sinkhorn {
    /// regularization, relative to the largest ground cost
    pub epsilon: f64,
    pub max_iter: usize,
    /// L1 error of the row marginal at convergence
    pub tolerance: f64,
}

impl Default for Sinkhorn {
    fn default() -> Self {
        Self {
            epsilon: 0.05,
            max_iter: 1000,
            tolerance: 1e-6,
        }
    }
}

fn log_sum_exp(xs: impl Iterator<Item = f64>) -> f64 {
    let xs: Vec<f64> = xs.collect();
    let mx = xs.iter().fold(f64::NEG_INFINITY, |acc, &x| acc.max(x));
    if mx == f64::NEG_INFINITY {
        return mx;
    }
    mx + xs.iter().map(|&x| (x - mx).exp()).sum::<f64>().ln()
}

impl TransportSolver for Sinkhorn {
    fn solve(&self, cost: &DMatrix<f32>, a: &[f64], b: &[f64]) -> TransportResult {
        let (rows, mu) = support(a);
        let (cols, nu) = support(b);
        let (mm, kk) = (rows.len(), cols.len());

        if mm == 0 || kk == 0 {
            return TransportResult {
                distance: 0.0,
                converged: false,
                iterations: 0,
            };
        }

        let cc: Vec<Vec<f64>> = rows
            .iter()
            .map(|&i| cols.iter().map(|&j| cost[(i, j)] as f64).collect())
            .collect();

        let cmax = cc.iter().flatten().fold(0_f64, |acc, &c| acc.max(c));
        let eps = self.epsilon * if cmax > 0.0 { cmax } else { 1.0 };

        let log_mu: Vec<f64> = mu.iter().map(|x| x.ln()).collect();
        let log_nu: Vec<f64> = nu.iter().map(|x| x.ln()).collect();

        let mut f = vec![0_f64; mm];
        let mut g = vec![0_f64; kk];

        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iter {
            for i in 0..mm {
                f[i] = -eps * log_sum_exp((0..kk).map(|j| log_nu[j] + (g[j] - cc[i][j]) / eps));
            }
            for j in 0..kk {
                g[j] = -eps * log_sum_exp((0..mm).map(|i| log_mu[i] + (f[i] - cc[i][j]) / eps));
            }
            iterations += 1;

            // columns are exact after the g-update; check rows
            let err: f64 = (0..mm)
                .map(|i| {
                    let row: f64 = (0..kk)
                        .map(|j| (log_mu[i] + log_nu[j] + (f[i] + g[j] - cc[i][j]) / eps).exp())
                        .sum();
                    (row - mu[i]).abs()
                })
                .sum();

            if err < self.tolerance {
                converged = true;
                break;
            }
        }

        let mut distance = 0_f64;
        for i in 0..mm {
            for j in 0..kk {
                let p_ij = (log_mu[i] + log_nu[j] + (f[i] + g[j] - cc[i][j]) / eps).exp();
                distance += p_ij * cc[i][j];
            }
        }

        TransportResult {
            distance: distance as f32,
            converged,
            iterations,
        }
    }

    fn self_bias(&self, cost: &DMatrix<f32>, a: &[f64]) -> TransportResult {
        self.solve(cost, a, a)
    }
}
