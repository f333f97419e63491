//! Geodesic cell-cell distances on a kNN graph.

use crate::cancel::CancelToken;
use crate::error::{Result, Stage, TrajError};

use indicatif::ParallelProgressIterator;
use log::{info, warn};
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
pub struct GraphDistanceArgs {
    /// number of nearest neighbours per cell
    pub knn: usize,
    /// largest number of connected components tolerated
    pub max_components: usize,
    /// brute-force neighbour search (HNSW otherwise)
    pub exact: bool,
    pub block_size: usize,
}

impl Default for GraphDistanceArgs {
    fn default() -> Self {
        Self {
            knn: 5,
            max_components: 1,
            exact: true,
            block_size: 1000,
        }
    }
}

pub struct GraphDistance {
    /// symmetric `n x n` shortest-path lengths; `INFINITY` across components
    pub dist: DMatrix<f32>,
    /// connected component of each cell
    pub membership: Vec<usize>,
    pub n_components: usize,
    /// number of unordered pairs `i < j` with no connecting path
    pub unreachable_pairs: usize,
}

impl GraphDistance {
    /// Replace unreachable distances by `factor` times the largest
    /// finite distance. Returns the number of cells replaced.
    pub fn cap_unreachable(&mut self, factor: f32) -> usize {
        let max_finite = self
            .dist
            .iter()
            .filter(|x| x.is_finite())
            .fold(0_f32, |acc, &x| acc.max(x));
        let cap = factor * max_finite;
        let mut nreplaced = 0;
        for x in self.dist.iter_mut() {
            if !x.is_finite() {
                *x = cap;
                nreplaced += 1;
            }
        }
        if nreplaced > 0 {
            warn!(
                "capped {} unreachable distances at {} ({} x {})",
                nreplaced, cap, factor, max_finite
            );
        }
        nreplaced
    }

    pub fn is_connected(&self) -> bool {
        self.n_components == 1
    }
}

/// Build a kNN graph over the rows of `embedding` (cells x dims) and
/// compute all-pairs shortest paths.
///
/// Fails with `Connectivity` if the graph has more than
/// `args.max_components` components; otherwise cross-component pairs are
/// left at `INFINITY` and reported with a warning.
pub fn graph_distance(
    embedding: &DMatrix<f32>,
    args: &GraphDistanceArgs,
    cancel: &CancelToken,
) -> Result<GraphDistance> {
    let nn = embedding.nrows();

    if args.knn < 1 {
        return Err(TrajError::parameter(
            Stage::GraphDistance,
            "knn",
            args.knn,
            "need at least one neighbour",
        ));
    }

    if nn < args.knn + 1 {
        return Err(TrajError::parameter(
            Stage::GraphDistance,
            "knn",
            args.knn,
            format!("embedding has {} cells, need at least knn + 1", nn),
        ));
    }

    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(TrajError::parameter(
            Stage::GraphDistance,
            "embedding",
            format!("{} x {}", nn, embedding.ncols()),
            "all coordinates must be finite",
        ));
    }

    let graph = KnnGraph::from_rows(
        embedding,
        KnnGraphArgs {
            knn: args.knn,
            block_size: args.block_size,
            exact: args.exact,
        },
    )?;

    info!(
        "kNN graph: {} cells, {} edges (k = {})",
        graph.num_nodes(),
        graph.num_edges(),
        args.knn
    );

    let (membership, n_components) = graph.connected_components();

    let mut sizes = vec![0_usize; n_components];
    membership.iter().for_each(|&k| sizes[k] += 1);
    let reachable: usize = sizes.iter().map(|s| s * (s - 1) / 2).sum();
    let unreachable_pairs = nn * (nn - 1) / 2 - reachable;

    if n_components > args.max_components {
        return Err(TrajError::Connectivity {
            stage: Stage::GraphDistance,
            components: n_components,
            max_components: args.max_components,
            unreachable_pairs,
        });
    }

    if n_components > 1 {
        warn!(
            "kNN graph has {} components; {} pairs are unreachable",
            n_components, unreachable_pairs
        );
    }

    let dist = all_pairs_shortest_paths(&graph, cancel)?;

    Ok(GraphDistance {
        dist,
        membership,
        n_components,
        unreachable_pairs,
    })
}

/// Dijkstra from every node, in parallel over sources. The result is
/// made exactly symmetric by keeping the smaller of the two directions.
pub fn all_pairs_shortest_paths(graph: &KnnGraph, cancel: &CancelToken) -> Result<DMatrix<f32>> {
    let nn = graph.num_nodes();

    let rows = (0..nn)
        .into_par_iter()
        .progress_count(nn as u64)
        .map(|source| -> Result<Vec<f32>> {
            cancel.check(Stage::GraphDistance)?;
            Ok(dijkstra(graph, source))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut dist = DMatrix::<f32>::from_fn(nn, nn, |i, j| rows[i][j]);

    for i in 0..nn {
        dist[(i, i)] = 0.0;
        for j in (i + 1)..nn {
            let d = dist[(i, j)].min(dist[(j, i)]);
            dist[(i, j)] = d;
            dist[(j, i)] = d;
        }
    }

    Ok(dist)
}

#[derive(Copy, Clone, PartialEq)]
struct HeapItem {
    cost: f32,
    node: usize,
}

impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on cost, then node index
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn dijkstra(graph: &KnnGraph, source: usize) -> Vec<f32> {
    let mut dist = vec![f32::INFINITY; graph.num_nodes()];
    let mut heap = BinaryHeap::new();

    dist[source] = 0.0;
    heap.push(HeapItem {
        cost: 0.0,
        node: source,
    });

    while let Some(HeapItem { cost, node }) = heap.pop() {
        if cost > dist[node] {
            continue;
        }
        for (&next, &w) in graph
            .neighbors(node)
            .iter()
            .zip(graph.neighbor_distances(node))
        {
            let alt = cost + w;
            if alt < dist[next] {
                dist[next] = alt;
                heap.push(HeapItem {
                    cost: alt,
                    node: next,
                });
            }
        }
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line(n: usize) -> DMatrix<f32> {
        DMatrix::from_fn(n, 1, |i, _| i as f32)
    }

    #[test]
    fn test_line_is_path_sum() -> anyhow::Result<()> {
        let args = GraphDistanceArgs {
            knn: 2,
            ..Default::default()
        };
        let gd = graph_distance(&line(4), &args, &CancelToken::new())?;
        assert!(gd.is_connected());
        for i in 0..4 {
            for j in 0..4 {
                assert_abs_diff_eq!(gd.dist[(i, j)], (i as f32 - j as f32).abs());
            }
        }
        Ok(())
    }

    #[test]
    fn test_too_few_cells_for_knn() {
        let args = GraphDistanceArgs {
            knn: 4,
            ..Default::default()
        };
        let err = graph_distance(&line(4), &args, &CancelToken::new());
        assert!(matches!(err, Err(TrajError::Parameter { name: "knn", .. })));
    }

    fn two_islands() -> DMatrix<f32> {
        DMatrix::from_row_slice(6, 1, &[0.0, 1.0, 2.0, 100.0, 101.0, 102.0])
    }

    #[test]
    fn test_disconnected_graph_is_reported() {
        let args = GraphDistanceArgs {
            knn: 2,
            ..Default::default()
        };
        match graph_distance(&two_islands(), &args, &CancelToken::new()) {
            Err(TrajError::Connectivity {
                components,
                unreachable_pairs,
                ..
            }) => {
                assert_eq!(components, 2);
                assert_eq!(unreachable_pairs, 9);
            }
            _ => panic!("expected a connectivity error"),
        }
    }

    #[test]
    fn test_tolerated_components_and_capping() -> anyhow::Result<()> {
        let args = GraphDistanceArgs {
            knn: 2,
            max_components: 2,
            ..Default::default()
        };
        let mut gd = graph_distance(&two_islands(), &args, &CancelToken::new())?;
        assert_eq!(gd.n_components, 2);
        assert!(gd.dist[(0, 5)].is_infinite());
        assert_abs_diff_eq!(gd.dist[(3, 5)], 2.0);

        let nreplaced = gd.cap_unreachable(2.0);
        assert_eq!(nreplaced, 18);
        assert_abs_diff_eq!(gd.dist[(0, 5)], 4.0);
        Ok(())
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let args = GraphDistanceArgs {
            knn: 2,
            ..Default::default()
        };
        let err = graph_distance(&line(5), &args, &cancel);
        assert!(matches!(err, Err(TrajError::Cancelled { .. })));
    }
}
