use crate::knn_match::ColumnDict;
use crate::utils::create_jobs;

use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;

/// Undirected kNN graph: an edge joins `i` and `j` if either is among
/// the other's `knn` nearest neighbours
pub struct KnnGraph {
    /// symmetric `n x n` adjacency holding edge lengths
    pub adjacency: CscMatrix<f32>,
    /// canonical edges `(i, j)` with `i < j`, sorted
    pub edges: Vec<(usize, usize)>,
    /// Euclidean edge lengths, parallel to `edges`
    pub distances: Vec<f32>,
    pub n_nodes: usize,
}

pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
    /// brute-force search if true, HNSW otherwise
    pub exact: bool,
}

impl Default for KnnGraphArgs {
    fn default() -> Self {
        Self {
            knn: 5,
            block_size: 1000,
            exact: true,
        }
    }
}

/// Neighbour search over the columns of a `d x n` matrix
enum NeighbourSearch<'a> {
    Exact(&'a DMatrix<f32>),
    Hnsw(ColumnDict<usize>),
}

impl NeighbourSearch<'_> {
    /// `knn` nearest neighbours of column `i`, excluding `i` itself.
    /// Ties are broken by column index.
    fn search(&self, i: usize, knn: usize) -> anyhow::Result<(Vec<usize>, Vec<f32>)> {
        match self {
            NeighbourSearch::Exact(points) => {
                let xi = points.column(i);
                let mut dist: Vec<(usize, f32)> = (0..points.ncols())
                    .filter(|&j| j != i)
                    .map(|j| (j, points.column(j).metric_distance(&xi)))
                    .collect();
                let kk = knn.min(dist.len());
                let by_dist = |a: &(usize, f32), b: &(usize, f32)| {
                    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
                };
                if kk < dist.len() && kk > 0 {
                    dist.select_nth_unstable_by(kk - 1, by_dist);
                }
                dist.truncate(kk);
                dist.sort_by(by_dist);
                Ok(dist.into_iter().unzip())
            }
            NeighbourSearch::Hnsw(dict) => dict.search_others(&i, knn),
        }
    }
}

impl KnnGraph {
    /// Build from a `d x n` matrix whose columns are the points
    pub fn from_columns(points: &DMatrix<f32>, args: KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        let nn = points.ncols();

        if nn < 2 {
            return Err(anyhow::anyhow!("need at least two points, got {}", nn));
        }

        let search = if args.exact {
            NeighbourSearch::Exact(points)
        } else {
            NeighbourSearch::Hnsw(ColumnDict::from_dvector_views(
                points.column_iter().collect(),
                (0..nn).collect(),
            ))
        };

        let directed = directed_neighbours(&search, nn, &args)?;
        let (edges, distances) = union_edges(directed);

        info!(
            "kNN graph over {} points: {} union edges (k = {})",
            nn,
            edges.len(),
            args.knn
        );

        let mut coo = CooMatrix::new(nn, nn);
        for (&(i, j), &d) in edges.iter().zip(distances.iter()) {
            coo.push(i, j, d);
            coo.push(j, i, d);
        }

        Ok(KnnGraph {
            adjacency: CscMatrix::from(&coo),
            edges,
            distances,
            n_nodes: nn,
        })
    }

    /// Build from an `n x d` matrix whose rows are the points
    pub fn from_rows(data: &DMatrix<f32>, args: KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        Self::from_columns(&data.transpose(), args)
    }

    fn lane(&self, node: usize) -> std::ops::Range<usize> {
        let offsets = self.adjacency.col_offsets();
        offsets[node]..offsets[node + 1]
    }

    /// Neighbours of `node`, in increasing index
    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.adjacency.row_indices()[self.lane(node)]
    }

    /// Edge lengths, parallel to `neighbors(node)`
    pub fn neighbor_distances(&self, node: usize) -> &[f32] {
        &self.adjacency.values()[self.lane(node)]
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Component label of every node, numbered in order of each
    /// component's smallest node. Returns `(labels, number of components)`.
    pub fn connected_components(&self) -> (Vec<usize>, usize) {
        let mut sets = DisjointSets::new(self.n_nodes);
        for &(i, j) in &self.edges {
            sets.merge(i, j);
        }

        let mut label_of_root = vec![None; self.n_nodes];
        let mut ncomp = 0;
        let labels = (0..self.n_nodes)
            .map(|i| {
                let root = sets.root(i);
                *label_of_root[root].get_or_insert_with(|| {
                    ncomp += 1;
                    ncomp - 1
                })
            })
            .collect();
        (labels, ncomp)
    }
}

/// Directed `(i, j, d_ij)` for every point `i` and each of its nearest
/// neighbours `j`, searched in parallel blocks
fn directed_neighbours(
    search: &NeighbourSearch,
    nn: usize,
    args: &KnnGraphArgs,
) -> anyhow::Result<Vec<(usize, usize, f32)>> {
    let nquery = args.knn.clamp(1, nn - 1);
    let jobs = create_jobs(nn, args.block_size);
    let njobs = jobs.len() as u64;

    let blocks = jobs
        .into_par_iter()
        .progress_count(njobs)
        .map(|(lb, ub)| -> anyhow::Result<Vec<(usize, usize, f32)>> {
            let mut out = Vec::with_capacity((ub - lb) * nquery);
            for i in lb..ub {
                let (neighbours, dists) = search.search(i, nquery)?;
                out.extend(neighbours.into_iter().zip(dists).map(|(j, d)| (i, j, d)));
            }
            Ok(out)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let directed: Vec<_> = blocks.into_iter().flatten().collect();
    if directed.is_empty() {
        return Err(anyhow::anyhow!("no neighbours found"));
    }
    Ok(directed)
}

/// Canonical undirected edges; an edge found from both ends keeps the
/// shorter length
fn union_edges(directed: Vec<(usize, usize, f32)>) -> (Vec<(usize, usize)>, Vec<f32>) {
    let mut canonical: Vec<((usize, usize), f32)> = directed
        .into_iter()
        .filter(|&(i, j, _)| i != j)
        .map(|(i, j, d)| ((i.min(j), i.max(j)), d))
        .collect();

    canonical.par_sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
    canonical.dedup_by_key(|&mut (ij, _)| ij);
    canonical.into_iter().unzip()
}

/// Disjoint-set forest with path halving and union by size
struct DisjointSets {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn root(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            let grandparent = self.parent[self.parent[x]];
            self.parent[x] = grandparent;
            x = grandparent;
        }
        x
    }

    fn merge(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.root(a), self.root(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}
