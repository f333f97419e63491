//! Sequential extraction of gene trajectories.
//!
//! Each round picks the available gene furthest from the origin of the
//! gene embedding as a terminus, diffuses a random walk from it over the
//! kNN graph of the remaining genes, and claims every gene the walk
//! reaches with enough probability. Rounds are folded over an immutable
//! [`ExtractionState`].

use crate::diffusion_map::random_walk_matrix;
use crate::dist_matrix::DistMatrix;
use crate::error::{Result, Stage, TrajError};

use clap::ValueEnum;
use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use std::fmt;

/// Reference point for picking termini
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum Origin {
    /// the coordinate origin
    Zero,
    /// the mean of the available genes
    Mean,
}

#[derive(Debug, Clone)]
pub struct ExtractArgs {
    pub num_trajectories: usize,
    /// random-walk steps per trajectory
    pub t_list: Vec<usize>,
    /// neighbours per gene in the walk graph
    pub knn: usize,
    /// leading embedding dimensions used for termini and pseudo-order
    pub dims: usize,
    /// a gene joins when its walk probability exceeds this fraction of
    /// the largest one
    pub threshold: f64,
    pub origin: Origin,
}

impl Default for ExtractArgs {
    fn default() -> Self {
        Self {
            num_trajectories: 3,
            t_list: vec![4, 4, 4],
            knn: 10,
            dims: 5,
            threshold: 0.02,
            origin: Origin::Zero,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneLabel {
    /// zero-based trajectory index
    Trajectory(usize),
    Unselected,
}

impl fmt::Display for GeneLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneLabel::Trajectory(i) => write!(f, "Trajectory-{}", i + 1),
            GeneLabel::Unselected => write!(f, "Unselected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub terminus: usize,
    /// member genes, from the terminus outward
    pub genes: Vec<usize>,
    /// distance to the terminus in the embedding, parallel to `genes`
    pub pseudo_order: Vec<f32>,
}

impl Trajectory {
    /// 1-based position of `gene` along this trajectory
    pub fn rank(&self, gene: usize) -> Option<usize> {
        self.genes.iter().position(|&g| g == gene).map(|r| r + 1)
    }
}

/// Progress of the extraction: genes not yet claimed and the
/// trajectories found so far
#[derive(Debug, Clone)]
pub struct ExtractionState {
    pub available: Vec<bool>,
    pub trajectories: Vec<Trajectory>,
    pub warnings: Vec<String>,
}

impl ExtractionState {
    pub fn new(ngenes: usize) -> Self {
        Self {
            available: vec![true; ngenes],
            trajectories: vec![],
            warnings: vec![],
        }
    }

    pub fn available_genes(&self) -> Vec<usize> {
        (0..self.available.len())
            .filter(|&g| self.available[g])
            .collect()
    }

    /// Run one round with `t` walk steps; returns the next state
    pub fn extract_next(
        self,
        coords: &DMatrix<f32>,
        dist: &DistMatrix,
        t: usize,
        args: &ExtractArgs,
    ) -> Result<ExtractionState> {
        let avail = self.available_genes();
        if avail.is_empty() {
            return Ok(self);
        }

        let round = self.trajectories.len() + 1;
        let dims = args.dims.min(coords.ncols());
        let mut warnings = self.warnings;

        let terminus = select_terminus(coords, &avail, dims, args.origin);

        let members: Vec<usize> = if t == 0 || avail.len() == 1 {
            vec![terminus]
        } else {
            let mut knn = args.knn;
            if knn > avail.len() - 1 {
                knn = avail.len() - 1;
                let msg = format!(
                    "trajectory {}: only {} genes left, neighbours reduced from {} to {}",
                    round,
                    avail.len(),
                    args.knn,
                    knn
                );
                warn!("{}", msg);
                warnings.push(msg);
            }

            let walk = random_walk_matrix(&dist.submatrix(&avail), knn)?;
            let start = avail.iter().position(|&g| g == terminus).unwrap_or(0);
            let visits = random_walk(&walk, start, t);

            let vmax = visits.max();
            let mut members: Vec<usize> = avail
                .iter()
                .enumerate()
                .filter(|&(l, &g)| g == terminus || visits[l] > args.threshold * vmax)
                .map(|(_, &g)| g)
                .collect();
            members.sort_unstable();
            members
        };

        let trajectory = order_from_terminus(coords, terminus, members, dims);

        info!(
            "trajectory {}: terminus {}, {} genes",
            round,
            terminus,
            trajectory.genes.len()
        );

        let mut available = self.available;
        for &g in &trajectory.genes {
            available[g] = false;
        }

        let mut trajectories = self.trajectories;
        trajectories.push(trajectory);

        Ok(ExtractionState {
            available,
            trajectories,
            warnings,
        })
    }
}

/// Available gene with the largest norm relative to `origin` over the
/// first `dims` coordinates; ties go to the smaller index
fn select_terminus(coords: &DMatrix<f32>, avail: &[usize], dims: usize, origin: Origin) -> usize {
    let center: Vec<f32> = match origin {
        Origin::Zero => vec![0.0; dims],
        Origin::Mean => (0..dims)
            .map(|d| avail.iter().map(|&g| coords[(g, d)]).sum::<f32>() / avail.len() as f32)
            .collect(),
    };

    let mut best = (avail[0], f32::NEG_INFINITY);
    for &g in avail {
        let norm: f32 = (0..dims)
            .map(|d| (coords[(g, d)] - center[d]).powi(2))
            .sum::<f32>()
            .sqrt();
        if norm > best.1 {
            best = (g, norm);
        }
    }
    best.0
}

/// Distribution of a `t`-step walk started at `start`
fn random_walk(walk: &DMatrix<f64>, start: usize, t: usize) -> DVector<f64> {
    let mut p = DVector::<f64>::zeros(walk.nrows());
    p[start] = 1.0;
    let walk_t = walk.transpose();
    for _ in 0..t {
        p = &walk_t * p;
    }
    p
}

fn order_from_terminus(
    coords: &DMatrix<f32>,
    terminus: usize,
    genes: Vec<usize>,
    dims: usize,
) -> Trajectory {
    let mut scored: Vec<(usize, f32)> = genes
        .into_iter()
        .map(|g| {
            let d = (0..dims)
                .map(|k| (coords[(g, k)] - coords[(terminus, k)]).powi(2))
                .sum::<f32>()
                .sqrt();
            (g, d)
        })
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let (genes, pseudo_order) = scored.into_iter().unzip();
    Trajectory {
        terminus,
        genes,
        pseudo_order,
    }
}

pub struct GeneTrajectory {
    pub trajectories: Vec<Trajectory>,
    pub labels: Vec<GeneLabel>,
    pub warnings: Vec<String>,
}

impl GeneTrajectory {
    pub fn num_genes(&self) -> usize {
        self.labels.len()
    }

    /// One line per gene: name, label, then the 1-based rank in each
    /// trajectory (0 if not a member). The first line is a header.
    pub fn to_lines(
        &self,
        gene_names: &[Box<str>],
        delim: &str,
    ) -> anyhow::Result<Vec<Box<str>>> {
        if gene_names.len() != self.labels.len() {
            return Err(anyhow::anyhow!(
                "{} gene names for {} labelled genes",
                gene_names.len(),
                self.labels.len()
            ));
        }

        let mut header = vec!["gene".to_string(), "selected".to_string()];
        header.extend((1..=self.trajectories.len()).map(|i| format!("pseudoorder_{}", i)));

        let mut lines = vec![header.join(delim).into_boxed_str()];
        for (g, label) in self.labels.iter().enumerate() {
            let mut words = vec![gene_names[g].to_string(), label.to_string()];
            words.extend(
                self.trajectories
                    .iter()
                    .map(|traj| traj.rank(g).unwrap_or(0).to_string()),
            );
            lines.push(words.join(delim).into_boxed_str());
        }
        Ok(lines)
    }
}

/// Extract up to `num_trajectories` trajectories from a gene embedding
/// (`coords`, genes x dims) and gene-gene distances.
///
/// Stops early when every gene is claimed; unclaimed genes are
/// `Unselected`.
pub fn extract_trajectories(
    coords: &DMatrix<f32>,
    dist: &DistMatrix,
    args: &ExtractArgs,
) -> Result<GeneTrajectory> {
    let stage = Stage::Trajectory;
    let ngenes = coords.nrows();

    if dist.nrows() != ngenes || dist.ncols() != ngenes {
        return Err(TrajError::parameter(
            stage,
            "distance",
            format!("{} x {}", dist.nrows(), dist.ncols()),
            format!("must match the {} embedded genes", ngenes),
        ));
    }
    if args.num_trajectories < 1 {
        return Err(TrajError::parameter(
            stage,
            "num_trajectories",
            args.num_trajectories,
            "need at least one",
        ));
    }
    if args.t_list.len() != args.num_trajectories {
        return Err(TrajError::parameter(
            stage,
            "t_list",
            format!("{:?}", args.t_list),
            format!("need one step count per trajectory ({})", args.num_trajectories),
        ));
    }
    if args.dims < 1 || coords.ncols() < 1 {
        return Err(TrajError::parameter(
            stage,
            "dims",
            args.dims,
            "need at least one embedding dimension",
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
    if !(0.0..1.0).contains(&args.threshold) {
        return Err(TrajError::parameter(
            stage,
            "threshold",
            args.threshold,
            "must be in [0, 1)",
        ));
    }

    let state = args
        .t_list
        .iter()
        .try_fold(ExtractionState::new(ngenes), |state, &t| {
            state.extract_next(coords, dist, t, args)
        })?;

    let mut labels = vec![GeneLabel::Unselected; ngenes];
    for (i, traj) in state.trajectories.iter().enumerate() {
        for &g in &traj.genes {
            labels[g] = GeneLabel::Trajectory(i);
        }
    }

    Ok(GeneTrajectory {
        trajectories: state.trajectories,
        labels,
        warnings: state.warnings,
    })
}
