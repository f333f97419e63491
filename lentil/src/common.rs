use clap::Args;
use lentil::diffusion_map::DiffusionArgs;
use lentil::dist_matrix::DistMatrix;
use lentil::gene_distance::{TransportArgs, TransportMethod};
use lentil::graph_distance::GraphDistanceArgs;
use lentil::trajectory::{ExtractArgs, Origin};
use log::info;
use matrix_util::common_io::{detect_delimiter, mkdir};
use matrix_util::traits::{IoOps, MatWithNames};
use nalgebra::DMatrix;

pub use anyhow::Result;

#[derive(Args, Debug, Clone)]
pub struct GraphCliArgs {
    /// nearest neighbours per cell in the kNN graph
    #[arg(long, default_value_t = 5)]
    pub knn_cells: usize,

    /// largest number of connected components tolerated
    #[arg(long, default_value_t = 1)]
    pub max_components: usize,

    /// use HNSW approximate neighbour search
    #[arg(long, default_value_t = false)]
    pub approximate: bool,

    /// replace unreachable distances by this multiple of the largest
    /// finite one (needs --max-components > 1)
    #[arg(long)]
    pub cap_unreachable: Option<f32>,
}

impl GraphCliArgs {
    pub fn to_args(&self) -> GraphDistanceArgs {
        GraphDistanceArgs {
            knn: self.knn_cells,
            max_components: self.max_components,
            exact: !self.approximate,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TransportCliArgs {
    /// optimal transport solver
    #[arg(long, value_enum, default_value = "exact")]
    pub method: TransportMethod,

    /// iteration cap (default: 100000 exact, 1000 sinkhorn)
    #[arg(long)]
    pub ot_max_iter: Option<usize>,

    /// convergence tolerance (default: 1e-9 exact, 1e-6 sinkhorn)
    #[arg(long)]
    pub ot_tolerance: Option<f64>,

    /// Sinkhorn regularization relative to the largest cost
    #[arg(long, default_value_t = 0.05)]
    pub epsilon: f64,
}

impl TransportCliArgs {
    pub fn to_args(&self) -> TransportArgs {
        let base = match self.method {
            TransportMethod::Exact => TransportArgs::default(),
            TransportMethod::Sinkhorn => TransportArgs::sinkhorn(),
        };
        TransportArgs {
            max_iter: self.ot_max_iter.unwrap_or(base.max_iter),
            tolerance: self.ot_tolerance.unwrap_or(base.tolerance),
            epsilon: self.epsilon,
            ..base
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DiffusionCliArgs {
    /// neighbour rank that sets the kernel bandwidth
    #[arg(long, default_value_t = 10)]
    pub knn_kernel: usize,

    /// number of diffusion components
    #[arg(long, default_value_t = 30)]
    pub n_components: usize,

    /// diffusion time
    #[arg(long, default_value_t = 1)]
    pub t: u32,

    /// density normalization exponent
    #[arg(long, default_value_t = 1.0)]
    pub alpha: f64,
}

impl DiffusionCliArgs {
    pub fn to_args(&self) -> DiffusionArgs {
        DiffusionArgs {
            knn: self.knn_kernel,
            n_components: self.n_components,
            t: self.t,
            alpha: self.alpha,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExtractCliArgs {
    /// number of trajectories
    #[arg(long, default_value_t = 3)]
    pub num_trajectories: usize,

    /// random-walk steps, one per trajectory (comma separated)
    #[arg(long, value_delimiter = ',', default_value = "4,4,4")]
    pub t_list: Vec<usize>,

    /// neighbours per gene in the walk graph
    #[arg(long, default_value_t = 10)]
    pub knn_genes: usize,

    /// embedding dimensions used for termini and pseudo-order
    #[arg(long, default_value_t = 5)]
    pub dims: usize,

    /// walk probability threshold, relative to the largest
    #[arg(long, default_value_t = 0.02)]
    pub threshold: f64,

    /// reference point for picking termini
    #[arg(long, value_enum, default_value = "zero")]
    pub origin: Origin,
}

impl ExtractCliArgs {
    pub fn to_args(&self) -> ExtractArgs {
        ExtractArgs {
            num_trajectories: self.num_trajectories,
            t_list: self.t_list.clone(),
            knn: self.knn_genes,
            dims: self.dims,
            threshold: self.threshold,
            origin: self.origin,
        }
    }
}

/// Read a delimited matrix with row and column names; the delimiter
/// follows the file extension
pub fn read_named(file: &str) -> Result<MatWithNames<DMatrix<f32>>> {
    let out = DMatrix::<f32>::read_named_delim(file, detect_delimiter(file))?;
    info!(
        "read {} x {} matrix from {}",
        out.mat.nrows(),
        out.mat.ncols(),
        file
    );
    Ok(out)
}

pub fn write_named(
    mat: &DMatrix<f32>,
    file: &str,
    rows: &[Box<str>],
    cols: &[Box<str>],
) -> Result<()> {
    mkdir(file)?;
    mat.write_named_delim(file, detect_delimiter(file), rows, cols)?;
    info!("wrote {}", file);
    Ok(())
}

pub fn write_dist(dist: &DistMatrix, file: &str, names: &[Box<str>]) -> Result<()> {
    mkdir(file)?;
    dist.write_named(file, detect_delimiter(file), names)?;
    info!("wrote {}", file);
    Ok(())
}

/// `prefix_1`, `prefix_2`, ...
pub fn numbered(prefix: &str, n: usize) -> Vec<Box<str>> {
    (1..=n)
        .map(|i| format!("{}_{}", prefix, i).into_boxed_str())
        .collect()
}

/// Names must match in order; used to align inputs from different files
pub fn check_names(what: &str, expected: &[Box<str>], found: &[Box<str>]) -> Result<()> {
    if expected != found {
        return Err(anyhow::anyhow!(
            "{}: names differ ({} vs {} entries)",
            what,
            expected.len(),
            found.len()
        ));
    }
    Ok(())
}
