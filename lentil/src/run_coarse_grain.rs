use crate::common::*;
use clap::Args;
use lentil::coarse_grain::{coarse_grain, Aggregation, CoarseGrainArgs};
use nalgebra::DMatrix;

#[derive(Args, Debug, Clone)]
pub struct CoarseGrainCliArgs {
    /// cells x dims embedding used for clustering
    #[arg(short, long)]
    pub embedding: String,

    /// cells x cells distance matrix (from graph-dist)
    #[arg(short, long)]
    pub cell_dist: String,

    /// genes x cells expression matrix
    #[arg(short = 'x', long)]
    pub expression: String,

    /// number of meta-cells
    #[arg(short, long)]
    pub num_meta_cells: usize,

    /// how member expression is combined
    #[arg(long, value_enum, default_value = "sum")]
    pub aggregation: Aggregation,

    /// k-means iterations
    #[arg(long, default_value_t = 100)]
    pub max_iter: usize,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output prefix
    #[arg(short, long)]
    pub out: String,
}

pub fn run_coarse_grain(args: &CoarseGrainCliArgs) -> Result<()> {
    let emb = read_named(&args.embedding)?;
    let dist = read_named(&args.cell_dist)?;
    let expr = read_named(&args.expression)?;

    check_names("cell distance rows", &emb.rows, &dist.rows)?;
    check_names("expression columns", &emb.rows, &expr.cols)?;

    let cg = coarse_grain(
        &emb.mat,
        &dist.mat,
        &expr.mat,
        &CoarseGrainArgs {
            num_meta_cells: args.num_meta_cells,
            max_iter: args.max_iter,
            seed: args.seed,
            aggregation: args.aggregation,
        },
    )?;

    let meta = numbered("meta", cg.sizes.len());

    let membership = DMatrix::from_iterator(
        cg.membership.len(),
        1,
        cg.membership.iter().map(|&k| (k + 1) as f32),
    );
    write_named(
        &membership,
        &format!("{}.membership.tsv.gz", args.out),
        &emb.rows,
        &[Box::<str>::from("meta_cell")],
    )?;
    write_named(
        &cg.dist,
        &format!("{}.meta_dist.tsv.gz", args.out),
        &meta,
        &meta,
    )?;
    write_named(
        &cg.expression,
        &format!("{}.meta_expression.tsv.gz", args.out),
        &expr.rows,
        &meta,
    )?;

    Ok(())
}
