use crate::common::*;
use clap::Args;
use lentil::cancel::CancelToken;
use lentil::dist_matrix::DistMatrix;
use lentil::gene_distance::{gene_distances, sparsified_gene_pairs, GenePairs};
use log::info;
use matrix_util::common_io::write_lines;

#[derive(Args, Debug, Clone)]
pub struct GeneDistArgs {
    /// cells x cells ground cost (from graph-dist or coarse-grain)
    #[arg(short, long)]
    pub cost: String,

    /// genes x cells expression over the same cells
    #[arg(short = 'x', long)]
    pub expression: String,

    /// genes x genes distances from a coarse run; only pairs among
    /// each gene's alpha * knn nearest neighbours are computed
    #[arg(long)]
    pub coarse_gene_dist: Option<String>,

    /// neighbours per gene for sparsification
    #[arg(long, default_value_t = 10)]
    pub knn: usize,

    /// neighbour multiplier for sparsification
    #[arg(long, default_value_t = 5)]
    pub alpha: usize,

    #[command(flatten)]
    pub transport: TransportCliArgs,

    /// Output prefix
    #[arg(short, long)]
    pub out: String,
}

pub fn run_gene_dist(args: &GeneDistArgs) -> Result<()> {
    let cost = read_named(&args.cost)?;
    let expr = read_named(&args.expression)?;
    check_names("expression columns", &cost.rows, &expr.cols)?;

    let pairs = match &args.coarse_gene_dist {
        Some(file) => {
            let coarse = read_named(file)?;
            check_names("coarse gene distance rows", &expr.rows, &coarse.rows)?;
            let coarse = DistMatrix::from_dense_with_missing(coarse.mat);
            GenePairs::Restricted(sparsified_gene_pairs(&coarse, args.knn, args.alpha)?)
        }
        None => GenePairs::All,
    };

    let gd = gene_distances(
        &cost.mat,
        &expr.mat,
        &pairs,
        &args.transport.to_args(),
        &CancelToken::new(),
    )?;

    info!(
        "{} pairs computed, {} did not converge",
        gd.num_pairs,
        gd.unconverged.len()
    );

    write_dist(&gd.dist, &format!("{}.gene_dist.tsv.gz", args.out), &expr.rows)?;

    if !gd.unconverged.is_empty() {
        let lines: Vec<Box<str>> = gd
            .unconverged
            .iter()
            .map(|&(i, j)| format!("{}\t{}", expr.rows[i], expr.rows[j]).into_boxed_str())
            .collect();
        write_lines(&lines, &format!("{}.unconverged.tsv", args.out))?;
    }

    Ok(())
}
