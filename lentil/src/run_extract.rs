use crate::common::*;
use clap::Args;
use lentil::dist_matrix::DistMatrix;
use lentil::trajectory::extract_trajectories;
use log::info;
use matrix_util::common_io::{detect_delimiter, mkdir, write_lines};

#[derive(Args, Debug, Clone)]
pub struct ExtractTrajArgs {
    /// genes x dims diffusion embedding (from gene-embed)
    #[arg(short = 'e', long)]
    pub gene_embedding: String,

    /// genes x genes distance matrix
    #[arg(short, long)]
    pub gene_dist: String,

    #[command(flatten)]
    pub extract: ExtractCliArgs,

    /// Output prefix
    #[arg(short, long)]
    pub out: String,
}

pub fn run_extract(args: &ExtractTrajArgs) -> Result<()> {
    let emb = read_named(&args.gene_embedding)?;
    let dist = read_named(&args.gene_dist)?;
    check_names("gene distance rows", &emb.rows, &dist.rows)?;

    let dist = DistMatrix::from_dense_with_missing(dist.mat);
    let res = extract_trajectories(&emb.mat, &dist, &args.extract.to_args())?;

    for (i, traj) in res.trajectories.iter().enumerate() {
        info!(
            "Trajectory-{}: {} genes from {}",
            i + 1,
            traj.genes.len(),
            emb.rows[traj.terminus]
        );
    }

    let out_file = format!("{}.trajectories.tsv", args.out);
    mkdir(&out_file)?;
    write_lines(&res.to_lines(&emb.rows, detect_delimiter(&out_file))?, &out_file)?;
    info!("wrote {}", out_file);
    Ok(())
}
