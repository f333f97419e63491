use crate::common::*;
use clap::Args;
use lentil::diffusion_map::diffusion_map;
use lentil::dist_matrix::DistMatrix;
use matrix_util::traits::MatOps;
use nalgebra::DMatrix;

#[derive(Args, Debug, Clone)]
pub struct CellEmbedArgs {
    /// cells x features matrix (e.g. principal components)
    #[arg(short, long)]
    pub input: String,

    #[command(flatten)]
    pub diffusion: DiffusionCliArgs,

    /// Output prefix
    #[arg(short, long)]
    pub out: String,
}

/// Diffusion-map embedding of cells from Euclidean distances
pub fn run_cell_embed(args: &CellEmbedArgs) -> Result<()> {
    let data = read_named(&args.input)?;
    let dist = DistMatrix::Dense(data.mat.pairwise_row_distances());

    let dm = diffusion_map(&dist, &args.diffusion.to_args())?;
    let kk = dm.eigenvalues.len();
    let dc = numbered("DC", kk);

    write_named(
        &dm.coords,
        &format!("{}.cell_embedding.tsv.gz", args.out),
        &data.rows,
        &dc,
    )?;

    let eigenvalues = DMatrix::from_column_slice(kk, 1, dm.eigenvalues.as_slice());
    write_named(
        &eigenvalues,
        &format!("{}.cell_eigenvalues.tsv", args.out),
        &dc,
        &[Box::<str>::from("eigenvalue")],
    )?;

    Ok(())
}
