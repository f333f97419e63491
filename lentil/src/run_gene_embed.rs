use crate::common::*;
use clap::Args;
use lentil::diffusion_map::diffusion_map;
use lentil::dist_matrix::DistMatrix;
use nalgebra::DMatrix;

#[derive(Args, Debug, Clone)]
pub struct GeneEmbedArgs {
    /// genes x genes distance matrix (`NA` = not computed)
    #[arg(short, long)]
    pub gene_dist: String,

    #[command(flatten)]
    pub diffusion: DiffusionCliArgs,

    /// Output prefix
    #[arg(short, long)]
    pub out: String,
}

pub fn run_gene_embed(args: &GeneEmbedArgs) -> Result<()> {
    let data = read_named(&args.gene_dist)?;
    let dist = DistMatrix::from_dense_with_missing(data.mat);

    let dm = diffusion_map(&dist, &args.diffusion.to_args())?;
    let kk = dm.eigenvalues.len();
    let dc = numbered("DC", kk);

    write_named(
        &dm.coords,
        &format!("{}.gene_embedding.tsv.gz", args.out),
        &data.rows,
        &dc,
    )?;

    let eigenvalues = DMatrix::from_column_slice(kk, 1, dm.eigenvalues.as_slice());
    write_named(
        &eigenvalues,
        &format!("{}.gene_eigenvalues.tsv", args.out),
        &dc,
        &[Box::<str>::from("eigenvalue")],
    )?;

    Ok(())
}
