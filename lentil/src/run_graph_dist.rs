use crate::common::*;
use clap::Args;
use lentil::cancel::CancelToken;
use lentil::graph_distance::graph_distance;
use log::info;
use nalgebra::DMatrix;

#[derive(Args, Debug, Clone)]
pub struct GraphDistArgs {
    /// cells x dims embedding (e.g. diffusion components)
    #[arg(short, long)]
    pub embedding: String,

    #[command(flatten)]
    pub graph: GraphCliArgs,

    /// Output prefix
    #[arg(short, long)]
    pub out: String,
}

pub fn run_graph_dist(args: &GraphDistArgs) -> Result<()> {
    let emb = read_named(&args.embedding)?;
    let mut gd = graph_distance(&emb.mat, &args.graph.to_args(), &CancelToken::new())?;

    if let Some(factor) = args.graph.cap_unreachable {
        gd.cap_unreachable(factor);
    }

    info!(
        "{} cells, {} components, {} unreachable pairs",
        gd.dist.nrows(),
        gd.n_components,
        gd.unreachable_pairs
    );

    write_named(
        &gd.dist,
        &format!("{}.cell_dist.tsv.gz", args.out),
        &emb.rows,
        &emb.rows,
    )?;

    let component = DMatrix::from_iterator(
        gd.membership.len(),
        1,
        gd.membership.iter().map(|&k| k as f32),
    );
    write_named(
        &component,
        &format!("{}.cell_component.tsv.gz", args.out),
        &emb.rows,
        &[Box::<str>::from("component")],
    )?;

    Ok(())
}
