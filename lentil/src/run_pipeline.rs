use crate::common::*;
use clap::Args;
use lentil::cancel::CancelToken;
use lentil::coarse_grain::{Aggregation, CoarseGrainArgs};
use lentil::gene_filter::{filter_genes, GeneFilterArgs};
use lentil::pipeline::{run_pipeline, PipelineArgs, RefineArgs};
use log::info;
use matrix_util::common_io::write_lines;
use nalgebra::DMatrix;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// cells x dims embedding (e.g. diffusion components)
    #[arg(short, long)]
    pub embedding: String,

    /// genes x cells expression matrix
    #[arg(short = 'x', long)]
    pub expression: String,

    /// keep genes detected in at least this fraction of cells
    #[arg(long, default_value_t = 0.01)]
    pub min_frac: f32,

    /// keep genes detected in at most this fraction of cells
    #[arg(long, default_value_t = 0.5)]
    pub max_frac: f32,

    #[command(flatten)]
    pub graph: GraphCliArgs,

    /// compute gene distances over this many meta-cells
    #[arg(long)]
    pub num_meta_cells: Option<usize>,

    /// how member expression is combined into meta-cells
    #[arg(long, value_enum, default_value = "sum")]
    pub aggregation: Aggregation,

    /// recompute the nearest gene pairs over all cells after the
    /// meta-cell pass
    #[arg(long, default_value_t = false)]
    pub refine: bool,

    /// neighbours per gene kept for refinement
    #[arg(long, default_value_t = 10)]
    pub refine_knn: usize,

    /// neighbour multiplier for refinement
    #[arg(long, default_value_t = 5)]
    pub refine_alpha: usize,

    #[command(flatten)]
    pub transport: TransportCliArgs,

    #[command(flatten)]
    pub diffusion: DiffusionCliArgs,

    #[command(flatten)]
    pub extract: ExtractCliArgs,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output prefix
    #[arg(short, long)]
    pub out: String,
}

pub fn run_all(args: &RunArgs) -> Result<()> {
    let emb = read_named(&args.embedding)?;
    let expr = read_named(&args.expression)?;
    check_names("expression columns", &emb.rows, &expr.cols)?;

    let kept = filter_genes(
        &expr.mat,
        &GeneFilterArgs {
            min_frac: args.min_frac,
            max_frac: args.max_frac,
        },
    )?;
    if kept.is_empty() {
        return Err(anyhow::anyhow!("no gene passed the detection filter"));
    }
    let gene_names: Vec<Box<str>> = kept.iter().map(|&g| expr.rows[g].clone()).collect();
    let expression = expr.mat.select_rows(&kept);

    let pipeline_args = PipelineArgs {
        graph: args.graph.to_args(),
        cap_unreachable: args.graph.cap_unreachable,
        coarse: args.num_meta_cells.map(|n| CoarseGrainArgs {
            num_meta_cells: n,
            seed: args.seed,
            aggregation: args.aggregation,
            ..Default::default()
        }),
        refine: args.refine.then_some(RefineArgs {
            knn: args.refine_knn,
            alpha: args.refine_alpha,
        }),
        transport: args.transport.to_args(),
        diffusion: args.diffusion.to_args(),
        extract: args.extract.to_args(),
    };

    let out = run_pipeline(&emb.mat, &expression, &pipeline_args, &CancelToken::new())?;

    let dc = numbered("DC", out.gene_embedding.eigenvalues.len());

    let cell_dist_file = format!("{}.cell_dist.tsv.gz", args.out);
    write_named(&out.cell_dist.dist, &cell_dist_file, &emb.rows, &emb.rows)?;

    if let Some(cg) = &out.coarse {
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
    }

    if let Some(coarse_gd) = &out.coarse_gene_dist {
        write_dist(
            &coarse_gd.dist,
            &format!("{}.coarse_gene_dist.tsv.gz", args.out),
            &gene_names,
        )?;
    }

    let gene_dist_file = format!("{}.gene_dist.tsv.gz", args.out);
    write_dist(&out.gene_dist.dist, &gene_dist_file, &gene_names)?;

    let embedding_file = format!("{}.gene_embedding.tsv.gz", args.out);
    write_named(&out.gene_embedding.coords, &embedding_file, &gene_names, &dc)?;

    let eigenvalues = DMatrix::from_column_slice(
        dc.len(),
        1,
        out.gene_embedding.eigenvalues.as_slice(),
    );
    write_named(
        &eigenvalues,
        &format!("{}.gene_eigenvalues.tsv", args.out),
        &dc,
        &[Box::<str>::from("eigenvalue")],
    )?;

    let traj_file = format!("{}.trajectories.tsv", args.out);
    write_lines(&out.trajectories.to_lines(&gene_names, "\t")?, &traj_file)?;
    info!("wrote {}", traj_file);

    let param_file = format!("{}.parameters.json", args.out);
    let params = serde_json::json!({
        "command": "run",
        "num_cells": emb.rows.len(),
        "num_genes_input": expr.rows.len(),
        "num_genes_kept": gene_names.len(),
        "min_frac": args.min_frac,
        "max_frac": args.max_frac,
        "knn_cells": args.graph.knn_cells,
        "max_components": args.graph.max_components,
        "approximate": args.graph.approximate,
        "cap_unreachable": args.graph.cap_unreachable,
        "num_components": out.cell_dist.n_components,
        "num_meta_cells": args.num_meta_cells,
        "aggregation": format!("{:?}", args.aggregation),
        "refine": args.refine,
        "refine_knn": args.refine_knn,
        "refine_alpha": args.refine_alpha,
        "transport": {
            "method": format!("{:?}", pipeline_args.transport.method),
            "max_iter": pipeline_args.transport.max_iter,
            "tolerance": pipeline_args.transport.tolerance,
            "epsilon": pipeline_args.transport.epsilon,
            "num_pairs": out.gene_dist.num_pairs,
            "num_unconverged": out.gene_dist.unconverged.len(),
        },
        "diffusion": {
            "knn": args.diffusion.knn_kernel,
            "n_components": args.diffusion.n_components,
            "t": args.diffusion.t,
            "alpha": args.diffusion.alpha,
        },
        "extract": {
            "num_trajectories": args.extract.num_trajectories,
            "t_list": args.extract.t_list,
            "knn": args.extract.knn_genes,
            "dims": args.extract.dims,
            "threshold": args.extract.threshold,
            "origin": format!("{:?}", args.extract.origin),
        },
        "warnings": out.trajectories.warnings,
        "seed": args.seed,
    });
    std::fs::write(&param_file, serde_json::to_string_pretty(&params)?)?;
    info!("Wrote parameters: {}", param_file);

    Ok(())
}
