//! End-to-end driver chaining every stage.
//!
//! ```text
//! cell embedding -> kNN geodesic distance -> (meta-cells) -> gene OT distance
//!     -> (sparsified full-resolution refinement) -> gene diffusion map -> trajectories
//! ```

use crate::cancel::CancelToken;
use crate::coarse_grain::{coarse_grain, CoarseGrainArgs, CoarseGrained};
use crate::diffusion_map::{diffusion_map, DiffusionArgs, DiffusionMap};
use crate::error::{Result, Stage, TrajError};
use crate::gene_distance::{gene_distances, sparsified_gene_pairs, GeneDistances, GenePairs, TransportArgs};
use crate::graph_distance::{graph_distance, GraphDistance, GraphDistanceArgs};
use crate::trajectory::{extract_trajectories, ExtractArgs, GeneTrajectory};

use log::info;
use nalgebra::DMatrix;

/// Restrict full-resolution gene distances to the `alpha * knn` nearest
/// neighbours found on meta-cells
#[derive(Debug, Clone)]
pub struct RefineArgs {
    pub knn: usize,
    pub alpha: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineArgs {
    pub graph: GraphDistanceArgs,
    /// cap unreachable cell distances at this multiple of the largest
    /// finite one
    pub cap_unreachable: Option<f32>,
    pub coarse: Option<CoarseGrainArgs>,
    /// only used together with `coarse`
    pub refine: Option<RefineArgs>,
    pub transport: TransportArgs,
    pub diffusion: DiffusionArgs,
    pub extract: ExtractArgs,
}

pub struct PipelineOutput {
    pub cell_dist: GraphDistance,
    pub coarse: Option<CoarseGrained>,
    /// gene distances over meta-cells, when refined afterwards
    pub coarse_gene_dist: Option<GeneDistances>,
    pub gene_dist: GeneDistances,
    pub gene_embedding: DiffusionMap,
    pub trajectories: GeneTrajectory,
}

/// Run all stages on a cell embedding (cells x dims) and an expression
/// matrix (genes x cells)
pub fn run_pipeline(
    embedding: &DMatrix<f32>,
    expression: &DMatrix<f32>,
    args: &PipelineArgs,
    cancel: &CancelToken,
) -> Result<PipelineOutput> {
    if expression.ncols() != embedding.nrows() {
        return Err(TrajError::parameter(
            Stage::Pipeline,
            "expression",
            format!("{} x {}", expression.nrows(), expression.ncols()),
            format!("needs one column per embedded cell ({})", embedding.nrows()),
        ));
    }

    if args.refine.is_some() && args.coarse.is_none() {
        return Err(TrajError::parameter(
            Stage::Pipeline,
            "refine",
            "set",
            "refinement needs meta-cells",
        ));
    }

    cancel.check(Stage::Pipeline)?;

    info!("step 1: geodesic cell distances");
    let mut cell_dist = graph_distance(embedding, &args.graph, cancel)?;
    if let Some(factor) = args.cap_unreachable {
        cell_dist.cap_unreachable(factor);
    }

    let (coarse, coarse_gene_dist, gene_dist) = match &args.coarse {
        None => {
            info!("step 2: gene distances over {} cells", embedding.nrows());
            let gd = gene_distances(
                &cell_dist.dist,
                expression,
                &GenePairs::All,
                &args.transport,
                cancel,
            )?;
            (None, None, gd)
        }
        Some(coarse_args) => {
            info!("step 2: gene distances over {} meta-cells", coarse_args.num_meta_cells);
            let cg = coarse_grain(embedding, &cell_dist.dist, expression, coarse_args)?;
            let coarse_gd = gene_distances(
                &cg.dist,
                &cg.expression,
                &GenePairs::All,
                &args.transport,
                cancel,
            )?;

            match &args.refine {
                None => (Some(cg), None, coarse_gd),
                Some(refine) => {
                    info!("step 2b: refining selected pairs over all cells");
                    let pairs = sparsified_gene_pairs(&coarse_gd.dist, refine.knn, refine.alpha)?;
                    let fine_gd = gene_distances(
                        &cell_dist.dist,
                        expression,
                        &GenePairs::Restricted(pairs),
                        &args.transport,
                        cancel,
                    )?;
                    (Some(cg), Some(coarse_gd), fine_gd)
                }
            }
        }
    };

    info!("step 3: gene diffusion map");
    let gene_embedding = diffusion_map(&gene_dist.dist, &args.diffusion)?;

    info!("step 4: trajectories");
    let trajectories = extract_trajectories(&gene_embedding.coords, &gene_dist.dist, &args.extract)?;

    Ok(PipelineOutput {
        cell_dist,
        coarse,
        coarse_gene_dist,
        gene_dist,
        gene_embedding,
        trajectories,
    })
}
